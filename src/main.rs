mod cli;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use cli::{Cli, Commands};
use colored::*;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use payout_claims::{
    api,
    app::App,
    claims::{Claim, ClaimStatus},
    config::Config,
    solana::TokenAmount,
    storage::{ClaimSummary, Database},
    treasury::{PendingReconciliation, Resolution},
    utils,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("payout_claims=debug,info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Serve { bind, funding_interval } => serve(&config, bind, funding_interval).await,
        Commands::Init => initialize(&config),
        Commands::Stats { format } => show_stats(&config, &format),
        Commands::History { limit, format } => show_history(&config, limit, &format),
        Commands::Show { subject } => show_claim(&config, &subject),
        Commands::Pending { older_than } => show_pending(&config, older_than),
        Commands::Resolve {
            claim_id,
            status,
            tx_hashes,
            yes,
        } => resolve_claim(&config, claim_id, &status, tx_hashes, yes).await,
        Commands::Funding => show_funding(&config).await,
    };

    if let Err(e) = result {
        error!("{}", format!("Error: {:#}", e).red());
        std::process::exit(1);
    }
}

fn token(config: &Config) -> TokenAmount {
    TokenAmount::new(config.payout.token_decimals)
}

fn open_db(config: &Config) -> anyhow::Result<Database> {
    Database::new(&config.database.path).with_context(|| format!("opening ledger at {}", config.database.path))
}

async fn serve(config: &Config, bind: Option<String>, funding_interval: u64) -> anyhow::Result<()> {
    let app = App::build(config)?;
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());

    if let (Some(monitor), true) = (app.monitor.clone(), funding_interval > 0) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(funding_interval));
            loop {
                ticker.tick().await;
                if let Err(e) = monitor.check().await {
                    warn!("Funding balance check failed: {}", e);
                }
            }
        });
    }

    let router = api::router(app.state());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {}", bind))?;

    info!("Claim API listening on http://{}", bind);
    println!("{}", format!("✓ Listening on http://{}", bind).green());
    axum::serve(listener, router).await?;
    Ok(())
}

fn initialize(config: &Config) -> anyhow::Result<()> {
    println!("{}", "Initializing payout claims...".green());
    let settings = config.claim_settings()?;
    let _db = open_db(config)?;
    println!("{}", "✓ Database initialized".green());
    println!("{}", "✓ Configuration loaded".green());

    let token = settings.token;
    let symbol = settings.token_symbol.as_str();
    let ends = |end: Option<chrono::DateTime<chrono::Utc>>| {
        end.map(|at| utils::format_timestamp(&at)).unwrap_or_else(|| "open".to_string())
    };

    println!("\n{}", "Configuration:".cyan());
    println!("  RPC URL:          {}", config.payout.rpc_url);
    println!("  Token:            {} ({})", symbol, config.payout.token_address);
    match config.funding_wallet() {
        Some(funding) => println!("  Funding wallet:   {}", funding.address),
        None => println!("  Funding wallet:   {}", "not configured, claims refused".yellow()),
    }
    println!("  Max per claim:    {}", utils::format_amount(&token, settings.limits.max_per_tx, symbol));
    println!("  Max per wallet:   {}", utils::format_amount(&token, settings.limits.max_per_wallet, symbol));
    println!("  Max claims:       {}", settings.limits.max_claims_per_wallet);
    println!(
        "  Cashback:         {:.2}% on {}, ends {}",
        settings.cashback.reward_rate_bps as f64 / 100.0,
        settings.cashback.expected_network,
        ends(settings.cashback.campaign_end)
    );
    println!(
        "  Referral:         {} + {}, ends {}",
        utils::format_amount(&token, settings.referral.referrer_reward, symbol),
        utils::format_amount(&token, settings.referral.referred_reward, symbol),
        ends(settings.referral.campaign_end)
    );

    println!("\n{}", "Ready to use! Try running:".cyan());
    println!("  {} to serve the claim API", "payout-claims serve".yellow());
    println!("  {} to view statistics", "payout-claims stats".yellow());
    Ok(())
}

fn show_stats(config: &Config, format: &str) -> anyhow::Result<()> {
    let db = open_db(config)?;
    let stats = db.get_stats()?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let token = token(config);
    let symbol = config.payout.token_symbol.as_str();

    println!("{}", "=== Payout Claim Statistics ===".cyan().bold());
    println!("\nClaims:");
    println!("  Total:      {}", stats.total_claims);
    println!("  Completed:  {}", stats.completed_claims.to_string().green());
    println!("  Pending:    {}", stats.pending_claims.to_string().yellow());
    println!("  Failed:     {}", stats.failed_claims.to_string().red());

    println!("\nPaid out:");
    println!("  Cashback:   {}", utils::format_amount(&token, stats.cashback_paid, symbol));
    println!("  Referral:   {}", utils::format_amount(&token, stats.referral_paid, symbol));
    println!("  Total:      {}", utils::format_amount(&token, stats.total_paid, symbol));
    Ok(())
}

const CLAIM_COLUMNS: [usize; 6] = [6, 10, 22, 18, 18, 22];

fn print_claim_rows(claims: &[Claim], token: &TokenAmount) {
    utils::print_table_border(106);
    utils::print_table_row(&["ID", "Status", "Subject", "Claimant", "Amount", "Updated"], &CLAIM_COLUMNS);
    utils::print_table_border(106);

    for claim in claims {
        let status = match claim.status {
            ClaimStatus::Completed => claim.status.as_str().green(),
            ClaimStatus::Pending => claim.status.as_str().yellow(),
            ClaimStatus::Failed => claim.status.as_str().red(),
        };
        utils::print_table_row(
            &[
                &claim.id.to_string(),
                &status.to_string(),
                &utils::format_address(&claim.subject_id),
                &utils::format_address(&claim.claimant_wallet),
                &token.format(claim.total_amount(), claim.token_symbol().unwrap_or_default()),
                &utils::format_timestamp(&claim.updated_at),
            ],
            &CLAIM_COLUMNS,
        );
    }
    utils::print_table_border(106);
}

fn show_history(config: &Config, limit: usize, format: &str) -> anyhow::Result<()> {
    let db = open_db(config)?;
    let claims = db.list_recent(limit)?;

    if format == "json" {
        let summaries: Vec<ClaimSummary> = claims.iter().map(ClaimSummary::from).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if claims.is_empty() {
        println!("No claims recorded yet");
        return Ok(());
    }

    println!("{}", format!("Last {} claims:", claims.len()).cyan());
    print_claim_rows(&claims, &token(config));
    Ok(())
}

fn show_claim(config: &Config, subject: &str) -> anyhow::Result<()> {
    let db = open_db(config)?;
    let claim = db
        .get_claim_by_subject(subject)?
        .ok_or_else(|| anyhow!("no claim recorded for {}", subject))?;
    let token = token(config);

    println!("{}", format!("=== Claim {} ===", claim.id).cyan().bold());
    println!("  Subject:    {}", claim.subject_id);
    println!("  Kind:       {}", claim.kind);
    println!("  Claimant:   {}", claim.claimant_wallet);
    println!("  Status:     {}", claim.status);
    println!("  Created:    {}", utils::format_timestamp(&claim.created_at));
    println!("  Updated:    {}", utils::format_timestamp(&claim.updated_at));

    println!("\nLegs:");
    for (index, leg) in claim.legs.iter().enumerate() {
        println!(
            "  {}. {} -> {}  {}",
            index + 1,
            utils::format_amount(&token, leg.amount, &leg.token_symbol),
            leg.recipient,
            leg.tx_hash.as_deref().unwrap_or("unpaid")
        );
    }
    Ok(())
}

fn show_pending(config: &Config, older_than: i64) -> anyhow::Result<()> {
    let reconciliation = PendingReconciliation::new(Arc::new(open_db(config)?));
    let stale = reconciliation.stale(chrono::Duration::minutes(older_than))?;

    if stale.is_empty() {
        println!("{}", "✓ No pending claims need reconciliation".green());
        return Ok(());
    }

    println!(
        "{}",
        format!("{} claims pending for over {} minutes:", stale.len(), older_than).yellow()
    );
    print_claim_rows(&stale, &token(config));
    println!(
        "\nCheck the funding wallet's transfers, then run {}",
        "payout-claims resolve <id> --status completed|failed --tx-hashes <sig,...>".cyan()
    );
    Ok(())
}

async fn resolve_claim(
    config: &Config,
    claim_id: i64,
    status: &str,
    tx_hashes: Vec<String>,
    yes: bool,
) -> anyhow::Result<()> {
    let resolution = match status.parse::<ClaimStatus>().map_err(|e| anyhow!(e))? {
        ClaimStatus::Completed => Resolution::Completed(tx_hashes),
        ClaimStatus::Failed => Resolution::Failed(tx_hashes),
        ClaimStatus::Pending => bail!("a claim can only be resolved to completed or failed"),
    };

    if !yes
        && !utils::confirm_action(&format!(
            "Mark claim {} as {} with {} tx hashes?",
            claim_id,
            resolution.status(),
            resolution.tx_hashes().len()
        ))?
    {
        println!("Cancelled");
        return Ok(());
    }

    let reconciliation = PendingReconciliation::new(Arc::new(open_db(config)?));
    let claim = reconciliation.resolve(claim_id, resolution).await?;
    println!("{}", format!("✓ Claim {} is now {}", claim.id, claim.status).green());
    Ok(())
}

async fn show_funding(config: &Config) -> anyhow::Result<()> {
    let app = App::build(config)?;
    let Some(monitor) = app.monitor.as_ref() else {
        println!("{}", "Funding wallet not configured; claims are refused".yellow());
        return Ok(());
    };

    let status = monitor.check().await?;
    let token = app.settings.token;

    println!("{}", "=== Funding Wallet ===".cyan().bold());
    println!("  Address:    {}", status.wallet);
    println!("  Balance:    {}", utils::format_amount(&token, status.balance, &status.token_symbol));
    println!("  Runway:     {} max-size claims", status.runway_claims);
    if status.low_balance {
        println!("  {}", "⚠ Balance below warning threshold".red().bold());
    }
    Ok(())
}

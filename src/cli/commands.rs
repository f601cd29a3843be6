use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "payout-claims")]
#[command(about = "Idempotent cashback and referral reward claims paid from a custodial wallet")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (extension optional)
    #[arg(short, long, global = true, default_value = "config/default")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the claim HTTP API
    Serve {
        /// Bind address, overrides server.bind
        #[arg(short, long)]
        bind: Option<String>,

        /// Funding balance check interval in seconds (0 disables)
        #[arg(long, default_value = "300")]
        funding_interval: u64,
    },

    /// Initialize database and print the active configuration
    Init,

    /// Show ledger statistics
    Stats {
        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// List recent claims
    History {
        /// Number of claims to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output format: table or json
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show one claim by subject id
    Show {
        /// Transaction or referral id the claim was made for
        subject: String,
    },

    /// List pending claims awaiting reconciliation
    Pending {
        /// Only claims untouched for at least this many minutes
        #[arg(short, long, default_value = "15")]
        older_than: i64,
    },

    /// Resolve a pending claim after checking the chain by hand
    Resolve {
        /// Ledger id of the claim
        claim_id: i64,

        /// Final status: completed or failed
        #[arg(short, long)]
        status: String,

        /// Hashes of the legs that went through, in leg order
        #[arg(short, long, value_delimiter = ',')]
        tx_hashes: Vec<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show funding wallet balance and runway
    Funding,
}

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::{
    commitment_config::CommitmentConfig,
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signer},
    transaction::Transaction,
};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::{
    error::{ClaimError, Result},
    providers::TransferClient,
};

/// Parses a commitment level name, defaulting to `confirmed`
pub fn parse_commitment(level: &str) -> CommitmentConfig {
    match level.to_ascii_lowercase().as_str() {
        "processed" => CommitmentConfig::processed(),
        "finalized" => CommitmentConfig::finalized(),
        _ => CommitmentConfig::confirmed(),
    }
}

/// Loads the funding keypair from a JSON keypair file or a base58 secret key
pub fn load_keypair(source: &str) -> Result<Keypair> {
    let source = source.trim();
    if Path::new(source).exists() {
        return read_keypair_file(source)
            .map_err(|e| ClaimError::Config(format!("cannot read funding keypair file: {}", e)));
    }

    let bytes = bs58::decode(source)
        .into_vec()
        .map_err(|_| ClaimError::Config("funding wallet key is neither a file nor base58".to_string()))?;
    Keypair::from_bytes(&bytes)
        .map_err(|_| ClaimError::Config("funding wallet key has an invalid length".to_string()))
}

pub fn parse_pubkey(address: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(address.trim())
        .map_err(|e| ClaimError::Config(format!("invalid {} '{}': {}", what, address, e)))
}

/// SPL-token transfers out of the funding wallet's associated token account
pub struct SolanaTransferClient {
    client: RpcClient,
    signer: Keypair,
    decimals: u8,
}

impl SolanaTransferClient {
    pub fn new(rpc_url: &str, commitment: CommitmentConfig, signer: Keypair, decimals: u8) -> Self {
        let client = RpcClient::new_with_commitment(rpc_url.to_string(), commitment);
        Self {
            client,
            signer,
            decimals,
        }
    }

    pub fn funding_address(&self) -> Pubkey {
        self.signer.pubkey()
    }

    fn ensure_funding(&self, funding_wallet: &str) -> Result<Pubkey> {
        let funding = parse_pubkey(funding_wallet, "funding wallet")?;
        if funding != self.signer.pubkey() {
            return Err(ClaimError::Config(format!(
                "funding wallet {} does not match the loaded signer {}",
                funding,
                self.signer.pubkey()
            )));
        }
        Ok(funding)
    }
}

#[async_trait]
impl TransferClient for SolanaTransferClient {
    async fn balance_of(&self, funding_wallet: &str, token_address: &str) -> Result<u64> {
        let funding = self.ensure_funding(funding_wallet)?;
        let mint = parse_pubkey(token_address, "token mint")?;
        let token_account = get_associated_token_address(&funding, &mint);

        match self.client.get_token_account_balance(&token_account).await {
            Ok(balance) => balance.amount.parse::<u64>().map_err(|e| {
                ClaimError::Provider(format!("unparseable token balance '{}': {}", balance.amount, e))
            }),
            Err(e) => {
                // A missing token account just means nothing has been funded yet
                if e.to_string().contains("could not find account") {
                    debug!("Funding token account {} does not exist yet", token_account);
                    Ok(0)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    fn validate_recipient(&self, recipient: &str) -> Result<()> {
        parse_pubkey(recipient, "recipient").map(|_| ())
    }

    async fn transfer(
        &self,
        funding_wallet: &str,
        token_address: &str,
        recipient: &str,
        amount: u64,
    ) -> Result<String> {
        let funding = self.ensure_funding(funding_wallet)?;
        let mint = parse_pubkey(token_address, "token mint")?;
        let recipient = parse_pubkey(recipient, "recipient")?;

        let source = get_associated_token_address(&funding, &mint);
        let destination = get_associated_token_address(&recipient, &mint);

        let create_destination =
            create_associated_token_account_idempotent(&funding, &recipient, &mint, &spl_token::id());
        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::id(),
            &source,
            &mint,
            &destination,
            &funding,
            &[],
            amount,
            self.decimals,
        )
        .map_err(|e| ClaimError::Other(anyhow::anyhow!("cannot build transfer instruction: {}", e)))?;

        let recent_blockhash = self.client.get_latest_blockhash().await?;
        let transaction = Transaction::new_signed_with_payer(
            &[create_destination, transfer],
            Some(&funding),
            &[&self.signer],
            recent_blockhash,
        );

        let signature = self.client.send_and_confirm_transaction(&transaction).await?;
        info!("Transferred {} base units to {} | Signature: {}", amount, recipient, signature);

        Ok(signature.to_string())
    }
}

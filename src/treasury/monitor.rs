use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::{claims::payout::PayoutExecutor, error::Result, solana::TokenAmount};

/// Snapshot of the funding wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingStatus {
    pub wallet: String,
    pub token_symbol: String,
    pub balance: u64,
    pub balance_ui: f64,
    /// Maximum-size claims the balance still covers
    pub runway_claims: u64,
    pub low_balance: bool,
}

pub struct FundingMonitor {
    executor: Arc<PayoutExecutor>,
    token: TokenAmount,
    max_per_tx: u64,
    /// Base units; 0 disables the warning
    low_balance_threshold: u64,
}

impl FundingMonitor {
    pub fn new(
        executor: Arc<PayoutExecutor>,
        token: TokenAmount,
        max_per_tx: u64,
        low_balance_threshold: u64,
    ) -> Self {
        Self {
            executor,
            token,
            max_per_tx,
            low_balance_threshold,
        }
    }

    pub async fn check(&self) -> Result<FundingStatus> {
        let balance = self.executor.balance().await?;
        let status = self.status_for(balance);

        if status.low_balance {
            warn!(
                "Funding wallet {} is low: {} (threshold {}), covers {} more max-size claims",
                status.wallet,
                self.token.format(balance, &status.token_symbol),
                self.token.format(self.low_balance_threshold, &status.token_symbol),
                status.runway_claims
            );
        } else {
            debug!(
                "Funding wallet {} holds {}",
                status.wallet,
                self.token.format(balance, &status.token_symbol)
            );
        }

        Ok(status)
    }

    fn status_for(&self, balance: u64) -> FundingStatus {
        FundingStatus {
            wallet: self.executor.funding_wallet().to_string(),
            token_symbol: self.executor.token_symbol().to_string(),
            balance,
            balance_ui: self.token.to_ui(balance),
            runway_claims: balance.checked_div(self.max_per_tx).unwrap_or(0),
            low_balance: self.low_balance_threshold > 0 && balance < self.low_balance_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TransferClient;
    use async_trait::async_trait;

    struct FixedBalance(u64);

    #[async_trait]
    impl TransferClient for FixedBalance {
        async fn balance_of(&self, _funding_wallet: &str, _token_address: &str) -> Result<u64> {
            Ok(self.0)
        }

        async fn transfer(&self, _: &str, _: &str, _: &str, _: u64) -> Result<String> {
            unreachable!("monitor never transfers")
        }
    }

    fn monitor(balance: u64, threshold: u64) -> FundingMonitor {
        let executor = PayoutExecutor::new(Arc::new(FixedBalance(balance)), "funder", "mint", "USDC");
        FundingMonitor::new(Arc::new(executor), TokenAmount::default(), 100_000_000, threshold)
    }

    #[tokio::test]
    async fn test_runway_and_low_balance() {
        let status = monitor(250_000_000, 300_000_000).check().await.unwrap();
        assert_eq!(status.runway_claims, 2);
        assert_eq!(status.balance_ui, 250.0);
        assert!(status.low_balance);
        assert_eq!(status.wallet, "funder");
    }

    #[tokio::test]
    async fn test_zero_threshold_disables_warning() {
        let status = monitor(0, 0).check().await.unwrap();
        assert_eq!(status.runway_claims, 0);
        assert!(!status.low_balance);
    }
}

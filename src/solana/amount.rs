/// Decimals of USDC-style stablecoins
pub const STABLECOIN_DECIMALS: u8 = 6;

/// Largest decimals whose unit still fits a `u64`
pub const MAX_DECIMALS: u8 = 19;

/// Converts between whole-token decimals and integer base units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    decimals: u8,
}

impl TokenAmount {
    pub fn new(decimals: u8) -> Self {
        Self { decimals }
    }

    /// Base units per whole token
    pub fn unit(&self) -> u64 {
        10u64.pow(self.decimals as u32)
    }

    pub fn to_ui(&self, base_units: u64) -> f64 {
        base_units as f64 / self.unit() as f64
    }

    /// Rounds to the nearest base unit. Negative or non-finite input is rejected.
    pub fn from_ui(&self, ui_amount: f64) -> Option<u64> {
        if !ui_amount.is_finite() || ui_amount < 0.0 {
            return None;
        }
        let scaled = (ui_amount * self.unit() as f64).round();
        if scaled > u64::MAX as f64 {
            return None;
        }
        Some(scaled as u64)
    }

    /// `amount * rate_bps / 10_000`, rounded down
    pub fn apply_rate_bps(amount: u64, rate_bps: u64) -> u64 {
        ((amount as u128 * rate_bps as u128) / 10_000u128) as u64
    }

    pub fn format(&self, base_units: u64, symbol: &str) -> String {
        format!(
            "{:.prec$} {}",
            self.to_ui(base_units),
            symbol,
            prec = self.decimals.min(6) as usize
        )
    }
}

impl Default for TokenAmount {
    fn default() -> Self {
        Self::new(STABLECOIN_DECIMALS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_conversion() {
        let usdc = TokenAmount::default();
        assert_eq!(usdc.unit(), 1_000_000);
        assert_eq!(usdc.from_ui(0.5), Some(500_000));
        assert_eq!(usdc.from_ui(100.0), Some(100_000_000));
        assert_eq!(usdc.to_ui(500_000), 0.5);
        assert_eq!(usdc.from_ui(-1.0), None);
        assert_eq!(usdc.from_ui(f64::NAN), None);
    }

    #[test]
    fn test_max_decimals_unit_fits() {
        assert_eq!(TokenAmount::new(MAX_DECIMALS).unit(), 10_000_000_000_000_000_000);
        assert!(10u64.checked_pow(MAX_DECIMALS as u32 + 1).is_none());
    }

    #[test]
    fn test_apply_rate_bps() {
        // 1% of a $50 order
        assert_eq!(TokenAmount::apply_rate_bps(50_000_000, 100), 500_000);
        // rounds down
        assert_eq!(TokenAmount::apply_rate_bps(199, 100), 1);
        assert_eq!(TokenAmount::apply_rate_bps(u64::MAX, 10_000), u64::MAX);
    }

    #[test]
    fn test_format() {
        let usdc = TokenAmount::default();
        assert_eq!(usdc.format(500_000, "USDC"), "0.500000 USDC");
    }
}

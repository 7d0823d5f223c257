use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_structures::SwapDirection;

/// Pricing and validation parameters for one swap direction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirectionParams {
    /// Units of destination asset per unit of source asset.
    pub rate: f64,
    /// Fraction of the gross output retained as fee (0.03 = 3%).
    pub fee_fraction: f64,
    /// Smallest accepted amount in the source asset's human unit.
    pub min_amount: f64,
    /// Display precision of the destination asset.
    pub display_decimals: u32,
    /// Account credited on the destination chain for this direction.
    pub payout_address: String,
    /// Account allowed to claim the source-chain lock once the secret
    /// becomes public.
    pub counterparty_address: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub source_to_dest: DirectionParams,
    pub dest_to_source: DirectionParams,

    /// Window from swap creation after which the source lock becomes
    /// refundable. No release attempt may start past the expiry.
    #[serde(with = "humantime_serde")]
    pub timelock_window: Duration,

    /// Receipt polling cadence while waiting for a leg to confirm.
    #[serde(with = "humantime_serde")]
    pub receipt_poll_interval: Duration,
    pub receipt_poll_attempts: u32,

    /// Confirmations a receipt must carry before a leg counts as settled.
    pub required_confirmations: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl CoordinatorConfig {
    pub fn direction_params(&self, direction: SwapDirection) -> &DirectionParams {
        match direction {
            SwapDirection::SourceToDest => &self.source_to_dest,
            SwapDirection::DestToSource => &self.dest_to_source,
        }
    }

    /// Loads a config from a JSON file, e.g. for deployments where rates
    /// and payout accounts differ per environment.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            source_to_dest: DirectionParams {
                rate: 476.0,
                fee_fraction: 0.03,
                min_amount: 0.001,
                display_decimals: 4,
                payout_address: "payout-dest".to_string(),
                counterparty_address: "counterparty-source".to_string(),
            },
            dest_to_source: DirectionParams {
                rate: 0.0021,
                fee_fraction: 0.03,
                min_amount: 1.0,
                display_decimals: 6,
                payout_address: "payout-source".to_string(),
                counterparty_address: "counterparty-dest".to_string(),
            },
            timelock_window: Duration::from_secs(2 * 60 * 60),
            receipt_poll_interval: Duration::from_secs(3),
            receipt_poll_attempts: 40,
            required_confirmations: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.source_to_dest.rate, 476.0);
        assert_eq!(config.source_to_dest.fee_fraction, 0.03);
        assert_eq!(config.source_to_dest.min_amount, 0.001);
        assert_eq!(config.dest_to_source.min_amount, 1.0);
        assert_eq!(config.timelock_window, Duration::from_secs(7200));
        assert_eq!(config.required_confirmations, 1);
        assert_eq!(
            config
                .direction_params(SwapDirection::DestToSource)
                .display_decimals,
            6
        );
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = CoordinatorConfig::default();
        let encoded = serde_json::to_string(&config).unwrap();
        // Durations serialize as humantime strings ("2h", "3s")
        assert!(encoded.contains("\"timelock_window\":\"2h\""));
        let decoded: CoordinatorConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.timelock_window, config.timelock_window);
        assert_eq!(decoded.source_to_dest.rate, config.source_to_dest.rate);
    }
}

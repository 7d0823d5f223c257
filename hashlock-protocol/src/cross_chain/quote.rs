// Pure pricing: (direction, amount) -> estimated output and fee
// breakdown. No chain interaction; the settlement engine consults this
// before anything touches an adapter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::CoordinatorConfig;
use crate::cross_chain::types::SwapError;
use crate::data_structures::SwapDirection;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub direction: SwapDirection,
    pub requested_amount: String,
    /// `amount × rate × (1 − fee)` at the direction's display precision.
    pub estimated_output: String,
    pub rate: f64,
    pub fee_fraction: f64,
    pub fee_amount: String,
}

#[derive(Clone)]
pub struct QuoteCalculator {
    config: Arc<CoordinatorConfig>,
}

impl QuoteCalculator {
    pub fn new(config: Arc<CoordinatorConfig>) -> Self {
        QuoteCalculator { config }
    }

    /// Validates and prices an intent. Recomputing with the same inputs
    /// is bit-identical.
    pub fn quote(&self, direction: SwapDirection, amount: &str) -> Result<Quote, SwapError> {
        let params = self.config.direction_params(direction);

        let value: f64 = amount
            .trim()
            .parse()
            .map_err(|_| SwapError::Validation(format!("unparsable amount: {:?}", amount)))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(SwapError::Validation(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if value < params.min_amount {
            return Err(SwapError::Validation(format!(
                "minimum amount for {} is {}",
                direction, params.min_amount
            )));
        }

        let gross = value * params.rate;
        let net = gross * (1.0 - params.fee_fraction);
        Ok(Quote {
            direction,
            requested_amount: amount.trim().to_string(),
            estimated_output: format_amount(net, params.display_decimals),
            rate: params.rate,
            fee_fraction: params.fee_fraction,
            fee_amount: format_amount(gross - net, params.display_decimals),
        })
    }
}

fn format_amount(value: f64, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, value)
}

// Swap coordination: quoting, settlement state machine, reconciliation.

pub use engine::{SettlementEngine, SwapLockGuardMap};
pub use quote::{Quote, QuoteCalculator};
pub use reconciler::Reconciler;
pub use types::{
    FailureAnalysis, FailureCategory, SettlementMode, SwapError, SwapOrder, SwapStatus, TxRecord,
};

pub mod engine;
pub mod quote;
pub mod reconciler;
pub mod types;

// Chain plumbing: the capability trait the settlement engine is written
// against, plus the two conforming chain integrations.

pub use interface::{
    ChainAdapter, ChainAdapterError, LockOutcome, LockParams, Receipt, ReleaseParams, SwapId,
    TxHash,
};

pub mod evm_adapter;
pub mod interface;
pub mod state_chain;

use async_trait::async_trait;
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Transaction identifier as surfaced by the chain (e.g. 0x-prefixed hash)
pub type TxHash = String;

// 32-byte swap identifier shared by both chains' escrow entries
pub type SwapId = [u8; 32];

#[derive(Debug, Error)]
pub enum ChainAdapterError {
    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: U256, available: U256 },
    #[error("contract would revert: {0}")]
    ContractWouldRevert(String),
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("unparsable chain response: {0}")]
    Parse(String),
}

impl ChainAdapterError {
    /// Distinguishes chain-level failures from pre-flight business
    /// validation. The engine only falls back to a direct transfer after
    /// a chain-level error on the contract-verified path.
    pub fn is_chain_level(&self) -> bool {
        !matches!(
            self,
            ChainAdapterError::InsufficientBalance { .. }
                | ChainAdapterError::InvalidAmount { .. }
        )
    }
}

/// Execution outcome of one transaction as read back from the chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
    /// Gas on account-model chains, weight on state-machine chains.
    pub gas_used: u64,
    pub confirmations: u64,
    /// Raw failure payload as surfaced by the chain, if any.
    pub error: Option<String>,
}

/// Parameters for the source-chain hash-locked deposit.
#[derive(Clone, Debug)]
pub struct LockParams {
    pub swap_id: SwapId,
    /// Account allowed to claim the lock by revealing the secret.
    pub recipient: String,
    /// Human-unit decimal amount; adapters convert to base units.
    pub amount: String,
    pub hash_lock: [u8; 32],
    /// Absolute Unix time after which the lock is refundable.
    pub timelock_expiry: u64,
}

#[derive(Clone, Debug)]
pub struct LockOutcome {
    pub tx_hash: TxHash,
    /// Chain-side reference to the escrow entry (hex swap id on both
    /// current integrations).
    pub order_ref: String,
}

/// Parameters for the destination-chain release. The secret travels in
/// the exact call the contract checks against its stored hash; the
/// contract, not the adapter, is the source of truth for verification.
#[derive(Clone, Debug)]
pub struct ReleaseParams {
    pub swap_id: SwapId,
    pub secret: [u8; 32],
    pub recipient: String,
    pub amount: String,
}

/// Capability set the settlement engine requires from a chain.
///
/// Two conforming implementations exist: an account/contract EVM chain
/// (`EvmAdapter`) and a state-machine chain (`StateChainAdapter`). The
/// engine depends only on this trait. State-changing calls submit
/// at-most-once per invocation with a fresh nonce/sequence; swap-level
/// idempotency is the engine's responsibility.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Account the coordinator operates from on this chain.
    fn operator_address(&self) -> String;

    /// Locks funds behind the hash-lock. Pre-validates the operator
    /// balance and dry-runs the call before any network write.
    async fn lock_funds(&self, params: &LockParams) -> Result<LockOutcome, ChainAdapterError>;

    /// Claims a hash-locked entry by revealing the secret.
    async fn release_with_secret(
        &self,
        params: &ReleaseParams,
    ) -> Result<TxHash, ChainAdapterError>;

    /// Plain value transfer from the operator account. Backs the
    /// engine's fallback settlement mode only; carries none of the
    /// hash-lock guarantees.
    async fn transfer_direct(
        &self,
        recipient: &str,
        amount: &str,
    ) -> Result<TxHash, ChainAdapterError>;

    /// `Ok(None)` when the chain has not indexed the transaction yet.
    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainAdapterError>;

    async fn get_balance(&self, address: &str) -> Result<U256, ChainAdapterError>;

    /// Best-effort decode of a structured revert reason from a raw
    /// failure payload, using the chain's standard error encoding.
    fn decode_revert_reason(&self, payload: &str) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn business_validation_errors_are_not_chain_level() {
        let insufficient = ChainAdapterError::InsufficientBalance {
            needed: U256::from(10),
            available: U256::from(1),
        };
        let bad_amount = ChainAdapterError::InvalidAmount {
            amount: "abc".to_string(),
            reason: "not a number".to_string(),
        };
        assert!(!insufficient.is_chain_level());
        assert!(!bad_amount.is_chain_level());

        assert!(ChainAdapterError::ContractWouldRevert("boom".into()).is_chain_level());
        assert!(ChainAdapterError::Submission("rpc down".into()).is_chain_level());
        assert!(ChainAdapterError::Rpc("timeout".into()).is_chain_level());
    }

    #[test]
    fn receipt_serde_round_trip() {
        let receipt = Receipt {
            tx_hash: "0xabc".to_string(),
            block_number: 7,
            success: false,
            gas_used: 21000,
            confirmations: 3,
            error: Some("execution reverted".to_string()),
        };
        let encoded = serde_json::to_string(&receipt).unwrap();
        let decoded: Receipt = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, receipt);
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_structures::SwapDirection;
use crate::onchain::interface::ChainAdapterError;

// Hex-string (de)serialization for 32-byte values; keeps registry
// snapshots and API payloads readable.
mod hex32 {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let raw = String::deserialize(deserializer)?;
        let decoded = hex::decode(raw.trim_start_matches("0x")).map_err(DeError::custom)?;
        decoded
            .try_into()
            .map_err(|_| DeError::custom("expected 32 bytes"))
    }
}

/// Where one swap sits in its lifecycle. Transitions are forward-only;
/// see `can_transition`.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    /// Created; source lock not yet confirmed.
    Pending,
    /// Source lock confirmed; destination settlement in flight.
    Processing,
    Completed,
    Failed,
    /// Source leg settled but the destination could not be completed,
    /// even via fallback. Funds sit behind the source timelock; needs
    /// refund handling. Deliberately non-terminal.
    Partial,
}

impl SwapStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapStatus::Completed | SwapStatus::Failed)
    }

    /// Forward-only transition table. A terminal state never reopens;
    /// `Partial` may still settle either way once a refund job or
    /// operator acts.
    pub fn can_transition(self, next: SwapStatus) -> bool {
        use SwapStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Partial)
                | (Partial, Completed)
                | (Partial, Failed)
        )
    }

    pub fn wire_name(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "pending",
            SwapStatus::Processing => "processing",
            SwapStatus::Completed => "completed",
            SwapStatus::Failed => "failed",
            SwapStatus::Partial => "partial",
        }
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// How the destination leg was settled. `ContractVerified` means the
/// destination contract itself checked the secret against the
/// hash-lock; `FallbackDirectTransfer` is an operator-account transfer
/// with a strictly weaker trust assumption and must never be conflated
/// with the verified path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementMode {
    ContractVerified,
    FallbackDirectTransfer,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    InsufficientFunds,
    GasIssue,
    NonceIssue,
    ContractRevert,
    NetworkIssue,
    ReplacementIssue,
    Unknown,
}

impl FailureCategory {
    pub fn wire_name(&self) -> &'static str {
        match self {
            FailureCategory::InsufficientFunds => "insufficient_funds",
            FailureCategory::GasIssue => "gas_issue",
            FailureCategory::NonceIssue => "nonce_issue",
            FailureCategory::ContractRevert => "contract_revert",
            FailureCategory::NetworkIssue => "network_issue",
            FailureCategory::ReplacementIssue => "replacement_issue",
            FailureCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// Best-effort classification of a failed chain interaction. The
/// substring heuristics behind `category` are not authoritative;
/// `technical_detail` always carries the raw message for audit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub category: FailureCategory,
    pub human_reason: String,
    pub suggestion: String,
    pub technical_detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revert_reason: Option<String>,
}

/// One leg's transaction as last read from its chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    /// `None` until a receipt has been observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_status: Option<bool>,
    /// Gas on the account chain, weight on the state-machine chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    #[serde(default)]
    pub confirmations: u64,
}

impl TxRecord {
    pub fn submitted(hash: impl Into<String>) -> Self {
        TxRecord {
            hash: hash.into(),
            block_number: None,
            confirmed_status: None,
            gas_used: None,
            confirmations: 0,
        }
    }
}

/// One coordinated swap attempt. Primary key of the registry; never
/// deleted, terminal records remain for audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SwapOrder {
    pub swap_id: String,
    pub direction: SwapDirection,
    /// Decimal string in the source asset's human unit.
    pub requested_amount: String,
    /// Advisory output computed at creation; not binding.
    pub estimated_output: String,
    /// Held server-side until revealed on the destination chain, then
    /// part of the audit record (and the refund path for `Partial`).
    #[serde(with = "hex32")]
    pub secret: [u8; 32],
    /// SHA-256 of `secret`; fixed at creation, never recomputed.
    #[serde(with = "hex32")]
    pub secret_hash: [u8; 32],
    /// Absolute Unix seconds; past this, the source lock is refundable
    /// and no new release attempt may start.
    pub timelock_expiry: u64,
    pub status: SwapStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tx: Option<TxRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest_tx: Option<TxRecord>,
    /// On fallback-settled swaps this retains the failed
    /// contract-verified attempt — the audit witness that the weaker
    /// path was only used after the verified one failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_analysis: Option<FailureAnalysis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_mode: Option<SettlementMode>,
    pub created_at: DateTime<Utc>,
    /// Advances only through the settlement engine or reconciler.
    pub updated_at: DateTime<Utc>,
}

impl SwapOrder {
    pub fn is_timelock_expired(&self, now_unix: u64) -> bool {
        now_unix >= self.timelock_expiry
    }
}

#[derive(Debug, Error)]
pub enum SwapError {
    /// Rejected synchronously; never touches a chain.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("simulation failed: {0}")]
    Simulation(String),
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("confirmation failed: {0}")]
    Confirmation(String),
    /// Both settlement paths exhausted; surfaced distinctly so
    /// funds-at-risk stay visible.
    #[error("both settlement paths failed: {0}")]
    Fallback(String),
    #[error("swap not found: {0}")]
    NotFound(String),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: SwapStatus, to: SwapStatus },
    #[error(transparent)]
    Adapter(#[from] ChainAdapterError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_never_reopen() {
        for terminal in [SwapStatus::Completed, SwapStatus::Failed] {
            for next in [
                SwapStatus::Pending,
                SwapStatus::Processing,
                SwapStatus::Completed,
                SwapStatus::Failed,
                SwapStatus::Partial,
            ] {
                assert!(!terminal.can_transition(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn lifecycle_transitions_allowed() {
        assert!(SwapStatus::Pending.can_transition(SwapStatus::Processing));
        assert!(SwapStatus::Pending.can_transition(SwapStatus::Failed));
        assert!(SwapStatus::Processing.can_transition(SwapStatus::Completed));
        assert!(SwapStatus::Processing.can_transition(SwapStatus::Partial));
        assert!(SwapStatus::Partial.can_transition(SwapStatus::Completed));
        // No skipping the source leg
        assert!(!SwapStatus::Pending.can_transition(SwapStatus::Completed));
        assert!(!SwapStatus::Pending.can_transition(SwapStatus::Partial));
    }

    #[test]
    fn partial_is_not_terminal() {
        assert!(!SwapStatus::Partial.is_terminal());
        assert!(SwapStatus::Completed.is_terminal());
        assert!(SwapStatus::Failed.is_terminal());
    }

    #[test]
    fn swap_order_serializes_secret_as_hex() {
        let order = SwapOrder {
            swap_id: "ab".repeat(32),
            direction: SwapDirection::SourceToDest,
            requested_amount: "0.001".to_string(),
            estimated_output: "0.4617".to_string(),
            secret: [1u8; 32],
            secret_hash: [2u8; 32],
            timelock_expiry: 1_700_000_000,
            status: SwapStatus::Pending,
            source_tx: None,
            dest_tx: None,
            failure_analysis: None,
            settlement_mode: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&order).unwrap();
        assert!(encoded.contains(&"01".repeat(32)));
        assert!(encoded.contains("\"status\":\"pending\""));
        let decoded: SwapOrder = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, order);
    }

    #[test]
    fn timelock_expiry_boundary() {
        let mut order: SwapOrder = serde_json::from_value(serde_json::json!({
            "swap_id": "s",
            "direction": "source_to_dest",
            "requested_amount": "1",
            "estimated_output": "1",
            "secret": "00".repeat(32),
            "secret_hash": "00".repeat(32),
            "timelock_expiry": 100,
            "status": "processing",
            "created_at": "2026-01-01T00:00:00Z",
            "updated_at": "2026-01-01T00:00:00Z",
        }))
        .unwrap();
        assert!(!order.is_timelock_expired(99));
        assert!(order.is_timelock_expired(100));
        order.timelock_expiry = 0;
        assert!(order.is_timelock_expired(1));
    }
}

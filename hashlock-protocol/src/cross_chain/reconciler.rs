// Reconciliation: re-read authoritative chain data for a swap's
// recorded transactions, fold receipt state into the registry record,
// and classify failures.
//
// Classification is an ordered substring match over free-text error
// payloads — inherently heuristic and best-effort. It is never treated
// as authoritative: the raw message always travels alongside in
// `technical_detail`.

use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use log::{info, warn};

use crate::cross_chain::engine::{unix_now, SwapLockGuardMap};
use crate::cross_chain::types::{
    FailureAnalysis, FailureCategory, SwapError, SwapOrder, SwapStatus, TxRecord,
};
use crate::data_structures::SwapDirection;
use crate::onchain::interface::{ChainAdapter, Receipt};
use crate::registry::SwapRegistry;

pub struct FailureRule {
    pub patterns: &'static [&'static str],
    pub category: FailureCategory,
    pub human_reason: &'static str,
    pub suggestion: &'static str,
}

/// Ordered rule set; first match wins. Matching runs over the
/// lower-cased raw payload.
pub static FAILURE_RULES: &[FailureRule] = &[
    FailureRule {
        patterns: &["insufficient funds", "insufficient balance", "exceeds balance"],
        category: FailureCategory::InsufficientFunds,
        human_reason: "The paying account balance is too low for this transaction.",
        suggestion: "Top up the operator account and retry with a new swap.",
    },
    FailureRule {
        patterns: &[
            "gas required exceeds",
            "out of gas",
            "gas too low",
            "intrinsic gas",
            "max fee per gas",
        ],
        category: FailureCategory::GasIssue,
        human_reason: "The transaction ran out of gas or its gas settings were rejected.",
        suggestion: "Raise the configured gas limit or fee cap and retry.",
    },
    FailureRule {
        patterns: &["nonce too low", "nonce too high", "invalid nonce", "sequence mismatch"],
        category: FailureCategory::NonceIssue,
        human_reason: "The account nonce or sequence number was stale.",
        suggestion: "Resync the operator account sequence and submit a fresh attempt.",
    },
    FailureRule {
        patterns: &["revert", "execution reverted"],
        category: FailureCategory::ContractRevert,
        human_reason: "The contract rejected the call.",
        suggestion: "Inspect the decoded revert reason; the swap parameters likely violate a contract check.",
    },
    FailureRule {
        patterns: &[
            "timeout",
            "timed out",
            "connection refused",
            "connection reset",
            "temporarily unavailable",
            "network",
        ],
        category: FailureCategory::NetworkIssue,
        human_reason: "The chain RPC endpoint was unreachable or too slow.",
        suggestion: "Check endpoint connectivity and retry once the RPC is healthy.",
    },
    FailureRule {
        patterns: &[
            "replacement transaction underpriced",
            "already known",
            "transaction was replaced",
        ],
        category: FailureCategory::ReplacementIssue,
        human_reason: "A competing transaction from the same account interfered.",
        suggestion: "Wait for the pending transaction to settle before submitting again.",
    },
];

pub static UNKNOWN_RULE: FailureRule = FailureRule {
    patterns: &[],
    category: FailureCategory::Unknown,
    human_reason: "The chain returned an error this coordinator does not recognize.",
    suggestion: "Inspect the raw technical detail.",
};

pub fn classify(raw: &str) -> &'static FailureRule {
    let needle = raw.to_lowercase();
    FAILURE_RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| needle.contains(p)))
        .unwrap_or(&UNKNOWN_RULE)
}

/// Builds the full analysis for a raw failure payload. For contract
/// reverts a decoded reason is attached, `"unknown"` when decoding
/// failed.
pub fn analyze(raw: &str, revert_reason: Option<String>) -> FailureAnalysis {
    let rule = classify(raw);
    let revert_reason = if rule.category == FailureCategory::ContractRevert {
        Some(revert_reason.unwrap_or_else(|| "unknown".to_string()))
    } else {
        revert_reason
    };
    FailureAnalysis {
        category: rule.category,
        human_reason: rule.human_reason.to_string(),
        suggestion: rule.suggestion.to_string(),
        technical_detail: raw.to_string(),
        revert_reason,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Leg {
    Source,
    Dest,
}

pub struct Reconciler {
    chain_a: Arc<dyn ChainAdapter>,
    chain_b: Arc<dyn ChainAdapter>,
    registry: Arc<dyn SwapRegistry>,
    locks: SwapLockGuardMap,
}

impl Reconciler {
    pub fn new(
        chain_a: Arc<dyn ChainAdapter>,
        chain_b: Arc<dyn ChainAdapter>,
        registry: Arc<dyn SwapRegistry>,
        locks: SwapLockGuardMap,
    ) -> Self {
        Reconciler {
            chain_a,
            chain_b,
            registry,
            locks,
        }
    }

    fn adapter_for(&self, direction: SwapDirection, leg: Leg) -> &dyn ChainAdapter {
        match (direction, leg) {
            (SwapDirection::SourceToDest, Leg::Source) => self.chain_a.as_ref(),
            (SwapDirection::SourceToDest, Leg::Dest) => self.chain_b.as_ref(),
            (SwapDirection::DestToSource, Leg::Source) => self.chain_b.as_ref(),
            (SwapDirection::DestToSource, Leg::Dest) => self.chain_a.as_ref(),
        }
    }

    /// Refreshes one swap from chain state. Idempotent: with unchanged
    /// receipts the stored record is untouched and the same order is
    /// returned.
    pub async fn refresh(&self, swap_id: &str) -> Result<SwapOrder, SwapError> {
        let guard = self.locks.guard_for(swap_id);
        let _held = guard.lock().await;

        let mut swap = self
            .registry
            .get(swap_id)
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;

        let mut changed = false;
        changed |= self.refresh_leg(&mut swap, Leg::Source).await?;
        changed |= self.refresh_leg(&mut swap, Leg::Dest).await?;

        // A swap stuck mid-settlement past its timelock is flagged for
        // refund handling; the record keeps secret and hash so the
        // refund path can act before the lock is claimed back.
        if swap.status == SwapStatus::Processing && swap.is_timelock_expired(unix_now()) {
            warn!(
                "[Reconciler] swap {} passed its timelock while processing; flagging partial",
                swap.swap_id
            );
            swap.status = SwapStatus::Partial;
            changed = true;
        }

        if changed {
            swap.updated_at = Utc::now();
            self.registry.put(swap.clone());
        }
        Ok(swap)
    }

    /// Refreshes the newest `limit` non-terminal swaps concurrently.
    pub async fn refresh_all(&self, limit: usize) -> Vec<SwapOrder> {
        let stale: Vec<String> = self
            .registry
            .list(limit)
            .into_iter()
            .filter(|swap| !swap.status.is_terminal())
            .map(|swap| swap.swap_id)
            .collect();

        let refreshed = join_all(stale.iter().map(|id| self.refresh(id))).await;
        refreshed
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(swap) => Some(swap),
                Err(e) => {
                    warn!("[Reconciler] refresh failed: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn refresh_leg(&self, swap: &mut SwapOrder, leg: Leg) -> Result<bool, SwapError> {
        let record = match leg {
            Leg::Source => swap.source_tx.clone(),
            Leg::Dest => swap.dest_tx.clone(),
        };
        let Some(record) = record else {
            return Ok(false);
        };

        let adapter = self.adapter_for(swap.direction, leg);
        let Some(receipt) = adapter.get_receipt(&record.hash).await? else {
            return Ok(false);
        };

        let updated = TxRecord {
            hash: record.hash.clone(),
            block_number: Some(receipt.block_number),
            confirmed_status: Some(receipt.success),
            gas_used: Some(receipt.gas_used),
            confirmations: receipt.confirmations,
        };
        let mut changed = updated != record;
        match leg {
            Leg::Source => swap.source_tx = Some(updated),
            Leg::Dest => swap.dest_tx = Some(updated),
        }

        if !receipt.success {
            changed |= self.fold_failure(swap, leg, adapter, &receipt);
        }
        Ok(changed)
    }

    // Classify a failed receipt and drive the status forward. Returns
    // true if the record materially changed.
    fn fold_failure(
        &self,
        swap: &mut SwapOrder,
        leg: Leg,
        adapter: &dyn ChainAdapter,
        receipt: &Receipt,
    ) -> bool {
        let raw = receipt
            .error
            .clone()
            .unwrap_or_else(|| "transaction failed without error payload".to_string());
        let analysis = analyze(&raw, adapter.decode_revert_reason(&raw));

        let mut changed = false;
        if swap.failure_analysis.as_ref() != Some(&analysis) {
            info!(
                "[Reconciler] swap {} {:?} leg failed: {} ({})",
                swap.swap_id, leg, analysis.category, raw
            );
            swap.failure_analysis = Some(analysis);
            changed = true;
        }

        let next = match (leg, swap.status) {
            (Leg::Source, SwapStatus::Pending) => Some(SwapStatus::Failed),
            // A failed destination tx while processing means the source
            // leg already settled: funds are at risk, not merely failed.
            (Leg::Dest, SwapStatus::Processing) => Some(SwapStatus::Partial),
            _ => None,
        };
        if let Some(next) = next {
            if swap.status.can_transition(next) {
                swap.status = next;
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_rules_first_match_wins() {
        // Contains both an insufficient-funds and a gas marker; rule
        // order decides.
        let rule = classify("insufficient funds for gas * price + value");
        assert_eq!(rule.category, FailureCategory::InsufficientFunds);

        assert_eq!(
            classify("out of gas at pc 1234").category,
            FailureCategory::GasIssue
        );
        assert_eq!(
            classify("Nonce too LOW").category,
            FailureCategory::NonceIssue
        );
        assert_eq!(
            classify("execution reverted: htlc: invalid secret").category,
            FailureCategory::ContractRevert
        );
        assert_eq!(
            classify("connection refused (os error 111)").category,
            FailureCategory::NetworkIssue
        );
        assert_eq!(
            classify("replacement transaction underpriced").category,
            FailureCategory::ReplacementIssue
        );
        assert_eq!(
            classify("some exotic chain failure").category,
            FailureCategory::Unknown
        );
    }

    #[test]
    fn every_rule_carries_static_remediation() {
        for rule in FAILURE_RULES {
            assert!(!rule.human_reason.is_empty());
            assert!(!rule.suggestion.is_empty());
            assert!(!rule.patterns.is_empty());
        }
        assert!(!UNKNOWN_RULE.human_reason.is_empty());
    }

    #[test]
    fn contract_reverts_always_carry_a_reason() {
        let with_decode = analyze(
            "execution reverted: data 0x...",
            Some("htlc: invalid secret".to_string()),
        );
        assert_eq!(with_decode.category, FailureCategory::ContractRevert);
        assert_eq!(with_decode.revert_reason.as_deref(), Some("htlc: invalid secret"));

        let without_decode = analyze("execution reverted", None);
        assert_eq!(without_decode.revert_reason.as_deref(), Some("unknown"));

        let network = analyze("timeout talking to rpc", None);
        assert_eq!(network.revert_reason, None);
        assert_eq!(network.technical_detail, "timeout talking to rpc");
    }
}

// Settlement engine: drives one swap from intent to terminal state
// through the two chain adapters.
//
// Lifecycle per swap: validate and price the intent, generate the
// hash-lock, lock on the source chain, confirm, release on the
// destination chain by revealing the secret (contract-verified path
// first, operator direct transfer as flagged fallback), and record the
// outcome in the registry. Each swap runs as its own task; operations
// on the same swap are serialized through `SwapLockGuardMap`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use log::{error, info, warn};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::config::CoordinatorConfig;
use crate::cross_chain::quote::{Quote, QuoteCalculator};
use crate::cross_chain::reconciler;
use crate::cross_chain::types::{
    FailureAnalysis, SettlementMode, SwapError, SwapOrder, SwapStatus, TxRecord,
};
use crate::data_structures::SwapDirection;
use crate::hashlock;
use crate::onchain::interface::{
    ChainAdapter, LockParams, Receipt, ReleaseParams, SwapId,
};
use crate::registry::{RegistryStats, SwapRegistry};

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One async mutex per swap id, shared between engine and reconciler.
/// Serializes settlement and reconciliation touching the same record
/// without blocking unrelated swaps.
#[derive(Clone, Default)]
pub struct SwapLockGuardMap {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SwapLockGuardMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard_for(&self, swap_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().expect("guard map poisoned");
        Arc::clone(
            map.entry(swap_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }
}

// Why the contract-verified destination path gave up, and whether the
// fallback transfer is allowed to run.
enum DestinationFailure {
    /// Chain-level error; the tie-break policy permits fallback.
    ChainLevel(FailureAnalysis),
    /// Pre-flight business validation (e.g. operator balance); a
    /// fallback from the same operator account cannot do better.
    Business(FailureAnalysis),
}

#[derive(Clone)]
pub struct SettlementEngine {
    config: Arc<CoordinatorConfig>,
    quote: QuoteCalculator,
    /// Source chain for `SourceToDest` swaps.
    chain_a: Arc<dyn ChainAdapter>,
    /// Destination chain for `SourceToDest` swaps.
    chain_b: Arc<dyn ChainAdapter>,
    registry: Arc<dyn SwapRegistry>,
    locks: SwapLockGuardMap,
}

impl SettlementEngine {
    pub fn new(
        config: CoordinatorConfig,
        chain_a: Arc<dyn ChainAdapter>,
        chain_b: Arc<dyn ChainAdapter>,
        registry: Arc<dyn SwapRegistry>,
    ) -> Self {
        let config = Arc::new(config);
        SettlementEngine {
            quote: QuoteCalculator::new(Arc::clone(&config)),
            config,
            chain_a,
            chain_b,
            registry,
            locks: SwapLockGuardMap::new(),
        }
    }

    /// The per-swap lock map, for wiring up a `Reconciler` that shares
    /// mutual exclusion with this engine.
    pub fn lock_map(&self) -> SwapLockGuardMap {
        self.locks.clone()
    }

    pub fn registry(&self) -> Arc<dyn SwapRegistry> {
        Arc::clone(&self.registry)
    }

    fn source_adapter(&self, direction: SwapDirection) -> Arc<dyn ChainAdapter> {
        match direction {
            SwapDirection::SourceToDest => Arc::clone(&self.chain_a),
            SwapDirection::DestToSource => Arc::clone(&self.chain_b),
        }
    }

    fn dest_adapter(&self, direction: SwapDirection) -> Arc<dyn ChainAdapter> {
        match direction {
            SwapDirection::SourceToDest => Arc::clone(&self.chain_b),
            SwapDirection::DestToSource => Arc::clone(&self.chain_a),
        }
    }

    // --- inbound operations -------------------------------------------------

    /// Read-only pricing for an intent.
    pub fn quote(&self, direction: SwapDirection, amount: &str) -> Result<Quote, SwapError> {
        self.quote.quote(direction, amount)
    }

    /// String-boundary variant of `submit_swap` for callers speaking
    /// wire values; an unrecognized direction is rejected outright.
    pub fn submit_swap_request(&self, direction: &str, amount: &str) -> Result<String, SwapError> {
        let direction: SwapDirection = direction
            .parse()
            .map_err(|e: crate::data_structures::DirectionParseError| {
                SwapError::Validation(e.to_string())
            })?;
        self.submit_swap(direction, amount)
    }

    /// Validates and prices the intent, generates the hash-lock, and
    /// registers the `Pending` record. Performs zero chain calls; a
    /// rejected intent never touches an adapter.
    pub fn submit_swap(
        &self,
        direction: SwapDirection,
        amount: &str,
    ) -> Result<String, SwapError> {
        let quote = self.quote.quote(direction, amount)?;
        let pair = hashlock::generate();

        let mut id_bytes = [0u8; 32];
        OsRng.fill_bytes(&mut id_bytes);
        let swap_id = hex::encode(id_bytes);

        let now = Utc::now();
        let swap = SwapOrder {
            swap_id: swap_id.clone(),
            direction,
            requested_amount: quote.requested_amount.clone(),
            estimated_output: quote.estimated_output.clone(),
            secret: pair.secret,
            secret_hash: pair.hash,
            timelock_expiry: unix_now() + self.config.timelock_window.as_secs(),
            status: SwapStatus::Pending,
            source_tx: None,
            dest_tx: None,
            failure_analysis: None,
            settlement_mode: None,
            created_at: now,
            updated_at: now,
        };
        self.registry.put(swap);
        info!(
            "[Engine] swap {} created: {} {} -> est. {}",
            swap_id, quote.requested_amount, direction, quote.estimated_output
        );
        Ok(swap_id)
    }

    /// Runs settlement for one swap as its own task.
    pub fn spawn_execute(&self, swap_id: String) -> tokio::task::JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.execute_swap(&swap_id).await {
                error!("[Engine] settlement task for swap {} failed: {}", swap_id, e);
            }
        })
    }

    pub fn get_swap(&self, swap_id: &str) -> Option<SwapOrder> {
        self.registry.get(swap_id)
    }

    pub fn list_swaps(&self, limit: usize) -> Vec<SwapOrder> {
        self.registry.list(limit)
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    // --- settlement ---------------------------------------------------------

    /// Drives one swap to its next terminal-or-partial state. Calling
    /// it on a swap that already left `Pending` is a no-op returning
    /// the current record, so a lock is never re-submitted.
    pub async fn execute_swap(&self, swap_id: &str) -> Result<SwapOrder, SwapError> {
        let guard = self.locks.guard_for(swap_id);
        let _held = guard.lock().await;

        let mut swap = self
            .registry
            .get(swap_id)
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;
        if swap.status != SwapStatus::Pending {
            return Ok(swap);
        }

        let id_bytes = swap_id_bytes(&swap.swap_id)?;
        let source = self.source_adapter(swap.direction);
        let dest = self.dest_adapter(swap.direction);
        let params = self.config.direction_params(swap.direction);

        // Source leg: hash-locked deposit.
        let lock_params = LockParams {
            swap_id: id_bytes,
            recipient: params.counterparty_address.clone(),
            amount: swap.requested_amount.clone(),
            hash_lock: swap.secret_hash,
            timelock_expiry: swap.timelock_expiry,
        };
        let lock_tx = match source.lock_funds(&lock_params).await {
            Ok(outcome) => {
                info!(
                    "[Engine] swap {} source lock submitted: {}",
                    swap.swap_id, outcome.tx_hash
                );
                outcome.tx_hash
            }
            Err(e) => {
                let raw = e.to_string();
                swap.failure_analysis =
                    Some(reconciler::analyze(&raw, source.decode_revert_reason(&raw)));
                self.transition(&mut swap, SwapStatus::Failed)?;
                self.store(&mut swap);
                return Ok(swap);
            }
        };
        swap.source_tx = Some(TxRecord::submitted(&lock_tx));
        self.store(&mut swap);

        let receipt = match self.await_confirmation(source.as_ref(), &lock_tx).await {
            Ok(receipt) => receipt,
            Err(e) => {
                swap.failure_analysis = Some(reconciler::analyze(&e.to_string(), None));
                self.transition(&mut swap, SwapStatus::Failed)?;
                self.store(&mut swap);
                return Ok(swap);
            }
        };
        swap.source_tx = Some(record_from(&receipt));
        if !receipt.success {
            let raw = receipt
                .error
                .unwrap_or_else(|| "source lock failed without error payload".to_string());
            swap.failure_analysis =
                Some(reconciler::analyze(&raw, source.decode_revert_reason(&raw)));
            self.transition(&mut swap, SwapStatus::Failed)?;
            self.store(&mut swap);
            return Ok(swap);
        }
        self.transition(&mut swap, SwapStatus::Processing)?;
        self.store(&mut swap);

        // Destination leg. Past the timelock no release may start; the
        // record keeps secret and hash for the refund path.
        if swap.is_timelock_expired(unix_now()) {
            warn!(
                "[Engine] swap {} reached its timelock before destination settlement",
                swap.swap_id
            );
            swap.failure_analysis = Some(reconciler::analyze(
                "timelock expired before destination settlement was attempted",
                None,
            ));
            self.transition(&mut swap, SwapStatus::Partial)?;
            self.store(&mut swap);
            return Ok(swap);
        }

        let release_params = ReleaseParams {
            swap_id: id_bytes,
            secret: swap.secret,
            recipient: params.payout_address.clone(),
            amount: swap.estimated_output.clone(),
        };
        let contract_failure = match self
            .try_contract_release(dest.as_ref(), &release_params)
            .await
        {
            Ok(record) => {
                swap.dest_tx = Some(record);
                swap.settlement_mode = Some(SettlementMode::ContractVerified);
                self.transition(&mut swap, SwapStatus::Completed)?;
                self.store(&mut swap);
                info!("[Engine] swap {} completed (contract verified)", swap.swap_id);
                return Ok(swap);
            }
            Err(DestinationFailure::Business(analysis)) => {
                // Fallback is only authorized after chain-level errors.
                warn!(
                    "[Engine] swap {} destination rejected before submission: {}",
                    swap.swap_id, analysis.technical_detail
                );
                swap.failure_analysis = Some(analysis);
                self.transition(&mut swap, SwapStatus::Partial)?;
                self.store(&mut swap);
                return Ok(swap);
            }
            Err(DestinationFailure::ChainLevel(analysis)) => analysis,
        };

        // Fallback: operator direct transfer. A weaker trust assumption
        // than the contract path; flagged as its own settlement mode and
        // the failed contract attempt stays on the record for audit.
        warn!(
            "[Engine] swap {} contract-verified release failed ({}); attempting fallback transfer",
            swap.swap_id, contract_failure.technical_detail
        );
        swap.failure_analysis = Some(contract_failure.clone());
        self.store(&mut swap);

        let fallback_error = match dest
            .transfer_direct(&params.payout_address, &swap.estimated_output)
            .await
        {
            Ok(tx_hash) => {
                swap.dest_tx = Some(TxRecord::submitted(&tx_hash));
                self.store(&mut swap);
                match self.await_confirmation(dest.as_ref(), &tx_hash).await {
                    Ok(receipt) if receipt.success => {
                        swap.dest_tx = Some(record_from(&receipt));
                        swap.settlement_mode = Some(SettlementMode::FallbackDirectTransfer);
                        self.transition(&mut swap, SwapStatus::Completed)?;
                        self.store(&mut swap);
                        warn!(
                            "[Engine] swap {} completed via fallback direct transfer",
                            swap.swap_id
                        );
                        return Ok(swap);
                    }
                    Ok(receipt) => {
                        swap.dest_tx = Some(record_from(&receipt));
                        receipt
                            .error
                            .unwrap_or_else(|| "fallback transfer failed".to_string())
                    }
                    Err(e) => e.to_string(),
                }
            }
            Err(e) => e.to_string(),
        };

        // Both settlement paths exhausted: source funds stay locked
        // behind the timelock until a refund job or operator acts.
        error!(
            "[Engine] swap {} fallback transfer failed as well: {}",
            swap.swap_id, fallback_error
        );
        swap.failure_analysis = Some(FailureAnalysis {
            technical_detail: format!(
                "{}; fallback: {}",
                contract_failure.technical_detail, fallback_error
            ),
            ..contract_failure
        });
        self.transition(&mut swap, SwapStatus::Partial)?;
        self.store(&mut swap);
        Ok(swap)
    }

    async fn try_contract_release(
        &self,
        dest: &dyn ChainAdapter,
        params: &ReleaseParams,
    ) -> Result<TxRecord, DestinationFailure> {
        let tx_hash = match dest.release_with_secret(params).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                let raw = e.to_string();
                let analysis = reconciler::analyze(&raw, dest.decode_revert_reason(&raw));
                return Err(if e.is_chain_level() {
                    DestinationFailure::ChainLevel(analysis)
                } else {
                    DestinationFailure::Business(analysis)
                });
            }
        };
        match self.await_confirmation(dest, &tx_hash).await {
            Ok(receipt) if receipt.success => Ok(record_from(&receipt)),
            Ok(receipt) => {
                let raw = format!(
                    "destination release {} failed: {}",
                    tx_hash,
                    receipt.error.as_deref().unwrap_or("no error payload")
                );
                Err(DestinationFailure::ChainLevel(reconciler::analyze(
                    &raw,
                    dest.decode_revert_reason(&raw),
                )))
            }
            Err(e) => Err(DestinationFailure::ChainLevel(reconciler::analyze(
                &e.to_string(),
                None,
            ))),
        }
    }

    /// Polls for a receipt until it carries enough confirmations or the
    /// attempt budget runs out. Returns failed receipts too; execution
    /// status is the caller's to judge.
    async fn await_confirmation(
        &self,
        adapter: &dyn ChainAdapter,
        tx_hash: &str,
    ) -> Result<Receipt, SwapError> {
        for attempt in 0..self.config.receipt_poll_attempts {
            match adapter.get_receipt(tx_hash).await {
                Ok(Some(receipt))
                    if receipt.confirmations >= self.config.required_confirmations =>
                {
                    return Ok(receipt)
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "[Engine] receipt poll {} for {} failed: {}",
                        attempt, tx_hash, e
                    );
                }
            }
            tokio::time::sleep(self.config.receipt_poll_interval).await;
        }
        Err(SwapError::Confirmation(format!(
            "timed out waiting for receipt of {}",
            tx_hash
        )))
    }

    fn transition(&self, swap: &mut SwapOrder, next: SwapStatus) -> Result<(), SwapError> {
        if !swap.status.can_transition(next) {
            return Err(SwapError::InvalidTransition {
                from: swap.status,
                to: next,
            });
        }
        info!(
            "[Engine] swap {} status {} -> {}",
            swap.swap_id, swap.status, next
        );
        swap.status = next;
        Ok(())
    }

    fn store(&self, swap: &mut SwapOrder) {
        swap.updated_at = Utc::now();
        self.registry.put(swap.clone());
    }
}

fn record_from(receipt: &Receipt) -> TxRecord {
    TxRecord {
        hash: receipt.tx_hash.clone(),
        block_number: Some(receipt.block_number),
        confirmed_status: Some(receipt.success),
        gas_used: Some(receipt.gas_used),
        confirmations: receipt.confirmations,
    }
}

fn swap_id_bytes(swap_id: &str) -> Result<SwapId, SwapError> {
    let decoded = hex::decode(swap_id)
        .map_err(|e| SwapError::Validation(format!("malformed swap id {}: {}", swap_id, e)))?;
    decoded
        .try_into()
        .map_err(|_| SwapError::Validation(format!("swap id {} is not 32 bytes", swap_id)))
}

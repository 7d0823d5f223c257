// State-machine chain integration: a deterministic in-process ledger
// with block production, per-account sequences and a native
// hash-time-locked escrow, plus the adapter that exposes it through the
// `ChainAdapter` capability set.
//
// The ledger verifies SHA-256(secret) itself on withdraw; the adapter
// never decides whether a secret is correct.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use ethers::types::U256;
use ethers::utils::parse_units;
use log::warn;
use sha2::{Digest, Sha256};

use crate::hashlock;
use crate::onchain::interface::{
    ChainAdapter, ChainAdapterError, LockOutcome, LockParams, Receipt, ReleaseParams, TxHash,
};

const LOCK_WEIGHT: u64 = 120;
const WITHDRAW_WEIGHT: u64 = 90;
const TRANSFER_WEIGHT: u64 = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HtlcState {
    Open,
    Withdrawn,
    Refunded,
}

#[derive(Clone, Debug)]
pub struct HtlcEntry {
    pub sender: String,
    pub recipient: String,
    pub amount: u128,
    pub hash_lock: [u8; 32],
    /// Unix seconds after which the entry is refundable to the sender.
    pub expiry: u64,
    pub state: HtlcState,
}

#[derive(Clone, Debug)]
struct StoredReceipt {
    block_number: u64,
    success: bool,
    weight: u64,
    error: Option<String>,
}

/// One blockchain environment: accounts, sequences, escrow entries and
/// receipts. Every submitted transaction produces a block.
#[derive(Debug)]
pub struct StateMachineChain {
    pub chain_id: u64,
    height: u64,
    /// Ledger clock in Unix seconds; expiry checks read this, tests
    /// steer it.
    now: u64,
    tx_counter: u64,
    balances: HashMap<String, u128>,
    sequences: HashMap<String, u64>,
    htlcs: HashMap<String, HtlcEntry>,
    receipts: HashMap<String, StoredReceipt>,
}

impl StateMachineChain {
    pub fn new(chain_id: u64) -> Self {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        StateMachineChain {
            chain_id,
            height: 0,
            now,
            tx_counter: 0,
            balances: HashMap::new(),
            sequences: HashMap::new(),
            htlcs: HashMap::new(),
            receipts: HashMap::new(),
        }
    }

    pub fn credit(&mut self, account: &str, amount: u128) {
        *self.balances.entry(account.to_string()).or_insert(0) += amount;
    }

    pub fn balance(&self, account: &str) -> u128 {
        self.balances.get(account).copied().unwrap_or(0)
    }

    pub fn htlc(&self, swap_ref: &str) -> Option<&HtlcEntry> {
        self.htlcs.get(swap_ref)
    }

    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn set_time(&mut self, unix_secs: u64) {
        self.now = unix_secs;
    }

    /// Produce empty blocks; existing receipts gain confirmations.
    pub fn advance_blocks(&mut self, n: u64) {
        self.height += n;
    }

    fn next_sequence(&mut self, account: &str) -> u64 {
        let seq = self.sequences.entry(account.to_string()).or_insert(0);
        *seq += 1;
        *seq
    }

    // Every submission lands in its own block; the tx hash commits to
    // the submitter's fresh sequence number, so retries never collide.
    fn include_tx(&mut self, account: &str, payload: &str) -> (String, u64) {
        let seq = self.next_sequence(account);
        self.tx_counter += 1;
        self.height += 1;
        let preimage = format!("{}:{}:{}:{}", self.chain_id, self.tx_counter, seq, payload);
        let hash = format!("0x{}", hex::encode(Sha256::digest(preimage.as_bytes())));
        (hash, self.height)
    }

    fn record(
        &mut self,
        tx_hash: &str,
        block_number: u64,
        weight: u64,
        error: Option<String>,
    ) {
        self.receipts.insert(
            tx_hash.to_string(),
            StoredReceipt {
                block_number,
                success: error.is_none(),
                weight,
                error,
            },
        );
    }

    pub fn simulate_lock(&self, sender: &str, swap_ref: &str, amount: u128) -> Result<(), String> {
        if self.htlcs.contains_key(swap_ref) {
            return Err(format!("htlc: duplicate swap id {}", swap_ref));
        }
        if self.balance(sender) < amount {
            return Err("htlc: insufficient balance for lock".to_string());
        }
        Ok(())
    }

    pub fn submit_lock(
        &mut self,
        sender: &str,
        swap_ref: &str,
        recipient: &str,
        amount: u128,
        hash_lock: [u8; 32],
        expiry: u64,
    ) -> String {
        let outcome = self.simulate_lock(sender, swap_ref, amount);
        let (tx_hash, block) = self.include_tx(sender, &format!("lock:{}", swap_ref));
        match outcome {
            Ok(()) => {
                *self.balances.get_mut(sender).expect("balance checked") -= amount;
                self.htlcs.insert(
                    swap_ref.to_string(),
                    HtlcEntry {
                        sender: sender.to_string(),
                        recipient: recipient.to_string(),
                        amount,
                        hash_lock,
                        expiry,
                        state: HtlcState::Open,
                    },
                );
                self.record(&tx_hash, block, LOCK_WEIGHT, None);
            }
            Err(reason) => self.record(&tx_hash, block, LOCK_WEIGHT, Some(reason)),
        }
        tx_hash
    }

    pub fn simulate_withdraw(&self, swap_ref: &str, secret: &[u8; 32]) -> Result<(), String> {
        let entry = self
            .htlcs
            .get(swap_ref)
            .ok_or_else(|| format!("htlc: unknown swap id {}", swap_ref))?;
        if entry.state != HtlcState::Open {
            return Err("htlc: already settled".to_string());
        }
        if self.now >= entry.expiry {
            return Err("htlc: lock expired".to_string());
        }
        if hashlock::hash_secret(secret) != entry.hash_lock {
            return Err("htlc: invalid secret".to_string());
        }
        Ok(())
    }

    pub fn submit_withdraw(&mut self, caller: &str, swap_ref: &str, secret: &[u8; 32]) -> String {
        let outcome = self.simulate_withdraw(swap_ref, secret);
        let (tx_hash, block) = self.include_tx(caller, &format!("withdraw:{}", swap_ref));
        match outcome {
            Ok(()) => {
                let entry = self.htlcs.get_mut(swap_ref).expect("entry checked");
                entry.state = HtlcState::Withdrawn;
                let recipient = entry.recipient.clone();
                let amount = entry.amount;
                *self.balances.entry(recipient).or_insert(0) += amount;
                self.record(&tx_hash, block, WITHDRAW_WEIGHT, None);
            }
            Err(reason) => self.record(&tx_hash, block, WITHDRAW_WEIGHT, Some(reason)),
        }
        tx_hash
    }

    pub fn submit_transfer(&mut self, from: &str, to: &str, amount: u128) -> String {
        let enough = self.balance(from) >= amount;
        let (tx_hash, block) = self.include_tx(from, &format!("transfer:{}:{}", to, amount));
        if enough {
            *self.balances.get_mut(from).expect("balance checked") -= amount;
            *self.balances.entry(to.to_string()).or_insert(0) += amount;
            self.record(&tx_hash, block, TRANSFER_WEIGHT, None);
        } else {
            self.record(
                &tx_hash,
                block,
                TRANSFER_WEIGHT,
                Some("insufficient balance for transfer".to_string()),
            );
        }
        tx_hash
    }

    pub fn receipt(&self, tx_hash: &str) -> Option<Receipt> {
        self.receipts.get(tx_hash).map(|stored| Receipt {
            tx_hash: tx_hash.to_string(),
            block_number: stored.block_number,
            success: stored.success,
            gas_used: stored.weight,
            confirmations: self.height.saturating_sub(stored.block_number) + 1,
            error: stored.error.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct StateChainConfig {
    pub chain_id: u64,
    pub operator_address: String,
    /// Decimals of the chain's native asset.
    pub decimals: u32,
}

/// `ChainAdapter` over a shared `StateMachineChain` ledger.
#[derive(Clone)]
pub struct StateChainAdapter {
    chain: Arc<Mutex<StateMachineChain>>,
    config: StateChainConfig,
}

impl StateChainAdapter {
    pub fn new(chain: Arc<Mutex<StateMachineChain>>, config: StateChainConfig) -> Self {
        StateChainAdapter { chain, config }
    }

    /// Handle on the underlying ledger, e.g. to seed balances or steer
    /// the clock in tests and simulations.
    pub fn chain(&self) -> Arc<Mutex<StateMachineChain>> {
        Arc::clone(&self.chain)
    }

    fn to_base_units(&self, amount: &str) -> Result<u128, ChainAdapterError> {
        let parsed: U256 = parse_units(amount, self.config.decimals)
            .map_err(|e| ChainAdapterError::InvalidAmount {
                amount: amount.to_string(),
                reason: e.to_string(),
            })?
            .into();
        if parsed > U256::from(u128::MAX) {
            return Err(ChainAdapterError::InvalidAmount {
                amount: amount.to_string(),
                reason: "amount exceeds ledger range".to_string(),
            });
        }
        Ok(parsed.as_u128())
    }
}

#[async_trait]
impl ChainAdapter for StateChainAdapter {
    fn operator_address(&self) -> String {
        self.config.operator_address.clone()
    }

    async fn lock_funds(&self, params: &LockParams) -> Result<LockOutcome, ChainAdapterError> {
        let amount = self.to_base_units(&params.amount)?;
        let swap_ref = hex::encode(params.swap_id);
        let mut chain = self.chain.lock().expect("ledger lock poisoned");

        let available = chain.balance(&self.config.operator_address);
        if available < amount {
            return Err(ChainAdapterError::InsufficientBalance {
                needed: U256::from(amount),
                available: U256::from(available),
            });
        }
        chain
            .simulate_lock(&self.config.operator_address, &swap_ref, amount)
            .map_err(ChainAdapterError::ContractWouldRevert)?;

        let tx_hash = chain.submit_lock(
            &self.config.operator_address,
            &swap_ref,
            &params.recipient,
            amount,
            params.hash_lock,
            params.timelock_expiry,
        );
        Ok(LockOutcome {
            tx_hash,
            order_ref: swap_ref,
        })
    }

    async fn release_with_secret(
        &self,
        params: &ReleaseParams,
    ) -> Result<TxHash, ChainAdapterError> {
        let swap_ref = hex::encode(params.swap_id);
        let mut chain = self.chain.lock().expect("ledger lock poisoned");
        chain
            .simulate_withdraw(&swap_ref, &params.secret)
            .map_err(ChainAdapterError::ContractWouldRevert)?;
        Ok(chain.submit_withdraw(&self.config.operator_address, &swap_ref, &params.secret))
    }

    async fn transfer_direct(
        &self,
        recipient: &str,
        amount: &str,
    ) -> Result<TxHash, ChainAdapterError> {
        let amount = self.to_base_units(amount)?;
        let mut chain = self.chain.lock().expect("ledger lock poisoned");
        let available = chain.balance(&self.config.operator_address);
        if available < amount {
            return Err(ChainAdapterError::InsufficientBalance {
                needed: U256::from(amount),
                available: U256::from(available),
            });
        }
        warn!(
            "[StateChainAdapter chain={}] direct transfer of {} base units to {} (no hash-lock guarantees)",
            self.config.chain_id, amount, recipient
        );
        Ok(chain.submit_transfer(&self.config.operator_address, recipient, amount))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<Option<Receipt>, ChainAdapterError> {
        let chain = self.chain.lock().expect("ledger lock poisoned");
        Ok(chain.receipt(tx_hash))
    }

    async fn get_balance(&self, address: &str) -> Result<U256, ChainAdapterError> {
        let chain = self.chain.lock().expect("ledger lock poisoned");
        Ok(U256::from(chain.balance(address)))
    }

    fn decode_revert_reason(&self, payload: &str) -> Option<String> {
        // Ledger errors are already structured strings; surface the
        // module-prefixed part.
        payload.find("htlc:").map(|idx| {
            payload[idx..]
                .lines()
                .next()
                .unwrap_or(&payload[idx..])
                .trim()
                .to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashlock;

    fn seeded_chain() -> StateMachineChain {
        let mut chain = StateMachineChain::new(2);
        chain.credit("operator", 1_000_000);
        chain.credit("alice", 500_000);
        chain.set_time(1_000);
        chain
    }

    #[test]
    fn lock_then_withdraw_with_correct_secret() {
        let mut chain = seeded_chain();
        let pair = hashlock::generate();

        let lock_tx = chain.submit_lock("alice", "swap-1", "bob", 10_000, pair.hash, 5_000);
        let lock_receipt = chain.receipt(&lock_tx).unwrap();
        assert!(lock_receipt.success);
        assert_eq!(chain.balance("alice"), 490_000);
        assert_eq!(chain.balance("bob"), 0);

        let withdraw_tx = chain.submit_withdraw("bob", "swap-1", &pair.secret);
        let withdraw_receipt = chain.receipt(&withdraw_tx).unwrap();
        assert!(withdraw_receipt.success);
        assert_eq!(chain.balance("bob"), 10_000);
        assert_eq!(chain.htlc("swap-1").unwrap().state, HtlcState::Withdrawn);
    }

    #[test]
    fn wrong_secret_fails_deterministically() {
        let mut chain = seeded_chain();
        let pair = hashlock::generate();
        chain.submit_lock("alice", "swap-1", "bob", 10_000, pair.hash, 5_000);

        let wrong = [7u8; 32];
        assert_eq!(
            chain.simulate_withdraw("swap-1", &wrong),
            Err("htlc: invalid secret".to_string())
        );
        let tx = chain.submit_withdraw("bob", "swap-1", &wrong);
        let receipt = chain.receipt(&tx).unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.error.as_deref(), Some("htlc: invalid secret"));
        // Funds stay locked
        assert_eq!(chain.balance("bob"), 0);
        assert_eq!(chain.htlc("swap-1").unwrap().state, HtlcState::Open);
    }

    #[test]
    fn expired_lock_rejects_withdraw() {
        let mut chain = seeded_chain();
        let pair = hashlock::generate();
        chain.submit_lock("alice", "swap-1", "bob", 10_000, pair.hash, 5_000);

        chain.set_time(5_000);
        assert_eq!(
            chain.simulate_withdraw("swap-1", &pair.secret),
            Err("htlc: lock expired".to_string())
        );
    }

    #[test]
    fn duplicate_swap_id_rejected() {
        let mut chain = seeded_chain();
        let pair = hashlock::generate();
        chain.submit_lock("alice", "swap-1", "bob", 10_000, pair.hash, 5_000);
        assert_eq!(
            chain.simulate_lock("alice", "swap-1", 10_000),
            Err("htlc: duplicate swap id swap-1".to_string())
        );
    }

    #[test]
    fn confirmations_grow_with_block_production() {
        let mut chain = seeded_chain();
        let tx = chain.submit_transfer("alice", "bob", 100);
        assert_eq!(chain.receipt(&tx).unwrap().confirmations, 1);
        chain.advance_blocks(5);
        assert_eq!(chain.receipt(&tx).unwrap().confirmations, 6);
    }

    #[test]
    fn failed_transfer_records_failure_receipt() {
        let mut chain = seeded_chain();
        let tx = chain.submit_transfer("bob", "alice", 100);
        let receipt = chain.receipt(&tx).unwrap();
        assert!(!receipt.success);
        assert_eq!(
            receipt.error.as_deref(),
            Some("insufficient balance for transfer")
        );
        assert_eq!(chain.balance("alice"), 500_000);
    }

    #[tokio::test]
    async fn adapter_pre_validates_operator_balance() {
        let chain = Arc::new(Mutex::new(StateMachineChain::new(2)));
        let adapter = StateChainAdapter::new(
            chain,
            StateChainConfig {
                chain_id: 2,
                operator_address: "operator".to_string(),
                decimals: 10,
            },
        );
        let pair = hashlock::generate();
        let err = adapter
            .lock_funds(&LockParams {
                swap_id: [1u8; 32],
                recipient: "bob".to_string(),
                amount: "1.0".to_string(),
                hash_lock: pair.hash,
                timelock_expiry: u64::MAX,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ChainAdapterError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn adapter_settles_lock_and_release() {
        let chain = Arc::new(Mutex::new(StateMachineChain::new(2)));
        {
            let mut ledger = chain.lock().unwrap();
            ledger.credit("operator", 10_u128.pow(14));
            ledger.set_time(1_000);
        }
        let adapter = StateChainAdapter::new(
            Arc::clone(&chain),
            StateChainConfig {
                chain_id: 2,
                operator_address: "operator".to_string(),
                decimals: 10,
            },
        );
        let pair = hashlock::generate();
        let swap_id = [9u8; 32];

        let lock = adapter
            .lock_funds(&LockParams {
                swap_id,
                recipient: "operator".to_string(),
                amount: "12.5".to_string(),
                hash_lock: pair.hash,
                timelock_expiry: 2_000,
            })
            .await
            .unwrap();
        let receipt = adapter.get_receipt(&lock.tx_hash).await.unwrap().unwrap();
        assert!(receipt.success);
        assert_eq!(lock.order_ref, hex::encode(swap_id));

        let release_tx = adapter
            .release_with_secret(&ReleaseParams {
                swap_id,
                secret: pair.secret,
                recipient: "operator".to_string(),
                amount: "12.5".to_string(),
            })
            .await
            .unwrap();
        let receipt = adapter.get_receipt(&release_tx).await.unwrap().unwrap();
        assert!(receipt.success);
    }

    #[test]
    fn decodes_module_errors_only() {
        let chain = Arc::new(Mutex::new(StateMachineChain::new(2)));
        let adapter = StateChainAdapter::new(
            chain,
            StateChainConfig {
                chain_id: 2,
                operator_address: "operator".to_string(),
                decimals: 10,
            },
        );
        assert_eq!(
            adapter
                .decode_revert_reason("contract would revert: htlc: invalid secret")
                .as_deref(),
            Some("htlc: invalid secret")
        );
        assert_eq!(adapter.decode_revert_reason("connection reset"), None);
    }
}

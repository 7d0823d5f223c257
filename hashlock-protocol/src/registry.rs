// Swap registry: single source of truth for swap records. All
// components read and write through the four-operation contract; no
// component other than the settlement engine or reconciler mutates
// `status`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use log::{error, info};
use serde::Serialize;
use thiserror::Error;

use crate::cross_chain::types::{SwapOrder, SwapStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_status: HashMap<String, usize>,
    /// Sum of `requested_amount` over completed swaps, source units.
    pub total_volume_of_completed: String,
}

/// Keyed store of swap records. Records are upserted whole and never
/// deleted; terminal swaps remain retrievable for audit.
pub trait SwapRegistry: Send + Sync {
    fn put(&self, swap: SwapOrder);
    fn get(&self, swap_id: &str) -> Option<SwapOrder>;
    /// Newest-first, at most `limit` records.
    fn list(&self, limit: usize) -> Vec<SwapOrder>;
    fn stats(&self) -> RegistryStats;
}

#[derive(Default)]
struct RegistryInner {
    swaps: HashMap<String, SwapOrder>,
    /// Insertion order; `list` walks it backwards.
    order: Vec<String>,
}

impl RegistryInner {
    fn put(&mut self, swap: SwapOrder) {
        if !self.swaps.contains_key(&swap.swap_id) {
            self.order.push(swap.swap_id.clone());
        }
        self.swaps.insert(swap.swap_id.clone(), swap);
    }

    fn list(&self, limit: usize) -> Vec<SwapOrder> {
        self.order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| self.swaps.get(id).cloned())
            .collect()
    }

    fn stats(&self) -> RegistryStats {
        let mut by_status: HashMap<String, usize> = HashMap::new();
        let mut volume = 0.0f64;
        for swap in self.swaps.values() {
            *by_status.entry(swap.status.wire_name().to_string()).or_insert(0) += 1;
            if swap.status == SwapStatus::Completed {
                volume += swap.requested_amount.parse::<f64>().unwrap_or(0.0);
            }
        }
        RegistryStats {
            total: self.swaps.len(),
            by_status,
            total_volume_of_completed: format!("{:.4}", volume),
        }
    }

    fn snapshot(&self) -> Vec<SwapOrder> {
        // Oldest-first, so reloads rebuild the same insertion order
        self.order
            .iter()
            .filter_map(|id| self.swaps.get(id).cloned())
            .collect()
    }
}

/// In-memory registry. A placeholder by design: production deployments
/// swap in a durable store behind the same contract without touching
/// the engine or reconciler.
#[derive(Default)]
pub struct InMemorySwapRegistry {
    inner: RwLock<RegistryInner>,
}

impl InMemorySwapRegistry {
    pub fn new() -> Self {
        Default::default()
    }
}

impl SwapRegistry for InMemorySwapRegistry {
    fn put(&self, swap: SwapOrder) {
        self.inner.write().expect("registry lock poisoned").put(swap);
    }

    fn get(&self, swap_id: &str) -> Option<SwapOrder> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .swaps
            .get(swap_id)
            .cloned()
    }

    fn list(&self, limit: usize) -> Vec<SwapOrder> {
        self.inner.read().expect("registry lock poisoned").list(limit)
    }

    fn stats(&self) -> RegistryStats {
        self.inner.read().expect("registry lock poisoned").stats()
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read registry snapshot: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse registry snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Registry that mirrors every write to a JSON snapshot file, so swap
/// records survive process restarts. Same four-operation contract as
/// the in-memory store.
pub struct FileBackedRegistry {
    path: PathBuf,
    inner: RwLock<RegistryInner>,
}

impl FileBackedRegistry {
    /// Opens (or creates) the snapshot at `path` and loads any existing
    /// records.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref().to_path_buf();
        let mut inner = RegistryInner::default();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if !raw.trim().is_empty() {
                let swaps: Vec<SwapOrder> = serde_json::from_str(&raw)?;
                info!(
                    "[Registry] loaded {} swap record(s) from {}",
                    swaps.len(),
                    path.display()
                );
                for swap in swaps {
                    inner.put(swap);
                }
            }
        }
        Ok(FileBackedRegistry {
            path,
            inner: RwLock::new(inner),
        })
    }

    fn persist(&self, snapshot: &[SwapOrder]) {
        let encoded = match serde_json::to_vec_pretty(snapshot) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("[Registry] failed to encode snapshot: {}", e);
                return;
            }
        };
        if let Err(e) = std::fs::write(&self.path, encoded) {
            error!(
                "[Registry] failed to write snapshot to {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

impl SwapRegistry for FileBackedRegistry {
    fn put(&self, swap: SwapOrder) {
        let snapshot = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            inner.put(swap);
            inner.snapshot()
        };
        self.persist(&snapshot);
    }

    fn get(&self, swap_id: &str) -> Option<SwapOrder> {
        self.inner
            .read()
            .expect("registry lock poisoned")
            .swaps
            .get(swap_id)
            .cloned()
    }

    fn list(&self, limit: usize) -> Vec<SwapOrder> {
        self.inner.read().expect("registry lock poisoned").list(limit)
    }

    fn stats(&self) -> RegistryStats {
        self.inner.read().expect("registry lock poisoned").stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::SwapDirection;
    use chrono::Utc;

    fn test_swap(swap_id: &str, status: SwapStatus, amount: &str) -> SwapOrder {
        let now = Utc::now();
        SwapOrder {
            swap_id: swap_id.to_string(),
            direction: SwapDirection::SourceToDest,
            requested_amount: amount.to_string(),
            estimated_output: "0.0".to_string(),
            secret: [0u8; 32],
            secret_hash: [1u8; 32],
            timelock_expiry: 0,
            status,
            source_tx: None,
            dest_tx: None,
            failure_analysis: None,
            settlement_mode: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn put_get_and_not_found() {
        let registry = InMemorySwapRegistry::new();
        assert!(registry.get("missing").is_none());

        registry.put(test_swap("s1", SwapStatus::Pending, "1.0"));
        let fetched = registry.get("s1").unwrap();
        assert_eq!(fetched.swap_id, "s1");

        // Upsert replaces the record without duplicating it
        registry.put(test_swap("s1", SwapStatus::Completed, "1.0"));
        assert_eq!(registry.get("s1").unwrap().status, SwapStatus::Completed);
        assert_eq!(registry.stats().total, 1);
    }

    #[test]
    fn list_is_newest_first_and_limited() {
        let registry = InMemorySwapRegistry::new();
        for i in 0..5 {
            registry.put(test_swap(&format!("s{i}"), SwapStatus::Pending, "1.0"));
        }
        let listed = registry.list(3);
        let ids: Vec<&str> = listed.iter().map(|s| s.swap_id.as_str()).collect();
        assert_eq!(ids, vec!["s4", "s3", "s2"]);
        assert_eq!(registry.list(100).len(), 5);
    }

    #[test]
    fn stats_aggregate_status_and_completed_volume() {
        let registry = InMemorySwapRegistry::new();
        registry.put(test_swap("s1", SwapStatus::Completed, "0.5"));
        registry.put(test_swap("s2", SwapStatus::Completed, "1.25"));
        registry.put(test_swap("s3", SwapStatus::Failed, "9.0"));
        registry.put(test_swap("s4", SwapStatus::Partial, "2.0"));

        let stats = registry.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.by_status.get("completed"), Some(&2));
        assert_eq!(stats.by_status.get("failed"), Some(&1));
        assert_eq!(stats.by_status.get("partial"), Some(&1));
        // Failed/partial volume is not counted
        assert_eq!(stats.total_volume_of_completed, "1.7500");
    }

    #[test]
    fn file_backed_registry_survives_reopen() {
        let path = std::env::temp_dir().join(format!(
            "hashlock-registry-test-{}.json",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        {
            let registry = FileBackedRegistry::open(&path).unwrap();
            registry.put(test_swap("s1", SwapStatus::Completed, "0.5"));
            registry.put(test_swap("s2", SwapStatus::Pending, "1.0"));
        }

        let reopened = FileBackedRegistry::open(&path).unwrap();
        assert_eq!(reopened.stats().total, 2);
        assert_eq!(reopened.get("s1").unwrap().status, SwapStatus::Completed);
        let ids: Vec<String> = reopened
            .list(10)
            .into_iter()
            .map(|s| s.swap_id)
            .collect();
        assert_eq!(ids, vec!["s2".to_string(), "s1".to_string()]);

        let _ = std::fs::remove_file(&path);
    }
}

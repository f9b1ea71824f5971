use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{CustomerAttributes, CustomerId, NewInteraction, ProductAttributes, ProductId},
    services::{cooccurrence::CoOccurrenceIndex, interaction_store::InteractionStore, scoring::ScoringPolicy},
};

/// Settings that govern how the index follows the store
#[derive(Debug, Clone)]
pub struct IndexSettings {
    pub policy: ScoringPolicy,
    pub incremental_updates: bool,
    pub staleness_bound: u64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            policy: ScoringPolicy::default(),
            incremental_updates: true,
            staleness_bound: 1000,
        }
    }
}

/// Outcome of one ingested batch
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestReport {
    pub accepted: usize,
    pub store_version: u64,
    pub index_version: u64,
}

/// Outcome of a completed rebuild
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RebuildReport {
    pub rebuild_id: Uuid,
    pub index_version: u64,
    pub replayed: usize,
    pub elapsed_ms: u128,
}

/// Point-in-time view of store and index bookkeeping
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IndexStatus {
    pub store_version: u64,
    pub index_version: u64,
    pub stale: bool,
    pub rebuild_running: bool,
    pub customers: usize,
    pub products: usize,
    pub pairs: usize,
}

/// How often a foreground rebuild re-checks for a running one to finish
const REBUILD_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct RebuildTicket {
    id: Uuid,
    cancel: Arc<AtomicBool>,
}

/// Owns the interaction store and the published co-occurrence snapshot
///
/// Readers clone the current `Arc<CoOccurrenceIndex>` and keep a consistent
/// view for as long as they hold it. All writes go through one writer lock;
/// the writer mutates a private working copy and publishes a fresh snapshot
/// when a batch is complete. Rebuilds are built off to the side and swapped
/// in under the writer lock.
pub struct IndexManager {
    settings: IndexSettings,
    store: RwLock<InteractionStore>,
    published: RwLock<Arc<CoOccurrenceIndex>>,
    writer: Mutex<CoOccurrenceIndex>,
    rebuild: Mutex<Option<RebuildTicket>>,
}

impl IndexManager {
    pub fn new(settings: IndexSettings) -> Self {
        let empty = CoOccurrenceIndex::empty(settings.policy.clone());
        Self {
            store: RwLock::new(InteractionStore::new()),
            published: RwLock::new(Arc::new(empty.clone())),
            writer: Mutex::new(empty),
            rebuild: Mutex::new(None),
            settings,
        }
    }

    /// The last fully committed index
    pub async fn snapshot(&self) -> Arc<CoOccurrenceIndex> {
        self.published.read().await.clone()
    }

    pub async fn store_version(&self) -> u64 {
        self.store.read().await.version()
    }

    /// Runs a read-only closure against the interaction store
    pub async fn with_store<T>(&self, f: impl FnOnce(&InteractionStore) -> T) -> T {
        let store = self.store.read().await;
        f(&store)
    }

    pub async fn upsert_customer(&self, id: CustomerId, attributes: CustomerAttributes) -> CustomerId {
        self.store.write().await.upsert_customer(id, attributes)
    }

    pub async fn upsert_product(&self, id: ProductId, attributes: ProductAttributes) -> ProductId {
        self.store.write().await.upsert_product(id, attributes)
    }

    /// Records a validated batch and, unless disabled, folds it into the index
    pub async fn ingest(&self, batch: Vec<NewInteraction>) -> IngestReport {
        let mut working = self.writer.lock().await;

        let recorded = {
            let mut store = self.store.write().await;
            batch
                .into_iter()
                .map(|interaction| store.append(interaction))
                .collect::<Vec<_>>()
        };
        let store_version = recorded.last().map(|i| i.sequence);

        if self.settings.incremental_updates && !recorded.is_empty() {
            for interaction in &recorded {
                working.update(interaction);
            }
            self.publish(&working).await;
        }

        let index_version = working.version();
        let store_version = match store_version {
            Some(version) => version,
            None => self.store_version().await,
        };

        tracing::info!(
            accepted = recorded.len(),
            store_version,
            index_version,
            "Ingested interaction batch"
        );

        IngestReport {
            accepted: recorded.len(),
            store_version,
            index_version,
        }
    }

    /// Signals `IndexStale` when the index lags the store by more than the bound
    pub async fn check_freshness(&self) -> AppResult<()> {
        let store_version = self.store_version().await;
        let index_version = self.snapshot().await.version();
        if store_version.saturating_sub(index_version) > self.settings.staleness_bound {
            return Err(AppError::IndexStale {
                index_version,
                store_version,
            });
        }
        Ok(())
    }

    pub async fn status(&self) -> IndexStatus {
        let store_version = self.store_version().await;
        let snapshot = self.snapshot().await;
        let rebuild_running = self.rebuild.lock().await.is_some();
        IndexStatus {
            store_version,
            index_version: snapshot.version(),
            stale: store_version.saturating_sub(snapshot.version()) > self.settings.staleness_bound,
            rebuild_running,
            customers: snapshot.customer_count(),
            products: snapshot.product_count(),
            pairs: snapshot.pair_count(),
        }
    }

    /// Rebuilds in the foreground and waits for the swap
    pub async fn rebuild(&self) -> AppResult<RebuildReport> {
        let (id, cancel) = self.claim_rebuild().await?;
        let outcome = self.run_rebuild(id, cancel).await;
        self.release_rebuild(id).await;
        outcome
    }

    /// Rebuilds in the foreground, first waiting out any rebuild already
    /// running
    ///
    /// A rebuild started by someone else may have taken its base version
    /// before the caller's latest writes, so a fresh one is always run.
    pub async fn rebuild_when_idle(&self) -> AppResult<RebuildReport> {
        loop {
            match self.rebuild().await {
                Err(AppError::RebuildInProgress) => {
                    tracing::debug!("Waiting for running rebuild to finish");
                    tokio::time::sleep(REBUILD_POLL_INTERVAL).await;
                }
                outcome => return outcome,
            }
        }
    }

    /// Starts a rebuild on a background task and returns its id
    pub async fn start_rebuild(self: &Arc<Self>) -> AppResult<Uuid> {
        let (id, cancel) = self.claim_rebuild().await?;
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = manager.run_rebuild(id, cancel).await {
                tracing::warn!(rebuild_id = %id, error = %e, "Background rebuild did not complete");
            }
            manager.release_rebuild(id).await;
        });
        Ok(id)
    }

    /// Requests cancellation of the running rebuild, if any
    pub async fn cancel_rebuild(&self) -> Option<Uuid> {
        let slot = self.rebuild.lock().await;
        slot.as_ref().map(|ticket| {
            ticket.cancel.store(true, Ordering::Relaxed);
            tracing::info!(rebuild_id = %ticket.id, "Rebuild cancellation requested");
            ticket.id
        })
    }

    async fn claim_rebuild(&self) -> AppResult<(Uuid, Arc<AtomicBool>)> {
        let mut slot = self.rebuild.lock().await;
        if slot.is_some() {
            return Err(AppError::RebuildInProgress);
        }
        let ticket = RebuildTicket {
            id: Uuid::new_v4(),
            cancel: Arc::new(AtomicBool::new(false)),
        };
        let claimed = (ticket.id, Arc::clone(&ticket.cancel));
        *slot = Some(ticket);
        Ok(claimed)
    }

    async fn release_rebuild(&self, id: Uuid) {
        let mut slot = self.rebuild.lock().await;
        if slot.as_ref().is_some_and(|ticket| ticket.id == id) {
            *slot = None;
        }
    }

    async fn run_rebuild(&self, id: Uuid, cancel: Arc<AtomicBool>) -> AppResult<RebuildReport> {
        let start = Instant::now();
        let (log, base_version) = {
            let store = self.store.read().await;
            (store.snapshot(), store.version())
        };

        tracing::info!(rebuild_id = %id, base_version, interactions = log.len(), "Starting index rebuild");

        let policy = self.settings.policy.clone();
        let flag = Arc::clone(&cancel);
        let mut rebuilt = tokio::task::spawn_blocking(move || {
            CoOccurrenceIndex::rebuild(policy, &log, &flag)
        })
        .await
        .map_err(|e| AppError::Internal(e.to_string()))??;

        // Writes that landed while rebuilding are replayed before the swap
        let mut working = self.writer.lock().await;
        let tail = self.store.read().await.interactions_since(base_version);
        for interaction in &tail {
            rebuilt.update(interaction);
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(AppError::RebuildCancelled);
        }

        *working = rebuilt;
        self.publish(&working).await;

        let report = RebuildReport {
            rebuild_id: id,
            index_version: working.version(),
            replayed: tail.len(),
            elapsed_ms: start.elapsed().as_millis(),
        };

        tracing::info!(
            rebuild_id = %id,
            index_version = report.index_version,
            replayed = report.replayed,
            elapsed_ms = report.elapsed_ms,
            pairs = working.pair_count(),
            "Index rebuild swapped in"
        );

        Ok(report)
    }

    /// Swaps in a snapshot of the working copy
    ///
    /// The clone copies the index's outer maps by pointer; rows and profiles
    /// stay shared until the writer next touches them, so a batch costs what
    /// it touched plus one pointer per customer and product.
    async fn publish(&self, working: &CoOccurrenceIndex) {
        let snapshot = Arc::new(working.clone());
        *self.published.write().await = snapshot;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InteractionType;
    use chrono::Utc;

    fn interaction(customer: &str, product: &str, kind: InteractionType, weight: f64) -> NewInteraction {
        NewInteraction::new(customer, product, kind, weight, Utc::now()).unwrap()
    }

    fn scenario_batch() -> Vec<NewInteraction> {
        vec![
            interaction("C1", "A", InteractionType::Purchase, 3.0),
            interaction("C1", "B", InteractionType::View, 1.0),
            interaction("C2", "A", InteractionType::Purchase, 2.0),
            interaction("C2", "C", InteractionType::Purchase, 2.0),
        ]
    }

    #[tokio::test]
    async fn test_ingest_publishes_snapshot() {
        let manager = IndexManager::new(IndexSettings::default());
        let report = manager.ingest(scenario_batch()).await;
        assert_eq!(report.accepted, 4);
        assert_eq!(report.store_version, 4);
        assert_eq!(report.index_version, 4);

        let snapshot = manager.snapshot().await;
        assert!(snapshot.score(&ProductId::from("A"), &ProductId::from("C")) > 0.0);
    }

    #[tokio::test]
    async fn test_held_snapshot_is_isolated_from_later_writes() {
        let manager = IndexManager::new(IndexSettings::default());
        manager.ingest(scenario_batch()).await;
        let held = manager.snapshot().await;

        manager
            .ingest(vec![interaction("C1", "C", InteractionType::Purchase, 1.0)])
            .await;

        assert_eq!(held.version(), 4);
        assert_eq!(manager.snapshot().await.version(), 5);
        assert_eq!(held.score(&ProductId::from("B"), &ProductId::from("C")), 0.0);
    }

    #[tokio::test]
    async fn test_rebuild_matches_incremental_index() {
        let manager = IndexManager::new(IndexSettings::default());
        manager.ingest(scenario_batch()).await;
        let incremental = manager.snapshot().await;

        let report = manager.rebuild().await.unwrap();
        assert_eq!(report.index_version, 4);
        let rebuilt = manager.snapshot().await;
        assert!(!Arc::ptr_eq(&incremental, &rebuilt));
        assert_eq!(incremental.as_ref(), rebuilt.as_ref());
    }

    #[tokio::test]
    async fn test_staleness_without_incremental_updates() {
        let manager = IndexManager::new(IndexSettings {
            incremental_updates: false,
            staleness_bound: 2,
            ..IndexSettings::default()
        });
        manager.ingest(scenario_batch()).await;

        assert_eq!(manager.snapshot().await.version(), 0);
        let err = manager.check_freshness().await.unwrap_err();
        assert_eq!(
            err,
            AppError::IndexStale {
                index_version: 0,
                store_version: 4
            }
        );
        assert!(manager.status().await.stale);

        manager.rebuild().await.unwrap();
        assert!(manager.check_freshness().await.is_ok());
    }

    #[tokio::test]
    async fn test_only_one_rebuild_at_a_time() {
        let manager = IndexManager::new(IndexSettings::default());
        let (id, _cancel) = manager.claim_rebuild().await.unwrap();
        assert_eq!(manager.rebuild().await.unwrap_err(), AppError::RebuildInProgress);
        assert_eq!(manager.cancel_rebuild().await, Some(id));
        manager.release_rebuild(id).await;
        assert!(manager.rebuild().await.is_ok());
    }

    #[tokio::test]
    async fn test_rebuild_when_idle_waits_for_running_rebuild() {
        let manager = Arc::new(IndexManager::new(IndexSettings {
            incremental_updates: false,
            ..IndexSettings::default()
        }));
        let (id, _cancel) = manager.claim_rebuild().await.unwrap();
        manager.ingest(scenario_batch()).await;

        let holder = Arc::clone(&manager);
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            holder.release_rebuild(id).await;
        });

        let report = manager.rebuild_when_idle().await.unwrap();
        release.await.unwrap();
        assert_eq!(report.index_version, 4);
        assert_eq!(manager.snapshot().await.version(), 4);
        assert!(!manager.status().await.rebuild_running);
    }

    #[tokio::test]
    async fn test_cancelled_rebuild_keeps_previous_index() {
        let manager = IndexManager::new(IndexSettings::default());
        manager.ingest(scenario_batch()).await;
        let before = manager.snapshot().await;

        let (id, cancel) = manager.claim_rebuild().await.unwrap();
        cancel.store(true, Ordering::Relaxed);
        let err = manager.run_rebuild(id, cancel).await.unwrap_err();
        manager.release_rebuild(id).await;

        assert_eq!(err, AppError::RebuildCancelled);
        assert!(Arc::ptr_eq(&before, &manager.snapshot().await));
    }

    #[tokio::test]
    async fn test_background_rebuild_completes() {
        let manager = Arc::new(IndexManager::new(IndexSettings {
            incremental_updates: false,
            ..IndexSettings::default()
        }));
        manager.ingest(scenario_batch()).await;
        manager.start_rebuild().await.unwrap();

        for _ in 0..200 {
            if !manager.status().await.rebuild_running {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(manager.snapshot().await.version(), 4);
    }

    #[test]
    fn test_upserts_are_visible_through_store() {
        let manager = IndexManager::new(IndexSettings::default());
        tokio_test::block_on(async {
            manager
                .upsert_product(
                    ProductId::from("p1"),
                    ProductAttributes {
                        name: Some("Kettle".to_string()),
                        categories: vec!["kitchen".to_string()],
                    },
                )
                .await;
            let name = manager
                .with_store(|store| store.product(&ProductId::from("p1")).and_then(|p| p.name.clone()))
                .await;
            assert_eq!(name.as_deref(), Some("Kettle"));
            assert_eq!(manager.store_version().await, 0);
        });
    }
}

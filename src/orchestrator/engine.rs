//! Orchestrator engine: run lifecycle, store updates and the public API.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Semaphore, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::board::{PhaseBoard, PhaseState};
use crate::errors::{OnboardingError, RetryError};
use crate::importers::ImporterSet;
use crate::orchestrator::progress::SyncProgress;
use crate::phase::SyncPhase;
use crate::registry::{CancelRegistry, StoreLocks};
use crate::store::{OverallSyncStatus, Store, StoreRepository, SyncStatus};

/// Configuration for the onboarding orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on fanned-out tasks running concurrently across all stores.
    pub max_parallel: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { max_parallel: 4 }
    }
}

impl OrchestratorConfig {
    /// Create a config with a specific worker-pool bound.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }
}

/// Events emitted during an onboarding run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    /// A run has been initialized and its board reset.
    RunStarted { store_id: Uuid },
    /// A phase has been marked active.
    PhaseStarted { store_id: Uuid, phase: SyncPhase },
    /// A phase's importer returned successfully.
    PhaseCompleted {
        store_id: Uuid,
        phase: SyncPhase,
        records: u64,
    },
    /// A phase's importer failed; the failure was recorded, not propagated.
    PhaseFailed {
        store_id: Uuid,
        phase: SyncPhase,
        error: String,
    },
    /// A phase was skipped at a cancellation checkpoint.
    PhaseSkipped { store_id: Uuid, phase: SyncPhase },
    /// The run reached a terminal overall status.
    RunFinished {
        store_id: Uuid,
        outcome: OverallSyncStatus,
    },
}

/// Shared run machinery: repository, collaborators, per-store registries
/// and the bounded pool. One instance outlives all runs it spawns.
pub(crate) struct SyncCore {
    pub(crate) repo: Arc<dyn StoreRepository>,
    pub(crate) importers: ImporterSet,
    pub(crate) locks: StoreLocks,
    pub(crate) cancels: CancelRegistry,
    pub(crate) pool: Arc<Semaphore>,
    pub(crate) events: Option<mpsc::Sender<SyncEvent>>,
}

/// Drives the initial data sync for newly registered seller storefronts.
///
/// `start_onboarding` is fire-and-forget: the registration flow never
/// receives a synchronous error, and outcomes are observable only through
/// the progress and legacy-status queries.
pub struct OnboardingOrchestrator {
    core: Arc<SyncCore>,
}

impl OnboardingOrchestrator {
    pub fn new(
        repo: Arc<dyn StoreRepository>,
        importers: ImporterSet,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            core: Arc::new(SyncCore {
                repo,
                importers,
                locks: StoreLocks::new(),
                cancels: CancelRegistry::new(),
                pool: Arc::new(Semaphore::new(config.max_parallel.max(1))),
                events: None,
            }),
        }
    }

    /// Attach an event channel for progress updates. Must be called before
    /// the orchestrator is shared; afterwards the call is a logged no-op.
    pub fn with_event_channel(self, tx: mpsc::Sender<SyncEvent>) -> Self {
        match Arc::try_unwrap(self.core) {
            Ok(mut core) => {
                core.events = Some(tx);
                Self {
                    core: Arc::new(core),
                }
            }
            Err(core) => {
                warn!("event channel can only be attached before first use; keeping existing");
                Self { core }
            }
        }
    }

    /// Kick off the full onboarding workflow for a store. Asynchronous;
    /// returns immediately.
    pub fn start_onboarding(&self, store_id: Uuid) {
        SyncCore::spawn_run(Arc::clone(&self.core), store_id);
    }

    /// Re-run the workflow from scratch, if the store's current status
    /// allows it. There is no phase-level resume at this layer; a retry
    /// resets the whole board.
    pub async fn retry(&self, store_id: Uuid) -> Result<(), RetryError> {
        let store = self
            .core
            .repo
            .find(store_id)
            .await
            .map_err(RetryError::Other)?
            .ok_or(RetryError::StoreNotFound(store_id))?;

        let in_flight = store.overall_sync_status == Some(OverallSyncStatus::InProgress)
            || store.sync_status.is_some_and(|s| s.is_syncing());
        if in_flight {
            warn!(%store_id, "rejecting retry: sync already in progress");
            return Err(RetryError::InProgress(store_id));
        }

        if store.overall_sync_status == Some(OverallSyncStatus::Completed)
            && store.initial_sync_completed
        {
            warn!(%store_id, "rejecting retry: initial sync already completed");
            return Err(RetryError::AlreadyCompleted(store_id));
        }

        if matches!(
            store.overall_sync_status,
            Some(OverallSyncStatus::PartialComplete | OverallSyncStatus::Cancelled)
        ) {
            info!(%store_id, status = ?store.overall_sync_status, "allowing retry");
        }

        self.start_onboarding(store_id);
        Ok(())
    }

    /// Request cooperative cancellation of an in-progress run. Takes
    /// effect at the next phase boundary in each task.
    pub fn request_cancel(&self, store_id: Uuid) {
        self.core.cancels.request(store_id);
        info!(%store_id, "cancellation requested");
    }

    /// The coarse legacy status. `None` for stores that never synced.
    pub async fn legacy_status(
        &self,
        store_id: Uuid,
    ) -> Result<Option<SyncStatus>, OnboardingError> {
        let store = self.core.find_store(store_id).await?;
        Ok(store.sync_status)
    }

    /// Snapshot of the store's sync progress, computed on read.
    pub async fn progress(&self, store_id: Uuid) -> Result<SyncProgress, OnboardingError> {
        let store = self.core.find_store(store_id).await?;
        Ok(SyncProgress::from_store(&store))
    }
}

impl SyncCore {
    fn spawn_run(core: Arc<Self>, store_id: Uuid) {
        tokio::spawn(async move {
            if let Err(err) = Arc::clone(&core).run_initial_sync(store_id).await {
                error!(%store_id, error = %err, "onboarding run failed");
                core.mark_run_failed(store_id, &err).await;
            }
        });
    }

    /// The full workflow: initialize, catalog import, fan-out, barrier
    /// join, finalize. Only a catalog-import error or a persistence error
    /// escapes; fanned-out phase failures are converted to board state.
    async fn run_initial_sync(self: Arc<Self>, store_id: Uuid) -> Result<(), OnboardingError> {
        let run_timer = Instant::now();
        let mut store = self.find_store(store_id).await?;
        info!(store = %store.name, %store_id, "starting parallel onboarding sync");

        store.sync_phases = Some(PhaseBoard::new());
        store.overall_sync_status = Some(OverallSyncStatus::Pending);
        self.save_store(&store).await?;
        self.emit(SyncEvent::RunStarted { store_id });

        // Phase 1: catalog import. Everything else depends on it, so it is
        // not failure-isolated; an error here aborts the whole run with
        // the phase entry still ACTIVE.
        self.update_phase(store_id, SyncPhase::Products, PhaseState::active())
            .await?;
        self.update_legacy(store_id, SyncStatus::SyncingProducts)
            .await?;
        self.emit(SyncEvent::PhaseStarted {
            store_id,
            phase: SyncPhase::Products,
        });
        let outcome = self
            .importers
            .products
            .run(store_id)
            .await
            .map_err(|source| OnboardingError::CatalogImport { store_id, source })?;
        self.update_phase(store_id, SyncPhase::Products, PhaseState::completed())
            .await?;
        info!(%store_id, records = outcome.records, "catalog import completed");
        self.emit(SyncEvent::PhaseCompleted {
            store_id,
            phase: SyncPhase::Products,
            records: outcome.records,
        });

        self.update_overall(store_id, OverallSyncStatus::InProgress)
            .await?;
        info!(%store_id, "fanning out critical chain, returns and qa tasks");

        let core = Arc::clone(&self);
        let chain = tokio::spawn(async move {
            let Ok(_permit) = core.pool.clone().acquire_owned().await else {
                return;
            };
            core.run_critical_chain(store_id).await;
        });

        let core = Arc::clone(&self);
        let returns = tokio::spawn(async move {
            let Ok(_permit) = core.pool.clone().acquire_owned().await else {
                return;
            };
            core.run_independent(store_id, SyncPhase::Returns).await;
        });

        let core = Arc::clone(&self);
        let qa = tokio::spawn(async move {
            let Ok(_permit) = core.pool.clone().acquire_owned().await else {
                return;
            };
            core.run_independent(store_id, SyncPhase::Qa).await;
        });

        for result in futures::future::join_all([chain, returns, qa]).await {
            if let Err(err) = result {
                error!(%store_id, error = %err, "fanned-out task panicked");
            }
        }

        self.finalize(store_id, run_timer).await
    }

    /// Converge to one terminal status: cancellation wins, then any failed
    /// phase, then full completion. All three outcomes mark the initial
    /// sync as done and clear the stored error message.
    async fn finalize(&self, store_id: Uuid, run_timer: Instant) -> Result<(), OnboardingError> {
        let cancelled = self.cancels.is_cancelled(store_id);

        let outcome = self
            .locks
            .with_lock(store_id, || async move {
                let mut store = self.find_store(store_id).await?;
                let outcome = if cancelled {
                    OverallSyncStatus::Cancelled
                } else if store.sync_phases.as_ref().is_some_and(|b| b.any_failed()) {
                    OverallSyncStatus::PartialComplete
                } else {
                    OverallSyncStatus::Completed
                };
                store.overall_sync_status = Some(outcome);
                store.sync_status = Some(match outcome {
                    OverallSyncStatus::Cancelled => SyncStatus::Cancelled,
                    OverallSyncStatus::PartialComplete => SyncStatus::PartialComplete,
                    _ => SyncStatus::Completed,
                });
                store.initial_sync_completed = true;
                store.sync_error_message = None;
                self.save_store(&store).await?;
                Ok::<_, OnboardingError>(outcome)
            })
            .await?;

        self.cancels.clear(store_id);
        self.locks.release(store_id);

        match outcome {
            OverallSyncStatus::Cancelled => {
                warn!(%store_id, "onboarding sync was cancelled");
            }
            OverallSyncStatus::PartialComplete => {
                warn!(%store_id, "onboarding sync completed with failed phases");
            }
            _ => info!(%store_id, "all onboarding phases completed"),
        }
        info!(%store_id, elapsed_secs = run_timer.elapsed().as_secs(), "onboarding run finished");
        self.emit(SyncEvent::RunFinished { store_id, outcome });
        Ok(())
    }

    /// Best-effort terminal write for a run that died on a fatal error.
    async fn mark_run_failed(&self, store_id: Uuid, err: &OnboardingError) {
        let result = self
            .locks
            .with_lock(store_id, || async move {
                let mut store = self.find_store(store_id).await?;
                store.overall_sync_status = Some(OverallSyncStatus::Failed);
                store.sync_status = Some(SyncStatus::Failed);
                store.sync_error_message = Some(err.to_string());
                self.save_store(&store).await
            })
            .await;
        if let Err(persist_err) = result {
            error!(%store_id, error = %persist_err, "failed to record failed run status");
        }

        self.cancels.clear(store_id);
        self.locks.release(store_id);
        self.emit(SyncEvent::RunFinished {
            store_id,
            outcome: OverallSyncStatus::Failed,
        });
    }

    pub(crate) async fn find_store(&self, store_id: Uuid) -> Result<Store, OnboardingError> {
        self.repo
            .find(store_id)
            .await
            .map_err(|source| OnboardingError::Repository { store_id, source })?
            .ok_or(OnboardingError::StoreNotFound(store_id))
    }

    pub(crate) async fn save_store(&self, store: &Store) -> Result<(), OnboardingError> {
        self.repo
            .save(store)
            .await
            .map_err(|source| OnboardingError::Repository {
                store_id: store.id,
                source,
            })
    }

    /// Read-merge-persist one phase entry, under the store's lock.
    pub(crate) async fn update_phase(
        &self,
        store_id: Uuid,
        phase: SyncPhase,
        state: PhaseState,
    ) -> Result<(), OnboardingError> {
        let status = state.status;
        self.locks
            .with_lock(store_id, || async move {
                let mut store = self.find_store(store_id).await?;
                let board = store.sync_phases.get_or_insert_with(PhaseBoard::new);
                if board.apply(phase, state) {
                    debug!(%store_id, %phase, status = status.as_str(), "phase entry updated");
                }
                self.save_store(&store).await
            })
            .await
    }

    /// Mirror the current phase into the coarse legacy status, under the
    /// store's lock. Best-effort by design when several tasks race.
    pub(crate) async fn update_legacy(
        &self,
        store_id: Uuid,
        status: SyncStatus,
    ) -> Result<(), OnboardingError> {
        self.locks
            .with_lock(store_id, || async move {
                let mut store = self.find_store(store_id).await?;
                store.sync_status = Some(status);
                self.save_store(&store).await
            })
            .await
    }

    async fn update_overall(
        &self,
        store_id: Uuid,
        status: OverallSyncStatus,
    ) -> Result<(), OnboardingError> {
        self.locks
            .with_lock(store_id, || async move {
                let mut store = self.find_store(store_id).await?;
                store.overall_sync_status = Some(status);
                self.save_store(&store).await
            })
            .await
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            tx.try_send(event).ok();
        }
    }
}

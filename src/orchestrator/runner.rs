//! Phase execution: the failure-isolation wrapper shared by every
//! fanned-out phase, the sequential critical chain and the independent
//! single-phase tasks.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::board::PhaseState;
use crate::importers::ImportOutcome;
use crate::orchestrator::engine::{SyncCore, SyncEvent};
use crate::phase::SyncPhase;

/// What a wrapped phase execution produced. Importer failures are state,
/// not errors; `Aborted` is reserved for the board itself failing to
/// persist, which stops the owning task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PhaseOutcome {
    Completed,
    Failed,
    Aborted,
}

impl SyncCore {
    /// HISTORICAL → FINANCIAL → GAP → COMMISSIONS, strictly sequential.
    ///
    /// A phase failure is recorded and the chain moves on; only a
    /// cancellation observed at the boundary before a step skips the
    /// remaining steps (they stay PENDING).
    pub(crate) async fn run_critical_chain(&self, store_id: Uuid) {
        for (index, &phase) in SyncPhase::CRITICAL_CHAIN.iter().enumerate() {
            if self.cancels.is_cancelled(store_id) {
                info!(%store_id, next = %phase, "critical chain cancelled; skipping remaining phases");
                for &skipped in &SyncPhase::CRITICAL_CHAIN[index..] {
                    self.emit(SyncEvent::PhaseSkipped {
                        store_id,
                        phase: skipped,
                    });
                }
                return;
            }

            if self.execute_phase(store_id, phase).await == PhaseOutcome::Aborted {
                error!(%store_id, %phase, "critical chain aborted");
                return;
            }
        }
        info!(%store_id, "critical chain finished");
    }

    /// A phase with no dependents: one cancellation check, then the same
    /// wrapper as the chain.
    pub(crate) async fn run_independent(&self, store_id: Uuid, phase: SyncPhase) {
        if self.cancels.is_cancelled(store_id) {
            info!(%store_id, %phase, "phase cancelled before start");
            self.emit(SyncEvent::PhaseSkipped { store_id, phase });
            return;
        }
        self.execute_phase(store_id, phase).await;
    }

    /// Mark ACTIVE, invoke the importer, convert the result to board
    /// state. An importer error never crosses this boundary; it becomes
    /// the phase's FAILED entry and siblings keep running.
    pub(crate) async fn execute_phase(&self, store_id: Uuid, phase: SyncPhase) -> PhaseOutcome {
        if let Err(err) = self
            .update_phase(store_id, phase, PhaseState::active())
            .await
        {
            error!(%store_id, %phase, error = %err, "failed to mark phase active");
            return PhaseOutcome::Aborted;
        }
        if let Err(err) = self.update_legacy(store_id, phase.syncing_status()).await {
            error!(%store_id, %phase, error = %err, "failed to mirror legacy status");
            return PhaseOutcome::Aborted;
        }
        info!(%store_id, %phase, "phase starting");
        self.emit(SyncEvent::PhaseStarted { store_id, phase });

        match self.importers.importer_for(phase).run(store_id).await {
            Ok(outcome) => {
                if phase == SyncPhase::Historical {
                    self.record_historical_outcome(store_id, &outcome).await;
                }
                if let Err(err) = self
                    .update_phase(store_id, phase, PhaseState::completed())
                    .await
                {
                    error!(%store_id, %phase, error = %err, "failed to mark phase completed");
                    return PhaseOutcome::Aborted;
                }
                info!(%store_id, %phase, records = outcome.records, "phase completed");
                self.emit(SyncEvent::PhaseCompleted {
                    store_id,
                    phase,
                    records: outcome.records,
                });
                PhaseOutcome::Completed
            }
            Err(err) => {
                let message = err.to_string();
                warn!(%store_id, %phase, error = %message, "phase failed, continuing");
                if let Err(persist_err) = self
                    .update_phase(store_id, phase, PhaseState::failed(message.as_str()))
                    .await
                {
                    error!(%store_id, %phase, error = %persist_err, "failed to mark phase failed");
                    return PhaseOutcome::Aborted;
                }
                self.emit(SyncEvent::PhaseFailed {
                    store_id,
                    phase,
                    error: message,
                });
                PhaseOutcome::Failed
            }
        }
    }

    /// The historical importer reports its own completion label; record it
    /// on the store alongside the sync date.
    async fn record_historical_outcome(&self, store_id: Uuid, outcome: &ImportOutcome) {
        let Some(status) = outcome.status.clone() else {
            return;
        };
        let result = self
            .locks
            .with_lock(store_id, || async move {
                let mut store = self.find_store(store_id).await?;
                store.historical_sync_status = Some(status);
                store.historical_sync_date = Some(chrono::Utc::now());
                self.save_store(&store).await
            })
            .await;
        if let Err(err) = result {
            warn!(%store_id, error = %err, "failed to record historical sync outcome");
        }
    }
}

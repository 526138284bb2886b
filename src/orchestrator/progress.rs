//! The progress-query contract: a snapshot of one store's sync state,
//! computed on read.

use chrono::NaiveDate;
use serde::Serialize;

use crate::board::PhaseBoard;
use crate::store::{OverallSyncStatus, Store, SyncStatus};

/// Snapshot returned to polling callers.
///
/// Serializes to the wire shape legacy clients already consume, phase
/// board included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncProgress {
    pub sync_status: Option<SyncStatus>,
    pub overall_sync_status: Option<OverallSyncStatus>,
    /// Empty map for stores that predate phase tracking.
    pub sync_phases: PhaseBoard,
    pub percentage: f64,
    pub current_processing_date: Option<NaiveDate>,
    pub completed_chunks: Option<u32>,
    pub total_chunks: Option<u32>,
    pub checkpoint_date: Option<NaiveDate>,
    pub start_date: Option<NaiveDate>,
}

impl SyncProgress {
    /// Build the snapshot from a store record.
    ///
    /// Percent comes from the weighted phase board when one exists;
    /// otherwise from the legacy chunk-counter pair (migration path).
    /// The two sources are never combined.
    pub fn from_store(store: &Store) -> Self {
        let board = store.sync_phases.clone().filter(|b| !b.is_empty());
        let percentage = match &board {
            Some(board) => board.progress_percent(),
            None => chunk_fallback_percent(store),
        };

        Self {
            sync_status: store.sync_status,
            overall_sync_status: store.overall_sync_status,
            sync_phases: board.unwrap_or_else(PhaseBoard::empty),
            percentage,
            current_processing_date: store.historical_sync_current_processing_date,
            completed_chunks: store.historical_sync_completed_chunks,
            total_chunks: store.historical_sync_total_chunks,
            checkpoint_date: store.historical_sync_checkpoint_date,
            start_date: store.historical_sync_start_date,
        }
    }
}

fn chunk_fallback_percent(store: &Store) -> f64 {
    match store.historical_sync_total_chunks {
        Some(total) if total > 0 => {
            let completed = store.historical_sync_completed_chunks.unwrap_or(0);
            let percent = f64::from(completed) / f64::from(total) * 100.0;
            (percent * 100.0).round() / 100.0
        }
        _ => 0.0,
    }
}

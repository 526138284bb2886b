//! The store record and its persistence seam.
//!
//! Only the fields the orchestrator reads or writes are modeled here; the
//! storage engine behind them is the embedding application's concern and is
//! reached through the `StoreRepository` trait.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Mutex;
use uuid::Uuid;

use crate::board::PhaseBoard;

/// Terminal-or-in-flight status of a whole onboarding run. Exactly one value
/// per store at a time, derived at run end from the phase board and the
/// cancellation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallSyncStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    PartialComplete,
}

impl OverallSyncStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::PartialComplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::PartialComplete => "PARTIAL_COMPLETE",
        }
    }
}

impl FromStr for OverallSyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            "PARTIAL_COMPLETE" => Ok(Self::PartialComplete),
            _ => Err(format!("Invalid overall sync status: {}", s)),
        }
    }
}

/// Coarse single-value mirror of the phase board, kept for callers that
/// predate per-phase tracking.
///
/// During fan-out three tasks write "their" current phase here
/// independently, so under concurrency the value is best-effort and may
/// lag the true global state. That is a documented limitation of the
/// mirror, not something the orchestrator tries to repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    SyncingProducts,
    SyncingHistorical,
    SyncingFinancial,
    SyncingGap,
    RecalculatingCommissions,
    SyncingReturns,
    SyncingQa,
    Completed,
    Failed,
    Cancelled,
    PartialComplete,
}

impl SyncStatus {
    /// True for the in-flight variants a running phase writes.
    pub fn is_syncing(&self) -> bool {
        matches!(
            self,
            Self::SyncingProducts
                | Self::SyncingHistorical
                | Self::SyncingFinancial
                | Self::SyncingGap
                | Self::RecalculatingCommissions
                | Self::SyncingReturns
                | Self::SyncingQa
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncingProducts => "SYNCING_PRODUCTS",
            Self::SyncingHistorical => "SYNCING_HISTORICAL",
            Self::SyncingFinancial => "SYNCING_FINANCIAL",
            Self::SyncingGap => "SYNCING_GAP",
            Self::RecalculatingCommissions => "RECALCULATING_COMMISSIONS",
            Self::SyncingReturns => "SYNCING_RETURNS",
            Self::SyncingQa => "SYNCING_QA",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::PartialComplete => "PARTIAL_COMPLETE",
        }
    }
}

/// A seller's connected marketplace account and its sync progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
    pub id: Uuid,
    pub name: String,

    /// Legacy coarse status. `None` until the first onboarding run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<SyncStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_sync_status: Option<OverallSyncStatus>,

    /// Per-phase board. `None` for stores created before phase tracking
    /// existed; the progress query falls back to chunk counters then.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_phases: Option<PhaseBoard>,

    #[serde(default)]
    pub initial_sync_completed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error_message: Option<String>,

    /// Outcome label reported by the historical settlement importer,
    /// recorded when the HISTORICAL phase succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_date: Option<DateTime<Utc>>,

    // Chunk-level bookkeeping owned by the historical importer; the
    // orchestrator only surfaces these through the progress query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_completed_chunks: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_total_chunks: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_checkpoint_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_start_date: Option<NaiveDate>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub historical_sync_current_processing_date: Option<NaiveDate>,
}

impl Store {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            sync_status: None,
            overall_sync_status: None,
            sync_phases: None,
            initial_sync_completed: false,
            sync_error_message: None,
            historical_sync_status: None,
            historical_sync_date: None,
            historical_sync_completed_chunks: None,
            historical_sync_total_chunks: None,
            historical_sync_checkpoint_date: None,
            historical_sync_start_date: None,
            historical_sync_current_processing_date: None,
        }
    }
}

/// Abstraction over store persistence for testability.
/// Real implementation: the embedding application's database layer.
/// Test double: `InMemoryStoreRepository`.
#[async_trait]
pub trait StoreRepository: Send + Sync {
    async fn find(&self, store_id: Uuid) -> Result<Option<Store>>;

    async fn save(&self, store: &Store) -> Result<()>;
}

/// Map-backed repository for tests and embedders without a wired database.
#[derive(Default)]
pub struct InMemoryStoreRepository {
    stores: Mutex<HashMap<Uuid, Store>>,
}

impl InMemoryStoreRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store record, replacing any existing one with the same id.
    pub fn insert(&self, store: Store) {
        self.stores
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(store.id, store);
    }
}

#[async_trait]
impl StoreRepository for InMemoryStoreRepository {
    async fn find(&self, store_id: Uuid) -> Result<Option<Store>> {
        let stores = self
            .stores
            .lock()
            .map_err(|e| anyhow::anyhow!("store map lock poisoned: {}", e))?;
        Ok(stores.get(&store_id).cloned())
    }

    async fn save(&self, store: &Store) -> Result<()> {
        let mut stores = self
            .stores
            .lock()
            .map_err(|e| anyhow::anyhow!("store map lock poisoned: {}", e))?;
        stores.insert(store.id, store.clone());
        Ok(())
    }
}

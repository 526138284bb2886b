//! External importer collaborators, specified only at their interface
//! boundary.
//!
//! Each of the seven importers is an opaque, possibly slow, possibly
//! failing unit of work against the marketplace platform. The orchestrator
//! cares about exactly one thing: did the call return an outcome or an
//! error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::ImportError;
use crate::phase::SyncPhase;

/// What a successful importer call reports back. Used for logging and, for
/// the historical importer, for the store's bookkeeping fields, never for
/// control flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportOutcome {
    /// Records touched by the import (orders, claims, questions, ...).
    pub records: u64,

    /// Importer-specific outcome label (e.g. the historical importer's
    /// completion status).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl ImportOutcome {
    pub fn records(records: u64) -> Self {
        Self {
            records,
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// One blocking unit of marketplace import work.
/// Real implementations live in the embedding application; tests use
/// configurable doubles.
#[async_trait]
pub trait Importer: Send + Sync {
    async fn run(&self, store_id: Uuid) -> Result<ImportOutcome, ImportError>;
}

/// The seven collaborators the onboarding workflow drives, keyed by phase.
#[derive(Clone)]
pub struct ImporterSet {
    /// Product catalog importer. Phase 1; everything else depends on it.
    pub products: Arc<dyn Importer>,
    /// Historical settlement importer.
    pub historical: Arc<dyn Importer>,
    /// Financial settlement importer.
    pub financial: Arc<dyn Importer>,
    /// Order-gap importer.
    pub gap: Arc<dyn Importer>,
    /// Commission recalculator.
    pub commissions: Arc<dyn Importer>,
    /// Returns/claims importer.
    pub returns: Arc<dyn Importer>,
    /// Q&A importer.
    pub qa: Arc<dyn Importer>,
}

impl ImporterSet {
    pub fn importer_for(&self, phase: SyncPhase) -> Arc<dyn Importer> {
        match phase {
            SyncPhase::Products => Arc::clone(&self.products),
            SyncPhase::Historical => Arc::clone(&self.historical),
            SyncPhase::Financial => Arc::clone(&self.financial),
            SyncPhase::Gap => Arc::clone(&self.gap),
            SyncPhase::Commissions => Arc::clone(&self.commissions),
            SyncPhase::Returns => Arc::clone(&self.returns),
            SyncPhase::Qa => Arc::clone(&self.qa),
        }
    }
}

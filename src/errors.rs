//! Typed error hierarchy for the storesync orchestrator.
//!
//! Three top-level enums cover the three failure surfaces:
//! - `ImportError` — a collaborator call against the marketplace platform
//! - `OnboardingError` — fatal workflow failures that abort a whole run
//! - `RetryError` — rejected retry requests

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by an external importer collaborator.
///
/// The orchestrator never inspects these beyond their message: an importer
/// error becomes the owning phase's `FAILED` state, except for the catalog
/// import which fails the whole run.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Marketplace API request failed: {0}")]
    Api(String),

    #[error("Import timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Marketplace credentials rejected for store {store_id}")]
    Unauthorized { store_id: Uuid },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Fatal workflow errors. Anything here aborts the entire onboarding run
/// and is converted to `OverallSyncStatus::Failed` by the spawn wrapper.
#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("Store {0} not found")]
    StoreNotFound(Uuid),

    #[error("Failed to persist store {store_id}: {source}")]
    Repository {
        store_id: Uuid,
        #[source]
        source: anyhow::Error,
    },

    #[error("Catalog import failed for store {store_id}: {source}")]
    CatalogImport {
        store_id: Uuid,
        #[source]
        source: ImportError,
    },
}

/// Reasons a retry request is rejected.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("Sync already in progress for store {0}")]
    InProgress(Uuid),

    #[error("Store {0} already completed initial sync")]
    AlreadyCompleted(Uuid),

    #[error("Store {0} not found")]
    StoreNotFound(Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

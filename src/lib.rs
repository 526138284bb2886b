pub mod board;
pub mod errors;
pub mod importers;
pub mod orchestrator;
pub mod phase;
pub mod registry;
pub mod store;

pub use board::{PhaseBoard, PhaseState, PhaseStatusKind};
pub use errors::{ImportError, OnboardingError, RetryError};
pub use importers::{ImportOutcome, Importer, ImporterSet};
pub use orchestrator::{OnboardingOrchestrator, OrchestratorConfig, SyncEvent, SyncProgress};
pub use phase::SyncPhase;
pub use store::{
    InMemoryStoreRepository, OverallSyncStatus, Store, StoreRepository, SyncStatus,
};

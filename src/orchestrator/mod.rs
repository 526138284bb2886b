//! Parallel onboarding sync orchestration.
//!
//! ```text
//! PHASE 1: PRODUCTS (required first; every other phase depends on it)
//!          |
//! fan-out: +- Task A: HISTORICAL -> FINANCIAL -> GAP -> COMMISSIONS (critical chain)
//!          +- Task B: RETURNS
//!          +- Task C: QA
//!          |
//! barrier join, then exactly one terminal overall status.
//! ```
//!
//! Phase failures inside the fan-out are isolated: they become board state
//! and never abort sibling phases. Cancellation is cooperative, observed
//! only at phase boundaries; an importer call already in flight always runs
//! to its own terminal state.

mod engine;
mod progress;
mod runner;

pub use engine::{OnboardingOrchestrator, OrchestratorConfig, SyncEvent};
pub use progress::SyncProgress;

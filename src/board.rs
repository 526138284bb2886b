//! Per-store phase board: one lifecycle snapshot per sync phase.
//!
//! The board is created fresh (all PENDING) at the start of every onboarding
//! attempt, mutated only by the orchestrator's own tasks while a run is
//! active, and becomes immutable history once the run reaches a terminal
//! overall status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

use crate::phase::SyncPhase;

/// Lifecycle stage of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseStatusKind {
    #[default]
    Pending,
    Active,
    Completed,
    Failed,
}

impl PhaseStatusKind {
    /// A phase never leaves Completed or Failed within one run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

/// Snapshot of one phase's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseState {
    pub status: PhaseStatusKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Optional 0–100 sub-step granularity for importers that report it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
}

impl PhaseState {
    pub fn pending() -> Self {
        Self {
            status: PhaseStatusKind::Pending,
            started_at: None,
            completed_at: None,
            error_message: None,
            progress: None,
        }
    }

    pub fn active() -> Self {
        Self {
            status: PhaseStatusKind::Active,
            started_at: Some(Utc::now()),
            completed_at: None,
            error_message: None,
            progress: None,
        }
    }

    pub fn active_with_progress(progress: u8) -> Self {
        Self {
            progress: Some(progress.min(100)),
            ..Self::active()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: PhaseStatusKind::Completed,
            started_at: None,
            completed_at: Some(Utc::now()),
            error_message: None,
            progress: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: PhaseStatusKind::Failed,
            started_at: None,
            completed_at: Some(Utc::now()),
            error_message: Some(error.into()),
            progress: None,
        }
    }
}

/// Mapping of phase → lifecycle snapshot for one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseBoard {
    phases: BTreeMap<SyncPhase, PhaseState>,
}

impl PhaseBoard {
    /// Fresh board with every phase PENDING.
    pub fn new() -> Self {
        let phases = SyncPhase::ALL
            .iter()
            .map(|&phase| (phase, PhaseState::pending()))
            .collect();
        Self { phases }
    }

    /// Board with no entries, the shape stores from before phase tracking
    /// deserialize into.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, phase: SyncPhase) -> Option<&PhaseState> {
        self.phases.get(&phase)
    }

    pub fn status_of(&self, phase: SyncPhase) -> PhaseStatusKind {
        self.phases
            .get(&phase)
            .map(|s| s.status)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SyncPhase, &PhaseState)> {
        self.phases.iter().map(|(&phase, state)| (phase, state))
    }

    /// Merge one phase entry into the board.
    ///
    /// `started_at`, once set, survives every later update. An update
    /// against a phase already in a terminal state is dropped; returns
    /// whether the entry was applied.
    pub fn apply(&mut self, phase: SyncPhase, mut state: PhaseState) -> bool {
        if let Some(existing) = self.phases.get(&phase) {
            if existing.status.is_terminal() {
                warn!(
                    %phase,
                    current = existing.status.as_str(),
                    incoming = state.status.as_str(),
                    "dropping phase update against terminal state"
                );
                return false;
            }
            if existing.started_at.is_some() {
                state.started_at = existing.started_at;
            }
        }
        self.phases.insert(phase, state);
        true
    }

    pub fn any_failed(&self) -> bool {
        self.phases
            .values()
            .any(|s| s.status == PhaseStatusKind::Failed)
    }

    pub fn all_completed(&self) -> bool {
        !self.phases.is_empty()
            && self
                .phases
                .values()
                .all(|s| s.status == PhaseStatusKind::Completed)
    }

    /// Weighted overall progress, rounded to two decimal places.
    ///
    /// COMPLETED contributes a phase's full weight, ACTIVE half of it,
    /// PENDING and FAILED nothing. The half-credit for ACTIVE keeps the
    /// number moving during long phases without requiring importers to
    /// report fine progress.
    pub fn progress_percent(&self) -> f64 {
        let total: u32 = SyncPhase::ALL.iter().map(|p| p.weight()).sum();
        let earned: f64 = self
            .phases
            .iter()
            .map(|(phase, state)| match state.status {
                PhaseStatusKind::Completed => f64::from(phase.weight()),
                PhaseStatusKind::Active => f64::from(phase.weight()) / 2.0,
                PhaseStatusKind::Pending | PhaseStatusKind::Failed => 0.0,
            })
            .sum();

        let percent = earned / f64::from(total) * 100.0;
        (percent * 100.0).round() / 100.0
    }
}

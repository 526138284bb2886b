//! Phase identifiers for the onboarding sync workflow.
//!
//! The seven phases are a fixed set: PRODUCTS runs first and alone, the
//! critical chain (HISTORICAL → FINANCIAL → GAP → COMMISSIONS) runs
//! sequentially inside one task, and RETURNS / QA each run as independent
//! tasks. Declaration order is chain order.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::store::SyncStatus;

/// One discrete unit of the onboarding workflow.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPhase {
    /// Product catalog import. Hard dependency for everything else.
    Products,
    /// Historical settlement import. The slowest phase by far.
    Historical,
    /// Financial settlement import.
    Financial,
    /// Order-gap fill from the orders API.
    Gap,
    /// Estimated commission recalculation.
    Commissions,
    /// Returns/claims import.
    Returns,
    /// Customer Q&A import.
    Qa,
}

impl SyncPhase {
    /// Every phase, in workflow order.
    pub const ALL: [SyncPhase; 7] = [
        SyncPhase::Products,
        SyncPhase::Historical,
        SyncPhase::Financial,
        SyncPhase::Gap,
        SyncPhase::Commissions,
        SyncPhase::Returns,
        SyncPhase::Qa,
    ];

    /// The ordered subset with functional dependencies, executed
    /// sequentially within one task.
    pub const CRITICAL_CHAIN: [SyncPhase; 4] = [
        SyncPhase::Historical,
        SyncPhase::Financial,
        SyncPhase::Gap,
        SyncPhase::Commissions,
    ];

    /// Fixed progress weight. HISTORICAL dominates because it is the
    /// slowest importer. Weights sum to 100.
    pub fn weight(&self) -> u32 {
        match self {
            Self::Products => 10,
            Self::Historical => 35,
            Self::Financial => 15,
            Self::Gap => 10,
            Self::Commissions => 10,
            Self::Returns => 10,
            Self::Qa => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Products => "PRODUCTS",
            Self::Historical => "HISTORICAL",
            Self::Financial => "FINANCIAL",
            Self::Gap => "GAP",
            Self::Commissions => "COMMISSIONS",
            Self::Returns => "RETURNS",
            Self::Qa => "QA",
        }
    }

    /// The coarse legacy status mirror written while this phase is current.
    pub fn syncing_status(&self) -> SyncStatus {
        match self {
            Self::Products => SyncStatus::SyncingProducts,
            Self::Historical => SyncStatus::SyncingHistorical,
            Self::Financial => SyncStatus::SyncingFinancial,
            Self::Gap => SyncStatus::SyncingGap,
            Self::Commissions => SyncStatus::RecalculatingCommissions,
            Self::Returns => SyncStatus::SyncingReturns,
            Self::Qa => SyncStatus::SyncingQa,
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRODUCTS" => Ok(Self::Products),
            "HISTORICAL" => Ok(Self::Historical),
            "FINANCIAL" => Ok(Self::Financial),
            "GAP" => Ok(Self::Gap),
            "COMMISSIONS" => Ok(Self::Commissions),
            "RETURNS" => Ok(Self::Returns),
            "QA" => Ok(Self::Qa),
            _ => Err(format!("Invalid sync phase: {}", s)),
        }
    }
}

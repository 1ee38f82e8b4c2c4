use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use super::OptimizationProblem;
use crate::config::SolverConfig;
use crate::error::CommitmentError;

/// Decision trajectories of one unit over a whole window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDecisions {
    pub commit: Vec<bool>,
    pub start: Vec<bool>,
    pub shut: Vec<bool>,
    pub generation: Vec<f64>,
}

/// Storage trajectories over a whole window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageDecisions {
    pub charge: Vec<f64>,
    pub discharge: Vec<f64>,
    /// State of charge at the end of each period, MWh.
    pub soc: Vec<f64>,
}

/// Variable assignment returned by a solver, window-local indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Solution {
    pub objective: f64,
    pub units: BTreeMap<String, UnitDecisions>,
    pub renewable_used: Vec<f64>,
    pub unserved: Vec<f64>,
    /// Base generation dumped when must-run output exceeds demand.
    pub surplus: Vec<f64>,
    /// Present exactly when the problem has storage.
    #[serde(default)]
    pub storage: Option<StorageDecisions>,
}

/// What a solver reports. Infeasible and timed-out windows are outcomes, not
/// zero-filled solutions.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    Solved(Solution),
    Infeasible,
    TimedOut { incumbent: Option<Solution> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverSettings {
    pub time_limit: Duration,
    pub relative_gap: f64,
    /// Fixed so identical problems give identical answers.
    pub seed: u64,
    pub threads: u32,
}

impl From<&SolverConfig> for SolverSettings {
    fn from(config: &SolverConfig) -> Self {
        Self {
            time_limit: config.time_limit(),
            relative_gap: config.relative_gap,
            seed: config.seed,
            threads: config.threads,
        }
    }
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            time_limit: Duration::from_secs(60),
            relative_gap: 1e-4,
            seed: 0,
            threads: 1,
        }
    }
}

/// Optimization back-end for one window.
///
/// Implementations must be deterministic for identical input and settings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommitmentSolver: Send + Sync {
    fn name(&self) -> &'static str;

    async fn solve(
        &self,
        problem: &OptimizationProblem,
        settings: &SolverSettings,
    ) -> Result<SolveOutcome, CommitmentError>;
}

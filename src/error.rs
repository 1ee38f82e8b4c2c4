use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the rolling-horizon commitment engine.
///
/// Every variant halts the run. The scheduler never overwrites the last good
/// checkpoint after one of these, so a run can be inspected and resumed.
#[derive(Debug, Error)]
pub enum CommitmentError {
    /// Physics state out of range (reactivity outside `[0, nominal]`, NaN,
    /// a missed refuel). Indicates upstream corruption.
    #[error("invalid reactor state for unit {unit}: {reason}")]
    InvalidState { unit: String, reason: String },

    /// Solver output is missing data required for state propagation.
    #[error("incomplete solution for window {window}: {reason}")]
    IncompleteSolution { window: usize, reason: String },

    /// Solver output is complete but breaks a constraint of the problem it solved.
    #[error("solution for window {window} violates its problem: {reason}")]
    SolutionViolation { window: usize, reason: String },

    #[error("window {window} is infeasible")]
    Infeasible { window: usize },

    #[error("window {window} hit the {limit_seconds}s solver time limit without an incumbent")]
    TimedOut { window: usize, limit_seconds: f64 },

    #[error("corrupt checkpoint {}: {reason}", path.display())]
    CorruptCheckpoint { path: PathBuf, reason: String },

    #[error("aggregate series gap: expected period {expected}, got {got}")]
    SeriesGap { expected: usize, got: usize },

    #[error("solver failure: {0}")]
    Solver(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("exogenous data error: {0}")]
    Data(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CommitmentError {
    pub fn invalid_state(unit: impl Into<String>, reason: impl Into<String>) -> Self {
        CommitmentError::InvalidState {
            unit: unit.into(),
            reason: reason.into(),
        }
    }

    pub fn incomplete(window: usize, reason: impl Into<String>) -> Self {
        CommitmentError::IncompleteSolution {
            window,
            reason: reason.into(),
        }
    }

    pub fn violation(window: usize, reason: impl Into<String>) -> Self {
        CommitmentError::SolutionViolation {
            window,
            reason: reason.into(),
        }
    }

    /// Short machine-readable tag, used as a structured log field.
    pub fn kind(&self) -> &'static str {
        match self {
            CommitmentError::InvalidState { .. } => "InvalidState",
            CommitmentError::IncompleteSolution { .. } => "IncompleteSolution",
            CommitmentError::SolutionViolation { .. } => "SolutionViolation",
            CommitmentError::Infeasible { .. } => "Infeasible",
            CommitmentError::TimedOut { .. } => "TimedOut",
            CommitmentError::CorruptCheckpoint { .. } => "CorruptCheckpoint",
            CommitmentError::SeriesGap { .. } => "SeriesGap",
            CommitmentError::Solver(_) => "Solver",
            CommitmentError::Config(_) => "Config",
            CommitmentError::Data(_) => "Data",
            CommitmentError::Io(_) => "Io",
        }
    }

    /// Solver-reported outcomes that a fallback back-end may still recover.
    pub fn is_solver_outcome(&self) -> bool {
        matches!(
            self,
            CommitmentError::Infeasible { .. } | CommitmentError::TimedOut { .. }
        )
    }
}

impl From<validator::ValidationErrors> for CommitmentError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CommitmentError::Config(errors.to_string())
    }
}

impl From<figment::Error> for CommitmentError {
    fn from(error: figment::Error) -> Self {
        CommitmentError::Config(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            CommitmentError::invalid_state("u1", "nan").kind(),
            "InvalidState"
        );
        assert_eq!(CommitmentError::Infeasible { window: 3 }.kind(), "Infeasible");
        assert_eq!(
            CommitmentError::Config("x".to_string()).kind(),
            "Config"
        );
    }

    #[test]
    fn test_solver_outcomes() {
        assert!(CommitmentError::Infeasible { window: 0 }.is_solver_outcome());
        assert!(CommitmentError::TimedOut {
            window: 0,
            limit_seconds: 1.0
        }
        .is_solver_outcome());
        assert!(!CommitmentError::incomplete(0, "missing").is_solver_outcome());
    }

    #[test]
    fn test_error_display() {
        let error = CommitmentError::incomplete(7, "unit ap1000-1 has no COMMIT trajectory");
        assert_eq!(
            error.to_string(),
            "incomplete solution for window 7: unit ap1000-1 has no COMMIT trajectory"
        );
    }
}

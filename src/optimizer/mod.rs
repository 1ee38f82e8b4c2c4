pub mod dispatch;
pub mod dp;
pub mod problem;
pub mod strategies;
pub mod types;

pub use dispatch::*;
pub use dp::*;
pub use problem::*;
pub use strategies::*;
pub use types::*;

use crate::config::{SolverBackend, SolverConfig};

/// Instantiates a back-end with the grid and state limits from `config`.
pub fn solver_for(backend: SolverBackend, config: &SolverConfig) -> Box<dyn CommitmentSolver> {
    match backend {
        SolverBackend::Milp => Box::new(MilpSolver::new()),
        SolverBackend::Dp => Box::new(DynamicProgrammingSolver::from_config(config)),
    }
}

/// Primary solver plus the optional fallback from configuration.
pub fn solvers_from_config(
    config: &SolverConfig,
) -> (Box<dyn CommitmentSolver>, Option<Box<dyn CommitmentSolver>>) {
    (
        solver_for(config.backend, config),
        config.fallback.map(|backend| solver_for(backend, config)),
    )
}

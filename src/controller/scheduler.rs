use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::checkpoint::{Checkpoint, CheckpointManager};
use super::processor::WindowResultProcessor;
use crate::config::{Config, CostConfig};
use crate::domain::{
    AggregateResults, Fleet, HorizonPlan, ReactorState, StorageState, TimeWindow, WindowBounds,
    WindowSummary,
};
use crate::error::CommitmentError;
use crate::forecast::ExogenousProfile;
use crate::optimizer::{
    solvers_from_config, CommitmentSolver, OptimizationProblem, ProblemBuilder, SolveOutcome,
    Solution, SolverSettings,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SchedulerPhase {
    Initializing,
    BuildingWindow,
    Solving,
    Processing,
    Checkpointing,
    Completed,
    Failed,
}

/// Outcome of [`RollingHorizonScheduler::run`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_name: String,
    /// Window the run resumed at, if it started from a checkpoint.
    pub resumed_from: Option<usize>,
    /// Windows solved in this session.
    pub windows_run: usize,
    /// False when the run stopped early on cancellation.
    pub completed: bool,
    pub final_states: Vec<ReactorState>,
    pub final_storage: Option<StorageState>,
    pub aggregate: AggregateResults,
    pub completed_checkpoint: Option<PathBuf>,
}

/// Drives windows in order, owns the canonical reactor states and the
/// aggregate, and is the only writer of the checkpoint.
pub struct RollingHorizonScheduler {
    run_name: String,
    fleet: Fleet,
    plan: HorizonPlan,
    profile: ExogenousProfile,
    costs: CostConfig,
    settings: SolverSettings,
    solver: Box<dyn CommitmentSolver>,
    fallback: Option<Box<dyn CommitmentSolver>>,
    checkpoints: CheckpointManager,
    cancel: CancellationToken,
    phase: SchedulerPhase,
    initialized: bool,
    next_window: usize,
    resumed_from: Option<usize>,
    states: Vec<ReactorState>,
    storage: Option<StorageState>,
    aggregate: AggregateResults,
}

impl RollingHorizonScheduler {
    pub fn from_config(config: &Config, profile: ExogenousProfile) -> Result<Self, CommitmentError> {
        let fleet = Fleet::from_config(config)?;
        let plan = HorizonPlan::from_config(&config.horizon)?;
        let (solver, fallback) = solvers_from_config(&config.solver);
        let checkpoints =
            CheckpointManager::new(&config.run.checkpoint_dir, config.run.name.as_str());
        let mut scheduler = Self::new(
            &config.run.name,
            fleet,
            plan,
            profile,
            config.costs.clone(),
            SolverSettings::from(&config.solver),
            solver,
            checkpoints,
        );
        scheduler.fallback = fallback;
        Ok(scheduler)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_name: &str,
        fleet: Fleet,
        plan: HorizonPlan,
        profile: ExogenousProfile,
        costs: CostConfig,
        settings: SolverSettings,
        solver: Box<dyn CommitmentSolver>,
        checkpoints: CheckpointManager,
    ) -> Self {
        let aggregate = AggregateResults::new(plan.first_period);
        Self {
            run_name: run_name.to_string(),
            fleet,
            plan,
            profile,
            costs,
            settings,
            solver,
            fallback: None,
            checkpoints,
            cancel: CancellationToken::new(),
            phase: SchedulerPhase::Initializing,
            initialized: false,
            next_window: 0,
            resumed_from: None,
            states: Vec::new(),
            storage: None,
            aggregate,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn CommitmentSolver>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn states(&self) -> &[ReactorState] {
        &self.states
    }

    pub fn storage(&self) -> Option<&StorageState> {
        self.storage.as_ref()
    }

    pub fn aggregate(&self) -> &AggregateResults {
        &self.aggregate
    }

    pub fn next_window(&self) -> usize {
        self.next_window
    }

    pub fn plan(&self) -> &HorizonPlan {
        &self.plan
    }

    /// Resumes from the live checkpoint if there is one, otherwise starts
    /// from the configured initial states.
    pub async fn initialize(&mut self) -> Result<(), CommitmentError> {
        self.phase = SchedulerPhase::Initializing;
        match self.load_or_fresh().await {
            Ok(()) => {
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                self.phase = SchedulerPhase::Failed;
                error!(error = %e, kind = e.kind(), "initialization failed");
                Err(e)
            }
        }
    }

    async fn load_or_fresh(&mut self) -> Result<(), CommitmentError> {
        if self.profile.len() < self.plan.end_period {
            return Err(CommitmentError::Data(format!(
                "profile covers {} periods, horizon ends at period {}",
                self.profile.len(),
                self.plan.end_period
            )));
        }

        match self.checkpoints.load(&self.plan).await? {
            Some(checkpoint) => {
                self.fleet
                    .check_states(&checkpoint.reactor_states)
                    .and_then(|()| self.fleet.check_storage(checkpoint.storage_state.as_ref()))
                    .map_err(|e| CommitmentError::CorruptCheckpoint {
                        path: self.checkpoints.path(),
                        reason: e.to_string(),
                    })?;
                info!(
                    run = %self.run_name,
                    window = checkpoint.window_index,
                    saved_at = %checkpoint.saved_at,
                    periods = checkpoint.aggregate.periods.len(),
                    "resuming from checkpoint"
                );
                self.next_window = checkpoint.window_index;
                self.resumed_from = Some(checkpoint.window_index);
                self.states = checkpoint.reactor_states;
                self.storage = checkpoint.storage_state;
                self.aggregate = checkpoint.aggregate;
            }
            None => {
                let states = self.fleet.initial_states();
                self.fleet.check_states(&states)?;
                let storage = self.fleet.initial_storage_state();
                self.fleet.check_storage(storage.as_ref())?;
                info!(
                    run = %self.run_name,
                    units = self.fleet.len(),
                    windows = self.plan.window_count(),
                    "starting fresh run"
                );
                self.next_window = 0;
                self.resumed_from = None;
                self.states = states;
                self.storage = storage;
                self.aggregate = AggregateResults::new(self.plan.first_period);
            }
        }
        Ok(())
    }

    /// Runs one full window cycle. `None` once the horizon is exhausted.
    pub async fn step(&mut self) -> Result<Option<WindowSummary>, CommitmentError> {
        if !self.initialized {
            self.initialize().await?;
        }
        let Some(bounds) = self.plan.bounds(self.next_window, self.profile.len()) else {
            self.phase = SchedulerPhase::Completed;
            return Ok(None);
        };

        match self.run_window(bounds).await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                self.phase = SchedulerPhase::Failed;
                let snapshot = serde_json::to_string(&self.states)
                    .unwrap_or_else(|err| format!("<unserializable: {}>", err));
                error!(
                    window = bounds.index,
                    first_period = bounds.first_period,
                    error = %e,
                    kind = e.kind(),
                    states = %snapshot,
                    checkpoint = %self.checkpoints.path().display(),
                    "window failed; last good checkpoint retained"
                );
                Err(e)
            }
        }
    }

    async fn run_window(&mut self, bounds: WindowBounds) -> Result<WindowSummary, CommitmentError> {
        self.phase = SchedulerPhase::BuildingWindow;
        info!(
            window = bounds.index,
            first_period = bounds.first_period,
            committed = bounds.committed_periods,
            lookahead = bounds.total_periods - bounds.committed_periods,
            "building window"
        );
        let window = TimeWindow::slice(
            bounds,
            &self.profile,
            self.states.clone(),
            self.storage.clone(),
        )?;
        let problem = ProblemBuilder::new(&self.fleet, &self.costs).build(&window)?;

        self.phase = SchedulerPhase::Solving;
        let (solution, solver, used_incumbent) = self.solve(&problem).await?;

        self.phase = SchedulerPhase::Processing;
        let processed = WindowResultProcessor::new(&self.fleet, &self.plan).process(
            &window,
            &problem,
            &solution,
            solver,
            used_incumbent,
        )?;
        let summary = processed.summary.clone();
        let mut aggregate = self.aggregate.clone();
        aggregate.append(processed.records, processed.summary)?;

        self.phase = SchedulerPhase::Checkpointing;
        let checkpoint = Checkpoint::new(
            &self.run_name,
            bounds.index + 1,
            self.plan,
            processed.carry_out,
            processed.storage_out,
            aggregate,
        );
        self.checkpoints.save(&checkpoint).await?;

        self.states = checkpoint.reactor_states;
        self.storage = checkpoint.storage_state;
        self.aggregate = checkpoint.aggregate;
        self.next_window = checkpoint.window_index;
        info!(
            window = bounds.index,
            first_period = bounds.first_period,
            solver,
            committed_cost = summary.committed_cost,
            refuels = summary.refuels.len(),
            "window committed"
        );
        Ok(summary)
    }

    /// Primary solver, then the fallback if the primary ends without a usable
    /// solution.
    async fn solve(
        &self,
        problem: &OptimizationProblem,
    ) -> Result<(Solution, &'static str, bool), CommitmentError> {
        let primary = self.solver.name();
        let result = match self.solver.solve(problem, &self.settings).await {
            Ok(outcome) => self.accept(problem, outcome, primary),
            Err(e) => Err(e),
        };

        match (result, &self.fallback) {
            (Err(e), Some(fallback)) if e.is_solver_outcome() => {
                warn!(
                    window = problem.window_index,
                    primary,
                    fallback = fallback.name(),
                    error = %e,
                    "primary solver gave no solution; trying fallback"
                );
                let outcome = fallback.solve(problem, &self.settings).await?;
                self.accept(problem, outcome, fallback.name())
            }
            (result, _) => result,
        }
    }

    fn accept(
        &self,
        problem: &OptimizationProblem,
        outcome: SolveOutcome,
        solver: &'static str,
    ) -> Result<(Solution, &'static str, bool), CommitmentError> {
        match outcome {
            SolveOutcome::Solved(solution) => Ok((solution, solver, false)),
            SolveOutcome::TimedOut {
                incumbent: Some(solution),
            } => {
                warn!(
                    window = problem.window_index,
                    solver,
                    objective = solution.objective,
                    "time limit reached; using best incumbent"
                );
                Ok((solution, solver, true))
            }
            SolveOutcome::TimedOut { incumbent: None } => Err(CommitmentError::TimedOut {
                window: problem.window_index,
                limit_seconds: self.settings.time_limit.as_secs_f64(),
            }),
            SolveOutcome::Infeasible => Err(CommitmentError::Infeasible {
                window: problem.window_index,
            }),
        }
    }

    /// Runs every remaining window, then rotates the checkpoint. Stops at a
    /// window boundary when cancelled.
    pub async fn run(&mut self) -> Result<RunReport, CommitmentError> {
        if !self.initialized {
            self.initialize().await?;
        }
        let mut windows_run = 0;
        loop {
            if self.cancel.is_cancelled() {
                warn!(
                    run = %self.run_name,
                    next_window = self.next_window,
                    "run cancelled; resume from the checkpoint"
                );
                return Ok(self.report(windows_run, false, None));
            }
            match self.step().await? {
                Some(_) => windows_run += 1,
                None => break,
            }
        }

        let completed_checkpoint = match self.checkpoints.rotate_completed().await {
            Ok(path) => path,
            Err(e) => {
                self.phase = SchedulerPhase::Failed;
                return Err(e);
            }
        };
        self.phase = SchedulerPhase::Completed;
        let summary = self.aggregate.summary();
        info!(
            run = %self.run_name,
            windows = summary.windows,
            periods = summary.periods,
            total_cost = summary.total_cost,
            unserved_mwh = summary.unserved_mwh,
            curtailment_mwh = summary.curtailment_mwh,
            "run completed"
        );
        Ok(self.report(windows_run, true, completed_checkpoint))
    }

    fn report(
        &self,
        windows_run: usize,
        completed: bool,
        completed_checkpoint: Option<PathBuf>,
    ) -> RunReport {
        RunReport {
            run_name: self.run_name.clone(),
            resumed_from: self.resumed_from,
            windows_run,
            completed,
            final_states: self.states.clone(),
            final_storage: self.storage.clone(),
            aggregate: self.aggregate.clone(),
            completed_checkpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::domain::storage::tests::storage_config;
    use crate::domain::StorageUnit;
    use crate::optimizer::{DynamicProgrammingSolver, MockCommitmentSolver};

    fn config() -> Config {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.horizon.end_day = 40;
        config
    }

    fn scheduler(dir: &std::path::Path, solver: Box<dyn CommitmentSolver>) -> RollingHorizonScheduler {
        let fleet = Fleet::from_config(&config()).unwrap();
        scheduler_for(fleet, dir, solver)
    }

    fn storage_scheduler(dir: &std::path::Path) -> RollingHorizonScheduler {
        let storage = StorageUnit::from_config(&storage_config(), 1).unwrap();
        let fleet = Fleet::from_config(&config()).unwrap().with_storage(storage);
        scheduler_for(fleet, dir, Box::new(DynamicProgrammingSolver::default()))
    }

    fn scheduler_for(
        fleet: Fleet,
        dir: &std::path::Path,
        solver: Box<dyn CommitmentSolver>,
    ) -> RollingHorizonScheduler {
        let config = config();
        let plan = HorizonPlan::from_config(&config.horizon).unwrap();
        let profile = ExogenousProfile::flat(plan.end_period + plan.overlap, 800.0, 0.0).unwrap();
        RollingHorizonScheduler::new(
            &config.run.name,
            fleet,
            plan,
            profile,
            config.costs.clone(),
            SolverSettings::default(),
            solver,
            CheckpointManager::new(dir, config.run.name.as_str()),
        )
    }

    /// Solves windows before `fail_from` with DP, then returns `outcome`.
    fn mock_failing_from(fail_from: usize, outcome: SolveOutcome) -> MockCommitmentSolver {
        let mut mock = MockCommitmentSolver::new();
        mock.expect_name().return_const("mock");
        let dp = DynamicProgrammingSolver::default();
        mock.expect_solve().returning(move |problem, settings| {
            if problem.window_index < fail_from {
                dp.solve_sync(problem, settings)
            } else {
                Ok(outcome.clone())
            }
        });
        mock
    }

    #[tokio::test]
    async fn test_runs_all_windows_and_rotates_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = scheduler(dir.path(), Box::new(DynamicProgrammingSolver::default()));
        let report = s.run().await.unwrap();
        assert!(report.completed);
        assert_eq!(report.windows_run, 4);
        assert_eq!(report.aggregate.periods.len(), 40);
        assert_eq!(s.phase(), SchedulerPhase::Completed);
        assert!(report.completed_checkpoint.is_some());
        assert!(!dir.path().join("single-ap1000.checkpoint.json").exists());
    }

    #[tokio::test]
    async fn test_infeasible_without_fallback_fails_and_keeps_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = scheduler(dir.path(), Box::new(mock_failing_from(2, SolveOutcome::Infeasible)));
        let result = s.run().await;
        assert!(matches!(result, Err(CommitmentError::Infeasible { window: 2 })));
        assert_eq!(s.phase(), SchedulerPhase::Failed);

        let manager = CheckpointManager::new(dir.path(), "single-ap1000");
        let checkpoint = manager.load(s.plan()).await.unwrap().unwrap();
        assert_eq!(checkpoint.window_index, 2);
        assert_eq!(checkpoint.aggregate.periods.len(), 20);
    }

    #[tokio::test]
    async fn test_fallback_recovers_infeasible_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = scheduler(dir.path(), Box::new(mock_failing_from(1, SolveOutcome::Infeasible)))
            .with_fallback(Box::new(DynamicProgrammingSolver::default()));
        let report = s.run().await.unwrap();
        assert!(report.completed);
        let solvers: Vec<_> = report.aggregate.windows.iter().map(|w| w.solver.as_str()).collect();
        assert_eq!(solvers, vec!["mock", "dp", "dp", "dp"]);
    }

    #[tokio::test]
    async fn test_timeout_without_incumbent_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = scheduler(
            dir.path(),
            Box::new(mock_failing_from(0, SolveOutcome::TimedOut { incumbent: None })),
        );
        let result = s.run().await;
        assert!(matches!(result, Err(CommitmentError::TimedOut { window: 0, .. })));
        let manager = CheckpointManager::new(dir.path(), "single-ap1000");
        assert!(manager.load(s.plan()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_timeout_with_incumbent_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockCommitmentSolver::new();
        mock.expect_name().return_const("mock");
        let dp = DynamicProgrammingSolver::default();
        mock.expect_solve().returning(move |problem, settings| {
            match dp.solve_sync(problem, settings)? {
                SolveOutcome::Solved(solution) => Ok(SolveOutcome::TimedOut {
                    incumbent: Some(solution),
                }),
                other => Ok(other),
            }
        });
        let mut s = scheduler(dir.path(), Box::new(mock));
        let report = s.run().await.unwrap();
        assert!(report.aggregate.windows.iter().all(|w| w.used_incumbent));
        assert_eq!(report.aggregate.summary().incumbent_windows, 4);
    }

    #[tokio::test]
    async fn test_incomplete_solution_fails_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockCommitmentSolver::new();
        mock.expect_name().return_const("mock");
        let dp = DynamicProgrammingSolver::default();
        mock.expect_solve().returning(move |problem, settings| {
            match dp.solve_sync(problem, settings)? {
                SolveOutcome::Solved(mut solution) => {
                    solution.units.clear();
                    Ok(SolveOutcome::Solved(solution))
                }
                other => Ok(other),
            }
        });
        let mut s = scheduler(dir.path(), Box::new(mock));
        let result = s.run().await;
        assert!(matches!(result, Err(CommitmentError::IncompleteSolution { .. })));
        assert_eq!(s.phase(), SchedulerPhase::Failed);
        assert_eq!(s.aggregate().periods.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_on_window_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let mut s = scheduler(dir.path(), Box::new(DynamicProgrammingSolver::default()))
            .with_cancellation(cancel.clone());
        s.step().await.unwrap();
        cancel.cancel();
        let report = s.run().await.unwrap();
        assert!(!report.completed);
        assert_eq!(report.aggregate.periods.len(), 10);
        assert!(dir.path().join("single-ap1000.checkpoint.json").exists());
    }

    #[tokio::test]
    async fn test_storage_state_resumes_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut first = storage_scheduler(dir.path());
        first.step().await.unwrap();
        let carried = first.storage().cloned().unwrap();
        assert_eq!(carried.storage_id, "phs");
        assert!((0.0..=400.0).contains(&carried.soc_mwh));

        let mut resumed = storage_scheduler(dir.path());
        resumed.initialize().await.unwrap();
        assert_eq!(resumed.next_window(), 1);
        assert_eq!(resumed.storage(), Some(&carried));
        let report = resumed.run().await.unwrap();
        assert!(report.completed);
        assert!(report.final_storage.is_some());
        assert!(report.aggregate.periods.iter().all(|p| p.storage.is_some()));
    }

    #[tokio::test]
    async fn test_storage_checkpoint_rejected_by_fleet_without_storage() {
        let dir = tempfile::tempdir().unwrap();
        storage_scheduler(dir.path()).step().await.unwrap();
        let mut s = scheduler(dir.path(), Box::new(DynamicProgrammingSolver::default()));
        assert!(matches!(
            s.initialize().await,
            Err(CommitmentError::CorruptCheckpoint { .. })
        ));
    }

    #[tokio::test]
    async fn test_short_profile_fails_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let config = config();
        let fleet = Fleet::from_config(&config).unwrap();
        let plan = HorizonPlan::from_config(&config.horizon).unwrap();
        let mut s = RollingHorizonScheduler::new(
            &config.run.name,
            fleet,
            plan,
            ExogenousProfile::flat(10, 800.0, 0.0).unwrap(),
            config.costs.clone(),
            SolverSettings::default(),
            Box::new(DynamicProgrammingSolver::default()),
            CheckpointManager::new(dir.path(), config.run.name.as_str()),
        );
        assert!(matches!(s.initialize().await, Err(CommitmentError::Data(_))));
        assert_eq!(s.phase(), SchedulerPhase::Failed);
    }
}

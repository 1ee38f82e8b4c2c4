use async_trait::async_trait;
use itertools::Itertools;
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, warn};

use super::dispatch::{economic_dispatch, Dispatch, StorageFlow};
use super::{
    CommitmentSolver, OptimizationProblem, SolveOutcome, Solution, SolverSettings,
    StorageDecisions, StorageFormulation, UnitDecisions, UnitFormulation,
};
use crate::config::SolverConfig;
use crate::error::CommitmentError;

const EPS: f64 = 1e-9;
/// Upper bound on the state-of-charge grid whatever the storage geometry.
const MAX_STORAGE_LEVELS: usize = 10_000;

/// Commitment search over joint unit modes, one stage per period.
///
/// A unit's mode is its on/off status plus how long it has held it, capped
/// at the longest restriction that still depends on it. Dispatch within a
/// period is merit order, so the search is exact for units without ramp
/// limits. Ramp-limited units run on a grid of `generation_levels` steps
/// between minimum and maximum power, and storage on a grid of
/// `storage_levels` charge steps. The state space grows exponentially with
/// fleet size; `max_states` bounds it.
#[derive(Debug, Clone, Copy)]
pub struct DynamicProgrammingSolver {
    max_states: usize,
    generation_levels: u16,
    storage_levels: usize,
}

impl Default for DynamicProgrammingSolver {
    fn default() -> Self {
        Self {
            max_states: 200_000,
            generation_levels: 10,
            storage_levels: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct Mode {
    on: bool,
    age: u32,
    /// Output grid step of a committed ramp-limited unit, else zero.
    level: u16,
}

struct Node {
    modes: Vec<Mode>,
    /// Grid level of stored energy; `None` is the window's initial charge.
    soc: Option<usize>,
    cost: f64,
    parent: usize,
}

type DispatchKey = (Vec<(bool, u16)>, Option<usize>, Option<usize>);

/// Discretised state of charge.
struct StorageGrid<'a> {
    storage: &'a StorageFormulation,
    levels: usize,
    step: f64,
}

impl<'a> StorageGrid<'a> {
    fn new(storage: &'a StorageFormulation, levels: usize) -> Self {
        // Neighbouring levels must be one full-power charging period apart at most.
        let per_period = storage.efficiency * storage.power_mw * storage.hours_per_period;
        let needed = (storage.energy_mwh / per_period).ceil() as usize;
        let levels = levels.max(needed).clamp(1, MAX_STORAGE_LEVELS);
        Self {
            storage,
            levels,
            step: storage.energy_mwh / levels as f64,
        }
    }

    fn soc(&self, level: Option<usize>) -> f64 {
        level.map_or(self.storage.initial_soc_mwh, |k| self.step * k as f64)
    }

    fn flow(&self, from: Option<usize>, to: usize) -> Option<StorageFlow> {
        let s = self.storage;
        let delta = self.soc(Some(to)) - self.soc(from);
        let flow = if delta >= 0.0 {
            StorageFlow {
                charge: delta / (s.efficiency * s.hours_per_period),
                discharge: 0.0,
            }
        } else {
            StorageFlow {
                charge: 0.0,
                discharge: -delta * s.efficiency / s.hours_per_period,
            }
        };
        let limit = s.power_mw * (1.0 + EPS);
        (flow.charge <= limit && flow.discharge <= limit).then(|| StorageFlow {
            charge: flow.charge.min(s.power_mw),
            discharge: flow.discharge.min(s.power_mw),
        })
    }

    fn moves(&self, from: Option<usize>) -> Vec<(Option<usize>, StorageFlow)> {
        (0..=self.levels)
            .filter_map(|k| self.flow(from, k).map(|f| (Some(k), f)))
            .collect()
    }
}

impl DynamicProgrammingSolver {
    pub fn new(max_states: usize) -> Self {
        Self {
            max_states,
            ..Self::default()
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        Self::new(config.dp_max_states).with_grids(config.dp_generation_levels, config.dp_storage_levels)
    }

    pub fn with_grids(mut self, generation_levels: u16, storage_levels: usize) -> Self {
        self.generation_levels = generation_levels.max(1);
        self.storage_levels = storage_levels.max(1);
        self
    }

    /// Runs the search on the calling thread.
    pub fn solve_sync(
        &self,
        problem: &OptimizationProblem,
        settings: &SolverSettings,
    ) -> Result<SolveOutcome, CommitmentError> {
        problem.validate()?;
        if problem.units.is_empty() {
            return Err(CommitmentError::Solver(format!(
                "window {} has no units",
                problem.window_index
            )));
        }
        let started = Instant::now();
        let periods = problem.periods();
        let grid = problem
            .storage
            .as_ref()
            .map(|s| StorageGrid::new(s, self.storage_levels));

        let root = problem
            .units
            .iter()
            .map(|unit| Mode {
                on: unit.initial_commit,
                age: age_cap(unit, unit.initial_commit),
                level: 0,
            })
            .collect();
        let mut layers: Vec<Vec<Node>> = vec![vec![Node {
            modes: root,
            soc: None,
            cost: 0.0,
            parent: 0,
        }]];

        for t in 0..periods {
            let previous = &layers[t];
            let mut layer: Vec<Node> = Vec::new();
            let mut index: BTreeMap<(Vec<Mode>, Option<usize>), usize> = BTreeMap::new();
            let mut period_cost: HashMap<DispatchKey, f64> = HashMap::new();

            for (i, node) in previous.iter().enumerate() {
                if started.elapsed() >= settings.time_limit {
                    warn!(
                        window = problem.window_index,
                        period = t,
                        "dynamic programming hit its time limit"
                    );
                    return Ok(SolveOutcome::TimedOut { incumbent: None });
                }

                let options = problem
                    .units
                    .iter()
                    .zip(&node.modes)
                    .map(|(unit, mode)| self.next_modes(unit, *mode, t));
                let moves = match &grid {
                    Some(grid) => grid.moves(node.soc),
                    None => vec![(None, StorageFlow::default())],
                };

                for choice in options.multi_cartesian_product() {
                    let mut transition = node.cost;
                    for ((unit, mode), next) in problem.units.iter().zip(&node.modes).zip(&choice) {
                        if next.on && !mode.on {
                            transition += unit.start_cost;
                        }
                        if !next.on && mode.on {
                            transition += unit.shut_cost;
                        }
                    }
                    let outputs: Vec<(bool, u16)> = choice.iter().map(|m| (m.on, m.level)).collect();

                    for &(soc, flow) in &moves {
                        let cost = transition
                            + *period_cost
                                .entry((outputs.clone(), node.soc, soc))
                                .or_insert_with(|| {
                                    self.dispatch(problem, t, &choice, flow).cost
                                });

                        match index.get(&(choice.clone(), soc)) {
                            Some(&j) => {
                                if cost < layer[j].cost {
                                    layer[j].cost = cost;
                                    layer[j].parent = i;
                                }
                            }
                            None => {
                                if layer.len() >= self.max_states {
                                    return Err(CommitmentError::Solver(format!(
                                        "window {}: more than {} commitment states at period {}",
                                        problem.window_index, self.max_states, t
                                    )));
                                }
                                index.insert((choice.clone(), soc), layer.len());
                                layer.push(Node {
                                    modes: choice.clone(),
                                    soc,
                                    cost,
                                    parent: i,
                                });
                            }
                        }
                    }
                }
            }

            if layer.is_empty() {
                debug!(window = problem.window_index, period = t, "no feasible commitment");
                return Ok(SolveOutcome::Infeasible);
            }
            debug!(window = problem.window_index, period = t, states = layer.len(), "dp stage");
            layers.push(layer);
        }

        let Some((best, objective)) = layers[periods]
            .iter()
            .enumerate()
            .min_by_key(|(_, node)| OrderedFloat(node.cost))
            .map(|(i, node)| (i, node.cost))
        else {
            return Ok(SolveOutcome::Infeasible);
        };

        let mut path: Vec<(Vec<Mode>, Option<usize>)> = vec![(Vec::new(), None); periods];
        let mut cursor = best;
        for t in (0..periods).rev() {
            let node = &layers[t + 1][cursor];
            path[t] = (node.modes.clone(), node.soc);
            cursor = node.parent;
        }

        self.assemble(problem, grid.as_ref(), &path, objective)
            .map(SolveOutcome::Solved)
    }

    /// Modes a unit may take in period `t` coming from `mode`.
    fn next_modes(&self, unit: &UnitFormulation, mode: Mode, t: usize) -> Vec<Mode> {
        let previous_output = if t == 0 {
            if unit.initial_commit {
                unit.initial_output_above_min
            } else {
                0.0
            }
        } else if mode.on {
            self.output_above_min(unit, t - 1, mode.level)
        } else {
            0.0
        };

        let mut modes = Vec::new();
        for on in [false, true] {
            if !allowed(unit, mode, on, t) {
                continue;
            }
            let age = if on == mode.on {
                (mode.age + 1).min(age_cap(unit, on))
            } else {
                1
            };
            if !on {
                if unit.ramp_allows(previous_output, 0.0, EPS) {
                    modes.push(Mode { on, age, level: 0 });
                }
                continue;
            }
            if !unit.is_ramp_limited() {
                modes.push(Mode { on, age, level: 0 });
                continue;
            }
            let top = if unit.max_power[t] - unit.min_power[t] > EPS {
                self.generation_levels
            } else {
                0
            };
            for level in 0..=top {
                let output = self.output_above_min(unit, t, level);
                if unit.ramp_allows(previous_output, output, EPS) {
                    modes.push(Mode { on, age, level });
                }
            }
        }
        modes
    }

    fn output_above_min(&self, unit: &UnitFormulation, t: usize, level: u16) -> f64 {
        let span = (unit.max_power[t] - unit.min_power[t]).max(0.0);
        span * f64::from(level) / f64::from(self.generation_levels)
    }

    fn dispatch(
        &self,
        problem: &OptimizationProblem,
        t: usize,
        modes: &[Mode],
        flow: StorageFlow,
    ) -> Dispatch {
        let commitment: Vec<bool> = modes.iter().map(|m| m.on).collect();
        let fixed: Vec<Option<f64>> = problem
            .units
            .iter()
            .zip(modes)
            .map(|(unit, mode)| {
                (mode.on && unit.is_ramp_limited())
                    .then(|| unit.min_power[t] + self.output_above_min(unit, t, mode.level))
            })
            .collect();
        economic_dispatch(problem, t, &commitment, &fixed, flow)
    }

    /// Expands the chosen path into a full variable assignment.
    fn assemble(
        &self,
        problem: &OptimizationProblem,
        grid: Option<&StorageGrid<'_>>,
        path: &[(Vec<Mode>, Option<usize>)],
        objective: f64,
    ) -> Result<Solution, CommitmentError> {
        let periods = path.len();
        let mut units: BTreeMap<String, UnitDecisions> = problem
            .units
            .iter()
            .map(|unit| {
                (
                    unit.unit_id.clone(),
                    UnitDecisions {
                        commit: Vec::with_capacity(periods),
                        start: Vec::with_capacity(periods),
                        shut: Vec::with_capacity(periods),
                        generation: Vec::with_capacity(periods),
                    },
                )
            })
            .collect();
        let mut renewable_used = Vec::with_capacity(periods);
        let mut unserved = Vec::with_capacity(periods);
        let mut surplus = Vec::with_capacity(periods);
        let mut storage = grid.map(|_| StorageDecisions {
            charge: Vec::with_capacity(periods),
            discharge: Vec::with_capacity(periods),
            soc: Vec::with_capacity(periods),
        });

        for (t, (modes, soc)) in path.iter().enumerate() {
            let flow = match (grid, soc) {
                (Some(grid), Some(level)) => {
                    let from = if t == 0 { None } else { path[t - 1].1 };
                    grid.flow(from, *level).ok_or_else(|| {
                        CommitmentError::Solver(format!(
                            "window {}: storage path breaks its power limit at period {}",
                            problem.window_index, t
                        ))
                    })?
                }
                _ => StorageFlow::default(),
            };
            let dispatch = self.dispatch(problem, t, modes, flow);
            for (u, unit) in problem.units.iter().enumerate() {
                let previous = if t == 0 {
                    unit.initial_commit
                } else {
                    path[t - 1].0[u].on
                };
                let on = modes[u].on;
                if let Some(decisions) = units.get_mut(&unit.unit_id) {
                    decisions.commit.push(on);
                    decisions.start.push(on && !previous);
                    decisions.shut.push(!on && previous);
                    decisions.generation.push(dispatch.generation[u]);
                }
            }
            renewable_used.push(dispatch.renewable_used);
            unserved.push(dispatch.unserved);
            surplus.push(dispatch.surplus);
            if let (Some(decisions), Some(grid)) = (storage.as_mut(), grid) {
                decisions.charge.push(flow.charge);
                decisions.discharge.push(flow.discharge);
                decisions.soc.push(grid.soc(*soc));
            }
        }

        Ok(Solution {
            objective,
            units,
            renewable_used,
            unserved,
            surplus,
            storage,
        })
    }
}

/// Longest hold time that still constrains the next transition.
fn age_cap(unit: &UnitFormulation, on: bool) -> u32 {
    let periods = if on {
        unit.min_up_periods
    } else {
        unit.dead_time_periods
    };
    u32::try_from(periods.max(1)).unwrap_or(u32::MAX)
}

fn allowed(unit: &UnitFormulation, mode: Mode, on: bool, t: usize) -> bool {
    if on && unit.forced_off(t) {
        return false;
    }
    if !on && unit.forced_on(t) {
        return false;
    }
    if mode.on && !on && (mode.age as usize) < unit.min_up_periods {
        return false;
    }
    if !mode.on && on && (mode.age as usize) < unit.dead_time_periods {
        return false;
    }
    true
}

#[async_trait]
impl CommitmentSolver for DynamicProgrammingSolver {
    fn name(&self) -> &'static str {
        "dp"
    }

    async fn solve(
        &self,
        problem: &OptimizationProblem,
        settings: &SolverSettings,
    ) -> Result<SolveOutcome, CommitmentError> {
        let solver = *self;
        let problem = problem.clone();
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || solver.solve_sync(&problem, &settings))
            .await
            .map_err(|e| CommitmentError::Solver(format!("DP task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn unit(id: &str) -> UnitFormulation {
        UnitFormulation {
            unit_id: id.to_string(),
            reactivity: vec![1.2],
            max_power: vec![1000.0],
            min_power: vec![500.0],
            variable_cost: 10.0,
            start_cost: 1000.0,
            shut_cost: 500.0,
            initial_commit: false,
            initial_output_above_min: 0.0,
            forced_off_periods: 0,
            depletion_period: None,
            forced_on_periods: 0,
            dead_time_periods: 3,
            min_up_periods: 2,
            ramp_up: None,
            ramp_down: None,
        }
    }

    fn problem(demand: Vec<f64>, mut units: Vec<UnitFormulation>) -> OptimizationProblem {
        let periods = demand.len();
        for u in &mut units {
            u.reactivity = vec![u.reactivity[0]; periods];
            u.max_power = vec![u.max_power[0]; periods];
            u.min_power = vec![u.min_power[0]; periods];
        }
        OptimizationProblem {
            window_index: 0,
            first_period: 0,
            committed_periods: periods,
            renewable: vec![0.0; periods],
            demand,
            units,
            storage: None,
            unserved_penalty: 9000.0,
            curtailment_penalty: 1.0,
        }
    }

    async fn solve(problem: &OptimizationProblem) -> Solution {
        match DynamicProgrammingSolver::default()
            .solve(problem, &SolverSettings::default())
            .await
            .unwrap()
        {
            SolveOutcome::Solved(solution) => solution,
            other => panic!("expected a solution, got {:?}", other),
        }
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-6)
    }

    #[tokio::test]
    async fn test_commits_unit_to_serve_demand() {
        let p = problem(vec![800.0; 6], vec![unit("a")]);
        let s = solve(&p).await;
        let a = &s.units["a"];
        assert!(a.commit.iter().all(|&c| c));
        assert!(a.start[0]);
        assert!(a.generation.iter().all(|&g| (g - 800.0).abs() < 1e-9));
        assert!((s.objective - (1000.0 + 6.0 * 8000.0)).abs() < 1e-6);
        assert!(s.storage.is_none());
    }

    #[tokio::test]
    async fn test_respects_carried_dead_time() {
        let mut u = unit("a");
        u.forced_off_periods = 5;
        u.initial_commit = true;
        let p = problem(vec![800.0; 8], vec![u]);
        let s = solve(&p).await;
        let a = &s.units["a"];
        assert_eq!(&a.commit[..5], &[false; 5]);
        assert!(a.generation[..5].iter().all(|&g| g == 0.0));
        assert!(a.shut[0]);
        assert!(a.commit[5]);
        assert!(s.unserved[..5].iter().all(|&n| (n - 800.0).abs() < 1e-9));
    }

    #[tokio::test]
    async fn test_stays_off_from_depletion_period() {
        let mut u = unit("a");
        u.initial_commit = true;
        u.depletion_period = Some(3);
        let p = problem(vec![800.0; 6], vec![u]);
        let a = &solve(&p).await.units["a"];
        assert_eq!(a.commit, vec![true, true, true, false, false, false]);
        assert!(a.shut[3]);
        assert!(a.generation[3..].iter().all(|&g| g == 0.0));
    }

    #[tokio::test]
    async fn test_generation_follows_per_period_bounds() {
        let mut p = problem(vec![1000.0; 3], vec![unit("a")]);
        p.units[0].max_power = vec![1000.0, 950.0, 900.0];
        let s = solve(&p).await;
        assert!(close(&s.units["a"].generation, &[1000.0, 950.0, 900.0]));
        assert!(close(&s.unserved, &[0.0, 50.0, 100.0]));
    }

    #[tokio::test]
    async fn test_respects_minimum_up_time() {
        let mut u = unit("a");
        u.start_cost = 0.0;
        u.shut_cost = 0.0;
        u.min_up_periods = 3;
        // A one-period spike should keep the unit on for three periods.
        let p = problem(vec![0.0, 600.0, 0.0, 0.0, 0.0], vec![u]);
        let s = solve(&p).await;
        let a = &s.units["a"];
        assert_eq!(a.commit, vec![false, true, true, true, false]);
    }

    #[tokio::test]
    async fn test_in_window_dead_time_blocks_restart() {
        let mut u = unit("a");
        u.initial_commit = true;
        u.min_up_periods = 0;
        u.dead_time_periods = 3;
        u.start_cost = 0.0;
        u.shut_cost = 0.0;
        let p = problem(vec![0.0, 800.0, 800.0, 800.0, 800.0], vec![u]);
        let s = solve(&p).await;
        let a = &s.units["a"];
        // Shutting at period 0 would keep the unit off through period 2, so it stays on.
        assert!(a.commit.iter().all(|&c| c));
    }

    #[tokio::test]
    async fn test_ramp_up_limits_start_and_climb() {
        let mut u = unit("a");
        u.ramp_up = Some(100.0);
        let p = problem(vec![800.0; 6], vec![u]);
        let s = solve(&p).await;
        let a = &s.units["a"];
        assert!(a.commit.iter().all(|&c| c));
        assert!(close(&a.generation, &[600.0, 700.0, 800.0, 800.0, 800.0, 800.0]));
        assert!(close(&s.unserved, &[200.0, 100.0, 0.0, 0.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn test_ramps_down_ahead_of_depletion() {
        let mut u = unit("a");
        u.initial_commit = true;
        u.initial_output_above_min = 500.0;
        u.ramp_down = Some(200.0);
        u.depletion_period = Some(3);
        let p = problem(vec![1000.0; 6], vec![u]);
        let s = solve(&p).await;
        let a = &s.units["a"];
        assert_eq!(a.commit, vec![true, true, true, false, false, false]);
        assert!(close(&a.generation, &[1000.0, 900.0, 700.0, 0.0, 0.0, 0.0]));
    }

    #[tokio::test]
    async fn test_storage_moves_surplus_into_shortfall() {
        let mut u = unit("a");
        u.initial_commit = true;
        u.forced_on_periods = 4;
        let mut p = problem(vec![400.0, 400.0, 1100.0, 1100.0], vec![u]);
        p.storage = Some(StorageFormulation {
            storage_id: "phs".to_string(),
            power_mw: 100.0,
            energy_mwh: 200.0,
            efficiency: 1.0,
            hours_per_period: 1.0,
            initial_soc_mwh: 0.0,
        });
        let s = solve(&p).await;
        let storage = s.storage.as_ref().unwrap();
        assert!(close(&storage.charge, &[100.0, 100.0, 0.0, 0.0]));
        assert!(close(&storage.discharge, &[0.0, 0.0, 100.0, 100.0]));
        assert!(close(&storage.soc, &[100.0, 200.0, 100.0, 0.0]));
        assert!(close(&s.unserved, &[0.0; 4]));
        assert!(close(&s.surplus, &[0.0; 4]));
        assert!(close(&s.units["a"].generation, &[500.0, 500.0, 1000.0, 1000.0]));
    }

    #[tokio::test]
    async fn test_lossy_storage_keeps_charge_balance() {
        let mut u = unit("a");
        u.initial_commit = true;
        u.forced_on_periods = 4;
        let mut p = problem(vec![300.0, 300.0, 1200.0, 1200.0], vec![u]);
        let storage = StorageFormulation {
            storage_id: "phs".to_string(),
            power_mw: 100.0,
            energy_mwh: 400.0,
            efficiency: 0.84,
            hours_per_period: 1.0,
            initial_soc_mwh: 50.0,
        };
        p.storage = Some(storage.clone());
        let s = solve(&p).await;
        let decisions = s.storage.as_ref().unwrap();
        let mut soc = storage.initial_soc_mwh;
        for t in 0..4 {
            assert!(decisions.charge[t] * decisions.discharge[t] == 0.0);
            assert!(decisions.charge[t] <= 100.0 + 1e-9 && decisions.discharge[t] <= 100.0 + 1e-9);
            soc = storage.next_soc(soc, decisions.charge[t], decisions.discharge[t]);
            assert!((soc - decisions.soc[t]).abs() < 1e-6);
            assert!((0.0..=400.0 + 1e-9).contains(&soc));
        }
        // 200 MW short in each of the last two periods without storage.
        assert!(s.unserved.iter().sum::<f64>() < 400.0 - 1.0);
        let cost = p.cost_of(&s, 0..p.periods());
        assert!((s.objective - cost).abs() < 1e-6 * cost.abs().max(1.0));
    }

    #[tokio::test]
    async fn test_contradictory_restrictions_are_rejected() {
        let mut u = unit("a");
        u.initial_commit = true;
        u.forced_on_periods = 2;
        u.forced_off_periods = 2;
        let p = problem(vec![800.0; 4], vec![u]);
        let result = DynamicProgrammingSolver::default()
            .solve(&p, &SolverSettings::default())
            .await;
        assert!(matches!(result, Err(CommitmentError::Solver(_))));
    }

    #[tokio::test]
    async fn test_zero_time_limit_times_out() {
        let p = problem(vec![800.0; 4], vec![unit("a")]);
        let settings = SolverSettings {
            time_limit: Duration::ZERO,
            ..SolverSettings::default()
        };
        let outcome = DynamicProgrammingSolver::default()
            .solve(&p, &settings)
            .await
            .unwrap();
        assert_eq!(outcome, SolveOutcome::TimedOut { incumbent: None });
    }

    #[tokio::test]
    async fn test_state_cap_is_a_solver_error() {
        let p = problem(vec![800.0; 4], vec![unit("a"), unit("b"), unit("c")]);
        let result = DynamicProgrammingSolver::new(2)
            .solve(&p, &SolverSettings::default())
            .await;
        assert!(matches!(result, Err(CommitmentError::Solver(_))));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_search_yields_the_runtime_while_running() {
        let p = problem(vec![800.0; 6], vec![unit("a")]);
        let solver = DynamicProgrammingSolver::default();
        let finished = AtomicBool::new(false);
        let (outcome, finished_first) = tokio::join!(
            async {
                let outcome = solver.solve(&p, &SolverSettings::default()).await;
                finished.store(true, Ordering::SeqCst);
                outcome
            },
            async { finished.load(Ordering::SeqCst) }
        );
        assert!(matches!(outcome, Ok(SolveOutcome::Solved(_))));
        assert!(!finished_first);
    }

    #[tokio::test]
    async fn test_objective_matches_solution_cost() {
        let mut p = problem(vec![300.0, 1500.0, 900.0, 0.0, 1200.0], vec![unit("a"), unit("b")]);
        p.renewable = vec![100.0, 0.0, 400.0, 50.0, 0.0];
        p.units[1].ramp_up = Some(300.0);
        let s = solve(&p).await;
        let cost = p.cost_of(&s, 0..p.periods());
        assert!((s.objective - cost).abs() < 1e-6 * cost.abs().max(1.0));
    }

    #[tokio::test]
    async fn test_identical_problems_give_identical_answers() {
        let p = problem(vec![700.0, 1500.0, 900.0, 300.0], vec![unit("a"), unit("b")]);
        assert_eq!(solve(&p).await, solve(&p).await);
    }
}

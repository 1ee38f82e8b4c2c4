//! MILP (Mixed-Integer Linear Programming) commitment solver
//!
//! Builds the window model documented in [`crate::optimizer::problem`] with
//! good_lp and solves it with CBC. Binaries per unit and period: COMMIT,
//! START, SHUT, plus the storage charge mode. Continuous: GEN, used
//! renewables, unserved energy, surplus, CHARGE, DISCHARGE and SOC. CBC runs on a blocking thread with a fixed seed, thread count,
//! relative gap and wall-clock limit so identical windows reproduce.

use async_trait::async_trait;

use crate::error::CommitmentError;
use crate::optimizer::{CommitmentSolver, OptimizationProblem, SolveOutcome, SolverSettings};

#[derive(Debug, Default, Clone, Copy)]
pub struct MilpSolver;

impl MilpSolver {
    pub fn new() -> Self {
        Self
    }

    #[cfg(feature = "optimization")]
    fn solve_cbc(
        problem: &OptimizationProblem,
        settings: &SolverSettings,
    ) -> Result<SolveOutcome, CommitmentError> {
        use good_lp::solvers::coin_cbc::coin_cbc;
        use good_lp::{
            constraint, variable, Expression, ProblemVariables, ResolutionError,
            Solution as _, SolverModel, Variable,
        };
        use std::collections::BTreeMap;
        use std::time::Instant;
        use tracing::{debug, warn};

        use crate::optimizer::{Solution, StorageDecisions, UnitDecisions};

        struct UnitVars {
            commit: Vec<Variable>,
            start: Vec<Variable>,
            shut: Vec<Variable>,
            generation: Vec<Variable>,
        }

        struct StorageVars {
            charge: Vec<Variable>,
            discharge: Vec<Variable>,
            soc: Vec<Variable>,
            charging: Vec<Variable>,
        }

        problem.validate()?;
        let periods = problem.periods();
        let mut vars = ProblemVariables::new();

        let unit_vars: Vec<UnitVars> = problem
            .units
            .iter()
            .map(|unit| UnitVars {
                commit: vars.add_vector(variable().binary(), periods),
                start: vars.add_vector(variable().binary(), periods),
                shut: vars.add_vector(variable().binary(), periods),
                generation: unit
                    .max_power
                    .iter()
                    .map(|&cap| vars.add(variable().min(0.0).max(cap)))
                    .collect(),
            })
            .collect();
        let storage_vars = problem.storage.as_ref().map(|s| StorageVars {
            charge: vars.add_vector(variable().min(0.0).max(s.power_mw), periods),
            discharge: vars.add_vector(variable().min(0.0).max(s.power_mw), periods),
            soc: vars.add_vector(variable().min(0.0).max(s.energy_mwh), periods),
            charging: vars.add_vector(variable().binary(), periods),
        });
        let renewable: Vec<Variable> = problem
            .renewable
            .iter()
            .map(|&available| vars.add(variable().min(0.0).max(available)))
            .collect();
        let unserved = vars.add_vector(variable().min(0.0), periods);
        let surplus = vars.add_vector(variable().min(0.0), periods);

        let mut objective = Expression::default();
        for (unit, v) in problem.units.iter().zip(&unit_vars) {
            for t in 0..periods {
                objective += unit.variable_cost * v.generation[t];
                objective += unit.start_cost * v.start[t];
                objective += unit.shut_cost * v.shut[t];
            }
        }
        for t in 0..periods {
            objective += problem.unserved_penalty * unserved[t];
            objective += problem.curtailment_penalty * surplus[t];
            objective += -problem.curtailment_penalty * renewable[t];
            objective += problem.curtailment_penalty * problem.renewable[t];
        }

        let mut model = vars.minimise(objective).using(coin_cbc);
        model.set_parameter("log", "0");
        model.set_parameter("sec", &format!("{}", settings.time_limit.as_secs_f64()));
        model.set_parameter("ratioGap", &format!("{}", settings.relative_gap));
        model.set_parameter("randomCbcSeed", &format!("{}", settings.seed));
        model.set_parameter("threads", &format!("{}", settings.threads));

        for (unit, v) in problem.units.iter().zip(&unit_vars) {
            let initial = if unit.initial_commit { 1.0 } else { 0.0 };
            for t in 0..periods {
                if t == 0 {
                    model.add_constraint(constraint!(
                        v.start[0] - v.shut[0] - v.commit[0] == -initial
                    ));
                } else {
                    model.add_constraint(constraint!(
                        v.start[t] - v.shut[t] - v.commit[t] + v.commit[t - 1] == 0.0
                    ));
                }

                model.add_constraint(constraint!(
                    v.generation[t] - unit.max_power[t] * v.commit[t] <= 0.0
                ));
                model.add_constraint(constraint!(
                    v.generation[t] - unit.min_power[t] * v.commit[t] >= 0.0
                ));

                // Ramp limits act on output above minimum power.
                let above_min = v.generation[t] - unit.min_power[t] * v.commit[t];
                let (previous, offset) = if t == 0 {
                    let initial = if unit.initial_commit {
                        unit.initial_output_above_min
                    } else {
                        0.0
                    };
                    (Expression::default(), initial)
                } else {
                    (
                        v.generation[t - 1] - unit.min_power[t - 1] * v.commit[t - 1],
                        0.0,
                    )
                };
                if let Some(up) = unit.ramp_up {
                    model.add_constraint(constraint!(
                        above_min.clone() - previous.clone() <= up + offset
                    ));
                }
                if let Some(down) = unit.ramp_down {
                    model.add_constraint(constraint!(
                        previous.clone() - above_min.clone() <= down - offset
                    ));
                }

                if unit.forced_off(t) {
                    model.add_constraint(constraint!(v.commit[t] == 0.0));
                    model.add_constraint(constraint!(v.start[t] == 0.0));
                }
                if unit.forced_on(t) {
                    model.add_constraint(constraint!(v.commit[t] == 1.0));
                }

                if unit.min_up_periods > 0 {
                    let from = (t + 1).saturating_sub(unit.min_up_periods);
                    let starts: Expression = (from..=t).map(|s| v.start[s]).sum();
                    model.add_constraint(constraint!(starts - v.commit[t] <= 0.0));
                }
                if unit.dead_time_periods > 0 {
                    let from = (t + 1).saturating_sub(unit.dead_time_periods);
                    let shuts: Expression = (from..=t).map(|s| v.shut[s]).sum();
                    model.add_constraint(constraint!(shuts + v.commit[t] <= 1.0));
                }
            }
        }

        if let (Some(s), Some(sv)) = (&problem.storage, &storage_vars) {
            let h = s.hours_per_period;
            for t in 0..periods {
                let inflow = h * s.efficiency * sv.charge[t] - (h / s.efficiency) * sv.discharge[t];
                if t == 0 {
                    model.add_constraint(constraint!(sv.soc[0] - inflow == s.initial_soc_mwh));
                } else {
                    model.add_constraint(constraint!(sv.soc[t] - sv.soc[t - 1] - inflow == 0.0));
                }
                model.add_constraint(constraint!(sv.charge[t] - s.power_mw * sv.charging[t] <= 0.0));
                model.add_constraint(constraint!(
                    sv.discharge[t] + s.power_mw * sv.charging[t] <= s.power_mw
                ));
            }
        }

        for t in 0..periods {
            let mut supplied: Expression = unit_vars.iter().map(|v| v.generation[t]).sum();
            if let Some(sv) = &storage_vars {
                supplied += sv.discharge[t];
                supplied -= sv.charge[t];
            }
            model.add_constraint(constraint!(
                supplied + renewable[t] + unserved[t] - surplus[t] == problem.demand[t]
            ));
        }

        let started = Instant::now();
        let result = model.solve();
        let timed_out = started.elapsed() >= settings.time_limit;

        let lp = match result {
            Ok(lp) => lp,
            Err(ResolutionError::Infeasible) => return Ok(SolveOutcome::Infeasible),
            Err(e) if timed_out => {
                warn!(window = problem.window_index, error = %e, "CBC stopped at its time limit");
                return Ok(SolveOutcome::TimedOut { incumbent: None });
            }
            Err(e) => {
                return Err(CommitmentError::Solver(format!(
                    "CBC failed on window {}: {}",
                    problem.window_index, e
                )))
            }
        };

        let units: BTreeMap<String, UnitDecisions> = problem
            .units
            .iter()
            .zip(&unit_vars)
            .map(|(unit, v)| {
                let binary = |vars: &[Variable]| vars.iter().map(|&x| lp.value(x) > 0.5).collect();
                (
                    unit.unit_id.clone(),
                    UnitDecisions {
                        commit: binary(&v.commit),
                        start: binary(&v.start),
                        shut: binary(&v.shut),
                        generation: v.generation.iter().map(|&x| lp.value(x)).collect(),
                    },
                )
            })
            .collect();
        let values = |vars: &[Variable]| -> Vec<f64> { vars.iter().map(|&x| lp.value(x)).collect() };
        let mut solution = Solution {
            objective: 0.0,
            units,
            renewable_used: values(&renewable),
            unserved: values(&unserved),
            surplus: values(&surplus),
            storage: storage_vars.as_ref().map(|sv| StorageDecisions {
                charge: values(&sv.charge),
                discharge: values(&sv.discharge),
                soc: values(&sv.soc),
            }),
        };
        solution.objective = problem.cost_of(&solution, 0..periods);
        debug!(
            window = problem.window_index,
            objective = solution.objective,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "CBC finished"
        );

        if timed_out {
            let incumbent = is_consistent(problem, &solution).then_some(solution);
            warn!(
                window = problem.window_index,
                has_incumbent = incumbent.is_some(),
                "CBC stopped at its time limit"
            );
            return Ok(SolveOutcome::TimedOut { incumbent });
        }
        Ok(SolveOutcome::Solved(solution))
    }

    #[cfg(not(feature = "optimization"))]
    fn solve_cbc(
        _problem: &OptimizationProblem,
        _settings: &SolverSettings,
    ) -> Result<SolveOutcome, CommitmentError> {
        Err(CommitmentError::Solver(
            "MILP backend requires the 'optimization' feature to be enabled".to_string(),
        ))
    }
}

/// Whether a time-limited CBC answer is a usable incumbent rather than an
/// unfilled assignment.
#[cfg(feature = "optimization")]
fn is_consistent(problem: &OptimizationProblem, solution: &crate::optimizer::Solution) -> bool {
    const TOLERANCE: f64 = 1e-6;
    let net_storage = |t: usize| {
        solution
            .storage
            .as_ref()
            .map_or(0.0, |s| s.discharge[t] - s.charge[t])
    };
    (0..problem.periods()).all(|t| {
        let supplied: f64 = solution.units.values().map(|d| d.generation[t]).sum::<f64>()
            + solution.renewable_used[t]
            + net_storage(t)
            + solution.unserved[t]
            - solution.surplus[t];
        let balanced = (supplied - problem.demand[t]).abs() <= TOLERANCE * problem.demand[t].max(1.0);
        let bounded = problem.units.iter().all(|unit| {
            solution.units.get(&unit.unit_id).is_some_and(|d| {
                let cap = if d.commit[t] { unit.max_power[t] } else { 0.0 };
                d.generation[t] <= cap + TOLERANCE * cap.max(1.0)
            })
        });
        balanced && bounded
    })
}

#[async_trait]
impl CommitmentSolver for MilpSolver {
    fn name(&self) -> &'static str {
        "milp"
    }

    async fn solve(
        &self,
        problem: &OptimizationProblem,
        settings: &SolverSettings,
    ) -> Result<SolveOutcome, CommitmentError> {
        let problem = problem.clone();
        let settings = settings.clone();
        tokio::task::spawn_blocking(move || Self::solve_cbc(&problem, &settings))
            .await
            .map_err(|e| CommitmentError::Solver(format!("MILP task failed: {}", e)))?
    }
}

#[cfg(all(test, not(feature = "optimization")))]
mod stub_tests {
    use super::*;
    use crate::optimizer::problem::tests::{costs, sample_fleet, window};
    use crate::optimizer::ProblemBuilder;

    #[tokio::test]
    async fn test_without_feature_reports_solver_error() {
        let fleet = sample_fleet();
        let costs = costs();
        let problem = ProblemBuilder::new(&fleet, &costs)
            .build(&window(fleet.initial_states(), 15, 800.0))
            .unwrap();
        let result = MilpSolver::new().solve(&problem, &SolverSettings::default()).await;
        assert!(matches!(result, Err(CommitmentError::Solver(_))));
    }
}

#[cfg(all(test, feature = "optimization"))]
mod tests {
    use super::*;
    use crate::optimizer::{DynamicProgrammingSolver, StorageFormulation, UnitFormulation};

    fn unit(id: &str, cost: f64) -> UnitFormulation {
        UnitFormulation {
            unit_id: id.to_string(),
            reactivity: vec![1.2],
            max_power: vec![1000.0],
            min_power: vec![400.0],
            variable_cost: cost,
            start_cost: 2000.0,
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
            renewable: vec![100.0; periods],
            demand,
            units,
            storage: None,
            unserved_penalty: 9000.0,
            curtailment_penalty: 1.0,
        }
    }

    async fn solved(
        solver: &dyn CommitmentSolver,
        problem: &OptimizationProblem,
    ) -> crate::optimizer::Solution {
        match solver.solve(problem, &SolverSettings::default()).await.unwrap() {
            SolveOutcome::Solved(s) => s,
            other => panic!("expected a solution, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_milp_matches_dp_objective() {
        let p = problem(
            vec![600.0, 1500.0, 1800.0, 900.0, 300.0, 1200.0],
            vec![unit("a", 10.0), unit("b", 25.0)],
        );
        let milp = solved(&MilpSolver::new(), &p).await;
        let dp = solved(&DynamicProgrammingSolver::default(), &p).await;
        assert!((milp.objective - dp.objective).abs() <= 1e-3 * dp.objective.abs().max(1.0));
    }

    #[tokio::test]
    async fn test_milp_respects_carried_dead_time() {
        let mut u = unit("a", 10.0);
        u.initial_commit = true;
        u.forced_off_periods = 4;
        let p = problem(vec![900.0; 8], vec![u]);
        let s = solved(&MilpSolver::new(), &p).await;
        let a = &s.units["a"];
        assert!(a.commit[..4].iter().all(|&c| !c));
        assert!(a.generation[..4].iter().all(|&g| g.abs() < 1e-6));
        assert!(a.shut[0]);
        assert!(a.commit[4]);
    }

    #[tokio::test]
    async fn test_milp_generation_within_bounds() {
        let p = problem(vec![2500.0; 4], vec![unit("a", 10.0), unit("b", 12.0)]);
        let s = solved(&MilpSolver::new(), &p).await;
        for d in s.units.values() {
            for (t, g) in d.generation.iter().enumerate() {
                let cap = if d.commit[t] { 1000.0 } else { 0.0 };
                assert!(*g <= cap + 1e-6);
            }
        }
        assert!(s.unserved.iter().all(|&n| (n - 400.0).abs() < 1e-6));
    }

    #[tokio::test]
    async fn test_milp_honours_depletion_and_falling_capacity() {
        let mut u = unit("a", 10.0);
        u.initial_commit = true;
        u.depletion_period = Some(4);
        let mut p = problem(vec![1100.0; 6], vec![u]);
        p.units[0].max_power = vec![1000.0, 980.0, 960.0, 940.0, 920.0, 900.0];
        let s = solved(&MilpSolver::new(), &p).await;
        let a = &s.units["a"];
        for t in 0..4 {
            assert!(a.commit[t]);
            assert!((a.generation[t] - p.units[0].max_power[t]).abs() < 1e-6);
        }
        assert!(a.commit[4..].iter().all(|&c| !c));
    }

    #[tokio::test]
    async fn test_milp_respects_ramp_limits() {
        let mut u = unit("a", 10.0);
        u.ramp_up = Some(150.0);
        let p = problem(vec![1100.0; 5], vec![u]);
        let s = solved(&MilpSolver::new(), &p).await;
        let g = &s.units["a"].generation;
        assert!(g[0] <= 400.0 + 150.0 + 1e-6);
        for t in 1..5 {
            assert!(g[t] - g[t - 1] <= 150.0 + 1e-6);
        }
    }

    #[tokio::test]
    async fn test_milp_storage_never_charges_and_discharges_together() {
        let mut u = unit("a", 10.0);
        u.initial_commit = true;
        u.forced_on_periods = 4;
        let mut p = problem(vec![300.0, 300.0, 1200.0, 1200.0], vec![u]);
        let storage = StorageFormulation {
            storage_id: "phs".to_string(),
            power_mw: 100.0,
            energy_mwh: 400.0,
            efficiency: 0.84,
            hours_per_period: 1.0,
            initial_soc_mwh: 0.0,
        };
        p.storage = Some(storage.clone());
        let s = solved(&MilpSolver::new(), &p).await;
        let d = s.storage.as_ref().unwrap();
        let mut soc = 0.0;
        for t in 0..4 {
            assert!(d.charge[t] < 1e-6 || d.discharge[t] < 1e-6);
            soc = storage.next_soc(soc, d.charge[t], d.discharge[t]);
            assert!((soc - d.soc[t]).abs() < 1e-4);
        }
        assert!(d.discharge[2] > 1.0);
    }
}

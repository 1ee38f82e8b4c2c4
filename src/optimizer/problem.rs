//! Window problem formulation.
//!
//! [`ProblemBuilder::build`] is a pure function of the window (data slice and
//! carried-in states), the fleet and the cost settings. The resulting
//! [`OptimizationProblem`] is plain data that any [`super::CommitmentSolver`]
//! turns into its own model:
//!
//! - `GEN[u,t] ≤ max_power[u,t] · COMMIT[u,t]`, `GEN[u,t] ≥ min_power[u,t] · COMMIT[u,t]`
//! - `START[u,t] − SHUT[u,t] = COMMIT[u,t] − COMMIT[u,t−1]`, with
//!   `COMMIT[u,−1] = initial_commit[u]`
//! - `COMMIT[u,t] = 0` for `t < forced_off_periods[u]` (carried dead time)
//!   and for `t ≥ depletion_period[u]` (projected refuel)
//! - `COMMIT[u,t] = 1` for `t < forced_on_periods[u]` (carried minimum up time)
//! - `Σ SHUT[u,t−D+1..t] ≤ 1 − COMMIT[u,t]` (in-window dead time)
//! - `Σ START[u,t−U+1..t] ≤ COMMIT[u,t]` (in-window minimum up time)
//! - with `AUX[u,t] = GEN[u,t] − min_power[u,t] · COMMIT[u,t]`:
//!   `AUX[u,t] − AUX[u,t−1] ≤ ramp_up[u]` and `AUX[u,t−1] − AUX[u,t] ≤ ramp_down[u]`
//! - `SOC[t] = SOC[t−1] + h · (η · CHARGE[t] − DISCHARGE[t] / η)`, `SOC ≤ energy`,
//!   `CHARGE ≤ power · MODE[t]`, `DISCHARGE ≤ power · (1 − MODE[t])`
//! - `Σ GEN[·,t] + RENEW[t] + DISCHARGE[t] − CHARGE[t] + NSE[t] − SURPLUS[t] = demand[t]`
//!
//! Bounds are per period: reactivity is projected as if the unit ran flat out
//! from the window start, which can only understate the true reactivity, so
//! the bounds never exceed what the core can actually deliver.
//!
//! Curtailment (`renewable − RENEW + SURPLUS`) and unserved energy are
//! penalised slacks, so only the reactor restrictions can make a window
//! infeasible.

use serde::{Deserialize, Serialize};
use std::ops::Range;

use super::Solution;
use crate::config::CostConfig;
use crate::domain::{Fleet, StorageState, StorageUnit, TimeWindow};
use crate::error::CommitmentError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFormulation {
    pub unit_id: String,
    /// Worst-case reactivity at the start of each period.
    pub reactivity: Vec<f64>,
    pub max_power: Vec<f64>,
    pub min_power: Vec<f64>,
    pub variable_cost: f64,
    pub start_cost: f64,
    pub shut_cost: f64,
    pub initial_commit: bool,
    /// Output above minimum in the period before the window.
    pub initial_output_above_min: f64,
    pub forced_off_periods: usize,
    /// First period whose projected reactivity is at or below the refuel
    /// threshold; the unit is off from there to the window end.
    pub depletion_period: Option<usize>,
    pub forced_on_periods: usize,
    pub dead_time_periods: usize,
    pub min_up_periods: usize,
    pub ramp_up: Option<f64>,
    pub ramp_down: Option<f64>,
}

impl UnitFormulation {
    pub fn forced_off(&self, t: usize) -> bool {
        t < self.forced_off_periods || self.depletion_period.is_some_and(|d| t >= d)
    }

    pub fn forced_on(&self, t: usize) -> bool {
        t < self.forced_on_periods
    }

    pub fn is_ramp_limited(&self) -> bool {
        self.ramp_up.is_some() || self.ramp_down.is_some()
    }

    /// Effective GEN upper bound in period `t`.
    pub fn capacity_bound(&self, t: usize) -> f64 {
        if self.forced_off(t) {
            0.0
        } else {
            self.max_power[t]
        }
    }

    /// Whether moving output above minimum from `from` to `to` respects the
    /// ramp limits, with `slack` absolute tolerance.
    pub fn ramp_allows(&self, from: f64, to: f64, slack: f64) -> bool {
        self.ramp_up.map_or(true, |up| to - from <= up + slack)
            && self.ramp_down.map_or(true, |down| from - to <= down + slack)
    }
}

/// Storage plant as seen by one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageFormulation {
    pub storage_id: String,
    pub power_mw: f64,
    pub energy_mwh: f64,
    pub efficiency: f64,
    pub hours_per_period: f64,
    pub initial_soc_mwh: f64,
}

impl StorageFormulation {
    fn new(unit: &StorageUnit, state: &StorageState) -> Self {
        Self {
            storage_id: unit.id.clone(),
            power_mw: unit.power_mw,
            energy_mwh: unit.energy_mwh,
            efficiency: unit.efficiency,
            hours_per_period: unit.hours_per_period,
            initial_soc_mwh: state.soc_mwh,
        }
    }

    /// State of charge after one period of `charge` and `discharge`.
    pub fn next_soc(&self, soc: f64, charge: f64, discharge: f64) -> f64 {
        soc + (self.efficiency * charge - discharge / self.efficiency) * self.hours_per_period
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationProblem {
    pub window_index: usize,
    pub first_period: usize,
    pub committed_periods: usize,
    pub demand: Vec<f64>,
    pub renewable: Vec<f64>,
    pub units: Vec<UnitFormulation>,
    #[serde(default)]
    pub storage: Option<StorageFormulation>,
    pub unserved_penalty: f64,
    pub curtailment_penalty: f64,
}

impl OptimizationProblem {
    pub fn periods(&self) -> usize {
        self.demand.len()
    }

    pub fn validate(&self) -> Result<(), CommitmentError> {
        let invalid = |reason: String| {
            CommitmentError::Solver(format!("window {}: {}", self.window_index, reason))
        };
        let periods = self.periods();
        if periods == 0 {
            return Err(invalid("no periods".to_string()));
        }
        if self.renewable.len() != periods {
            return Err(invalid(format!(
                "{} demand periods vs {} renewable periods",
                periods,
                self.renewable.len()
            )));
        }
        if self.committed_periods == 0 || self.committed_periods > periods {
            return Err(invalid(format!(
                "{} committed periods out of {}",
                self.committed_periods, periods
            )));
        }
        for unit in &self.units {
            let id = &unit.unit_id;
            if unit.max_power.len() != periods
                || unit.min_power.len() != periods
                || unit.reactivity.len() != periods
            {
                return Err(invalid(format!("unit {} bounds do not cover the window", id)));
            }
            if (0..unit.forced_on_periods).any(|t| unit.forced_off(t)) {
                return Err(invalid(format!("unit {} is both forced on and forced off", id)));
            }
            if let Some(t) = (0..periods).find(|&t| unit.min_power[t] > unit.max_power[t]) {
                return Err(invalid(format!(
                    "unit {} min power {} above max power {} in period {}",
                    id, unit.min_power[t], unit.max_power[t], t
                )));
            }
            let ramps = [unit.ramp_up, unit.ramp_down];
            if ramps.iter().flatten().any(|r| !r.is_finite() || *r <= 0.0) {
                return Err(invalid(format!("unit {} has a non-positive ramp limit", id)));
            }
        }
        if let Some(s) = &self.storage {
            let positive = s.power_mw > 0.0 && s.energy_mwh > 0.0 && s.hours_per_period > 0.0;
            if !(positive && s.efficiency > 0.0 && s.efficiency <= 1.0) {
                return Err(invalid(format!("storage {} parameters out of range", s.storage_id)));
            }
            if !(0.0..=s.energy_mwh).contains(&s.initial_soc_mwh) {
                return Err(invalid(format!(
                    "storage {} initial charge {} outside [0, {}]",
                    s.storage_id, s.initial_soc_mwh, s.energy_mwh
                )));
            }
        }
        Ok(())
    }

    /// Objective contribution of `periods` under `solution`.
    pub fn cost_of(&self, solution: &Solution, periods: Range<usize>) -> f64 {
        let mut cost = 0.0;
        for t in periods {
            for unit in &self.units {
                let Some(d) = solution.units.get(&unit.unit_id) else {
                    continue;
                };
                cost += unit.variable_cost * d.generation[t];
                if d.start[t] {
                    cost += unit.start_cost;
                }
                if d.shut[t] {
                    cost += unit.shut_cost;
                }
            }
            cost += self.unserved_penalty * solution.unserved[t];
            cost += self.curtailment_penalty
                * (self.renewable[t] - solution.renewable_used[t] + solution.surplus[t]);
        }
        cost
    }
}

pub struct ProblemBuilder<'a> {
    fleet: &'a Fleet,
    costs: &'a CostConfig,
}

impl<'a> ProblemBuilder<'a> {
    pub fn new(fleet: &'a Fleet, costs: &'a CostConfig) -> Self {
        Self { fleet, costs }
    }

    pub fn build(&self, window: &TimeWindow) -> Result<OptimizationProblem, CommitmentError> {
        self.fleet.check_states(&window.carry_in)?;
        self.fleet.check_storage(window.storage_in.as_ref())?;
        let periods = window.total_periods();

        let units = self
            .fleet
            .units()
            .iter()
            .zip(&window.carry_in)
            .map(|(unit, state)| {
                let physics = &unit.physics;
                if physics.needs_refuel(state) {
                    return Err(CommitmentError::invalid_state(
                        &unit.id,
                        format!(
                            "reactivity {} at or below refuel threshold {} with no refuel triggered",
                            state.reactivity, physics.refuel_threshold
                        ),
                    ));
                }

                let reactivity = physics.projected_reactivity(state.reactivity, periods);
                let depletion_period = reactivity
                    .iter()
                    .position(|&r| r <= physics.refuel_threshold);
                // Shutdowns can happen no later than the last period the unit may
                // run, where projected reactivity is lowest and dead time longest.
                let last_online = depletion_period.unwrap_or(periods).saturating_sub(1);
                let dead_time_periods = physics.dead_time_for(reactivity[last_online]) as usize;

                let dead = state.dead_time_remaining as usize;
                let forced_on = if state.committed && dead == 0 {
                    unit.min_up_periods.saturating_sub(state.up_time) as usize
                } else {
                    0
                };
                // A forced shutdown at the seam is exempt from ramping down.
                let initial_output_above_min = if state.committed && dead == 0 {
                    state.output_above_min_mw
                } else {
                    0.0
                };

                Ok(UnitFormulation {
                    unit_id: unit.id.clone(),
                    max_power: reactivity.iter().map(|&r| unit.max_power(r)).collect(),
                    min_power: reactivity.iter().map(|&r| unit.min_power(r)).collect(),
                    reactivity,
                    variable_cost: unit.variable_cost_per_mwh,
                    start_cost: unit.start_cost,
                    shut_cost: unit.shut_cost,
                    initial_commit: state.committed,
                    initial_output_above_min,
                    forced_off_periods: dead.min(periods),
                    depletion_period,
                    forced_on_periods: forced_on
                        .min(periods)
                        .min(depletion_period.unwrap_or(periods)),
                    dead_time_periods,
                    min_up_periods: unit.min_up_periods as usize,
                    ramp_up: unit.ramp_up_mw,
                    ramp_down: unit.ramp_down_mw,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let storage = match (self.fleet.storage(), &window.storage_in) {
            (Some(unit), Some(state)) => Some(StorageFormulation::new(unit, state)),
            _ => None,
        };

        let problem = OptimizationProblem {
            window_index: window.index,
            first_period: window.first_period,
            committed_periods: window.committed_periods,
            demand: window.demand.clone(),
            renewable: window.renewable.clone(),
            units,
            storage,
            unserved_penalty: self.costs.unserved_energy_penalty,
            curtailment_penalty: self.costs.curtailment_penalty,
        };
        problem.validate()?;
        Ok(problem)
    }
}

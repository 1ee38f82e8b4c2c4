use tracing::{debug, info};

use crate::domain::{
    DecayBasis, Fleet, HorizonPlan, PeriodRecord, ReactorState, RefuelEvent, RenewableSource,
    StoragePeriod, StorageState, TimeWindow, UnitPeriod, WindowSummary,
};
use crate::error::CommitmentError;
use crate::optimizer::{OptimizationProblem, Solution, StorageDecisions, UnitDecisions};

/// Relative slack allowed on solver-reported bounds.
const TOLERANCE: f64 = 1e-6;

/// Everything one solved window contributes to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedWindow {
    pub carry_out: Vec<ReactorState>,
    pub storage_out: Option<StorageState>,
    pub records: Vec<PeriodRecord>,
    pub summary: WindowSummary,
}

/// Turns a window's solution into carry-out state and committed records.
///
/// Only the committed periods are read. Look-ahead decisions are discarded.
/// Unit state is replayed period by period, so a refuel lands in the period
/// whose operation takes reactivity to the threshold.
pub struct WindowResultProcessor<'a> {
    fleet: &'a Fleet,
    plan: &'a HorizonPlan,
}

/// Replay of one unit across the committed periods.
struct UnitReplay {
    state: ReactorState,
    /// Reactivity at the start of each committed period.
    reactivity: Vec<f64>,
    refuels: Vec<RefuelEvent>,
}

impl<'a> WindowResultProcessor<'a> {
    pub fn new(fleet: &'a Fleet, plan: &'a HorizonPlan) -> Self {
        Self { fleet, plan }
    }

    pub fn process(
        &self,
        window: &TimeWindow,
        problem: &OptimizationProblem,
        solution: &Solution,
        solver: &str,
        used_incumbent: bool,
    ) -> Result<ProcessedWindow, CommitmentError> {
        let committed = window.committed_periods;
        let decisions = self.extract(window, solution)?;
        self.check(window, problem, &decisions)?;
        let storage = self.check_storage(window, problem, solution)?;

        let mut carry_out = Vec::with_capacity(self.fleet.len());
        let mut replayed = Vec::with_capacity(self.fleet.len());
        let mut refuels = Vec::new();
        for (u, state) in window.carry_in.iter().enumerate() {
            let replay = self.replay(window, problem, u, state, decisions[u])?;
            debug!(
                unit = %replay.state.unit_id,
                reactivity = replay.state.reactivity,
                dead_time_remaining = replay.state.dead_time_remaining,
                committed = replay.state.committed,
                "carry-out state"
            );
            refuels.extend(replay.refuels);
            carry_out.push(replay.state);
            replayed.push(replay.reactivity);
        }

        let storage_out = match (&problem.storage, storage) {
            (Some(s), Some(d)) => Some(StorageState {
                storage_id: s.storage_id.clone(),
                soc_mwh: d.soc[committed - 1].clamp(0.0, s.energy_mwh),
            }),
            _ => None,
        };

        let records = (0..committed)
            .map(|t| PeriodRecord {
                period: window.first_period + t,
                demand: window.demand[t],
                renewable_available: window.renewable[t],
                renewable_used: solution.renewable_used[t],
                curtailment: window.renewable[t] - solution.renewable_used[t]
                    + solution.surplus[t],
                unserved: solution.unserved[t],
                units: problem
                    .units
                    .iter()
                    .zip(&decisions)
                    .zip(&replayed)
                    .map(|((unit, d), reactivity)| UnitPeriod {
                        unit_id: unit.unit_id.clone(),
                        commit: d.commit[t],
                        start: d.start[t],
                        shut: d.shut[t],
                        generation: d.generation[t],
                        max_power: unit.max_power[t],
                        reactivity: reactivity[t],
                    })
                    .collect(),
                renewable_sources: renewable_sources(window, t, solution.renewable_used[t]),
                storage: storage.map(|d| StoragePeriod {
                    charge: d.charge[t],
                    discharge: d.discharge[t],
                    soc: d.soc[t],
                }),
            })
            .collect();

        let summary = WindowSummary {
            window_index: window.index,
            first_period: window.first_period,
            committed_periods: committed,
            objective: solution.objective,
            committed_cost: problem.cost_of(solution, 0..committed),
            solver: solver.to_string(),
            used_incumbent,
            refuels,
        };

        Ok(ProcessedWindow {
            carry_out,
            storage_out,
            records,
            summary,
        })
    }

    /// Steps unit `u` through the committed periods: shutdown dead time,
    /// dead-time countdown, decay, cycle time, and a refuel as soon as
    /// reactivity reaches the threshold.
    fn replay(
        &self,
        window: &TimeWindow,
        problem: &OptimizationProblem,
        u: usize,
        carry_in: &ReactorState,
        d: &UnitDecisions,
    ) -> Result<UnitReplay, CommitmentError> {
        let unit = &self.fleet.units()[u];
        let formulation = &problem.units[u];
        let physics = &unit.physics;
        let committed = window.committed_periods;
        let mut next = carry_in.clone();
        let mut reactivity = Vec::with_capacity(committed);
        let mut refuels = Vec::new();

        for t in 0..committed {
            let on = d.commit[t];
            let period = window.first_period + t;
            let generation = d.generation[t].max(0.0);
            reactivity.push(next.reactivity);

            if on && (physics.needs_refuel(&next) || next.dead_time_remaining > 0) {
                return Err(CommitmentError::violation(
                    window.index,
                    format!(
                        "unit {} committed in period {} at reactivity {} with {} dead periods left",
                        unit.id, period, next.reactivity, next.dead_time_remaining
                    ),
                ));
            }
            let capacity = unit.max_power(next.reactivity);
            if on && generation > capacity + TOLERANCE * capacity.max(1.0) {
                return Err(CommitmentError::violation(
                    window.index,
                    format!(
                        "unit {} period {}: generation {} above capacity {} at reactivity {}",
                        unit.id, period, generation, capacity, next.reactivity
                    ),
                ));
            }

            if d.shut[t] {
                next.dead_time_remaining = next
                    .dead_time_remaining
                    .max(physics.dead_time_for(next.reactivity));
            }
            next = physics.advance_dead_time(&next, on)?;
            next.up_time = if on { next.up_time.saturating_add(1) } else { 0 };
            next.output_above_min_mw = if on {
                (generation - formulation.min_power[t]).max(0.0)
            } else {
                0.0
            };

            let burned = match (on, physics.decay_basis) {
                (false, _) => 0.0,
                (true, DecayBasis::OnlineTime) => 1.0,
                (true, DecayBasis::Burnup) => generation / unit.nominal_capacity_mw,
            };
            next.reactivity = physics.decay(&next, burned)?;
            next = physics.advance_cycle(&next, 1);

            let (after, refuelled) = physics.apply_refuel_if_triggered(&next)?;
            if refuelled {
                info!(
                    unit = %unit.id,
                    period,
                    day = self.plan.day_of(period),
                    "refuel triggered"
                );
                refuels.push(RefuelEvent {
                    unit_id: unit.id.clone(),
                    period,
                    day: self.plan.day_of(period),
                });
            }
            next = after;
        }
        next.committed = d.commit[committed - 1];

        Ok(UnitReplay {
            state: next,
            reactivity,
            refuels,
        })
    }

    /// Per-unit decisions in fleet order. Every trajectory needed for state
    /// propagation must cover the committed periods.
    fn extract<'s>(
        &self,
        window: &TimeWindow,
        solution: &'s Solution,
    ) -> Result<Vec<&'s UnitDecisions>, CommitmentError> {
        let committed = window.committed_periods;
        for (name, series) in [
            ("renewable_used", &solution.renewable_used),
            ("unserved", &solution.unserved),
            ("surplus", &solution.surplus),
        ] {
            if series.len() < committed {
                return Err(CommitmentError::incomplete(
                    window.index,
                    format!("{} has {} of {} committed periods", name, series.len(), committed),
                ));
            }
        }

        self.fleet
            .units()
            .iter()
            .map(|unit| {
                let d = solution.units.get(&unit.id).ok_or_else(|| {
                    CommitmentError::incomplete(
                        window.index,
                        format!("no decisions for unit {}", unit.id),
                    )
                })?;
                for (name, len) in [
                    ("COMMIT", d.commit.len()),
                    ("START", d.start.len()),
                    ("SHUT", d.shut.len()),
                    ("GEN", d.generation.len()),
                ] {
                    if len < committed {
                        return Err(CommitmentError::incomplete(
                            window.index,
                            format!(
                                "{} for unit {} has {} of {} committed periods",
                                name, unit.id, len, committed
                            ),
                        ));
                    }
                }
                Ok(d)
            })
            .collect()
    }

    fn check(
        &self,
        window: &TimeWindow,
        problem: &OptimizationProblem,
        decisions: &[&UnitDecisions],
    ) -> Result<(), CommitmentError> {
        for (unit, d) in problem.units.iter().zip(decisions) {
            let mut previous = unit.initial_commit;
            let mut previous_above_min = if unit.initial_commit {
                unit.initial_output_above_min
            } else {
                0.0
            };
            for t in 0..window.committed_periods {
                let on = d.commit[t];
                let period = window.first_period + t;
                let violation = |reason: String| {
                    CommitmentError::violation(
                        window.index,
                        format!("unit {} period {}: {}", unit.unit_id, period, reason),
                    )
                };
                if d.start[t] != (on && !previous) || d.shut[t] != (!on && previous) {
                    return Err(violation("START/SHUT disagree with COMMIT".to_string()));
                }
                if on && unit.forced_off(t) {
                    return Err(violation("committed while forced off".to_string()));
                }
                if !on && unit.forced_on(t) {
                    return Err(violation("off within its minimum up time".to_string()));
                }
                let gen = d.generation[t];
                let (floor, cap) = if on {
                    (unit.min_power[t], unit.max_power[t])
                } else {
                    (0.0, 0.0)
                };
                let slack = TOLERANCE * unit.max_power[t].max(1.0);
                if !gen.is_finite() || gen < floor - slack || gen > cap + slack {
                    return Err(violation(format!(
                        "generation {} outside [{}, {}]",
                        gen, floor, cap
                    )));
                }
                let above_min = if on { gen - unit.min_power[t] } else { 0.0 };
                if !unit.ramp_allows(previous_above_min, above_min, slack) {
                    return Err(violation(format!(
                        "output above minimum moves from {} to {} beyond its ramp limit",
                        previous_above_min, above_min
                    )));
                }
                previous = on;
                previous_above_min = above_min;
            }
        }
        Ok(())
    }

    /// Storage trajectories must exist exactly when the problem has storage,
    /// stay within power and energy limits and follow the charge balance.
    fn check_storage<'s>(
        &self,
        window: &TimeWindow,
        problem: &OptimizationProblem,
        solution: &'s Solution,
    ) -> Result<Option<&'s StorageDecisions>, CommitmentError> {
        let Some(s) = &problem.storage else {
            return Ok(None);
        };
        let committed = window.committed_periods;
        let d = solution.storage.as_ref().ok_or_else(|| {
            CommitmentError::incomplete(window.index, format!("no decisions for storage {}", s.storage_id))
        })?;
        for (name, len) in [
            ("CHARGE", d.charge.len()),
            ("DISCHARGE", d.discharge.len()),
            ("SOC", d.soc.len()),
        ] {
            if len < committed {
                return Err(CommitmentError::incomplete(
                    window.index,
                    format!("{} has {} of {} committed periods", name, len, committed),
                ));
            }
        }

        let power_slack = TOLERANCE * s.power_mw.max(1.0);
        let energy_slack = TOLERANCE * s.energy_mwh.max(1.0);
        let mut soc = s.initial_soc_mwh;
        for t in 0..committed {
            let (charge, discharge) = (d.charge[t], d.discharge[t]);
            let period = window.first_period + t;
            let within = |v: f64| v.is_finite() && v >= -power_slack && v <= s.power_mw + power_slack;
            if !within(charge) || !within(discharge) || (charge > power_slack && discharge > power_slack)
            {
                return Err(CommitmentError::violation(
                    window.index,
                    format!(
                        "storage {} period {}: charge {} and discharge {} break its power limits",
                        s.storage_id, period, charge, discharge
                    ),
                ));
            }
            soc = s.next_soc(soc, charge, discharge);
            let reported = d.soc[t];
            if !reported.is_finite()
                || (reported - soc).abs() > energy_slack
                || reported < -energy_slack
                || reported > s.energy_mwh + energy_slack
            {
                return Err(CommitmentError::violation(
                    window.index,
                    format!(
                        "storage {} period {}: state of charge {} disagrees with {} from the flows",
                        s.storage_id, period, reported, soc
                    ),
                ));
            }
            soc = reported;
        }
        Ok(Some(d))
    }
}

/// Splits the dispatched renewable total across sources pro rata to
/// availability.
fn renewable_sources(window: &TimeWindow, t: usize, used_total: f64) -> Vec<RenewableSource> {
    let available_total = window.renewable[t];
    window
        .renewable_sources
        .iter()
        .map(|(source, series)| {
            let available = series[t];
            let used = if available_total > 0.0 {
                used_total * available / available_total
            } else {
                0.0
            };
            RenewableSource {
                source: source.clone(),
                available,
                used,
                curtailed: available - used,
            }
        })
        .collect()
}

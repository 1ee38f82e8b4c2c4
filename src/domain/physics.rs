//! Reactor physics: reactivity decline, reactivity-limited capacity,
//! refuelling and post-shutdown dead time.
//!
//! All operations take a [`ReactorState`] by reference and hand back a new
//! value. Nothing here mutates the canonical fleet state; that belongs to the
//! scheduler.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ReactorState;
use crate::config::PhysicsConfig;
use crate::error::CommitmentError;

/// What drives reactivity decline while a unit is online.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DecayBasis {
    /// Every online period burns one period worth of reactivity.
    #[default]
    OnlineTime,
    /// Online periods are weighted by output: `Σ GEN / nominal` equivalent
    /// full-power periods.
    Burnup,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub reactivity: f64,
    pub power_fraction: f64,
}

/// Reference reactivity vs. deliverable power fraction curve.
///
/// Piecewise linear between points, flat beyond the first and last point.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityCurve {
    points: Vec<CurvePoint>,
}

impl CapacityCurve {
    pub fn new(mut points: Vec<CurvePoint>) -> Result<Self, String> {
        if points.is_empty() {
            return Err("capacity curve needs at least one point".to_string());
        }
        if points
            .iter()
            .any(|p| !p.reactivity.is_finite() || !p.power_fraction.is_finite())
        {
            return Err("capacity curve contains non-finite values".to_string());
        }
        if points
            .iter()
            .any(|p| p.power_fraction <= 0.0 || p.power_fraction > 1.0)
        {
            return Err("capacity curve power fractions must lie in (0, 1]".to_string());
        }
        points.sort_by(|a, b| a.reactivity.total_cmp(&b.reactivity));
        for pair in points.windows(2) {
            if pair[1].reactivity <= pair[0].reactivity {
                return Err(format!(
                    "capacity curve has duplicate reactivity {}",
                    pair[0].reactivity
                ));
            }
            if pair[1].power_fraction < pair[0].power_fraction {
                return Err(format!(
                    "capacity curve must be non-decreasing in reactivity (at {})",
                    pair[1].reactivity
                ));
            }
        }
        Ok(Self { points })
    }

    pub fn power_fraction(&self, reactivity: f64) -> f64 {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        if reactivity <= first.reactivity {
            return first.power_fraction;
        }
        if reactivity >= last.reactivity {
            return last.power_fraction;
        }
        for pair in self.points.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if reactivity <= hi.reactivity {
                let w = (reactivity - lo.reactivity) / (hi.reactivity - lo.reactivity);
                return lo.power_fraction + w * (hi.power_fraction - lo.power_fraction);
            }
        }
        last.power_fraction
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeadTimePoint {
    /// Reactivity at or above which this dead time applies.
    pub reactivity: ordered_float::OrderedFloat<f64>,
    pub periods: u32,
}

/// Post-shutdown dead time as a step function of reactivity.
///
/// Lower reactivity leaves less margin to override xenon poisoning after a
/// shutdown, so dead time must not shrink as reactivity falls.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadTimeTable {
    points: Vec<DeadTimePoint>,
    default_periods: u32,
}

impl DeadTimeTable {
    pub fn new(mut points: Vec<DeadTimePoint>, default_periods: u32) -> Result<Self, String> {
        if points.iter().any(|p| !p.reactivity.0.is_finite()) {
            return Err("dead-time table contains non-finite reactivity".to_string());
        }
        points.sort();
        for pair in points.windows(2) {
            if pair[1].reactivity == pair[0].reactivity {
                return Err(format!(
                    "dead-time table has duplicate reactivity {}",
                    pair[0].reactivity
                ));
            }
            if pair[1].periods > pair[0].periods {
                return Err(format!(
                    "dead time must not grow with reactivity (at {})",
                    pair[1].reactivity
                ));
            }
        }
        Ok(Self {
            points,
            default_periods,
        })
    }

    /// Largest tabulated reactivity not above `reactivity`; below the table
    /// the most restrictive entry applies.
    pub fn lookup(&self, reactivity: f64) -> u32 {
        let Some(first) = self.points.first() else {
            return self.default_periods;
        };
        self.points
            .iter()
            .rev()
            .find(|p| p.reactivity.0 <= reactivity)
            .unwrap_or(first)
            .periods
    }
}

/// Physics parameters and update rules for one reactor type.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactorPhysics {
    pub nominal_reactivity: f64,
    pub refuel_threshold: f64,
    pub refuel_outage_periods: u32,
    pub decay_per_day: f64,
    pub decay_basis: DecayBasis,
    pub periods_per_day: u32,
    capacity_curve: CapacityCurve,
    dead_time_table: DeadTimeTable,
}

impl ReactorPhysics {
    pub fn new(config: &PhysicsConfig, periods_per_day: u32) -> Result<Self, CommitmentError> {
        if periods_per_day == 0 {
            return Err(CommitmentError::Config(
                "periods_per_day must be positive".to_string(),
            ));
        }
        if !(config.refuel_threshold >= 0.0 && config.refuel_threshold < config.nominal_reactivity)
        {
            return Err(CommitmentError::Config(format!(
                "refuel threshold {} must lie in [0, nominal reactivity {})",
                config.refuel_threshold, config.nominal_reactivity
            )));
        }
        if !config.decay_per_day.is_finite() || config.decay_per_day <= 0.0 {
            return Err(CommitmentError::Config(format!(
                "decay_per_day {} must be a positive number",
                config.decay_per_day
            )));
        }
        let capacity_curve =
            CapacityCurve::new(config.capacity_curve.clone()).map_err(CommitmentError::Config)?;
        let dead_time_table = DeadTimeTable::new(
            config.dead_time_table.clone(),
            config.default_dead_time_periods,
        )
        .map_err(CommitmentError::Config)?;

        Ok(Self {
            nominal_reactivity: config.nominal_reactivity,
            refuel_threshold: config.refuel_threshold,
            refuel_outage_periods: config.refuel_outage_periods,
            decay_per_day: config.decay_per_day,
            decay_basis: config.decay_basis,
            periods_per_day,
            capacity_curve,
            dead_time_table,
        })
    }

    /// Rejects corrupted state. Values are never clamped here.
    pub fn validate(&self, state: &ReactorState) -> Result<(), CommitmentError> {
        let r = state.reactivity;
        if !r.is_finite() || r < 0.0 || r > self.nominal_reactivity {
            return Err(CommitmentError::invalid_state(
                &state.unit_id,
                format!(
                    "reactivity {} outside [0, {}]",
                    r, self.nominal_reactivity
                ),
            ));
        }
        if !state.output_above_min_mw.is_finite() || state.output_above_min_mw < 0.0 {
            return Err(CommitmentError::invalid_state(
                &state.unit_id,
                format!(
                    "output above minimum {} is not a non-negative number",
                    state.output_above_min_mw
                ),
            ));
        }
        let expected_day = state.periods_since_refuel / u64::from(self.periods_per_day);
        if u64::from(state.cycle_day) != expected_day {
            return Err(CommitmentError::invalid_state(
                &state.unit_id,
                format!(
                    "cycle day {} disagrees with {} periods since refuel",
                    state.cycle_day, state.periods_since_refuel
                ),
            ));
        }
        Ok(())
    }

    pub fn decay_per_period(&self) -> f64 {
        self.decay_per_day / f64::from(self.periods_per_day)
    }

    /// Reactivity after `online_periods` (equivalent) periods online.
    ///
    /// Linear in online time since the state's last refuel and never
    /// increasing. `online_periods` is fractional under [`DecayBasis::Burnup`].
    pub fn decay(&self, state: &ReactorState, online_periods: f64) -> Result<f64, CommitmentError> {
        self.validate(state)?;
        if !online_periods.is_finite() || online_periods < 0.0 {
            return Err(CommitmentError::invalid_state(
                &state.unit_id,
                format!("online period count {} is not a non-negative number", online_periods),
            ));
        }
        Ok((state.reactivity - self.decay_per_period() * online_periods).max(0.0))
    }

    /// Lowest reactivity the unit can have at the start of each of the next
    /// `periods` periods: the decline it would see running flat out from now.
    /// Burn-up never declines faster than online time at full power, so this
    /// bounds both bases from below.
    pub fn projected_reactivity(&self, reactivity: f64, periods: usize) -> Vec<f64> {
        let per_period = self.decay_per_period();
        (0..periods)
            .map(|t| (reactivity - per_period * t as f64).max(0.0))
            .collect()
    }

    /// Deliverable fraction of nominal power at this reactivity.
    pub fn capacity_from_reactivity(&self, reactivity: f64) -> f64 {
        self.capacity_curve.power_fraction(reactivity)
    }

    pub fn dead_time_for(&self, reactivity: f64) -> u32 {
        self.dead_time_table.lookup(reactivity)
    }

    pub fn needs_refuel(&self, state: &ReactorState) -> bool {
        state.reactivity <= self.refuel_threshold
    }

    /// Resets a depleted core: nominal reactivity, cycle day zero, and the
    /// refuel outage folded into the dead time. `committed` is left alone so
    /// the next window sees the real seam and books the shutdown.
    pub fn apply_refuel_if_triggered(
        &self,
        state: &ReactorState,
    ) -> Result<(ReactorState, bool), CommitmentError> {
        self.validate(state)?;
        if !self.needs_refuel(state) {
            return Ok((state.clone(), false));
        }

        let mut next = state.clone();
        next.reactivity = self.nominal_reactivity;
        next.cycle_day = 0;
        next.periods_since_refuel = 0;
        next.dead_time_remaining = next.dead_time_remaining.max(self.refuel_outage_periods);
        next.up_time = 0;
        next.refuel_count += 1;
        debug!(
            unit = %state.unit_id,
            depleted_reactivity = state.reactivity,
            outage_periods = self.refuel_outage_periods,
            "refuel triggered"
        );
        Ok((next, true))
    }

    /// One period of dead-time countdown. Online periods leave it untouched.
    pub fn advance_dead_time(
        &self,
        state: &ReactorState,
        was_online: bool,
    ) -> Result<ReactorState, CommitmentError> {
        self.validate(state)?;
        let mut next = state.clone();
        if !was_online {
            next.dead_time_remaining = next.dead_time_remaining.saturating_sub(1);
        }
        Ok(next)
    }

    /// Calendar time since refuel moves on whether the unit runs or not.
    pub fn advance_cycle(&self, state: &ReactorState, periods: u64) -> ReactorState {
        let mut next = state.clone();
        next.periods_since_refuel += periods;
        next.cycle_day = u32::try_from(next.periods_since_refuel / u64::from(self.periods_per_day))
            .unwrap_or(u32::MAX);
        next
    }
}

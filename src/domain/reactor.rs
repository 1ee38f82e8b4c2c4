use serde::{Deserialize, Serialize};

use super::{ReactorPhysics, StorageState, StorageUnit};
use crate::config::{Config, UnitConfig};
use crate::error::CommitmentError;

/// Physical state of one reactor unit at a window seam.
///
/// This is the whole carry-over between windows: the next problem is a pure
/// function of this, the window's data slice and configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactorState {
    pub unit_id: String,
    /// kinf proxy; falls while online, frozen while offline.
    pub reactivity: f64,
    pub cycle_day: u32,
    pub dead_time_remaining: u32,
    /// COMMIT at the last committed period of the previous window.
    pub committed: bool,
    #[serde(default)]
    pub periods_since_refuel: u64,
    /// Consecutive online periods ending at the seam.
    #[serde(default)]
    pub up_time: u32,
    #[serde(default)]
    pub refuel_count: u32,
    /// GEN above minimum power in the last committed period; zero when off.
    /// Ramp limits apply to changes of this quantity.
    #[serde(default)]
    pub output_above_min_mw: f64,
}

impl ReactorState {
    /// Offline unit at the start of a cycle.
    pub fn fresh(unit_id: impl Into<String>, reactivity: f64) -> Self {
        Self {
            unit_id: unit_id.into(),
            reactivity,
            cycle_day: 0,
            dead_time_remaining: 0,
            committed: false,
            periods_since_refuel: 0,
            up_time: 0,
            refuel_count: 0,
            output_above_min_mw: 0.0,
        }
    }
}

/// Static description of a reactor unit plus its physics.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactorUnit {
    pub id: String,
    pub reactor_type: String,
    pub nominal_capacity_mw: f64,
    pub min_power_fraction: f64,
    pub variable_cost_per_mwh: f64,
    /// Cost of one start, already scaled by nominal capacity.
    pub start_cost: f64,
    pub shut_cost: f64,
    pub min_up_periods: u32,
    /// Per-period limit on raising output above minimum power, MW.
    pub ramp_up_mw: Option<f64>,
    pub ramp_down_mw: Option<f64>,
    pub physics: ReactorPhysics,
    initial: ReactorState,
}

impl ReactorUnit {
    pub fn from_config(
        unit: &UnitConfig,
        physics: ReactorPhysics,
    ) -> Result<Self, CommitmentError> {
        let reactivity = unit
            .initial_reactivity
            .unwrap_or(physics.nominal_reactivity);
        let periods_since_refuel =
            u64::from(unit.initial_cycle_day) * u64::from(physics.periods_per_day);
        // A unit online at the start of the study runs at full output.
        let full_output = unit.nominal_capacity_mw * physics.capacity_from_reactivity(reactivity);
        let output_above_min_mw = if unit.initial_committed {
            (full_output - unit.nominal_capacity_mw * unit.min_power_fraction).max(0.0)
        } else {
            0.0
        };
        let initial = ReactorState {
            unit_id: unit.id.clone(),
            reactivity,
            cycle_day: unit.initial_cycle_day,
            dead_time_remaining: unit.initial_dead_time,
            committed: unit.initial_committed,
            periods_since_refuel,
            up_time: if unit.initial_committed {
                unit.min_up_periods
            } else {
                0
            },
            refuel_count: 0,
            output_above_min_mw,
        };
        physics.validate(&initial)?;

        Ok(Self {
            id: unit.id.clone(),
            reactor_type: unit.reactor_type.clone(),
            nominal_capacity_mw: unit.nominal_capacity_mw,
            min_power_fraction: unit.min_power_fraction,
            variable_cost_per_mwh: unit.variable_cost_per_mwh,
            start_cost: unit.start_cost_per_mw * unit.nominal_capacity_mw,
            shut_cost: unit.shut_cost_per_mw * unit.nominal_capacity_mw,
            min_up_periods: unit.min_up_periods,
            ramp_up_mw: unit.ramp_up_fraction.map(|f| f * unit.nominal_capacity_mw),
            ramp_down_mw: unit.ramp_down_fraction.map(|f| f * unit.nominal_capacity_mw),
            physics,
            initial,
        })
    }

    pub fn initial_state(&self) -> ReactorState {
        self.initial.clone()
    }

    /// Upper bound on GEN at this reactivity.
    pub fn max_power(&self, reactivity: f64) -> f64 {
        self.nominal_capacity_mw * self.physics.capacity_from_reactivity(reactivity)
    }

    /// Minimum stable output when committed, never above `max_power`.
    pub fn min_power(&self, reactivity: f64) -> f64 {
        (self.nominal_capacity_mw * self.min_power_fraction).min(self.max_power(reactivity))
    }

    pub fn is_ramp_limited(&self) -> bool {
        self.ramp_up_mw.is_some() || self.ramp_down_mw.is_some()
    }
}

/// The reactor units of one scenario, in configuration order, plus the
/// optional storage plant they share the system with.
#[derive(Debug, Clone, PartialEq)]
pub struct Fleet {
    units: Vec<ReactorUnit>,
    storage: Option<StorageUnit>,
}

impl Fleet {
    pub fn from_config(config: &Config) -> Result<Self, CommitmentError> {
        let periods_per_day = config.horizon.periods_per_day;
        let units = config
            .units
            .iter()
            .map(|unit| {
                let physics_config = config.physics.get(&unit.reactor_type).ok_or_else(|| {
                    CommitmentError::Config(format!(
                        "unit {} references unknown reactor type {}",
                        unit.id, unit.reactor_type
                    ))
                })?;
                let physics = ReactorPhysics::new(physics_config, periods_per_day)?;
                ReactorUnit::from_config(unit, physics)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let storage = config
            .storage
            .as_ref()
            .map(|s| StorageUnit::from_config(s, periods_per_day))
            .transpose()?;
        Ok(Self { units, storage })
    }

    pub fn new(units: Vec<ReactorUnit>) -> Self {
        Self {
            units,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: StorageUnit) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn units(&self) -> &[ReactorUnit] {
        &self.units
    }

    pub fn storage(&self) -> Option<&StorageUnit> {
        self.storage.as_ref()
    }

    pub fn initial_storage_state(&self) -> Option<StorageState> {
        self.storage.as_ref().map(StorageUnit::initial_state)
    }

    /// Storage state must be present exactly when the fleet has storage.
    pub fn check_storage(&self, state: Option<&StorageState>) -> Result<(), CommitmentError> {
        match (&self.storage, state) {
            (None, None) => Ok(()),
            (Some(unit), Some(state)) => unit.validate(state),
            (Some(unit), None) => Err(CommitmentError::invalid_state(
                &unit.id,
                "missing storage state",
            )),
            (None, Some(state)) => Err(CommitmentError::invalid_state(
                &state.storage_id,
                "storage state for a fleet without storage",
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn initial_states(&self) -> Vec<ReactorState> {
        self.units.iter().map(ReactorUnit::initial_state).collect()
    }

    /// Checks that `states` line up one-to-one with the fleet and are valid.
    pub fn check_states(&self, states: &[ReactorState]) -> Result<(), CommitmentError> {
        if states.len() != self.units.len() {
            return Err(CommitmentError::invalid_state(
                "fleet",
                format!(
                    "{} reactor states for {} units",
                    states.len(),
                    self.units.len()
                ),
            ));
        }
        for (unit, state) in self.units.iter().zip(states) {
            if unit.id != state.unit_id {
                return Err(CommitmentError::invalid_state(
                    &state.unit_id,
                    format!("state is out of order, expected unit {}", unit.id),
                ));
            }
            unit.physics.validate(state)?;
        }
        Ok(())
    }
}

//! Energy storage shared by the fleet (pumped hydro in the reference system).
//!
//! State of charge moves by `efficiency * CHARGE - DISCHARGE / efficiency`
//! energy per hour; the round trip therefore loses `1 - efficiency²`.

use serde::{Deserialize, Serialize};

use crate::config::StorageConfig;
use crate::error::CommitmentError;

/// Storage carry-over between windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageState {
    pub storage_id: String,
    /// Stored energy at the seam, MWh.
    pub soc_mwh: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StorageUnit {
    pub id: String,
    pub power_mw: f64,
    pub energy_mwh: f64,
    pub efficiency: f64,
    pub hours_per_period: f64,
    initial_soc_mwh: f64,
}

impl StorageUnit {
    pub fn from_config(config: &StorageConfig, periods_per_day: u32) -> Result<Self, CommitmentError> {
        if periods_per_day == 0 {
            return Err(CommitmentError::Config(
                "periods_per_day must be positive".to_string(),
            ));
        }
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(config.power_mw) || !positive(config.duration_hours) {
            return Err(CommitmentError::Config(format!(
                "storage {}: power and duration must be positive",
                config.id
            )));
        }
        if !(positive(config.efficiency) && config.efficiency <= 1.0) {
            return Err(CommitmentError::Config(format!(
                "storage {}: efficiency {} outside (0, 1]",
                config.id, config.efficiency
            )));
        }
        if !(0.0..=1.0).contains(&config.initial_soc_fraction) {
            return Err(CommitmentError::Config(format!(
                "storage {}: initial_soc_fraction {} outside [0, 1]",
                config.id, config.initial_soc_fraction
            )));
        }
        let energy_mwh = config.power_mw * config.duration_hours;
        Ok(Self {
            id: config.id.clone(),
            power_mw: config.power_mw,
            energy_mwh,
            efficiency: config.efficiency,
            hours_per_period: 24.0 / f64::from(periods_per_day),
            initial_soc_mwh: energy_mwh * config.initial_soc_fraction,
        })
    }

    pub fn initial_state(&self) -> StorageState {
        StorageState {
            storage_id: self.id.clone(),
            soc_mwh: self.initial_soc_mwh,
        }
    }

    /// State of charge after one period of `charge_mw` and `discharge_mw`.
    pub fn next_soc(&self, soc_mwh: f64, charge_mw: f64, discharge_mw: f64) -> f64 {
        soc_mwh
            + (self.efficiency * charge_mw - discharge_mw / self.efficiency) * self.hours_per_period
    }

    pub fn validate(&self, state: &StorageState) -> Result<(), CommitmentError> {
        if state.storage_id != self.id {
            return Err(CommitmentError::invalid_state(
                &state.storage_id,
                format!("state belongs to storage {}, expected {}", state.storage_id, self.id),
            ));
        }
        if !state.soc_mwh.is_finite() || state.soc_mwh < 0.0 || state.soc_mwh > self.energy_mwh {
            return Err(CommitmentError::invalid_state(
                &self.id,
                format!(
                    "state of charge {} outside [0, {}]",
                    state.soc_mwh, self.energy_mwh
                ),
            ));
        }
        Ok(())
    }
}

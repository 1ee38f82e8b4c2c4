use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use validator::Validate;

use crate::domain::{CurvePoint, DeadTimePoint, DecayBasis, ReactorPhysics};
use crate::error::CommitmentError;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub run: RunConfig,
    #[validate(nested)]
    pub horizon: HorizonConfig,
    #[validate(nested)]
    pub solver: SolverConfig,
    #[validate(nested)]
    pub costs: CostConfig,
    #[serde(default)]
    pub data: DataConfig,
    pub physics: BTreeMap<String, PhysicsConfig>,
    #[validate(length(min = 1), nested)]
    pub units: Vec<UnitConfig>,
    #[serde(default)]
    #[validate(nested)]
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RunConfig {
    #[validate(length(min = 1))]
    pub name: String,
    pub checkpoint_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct HorizonConfig {
    pub start_day: u32,
    pub end_day: u32,
    #[validate(range(min = 1))]
    pub periods_per_day: u32,
    /// Periods committed per window.
    #[validate(range(min = 1))]
    pub window_periods: u32,
    /// Look-ahead periods solved but not committed.
    #[serde(default)]
    pub overlap_periods: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SolverBackend {
    Milp,
    #[default]
    Dp,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct SolverConfig {
    #[serde(default)]
    pub backend: SolverBackend,
    #[serde(default)]
    pub fallback: Option<SolverBackend>,
    #[validate(range(min = 0.001))]
    pub time_limit_seconds: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default = "default_relative_gap")]
    pub relative_gap: f64,
    #[serde(default)]
    pub seed: u64,
    #[validate(range(min = 1))]
    #[serde(default = "default_threads")]
    pub threads: u32,
    /// DP layer width above which a window is reported as timed out.
    #[validate(range(min = 1))]
    #[serde(default = "default_dp_max_states")]
    pub dp_max_states: usize,
    /// DP output grid for ramp-limited units: steps between min and max power.
    #[validate(range(min = 1, max = 1000))]
    #[serde(default = "default_dp_generation_levels")]
    pub dp_generation_levels: u16,
    /// DP state-of-charge grid: steps between empty and full storage.
    #[validate(range(min = 1, max = 10000))]
    #[serde(default = "default_dp_storage_levels")]
    pub dp_storage_levels: usize,
}

fn default_dp_max_states() -> usize {
    200_000
}

fn default_dp_generation_levels() -> u16 {
    10
}

fn default_dp_storage_levels() -> usize {
    20
}

fn default_relative_gap() -> f64 {
    1e-4
}

fn default_threads() -> u32 {
    1
}

impl SolverConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.time_limit_seconds)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CostConfig {
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub curtailment_penalty: f64,
    #[validate(range(min = 0.0))]
    #[serde(default = "default_unserved_penalty")]
    pub unserved_energy_penalty: f64,
}

fn default_unserved_penalty() -> f64 {
    9000.0
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DataConfig {
    /// CSV with a `period` column, a `demand_mw` column and one
    /// `<source>_mw` availability column per renewable source.
    #[serde(default)]
    pub profile_csv: Option<PathBuf>,
    #[serde(default)]
    pub flat: Option<FlatProfileConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlatProfileConfig {
    pub demand_mw: f64,
    /// Availability of a single source named `renewable`.
    #[serde(default)]
    pub renewable_mw: f64,
    /// Availability per named source, e.g. `{ wind = 120.0, solar = 30.0 }`.
    #[serde(default)]
    pub renewables: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct PhysicsConfig {
    #[validate(range(min = 0.0))]
    pub nominal_reactivity: f64,
    #[validate(range(min = 0.0))]
    pub refuel_threshold: f64,
    pub refuel_outage_periods: u32,
    #[validate(range(exclusive_min = 0.0))]
    pub decay_per_day: f64,
    #[serde(default)]
    pub decay_basis: DecayBasis,
    #[validate(length(min = 1))]
    pub capacity_curve: Vec<CurvePoint>,
    #[serde(default)]
    pub dead_time_table: Vec<DeadTimePoint>,
    #[serde(default = "default_dead_time_periods")]
    pub default_dead_time_periods: u32,
}

fn default_dead_time_periods() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct UnitConfig {
    #[validate(length(min = 1))]
    pub id: String,
    pub reactor_type: String,
    #[validate(range(exclusive_min = 0.0))]
    pub nominal_capacity_mw: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub min_power_fraction: f64,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub variable_cost_per_mwh: f64,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub start_cost_per_mw: f64,
    #[validate(range(min = 0.0))]
    #[serde(default)]
    pub shut_cost_per_mw: f64,
    #[serde(default)]
    pub min_up_periods: u32,
    /// Largest per-period increase of output above minimum power, as a
    /// fraction of nominal capacity. Unlimited when absent.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    #[serde(default)]
    pub ramp_up_fraction: Option<f64>,
    /// Largest per-period decrease of output above minimum power.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    #[serde(default)]
    pub ramp_down_fraction: Option<f64>,
    #[serde(default)]
    pub initial_reactivity: Option<f64>,
    #[serde(default)]
    pub initial_cycle_day: u32,
    #[serde(default)]
    pub initial_committed: bool,
    #[serde(default)]
    pub initial_dead_time: u32,
}

/// Pumped-hydro style storage shared by the whole fleet.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct StorageConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_storage_id")]
    pub id: String,
    /// Charge and discharge limit.
    #[validate(range(exclusive_min = 0.0))]
    pub power_mw: f64,
    /// Hours at full discharge from full; energy capacity is `power_mw * duration_hours`.
    #[validate(range(exclusive_min = 0.0))]
    pub duration_hours: f64,
    /// One-way efficiency applied to both charging and discharging.
    #[validate(range(exclusive_min = 0.0, max = 1.0))]
    #[serde(default = "default_storage_efficiency")]
    pub efficiency: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    #[serde(default)]
    pub initial_soc_fraction: f64,
}

fn default_storage_id() -> String {
    "storage".to_string()
}

fn default_storage_efficiency() -> f64 {
    0.84
}

impl Config {
    /// TOML file (default `config/default.toml`) overridden by `UC__*`
    /// environment variables, e.g. `UC__SOLVER__TIME_LIMIT_SECONDS=60`.
    pub fn load(path: Option<&Path>) -> Result<Self, CommitmentError> {
        let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("UC__").split("__"));
        Self::from_figment(figment)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, CommitmentError> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, CommitmentError> {
        let config: Config = figment.extract()?;
        config.validate()?;
        config.validate_semantics()?;
        Ok(config)
    }

    /// Cross-field rules the derive attributes cannot express.
    pub fn validate_semantics(&self) -> Result<(), CommitmentError> {
        if self.horizon.end_day <= self.horizon.start_day {
            return Err(CommitmentError::Config(format!(
                "horizon.end_day {} must be after start_day {}",
                self.horizon.end_day, self.horizon.start_day
            )));
        }
        for (name, physics) in &self.physics {
            physics.validate().map_err(|e| {
                CommitmentError::Config(format!("physics.{}: {}", name, e))
            })?;
            if physics.refuel_threshold >= physics.nominal_reactivity {
                return Err(CommitmentError::Config(format!(
                    "physics.{}: refuel_threshold must be below nominal_reactivity",
                    name
                )));
            }
            ReactorPhysics::new(physics, self.horizon.periods_per_day)?;
        }
        let mut seen = std::collections::BTreeSet::new();
        for unit in &self.units {
            if !seen.insert(unit.id.as_str()) {
                return Err(CommitmentError::Config(format!(
                    "duplicate unit id {}",
                    unit.id
                )));
            }
            if !self.physics.contains_key(&unit.reactor_type) {
                return Err(CommitmentError::Config(format!(
                    "unit {} references unknown reactor type {}",
                    unit.id, unit.reactor_type
                )));
            }
        }
        if self.data.profile_csv.is_none() && self.data.flat.is_none() {
            return Err(CommitmentError::Config(
                "data.profile_csv or data.flat must be set".to_string(),
            ));
        }
        if let Some(flat) = &self.data.flat {
            let values = std::iter::once(flat.demand_mw)
                .chain(std::iter::once(flat.renewable_mw))
                .chain(flat.renewables.values().copied());
            if values.into_iter().any(|v| !v.is_finite() || v < 0.0) {
                return Err(CommitmentError::Config(
                    "data.flat values must be finite and non-negative".to_string(),
                ));
            }
        }
        if self.solver.fallback == Some(self.solver.backend) {
            return Err(CommitmentError::Config(
                "solver.fallback must differ from solver.backend".to_string(),
            ));
        }
        Ok(())
    }
}

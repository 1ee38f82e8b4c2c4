use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

use super::{ReactorState, StorageState};
use crate::config::HorizonConfig;
use crate::error::CommitmentError;
use crate::forecast::ExogenousProfile;

/// Tiling of the planning horizon into rolling windows.
///
/// Window `n` commits periods `[first + n*step, first + (n+1)*step)` and may
/// look ahead `overlap` further periods. Look-ahead periods shape the
/// decisions but are never written to the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HorizonPlan {
    pub first_period: usize,
    pub end_period: usize,
    pub step: usize,
    pub overlap: usize,
    pub periods_per_day: u32,
}

impl HorizonPlan {
    pub fn from_config(horizon: &HorizonConfig) -> Result<Self, CommitmentError> {
        if horizon.end_day <= horizon.start_day {
            return Err(CommitmentError::Config(format!(
                "horizon end day {} must be after start day {}",
                horizon.end_day, horizon.start_day
            )));
        }
        if horizon.window_periods == 0 {
            return Err(CommitmentError::Config(
                "window_periods must be positive".to_string(),
            ));
        }
        let ppd = horizon.periods_per_day as usize;
        Ok(Self {
            first_period: horizon.start_day as usize * ppd,
            end_period: horizon.end_day as usize * ppd,
            step: horizon.window_periods as usize,
            overlap: horizon.overlap_periods as usize,
            periods_per_day: horizon.periods_per_day,
        })
    }

    pub fn total_periods(&self) -> usize {
        self.end_period - self.first_period
    }

    pub fn window_count(&self) -> usize {
        self.total_periods().div_ceil(self.step)
    }

    /// First absolute period committed by window `index`.
    pub fn window_start(&self, index: usize) -> usize {
        self.first_period + index * self.step
    }

    /// Absolute period → day index, for reporting.
    pub fn day_of(&self, period: usize) -> usize {
        period / self.periods_per_day as usize
    }

    /// Bounds of window `index`. Look-ahead runs past the horizon end only as
    /// far as exogenous data exists.
    pub fn bounds(&self, index: usize, data_len: usize) -> Option<WindowBounds> {
        if index >= self.window_count() {
            return None;
        }
        let first_period = self.window_start(index);
        let committed_periods = self.step.min(self.end_period - first_period);
        let lookahead_end = (first_period + self.step + self.overlap).min(data_len);
        let total_periods = lookahead_end
            .saturating_sub(first_period)
            .max(committed_periods);
        Some(WindowBounds {
            index,
            first_period,
            committed_periods,
            total_periods,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowBounds {
    pub index: usize,
    pub first_period: usize,
    pub committed_periods: usize,
    pub total_periods: usize,
}

/// One rolling window: its periods, the exogenous slice and the carried-in
/// state of every unit and of storage.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub index: usize,
    pub first_period: usize,
    pub committed_periods: usize,
    pub demand: Vec<f64>,
    /// Total renewable availability, the sum over `renewable_sources`.
    pub renewable: Vec<f64>,
    pub renewable_sources: BTreeMap<String, Vec<f64>>,
    pub carry_in: Vec<ReactorState>,
    pub storage_in: Option<StorageState>,
}

impl TimeWindow {
    pub fn slice(
        bounds: WindowBounds,
        profile: &ExogenousProfile,
        carry_in: Vec<ReactorState>,
        storage_in: Option<StorageState>,
    ) -> Result<Self, CommitmentError> {
        let range = bounds.first_period..bounds.first_period + bounds.total_periods;
        let slice = profile.slice(range)?;
        Ok(Self {
            index: bounds.index,
            first_period: bounds.first_period,
            committed_periods: bounds.committed_periods,
            demand: slice.demand,
            renewable: slice.renewable,
            renewable_sources: slice.sources,
            carry_in,
            storage_in,
        })
    }

    pub fn total_periods(&self) -> usize {
        self.demand.len()
    }

    pub fn lookahead_periods(&self) -> usize {
        self.total_periods() - self.committed_periods
    }
}

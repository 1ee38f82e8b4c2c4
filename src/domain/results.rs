use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CommitmentError;

/// One unit's decisions in one absolute period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPeriod {
    pub unit_id: String,
    pub commit: bool,
    pub start: bool,
    pub shut: bool,
    pub generation: f64,
    /// Capacity bound the solver had for this period.
    pub max_power: f64,
    /// Reactivity at the start of this period.
    pub reactivity: f64,
}

/// One renewable source's share of a period. The dispatched renewable total
/// is split across sources in proportion to availability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewableSource {
    pub source: String,
    pub available: f64,
    pub used: f64,
    pub curtailed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoragePeriod {
    pub charge: f64,
    pub discharge: f64,
    /// State of charge at the end of the period, MWh.
    pub soc: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodRecord {
    pub period: usize,
    pub demand: f64,
    pub renewable_available: f64,
    pub renewable_used: f64,
    /// Unused renewable plus dumped surplus generation.
    pub curtailment: f64,
    pub unserved: f64,
    pub units: Vec<UnitPeriod>,
    #[serde(default)]
    pub renewable_sources: Vec<RenewableSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StoragePeriod>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefuelEvent {
    pub unit_id: String,
    /// Absolute period at whose end the refuel was triggered.
    pub period: usize,
    pub day: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSummary {
    pub window_index: usize,
    pub first_period: usize,
    pub committed_periods: usize,
    /// Solver objective over the whole window, look-ahead included.
    pub objective: f64,
    /// Cost of the committed periods only.
    pub committed_cost: f64,
    pub solver: String,
    /// Best incumbent accepted after a time-out.
    pub used_incumbent: bool,
    pub refuels: Vec<RefuelEvent>,
}

/// Gapless, non-overlapping per-period decision log keyed by absolute period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResults {
    pub first_period: usize,
    pub periods: Vec<PeriodRecord>,
    pub windows: Vec<WindowSummary>,
}

impl AggregateResults {
    pub fn new(first_period: usize) -> Self {
        Self {
            first_period,
            periods: Vec::new(),
            windows: Vec::new(),
        }
    }

    pub fn next_period(&self) -> usize {
        self.first_period + self.periods.len()
    }

    /// Appends one window's committed periods. Nothing is written unless the
    /// records continue the series exactly.
    pub fn append(
        &mut self,
        records: Vec<PeriodRecord>,
        summary: WindowSummary,
    ) -> Result<(), CommitmentError> {
        let expected = self.next_period();
        if summary.first_period != expected {
            return Err(CommitmentError::SeriesGap {
                expected,
                got: summary.first_period,
            });
        }
        if let Some((offset, record)) = records
            .iter()
            .enumerate()
            .find(|(offset, record)| record.period != expected + offset)
        {
            return Err(CommitmentError::SeriesGap {
                expected: expected + offset,
                got: record.period,
            });
        }
        self.periods.extend(records);
        self.windows.push(summary);
        Ok(())
    }

    pub fn record(&self, period: usize) -> Option<&PeriodRecord> {
        period
            .checked_sub(self.first_period)
            .and_then(|i| self.periods.get(i))
    }

    pub fn refuel_events(&self) -> impl Iterator<Item = &RefuelEvent> {
        self.windows.iter().flat_map(|w| w.refuels.iter())
    }

    pub fn summary(&self) -> CostSummary {
        let mut units: Vec<UnitSummary> = Vec::new();
        for record in &self.periods {
            for up in &record.units {
                let idx = match units.iter().position(|u| u.unit_id == up.unit_id) {
                    Some(i) => i,
                    None => {
                        units.push(UnitSummary::new(&up.unit_id));
                        units.len() - 1
                    }
                };
                let entry = &mut units[idx];
                entry.generation_mwh += up.generation;
                entry.online_periods += usize::from(up.commit);
                entry.starts += usize::from(up.start);
                entry.shutdowns += usize::from(up.shut);
            }
        }
        for event in self.refuel_events() {
            if let Some(u) = units.iter_mut().find(|u| u.unit_id == event.unit_id) {
                u.refuels += 1;
            }
        }
        let mut curtailment_by_source: BTreeMap<String, f64> = BTreeMap::new();
        for source in self.periods.iter().flat_map(|p| p.renewable_sources.iter()) {
            *curtailment_by_source.entry(source.source.clone()).or_default() += source.curtailed;
        }
        let storage = self.periods.iter().filter_map(|p| p.storage.as_ref());
        let (storage_charge_mwh, storage_discharge_mwh) = storage
            .fold((0.0, 0.0), |(c, d), s| (c + s.charge, d + s.discharge));

        CostSummary {
            periods: self.periods.len(),
            windows: self.windows.len(),
            total_cost: self.windows.iter().map(|w| w.committed_cost).sum(),
            incumbent_windows: self.windows.iter().filter(|w| w.used_incumbent).count(),
            demand_mwh: self.periods.iter().map(|p| p.demand).sum(),
            unserved_mwh: self.periods.iter().map(|p| p.unserved).sum(),
            curtailment_mwh: self.periods.iter().map(|p| p.curtailment).sum(),
            renewable_used_mwh: self.periods.iter().map(|p| p.renewable_used).sum(),
            curtailment_by_source,
            storage_charge_mwh,
            storage_discharge_mwh,
            units,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitSummary {
    pub unit_id: String,
    pub generation_mwh: f64,
    pub online_periods: usize,
    pub starts: usize,
    pub shutdowns: usize,
    pub refuels: usize,
}

impl UnitSummary {
    fn new(unit_id: &str) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            generation_mwh: 0.0,
            online_periods: 0,
            starts: 0,
            shutdowns: 0,
            refuels: 0,
        }
    }
}

/// Aggregate objective/cost summary for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostSummary {
    pub periods: usize,
    pub windows: usize,
    pub total_cost: f64,
    pub incumbent_windows: usize,
    pub demand_mwh: f64,
    pub unserved_mwh: f64,
    pub curtailment_mwh: f64,
    pub renewable_used_mwh: f64,
    /// Renewable curtailment only; dumped surplus generation is not attributed.
    pub curtailment_by_source: BTreeMap<String, f64>,
    pub storage_charge_mwh: f64,
    pub storage_discharge_mwh: f64,
    pub units: Vec<UnitSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(period: usize, commit: bool) -> PeriodRecord {
        PeriodRecord {
            period,
            demand: 800.0,
            renewable_available: 0.0,
            renewable_used: 0.0,
            curtailment: 0.0,
            unserved: if commit { 0.0 } else { 800.0 },
            units: vec![UnitPeriod {
                unit_id: "u1".to_string(),
                commit,
                start: false,
                shut: false,
                generation: if commit { 800.0 } else { 0.0 },
                max_power: 1000.0,
                reactivity: 1.2,
            }],
            renewable_sources: vec![RenewableSource {
                source: "wind".to_string(),
                available: 50.0,
                used: 30.0,
                curtailed: 20.0,
            }],
            storage: Some(StoragePeriod {
                charge: 10.0,
                discharge: 0.0,
                soc: 8.4,
            }),
        }
    }

    fn summary(first_period: usize, committed_periods: usize) -> WindowSummary {
        WindowSummary {
            window_index: 0,
            first_period,
            committed_periods,
            objective: 1.0,
            committed_cost: 10.0,
            solver: "dp".to_string(),
            used_incumbent: false,
            refuels: vec![],
        }
    }

    #[test]
    fn test_append_keeps_series_contiguous() {
        let mut agg = AggregateResults::new(10);
        agg.append(vec![record(10, true), record(11, true)], summary(10, 2))
            .unwrap();
        agg.append(vec![record(12, false)], summary(12, 1)).unwrap();
        assert_eq!(agg.next_period(), 13);
        assert_eq!(agg.record(12).unwrap().period, 12);
        assert!(agg.record(9).is_none());
    }

    #[test]
    fn test_append_rejects_overlap_and_gaps() {
        let mut agg = AggregateResults::new(0);
        agg.append(vec![record(0, true)], summary(0, 1)).unwrap();
        let overlap = agg.append(vec![record(0, true)], summary(0, 1));
        assert!(matches!(
            overlap,
            Err(CommitmentError::SeriesGap { expected: 1, got: 0 })
        ));
        let gap = agg.append(vec![record(1, true), record(3, true)], summary(1, 2));
        assert!(matches!(
            gap,
            Err(CommitmentError::SeriesGap { expected: 2, got: 3 })
        ));
        assert_eq!(agg.periods.len(), 1);
        assert_eq!(agg.windows.len(), 1);
    }

    #[test]
    fn test_summary_totals() {
        let mut agg = AggregateResults::new(0);
        let mut s = summary(0, 2);
        s.refuels.push(RefuelEvent {
            unit_id: "u1".to_string(),
            period: 1,
            day: 0,
        });
        agg.append(vec![record(0, true), record(1, false)], s).unwrap();
        let summary = agg.summary();
        assert_eq!(summary.periods, 2);
        assert_eq!(summary.total_cost, 10.0);
        assert_eq!(summary.unserved_mwh, 800.0);
        assert_eq!(summary.units[0].generation_mwh, 800.0);
        assert_eq!(summary.units[0].online_periods, 1);
        assert_eq!(summary.units[0].refuels, 1);
        assert_eq!(summary.curtailment_by_source["wind"], 40.0);
        assert_eq!(summary.storage_charge_mwh, 20.0);
        assert_eq!(summary.storage_discharge_mwh, 0.0);
    }
}

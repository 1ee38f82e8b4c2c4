use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::domain::{AggregateResults, CostSummary, RefuelEvent};
use crate::error::CommitmentError;

/// Report written next to `dispatch.csv`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary<'a> {
    pub run_name: &'a str,
    pub completed: bool,
    pub first_period: usize,
    pub summary: CostSummary,
    pub refuels: Vec<&'a RefuelEvent>,
}

fn csv_error(path: &Path, e: csv::Error) -> CommitmentError {
    CommitmentError::Data(format!("writing {}: {}", path.display(), e))
}

/// One row per absolute period: system columns, then COMMIT/START/SHUT/GEN,
/// capacity and reactivity for each unit, availability, use and curtailment
/// per renewable source, and storage flows when the fleet has storage.
pub fn write_dispatch_csv(path: &Path, aggregate: &AggregateResults) -> Result<(), CommitmentError> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| csv_error(path, e))?;

    let unit_ids: Vec<&str> = aggregate
        .periods
        .first()
        .map(|p| p.units.iter().map(|u| u.unit_id.as_str()).collect())
        .unwrap_or_default();
    let sources: Vec<&str> = aggregate
        .periods
        .first()
        .map(|p| p.renewable_sources.iter().map(|s| s.source.as_str()).collect())
        .unwrap_or_default();
    let has_storage = aggregate.periods.first().is_some_and(|p| p.storage.is_some());

    let mut header: Vec<String> = [
        "period",
        "demand_mw",
        "renewable_mw",
        "renewable_used_mw",
        "curtailment_mw",
        "unserved_mw",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for id in &unit_ids {
        for column in ["commit", "start", "shut", "gen_mw", "max_mw", "reactivity"] {
            header.push(format!("{}_{}", id, column));
        }
    }
    for source in &sources {
        for column in ["available_mw", "used_mw", "curtailed_mw"] {
            header.push(format!("{}_{}", source, column));
        }
    }
    if has_storage {
        for column in ["storage_charge_mw", "storage_discharge_mw", "storage_soc_mwh"] {
            header.push(column.to_string());
        }
    }
    writer.write_record(&header).map_err(|e| csv_error(path, e))?;

    for record in &aggregate.periods {
        let mut row = vec![
            record.period.to_string(),
            record.demand.to_string(),
            record.renewable_available.to_string(),
            record.renewable_used.to_string(),
            record.curtailment.to_string(),
            record.unserved.to_string(),
        ];
        for unit in &record.units {
            row.push(u8::from(unit.commit).to_string());
            row.push(u8::from(unit.start).to_string());
            row.push(u8::from(unit.shut).to_string());
            row.push(unit.generation.to_string());
            row.push(unit.max_power.to_string());
            row.push(unit.reactivity.to_string());
        }
        for source in &record.renewable_sources {
            row.push(source.available.to_string());
            row.push(source.used.to_string());
            row.push(source.curtailed.to_string());
        }
        if has_storage {
            let storage = record.storage.clone().unwrap_or_default();
            row.push(storage.charge.to_string());
            row.push(storage.discharge.to_string());
            row.push(storage.soc.to_string());
        }
        writer.write_record(&row).map_err(|e| csv_error(path, e))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_summary_json(path: &Path, summary: &RunSummary<'_>) -> Result<(), CommitmentError> {
    let json = serde_json::to_string_pretty(summary).map_err(std::io::Error::from)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Writes `dispatch.csv` and `summary.json` under `dir`.
pub fn write_outputs(
    dir: &Path,
    run_name: &str,
    completed: bool,
    aggregate: &AggregateResults,
) -> Result<(PathBuf, PathBuf), CommitmentError> {
    std::fs::create_dir_all(dir)?;
    let dispatch = dir.join("dispatch.csv");
    let summary_path = dir.join("summary.json");

    write_dispatch_csv(&dispatch, aggregate)?;
    write_summary_json(
        &summary_path,
        &RunSummary {
            run_name,
            completed,
            first_period: aggregate.first_period,
            summary: aggregate.summary(),
            refuels: aggregate.refuel_events().collect(),
        },
    )?;
    info!(
        dispatch = %dispatch.display(),
        summary = %summary_path.display(),
        periods = aggregate.periods.len(),
        "outputs written"
    );
    Ok((dispatch, summary_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{PeriodRecord, RenewableSource, StoragePeriod, UnitPeriod, WindowSummary};

    fn aggregate() -> AggregateResults {
        let mut aggregate = AggregateResults::new(0);
        let records = (0..3)
            .map(|t| PeriodRecord {
                period: t,
                demand: 800.0,
                renewable_available: 50.0,
                renewable_used: 50.0,
                curtailment: 0.0,
                unserved: 0.0,
                units: vec![UnitPeriod {
                    unit_id: "ap1000-1".to_string(),
                    commit: true,
                    start: t == 0,
                    shut: false,
                    generation: 750.0,
                    max_power: 1000.0,
                    reactivity: 1.205,
                }],
                renewable_sources: vec![RenewableSource {
                    source: "wind".to_string(),
                    available: 70.0,
                    used: 50.0,
                    curtailed: 20.0,
                }],
                storage: Some(StoragePeriod {
                    charge: 20.0,
                    discharge: 0.0,
                    soc: 16.8 * (t + 1) as f64,
                }),
            })
            .collect();
        let summary = WindowSummary {
            window_index: 0,
            first_period: 0,
            committed_periods: 3,
            objective: 30_000.0,
            committed_cost: 23_500.0,
            solver: "dp".to_string(),
            used_incumbent: false,
            refuels: vec![RefuelEvent {
                unit_id: "ap1000-1".to_string(),
                period: 2,
                day: 2,
            }],
        };
        aggregate.append(records, summary).unwrap();
        aggregate
    }

    #[test]
    fn test_dispatch_csv_has_row_per_period() {
        let dir = tempfile::tempdir().unwrap();
        let (dispatch, _) = write_outputs(dir.path(), "run", true, &aggregate()).unwrap();
        let mut reader = csv::Reader::from_path(&dispatch).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "period");
        assert_eq!(&headers[6], "ap1000-1_commit");
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][7], "1");
        assert_eq!(&rows[1][7], "0");
        assert_eq!(&headers[12], "wind_available_mw");
        assert_eq!(&headers[14], "wind_curtailed_mw");
        assert_eq!(&headers[17], "storage_soc_mwh");
        assert_eq!(&rows[0][14], "20");
        assert_eq!(&rows[0][15], "20");
    }

    #[test]
    fn test_summary_json_reports_refuels_and_cost() {
        let dir = tempfile::tempdir().unwrap();
        let (_, summary) = write_outputs(dir.path(), "run", true, &aggregate()).unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(summary).unwrap()).unwrap();
        assert_eq!(value["runName"], "run");
        assert_eq!(value["summary"]["totalCost"], 23_500.0);
        assert_eq!(value["refuels"][0]["day"], 2);
        assert_eq!(value["summary"]["units"][0]["starts"], 1);
        assert_eq!(value["summary"]["curtailmentBySource"]["wind"], 60.0);
        assert_eq!(value["summary"]["storageChargeMwh"], 60.0);
    }
}

use std::collections::BTreeMap;
use std::ops::Range;
use std::path::Path;
use tracing::info;

use crate::config::DataConfig;
use crate::error::CommitmentError;

/// Source name used for a single unnamed renewable series.
pub const DEFAULT_RENEWABLE_SOURCE: &str = "renewable";

/// Demand and per-source renewable availability per absolute period,
/// read-only to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct ExogenousProfile {
    demand: Vec<f64>,
    sources: BTreeMap<String, Vec<f64>>,
}

/// Exogenous data for a range of periods.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSlice {
    pub demand: Vec<f64>,
    /// Sum of all sources.
    pub renewable: Vec<f64>,
    pub sources: BTreeMap<String, Vec<f64>>,
}

impl ExogenousProfile {
    pub fn new(
        demand: Vec<f64>,
        sources: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self, CommitmentError> {
        if let Some((name, series)) = sources.iter().find(|(_, s)| s.len() != demand.len()) {
            return Err(CommitmentError::Data(format!(
                "demand has {} periods but {} has {}",
                demand.len(),
                name,
                series.len()
            )));
        }
        let series = std::iter::once(("demand", &demand))
            .chain(sources.iter().map(|(name, s)| (name.as_str(), s)));
        for (name, values) in series {
            if let Some((t, v)) = values
                .iter()
                .enumerate()
                .find(|(_, v)| !v.is_finite() || **v < 0.0)
            {
                return Err(CommitmentError::Data(format!(
                    "{} value {} at period {} is not a non-negative number",
                    name, v, t
                )));
            }
        }
        Ok(Self { demand, sources })
    }

    /// Constant demand and one constant renewable source.
    pub fn flat(periods: usize, demand_mw: f64, renewable_mw: f64) -> Result<Self, CommitmentError> {
        let mut sources = BTreeMap::new();
        if renewable_mw > 0.0 {
            sources.insert(DEFAULT_RENEWABLE_SOURCE.to_string(), renewable_mw);
        }
        Self::flat_mix(periods, demand_mw, &sources)
    }

    /// Constant demand and a constant availability per named source.
    pub fn flat_mix(
        periods: usize,
        demand_mw: f64,
        sources: &BTreeMap<String, f64>,
    ) -> Result<Self, CommitmentError> {
        let sources = sources
            .iter()
            .map(|(name, mw)| (name.clone(), vec![*mw; periods]))
            .collect();
        Self::new(vec![demand_mw; periods], sources)
    }

    /// Reads a CSV with `period` and `demand_mw` columns plus one
    /// `<source>_mw` column per renewable source. Periods must start at 0
    /// and be consecutive.
    pub fn from_csv_path(path: &Path) -> Result<Self, CommitmentError> {
        let data_err =
            |msg: String| CommitmentError::Data(format!("{}: {}", path.display(), msg));
        let mut reader = csv::Reader::from_path(path).map_err(|e| data_err(e.to_string()))?;
        let headers = reader
            .headers()
            .map_err(|e| data_err(e.to_string()))?
            .clone();

        let column = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| data_err(format!("missing column {}", name)))
        };
        let period_col = column("period")?;
        let demand_col = column("demand_mw")?;
        let mut source_cols = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            if i == period_col || i == demand_col {
                continue;
            }
            let name = header
                .trim()
                .strip_suffix("_mw")
                .filter(|n| !n.is_empty())
                .ok_or_else(|| data_err(format!("column {} is not <source>_mw", header)))?;
            source_cols.push((i, name.to_string()));
        }

        let mut demand = Vec::new();
        let mut sources: BTreeMap<String, Vec<f64>> = source_cols
            .iter()
            .map(|(_, name)| (name.clone(), Vec::new()))
            .collect();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| data_err(format!("row {}: {}", line + 1, e)))?;
            let field = |i: usize| record.get(i).unwrap_or("").trim();
            let period: usize = field(period_col)
                .parse()
                .map_err(|e| data_err(format!("row {} period: {}", line + 1, e)))?;
            if period != demand.len() {
                return Err(data_err(format!(
                    "row {}: expected period {}, found {}",
                    line + 1,
                    demand.len(),
                    period
                )));
            }
            let number = |i: usize| -> Result<f64, CommitmentError> {
                field(i)
                    .parse()
                    .map_err(|e| data_err(format!("row {} column {}: {}", line + 1, i, e)))
            };
            demand.push(number(demand_col)?);
            for (i, name) in &source_cols {
                let value = number(*i)?;
                if let Some(series) = sources.get_mut(name) {
                    series.push(value);
                }
            }
        }
        info!(
            path = %path.display(),
            periods = demand.len(),
            sources = sources.len(),
            "loaded exogenous profile"
        );
        Self::new(demand, sources)
    }

    /// Builds the profile a configuration asks for. A flat profile is sized
    /// to `periods`.
    pub fn from_config(data: &DataConfig, periods: usize) -> Result<Self, CommitmentError> {
        match (&data.profile_csv, &data.flat) {
            (Some(path), _) => Self::from_csv_path(path),
            (None, Some(flat)) => {
                let mut sources = flat.renewables.clone();
                if flat.renewable_mw > 0.0 {
                    sources.insert(DEFAULT_RENEWABLE_SOURCE.to_string(), flat.renewable_mw);
                }
                Self::flat_mix(periods, flat.demand_mw, &sources)
            }
            (None, None) => Err(CommitmentError::Config(
                "no exogenous profile configured".to_string(),
            )),
        }
    }

    pub fn len(&self) -> usize {
        self.demand.len()
    }

    pub fn is_empty(&self) -> bool {
        self.demand.is_empty()
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn slice(&self, range: Range<usize>) -> Result<ProfileSlice, CommitmentError> {
        if range.end > self.len() {
            return Err(CommitmentError::Data(format!(
                "periods {}..{} requested but profile covers only {}",
                range.start,
                range.end,
                self.len()
            )));
        }
        let sources: BTreeMap<String, Vec<f64>> = self
            .sources
            .iter()
            .map(|(name, series)| (name.clone(), series[range.clone()].to_vec()))
            .collect();
        let renewable = (0..range.len())
            .map(|t| sources.values().map(|s| s[t]).sum())
            .collect();
        Ok(ProfileSlice {
            demand: self.demand[range].to_vec(),
            renewable,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_csv_profile() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period,demand_mw,renewable_mw").unwrap();
        writeln!(file, "0,800,10").unwrap();
        writeln!(file, "1,820,0").unwrap();
        let profile = ExogenousProfile::from_csv_path(file.path()).unwrap();
        assert_eq!(profile.len(), 2);
        let slice = profile.slice(1..2).unwrap();
        assert_eq!(slice.demand, vec![820.0]);
        assert_eq!(slice.renewable, vec![0.0]);
        assert_eq!(slice.sources["renewable"], vec![0.0]);
    }

    #[test]
    fn test_reads_one_column_per_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period,demand_mw,wind_mw,solar_mw").unwrap();
        writeln!(file, "0,800,100,0").unwrap();
        writeln!(file, "1,820,60,40").unwrap();
        let profile = ExogenousProfile::from_csv_path(file.path()).unwrap();
        assert_eq!(profile.source_names().collect::<Vec<_>>(), vec!["solar", "wind"]);
        let slice = profile.slice(0..2).unwrap();
        assert_eq!(slice.renewable, vec![100.0, 100.0]);
        assert_eq!(slice.sources["solar"], vec![0.0, 40.0]);
    }

    #[test]
    fn test_rejects_unrecognised_column() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period,demand_mw,wind").unwrap();
        writeln!(file, "0,800,100").unwrap();
        assert!(matches!(
            ExogenousProfile::from_csv_path(file.path()),
            Err(CommitmentError::Data(_))
        ));
    }

    #[test]
    fn test_rejects_out_of_order_periods() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period,demand_mw,renewable_mw").unwrap();
        writeln!(file, "0,800,10").unwrap();
        writeln!(file, "2,820,0").unwrap();
        assert!(matches!(
            ExogenousProfile::from_csv_path(file.path()),
            Err(CommitmentError::Data(_))
        ));
    }

    #[test]
    fn test_rejects_negative_values() {
        let sources = BTreeMap::from([("wind".to_string(), vec![0.0, -2.0])]);
        assert!(ExogenousProfile::new(vec![1.0, 1.0], sources).is_err());
        assert!(ExogenousProfile::new(vec![1.0, -1.0], BTreeMap::new()).is_err());
    }

    #[test]
    fn test_flat_without_renewables_has_no_sources() {
        let profile = ExogenousProfile::flat(3, 800.0, 0.0).unwrap();
        let slice = profile.slice(0..3).unwrap();
        assert!(slice.sources.is_empty());
        assert_eq!(slice.renewable, vec![0.0; 3]);
    }

    #[test]
    fn test_slice_past_end_fails() {
        let profile = ExogenousProfile::flat(4, 800.0, 0.0).unwrap();
        assert!(profile.slice(2..6).is_err());
    }
}

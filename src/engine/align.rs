use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{EngineError, EngineResult};

pub const LEG_A: &str = "leg_a";
pub const LEG_B: &str = "leg_b";
pub const FX: &str = "fx";

/// One close observation for one instrument. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub close: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
}

impl Bar {
    pub fn new(timestamp: i64, close: f64) -> Self {
        Self {
            timestamp,
            close,
            volume: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<f64>,
}

/// Inner join of several bar series on timestamp. Every column has a finite
/// value on every row.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedSeries {
    timestamps: Vec<i64>,
    columns: Vec<Column>,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    pub fn require(&self, name: &str) -> EngineResult<&[f64]> {
        self.column(name).ok_or_else(|| {
            EngineError::InvalidParameter(format!("aligned series has no '{}' column", name))
        })
    }
}

/// Merges the named series, keeping only timestamps present in all of them.
/// Missing or non-finite closes drop the whole row; nothing is filled in.
pub fn align(inputs: &[(&str, &[Bar])]) -> EngineResult<AlignedSeries> {
    if inputs.is_empty() {
        return Err(EngineError::unavailable("alignment", "no input series"));
    }
    let width = inputs.len();
    let mut table: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
    for (idx, (name, bars)) in inputs.iter().enumerate() {
        if bars.is_empty() {
            return Err(EngineError::unavailable(*name, "series has no bars"));
        }
        for bar in bars.iter() {
            let row = table
                .entry(bar.timestamp)
                .or_insert_with(|| vec![None; width]);
            if row[idx].is_some() {
                log::debug!(
                    "[ALIGN] duplicate bar for {} at {}, keeping the later one",
                    name,
                    bar.timestamp
                );
            }
            row[idx] = Some(bar.close).filter(|v| v.is_finite());
        }
    }

    let total = table.len();
    let mut timestamps = Vec::with_capacity(total);
    let mut values: Vec<Vec<f64>> = vec![Vec::with_capacity(total); width];
    for (ts, row) in table {
        if row.iter().any(Option::is_none) {
            continue;
        }
        timestamps.push(ts);
        for (col, v) in values.iter_mut().zip(row) {
            col.push(v.unwrap_or_default());
        }
    }

    if timestamps.is_empty() {
        let names: Vec<&str> = inputs.iter().map(|(n, _)| *n).collect();
        return Err(EngineError::unavailable(
            names.join("+"),
            "no common timestamps after alignment",
        ));
    }
    log::debug!(
        "[ALIGN] kept {} of {} timestamps across {} series",
        timestamps.len(),
        total,
        width
    );

    let columns = inputs
        .iter()
        .zip(values)
        .map(|((name, _), values)| Column {
            name: name.to_string(),
            values,
        })
        .collect();
    Ok(AlignedSeries {
        timestamps,
        columns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(points: &[(i64, f64)]) -> Vec<Bar> {
        points.iter().map(|&(ts, c)| Bar::new(ts, c)).collect()
    }

    #[test]
    fn keeps_only_common_timestamps() {
        let a = bars(&[(1, 10.0), (2, 11.0), (3, 12.0), (5, 13.0)]);
        let b = bars(&[(2, 20.0), (3, 21.0), (4, 22.0), (5, 23.0)]);
        let fx = bars(&[(1, 1.2), (3, 1.3), (5, 1.4)]);
        let aligned = align(&[(LEG_A, &a), (LEG_B, &b), (FX, &fx)]).unwrap();
        assert_eq!(aligned.timestamps(), &[3, 5]);
        assert_eq!(aligned.column(LEG_A).unwrap(), &[12.0, 13.0]);
        assert_eq!(aligned.column(LEG_B).unwrap(), &[21.0, 23.0]);
        assert_eq!(aligned.column(FX).unwrap(), &[1.3, 1.4]);
    }

    #[test]
    fn every_row_has_every_column() {
        let a = bars(&[(1, 1.0), (2, f64::NAN), (3, 3.0), (4, 4.0)]);
        let b = bars(&[(4, 4.0), (3, 3.0), (2, 2.0), (1, 1.0)]);
        let aligned = align(&[(LEG_A, &a), (LEG_B, &b)]).unwrap();
        assert_eq!(aligned.timestamps(), &[1, 3, 4]);
        for col in aligned.columns() {
            assert_eq!(col.values.len(), aligned.len());
            assert!(col.values.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn empty_input_series_is_unavailable() {
        let a = bars(&[(1, 1.0)]);
        let err = align(&[(LEG_A, &a), (LEG_B, &[])]).unwrap_err();
        match err {
            EngineError::DataUnavailable { source_name, .. } => assert_eq!(source_name, LEG_B),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn disjoint_series_is_unavailable() {
        let a = bars(&[(1, 1.0), (2, 2.0)]);
        let b = bars(&[(3, 1.0), (4, 2.0)]);
        let err = align(&[(LEG_A, &a), (LEG_B, &b)]).unwrap_err();
        assert!(err.is_data_unavailable());
    }

    #[test]
    fn require_reports_missing_column() {
        let a = bars(&[(1, 1.0)]);
        let aligned = align(&[(LEG_A, &a)]).unwrap();
        assert!(aligned.require(FX).is_err());
        assert!(aligned.require(LEG_A).is_ok());
    }
}

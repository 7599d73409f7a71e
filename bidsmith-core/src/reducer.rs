//! Unique-series reducer
//!
//! Records that share a fingerprint are classified once, as a group.
//!
//! **Fingerprint:** (description or protocol name, echo time in ms,
//! sorted image-type tags, repetition time in s), times rounded to two
//! decimals. A trailing `_RR` (retro-reconstruction) is stripped from the
//! description so retro variants merge with their originals.
//!
//! **Algorithm:** walk the sorted records once. If no earlier group shares
//! the record's description and image type, open a new group. Otherwise
//! join the first group whose times agree within the tolerance band, or
//! open a new group if none does. BIDS-formatted input skips grouping and
//! maps every record to its own series.

use crate::bids::{Datatype, EntityMap};
use crate::identity::path_label;
use crate::record::{AcquisitionRecord, Classification};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const RETRO_RECON_SUFFIX: &str = "_RR";

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Grouping key for unique series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub description: String,
    /// Milliseconds
    pub echo_time: Option<f64>,
    pub image_type: Vec<String>,
    /// Seconds
    pub repetition_time: Option<f64>,
}

impl Fingerprint {
    pub fn of(record: &AcquisitionRecord) -> Self {
        let description = record.description();
        let description = description
            .strip_suffix(RETRO_RECON_SUFFIX)
            .unwrap_or(description)
            .to_string();

        let mut image_type = record.image_type.clone();
        image_type.sort();
        image_type.dedup();

        Self {
            description,
            echo_time: record.echo_time.map(|te| round2(te * 1000.0)),
            image_type,
            repetition_time: record.repetition_time.map(round2),
        }
    }

    /// Description and image type agree
    pub fn same_identity(&self, other: &Fingerprint) -> bool {
        self.description == other.description && self.image_type == other.image_type
    }

    /// Full match, times within `tolerance`
    pub fn matches(&self, other: &Fingerprint, tolerance: f64) -> bool {
        let close = |a: Option<f64>, b: Option<f64>| match (a, b) {
            (Some(a), Some(b)) => (a - b).abs() <= tolerance + 1e-9,
            (None, None) => true,
            _ => false,
        };
        self.same_identity(other)
            && close(self.echo_time, other.echo_time)
            && close(self.repetition_time, other.repetition_time)
    }
}

/// One group of records classified together
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueSeries {
    pub series_idx: usize,
    pub fingerprint: Fingerprint,
    /// First record of the group
    pub record: AcquisitionRecord,
    /// `idx` of every member record, in scan order
    pub members: Vec<usize>,
    pub classification: Classification,
    pub entities: EntityMap,
    /// Classification copied from a reviewed reference document
    pub from_reference: bool,
}

impl UniqueSeries {
    fn open(series_idx: usize, fingerprint: Fingerprint, record: &AcquisitionRecord) -> Self {
        Self {
            series_idx,
            fingerprint,
            record: record.clone(),
            members: vec![record.idx],
            classification: Classification::unresolved(),
            entities: EntityMap::new(),
            from_reference: false,
        }
    }
}

/// Every record already sits in a BIDS layout (`sub-*/<datatype>/...`)
pub fn is_bids_input(records: &[AcquisitionRecord]) -> bool {
    !records.is_empty()
        && records.iter().all(|r| {
            let in_datatype_dir = r
                .image_path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .and_then(Datatype::parse)
                .is_some();
            in_datatype_dir && path_label(&r.image_path, "sub").is_some()
        })
}

/// Group records into unique series and stamp `series_idx` on each record
pub fn reduce(records: &mut [AcquisitionRecord], tolerance: f64, bids_input: bool) -> Vec<UniqueSeries> {
    let mut series: Vec<UniqueSeries> = Vec::new();

    for record in records.iter_mut() {
        let fingerprint = Fingerprint::of(record);

        let existing = if bids_input {
            None
        } else if !series.iter().any(|s| s.fingerprint.same_identity(&fingerprint)) {
            None
        } else {
            series
                .iter()
                .position(|s| s.fingerprint.matches(&fingerprint, tolerance))
        };

        match existing {
            Some(pos) => {
                series[pos].members.push(record.idx);
                record.assign_series(series[pos].series_idx);
            }
            None => {
                let series_idx = series.len();
                debug!(
                    series_idx,
                    description = %fingerprint.description,
                    "Opened unique series"
                );
                record.assign_series(series_idx);
                series.push(UniqueSeries::open(series_idx, fingerprint, record));
            }
        }
    }

    info!(records = records.len(), unique_series = series.len(), bids_input, "Reduced to unique series");
    series
}

/// Copy each series' classification and entities onto its member records
pub fn fan_out(series: &[UniqueSeries], records: &mut [AcquisitionRecord]) {
    for record in records.iter_mut() {
        if let Some(s) = record.series_idx.and_then(|idx| series.get(idx)) {
            record.apply_classification(s.classification.clone(), s.entities.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Sidecar;
    use std::path::PathBuf;

    fn record(idx: usize, desc: &str, te: f64, tr: f64) -> AcquisitionRecord {
        let sidecar = Sidecar {
            series_description: desc.to_string(),
            echo_time: Some(te),
            repetition_time: Some(tr),
            image_type: vec!["ORIGINAL".into(), "PRIMARY".into()],
            ..Sidecar::default()
        };
        let mut r = AcquisitionRecord::new(
            PathBuf::from(format!("/d/{}.nii.gz", idx)),
            PathBuf::from(format!("/d/{}.json", idx)),
            &sidecar,
        );
        r.idx = idx;
        r
    }

    #[test]
    fn test_jitter_merges() {
        let mut records = vec![record(0, "rest", 0.030, 2.0), record(1, "rest", 0.03005, 2.001)];
        let series = reduce(&mut records, 0.1, false);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].members, vec![0, 1]);
        assert_eq!(records[1].series_idx, Some(0));
    }

    #[test]
    fn test_tolerance_applies_in_milliseconds_to_echo_time() {
        // 0.05 ms apart
        let mut records = vec![record(0, "rest", 0.03000, 2.0), record(1, "rest", 0.03005, 2.0)];
        assert_eq!(reduce(&mut records, 0.1, false).len(), 1);

        // 0.2 ms apart, far below 0.1 s
        let mut records = vec![record(0, "rest", 0.0300, 2.0), record(1, "rest", 0.0302, 2.0)];
        assert_eq!(reduce(&mut records, 0.1, false).len(), 2);
    }

    #[test]
    fn test_tolerance_applies_in_seconds_to_repetition_time() {
        let mut records = vec![record(0, "rest", 0.03, 2.0), record(1, "rest", 0.03, 2.05)];
        assert_eq!(reduce(&mut records, 0.1, false).len(), 1);

        let mut records = vec![record(0, "rest", 0.03, 2.0), record(1, "rest", 0.03, 2.3)];
        assert_eq!(reduce(&mut records, 0.1, false).len(), 2);
    }

    #[test]
    fn test_different_echo_splits() {
        let mut records = vec![record(0, "me_bold", 0.0142, 1.5), record(1, "me_bold", 0.0385, 1.5)];
        let series = reduce(&mut records, 0.1, false);
        assert_eq!(series.len(), 2);
        assert_eq!(records[1].series_idx, Some(1));
    }

    #[test]
    fn test_retro_recon_merges() {
        let mut records = vec![record(0, "rest", 0.03, 2.0), record(1, "rest_RR", 0.03, 2.0)];
        assert_eq!(reduce(&mut records, 0.1, false).len(), 1);
    }

    #[test]
    fn test_bids_input_is_one_to_one() {
        let mut records = vec![record(0, "rest", 0.03, 2.0), record(1, "rest", 0.03, 2.0)];
        records[0].image_path = PathBuf::from("/b/sub-01/func/sub-01_task-rest_run-1_bold.nii.gz");
        records[1].image_path = PathBuf::from("/b/sub-01/func/sub-01_task-rest_run-2_bold.nii.gz");
        assert!(is_bids_input(&records));
        assert_eq!(reduce(&mut records, 0.1, true).len(), 2);
    }

    #[test]
    fn test_reduce_is_idempotent() {
        let mut records = vec![
            record(0, "t1", 0.003, 2.3),
            record(1, "rest", 0.03, 2.0),
            record(2, "rest", 0.03, 2.0),
            record(3, "t1", 0.003, 2.3),
        ];
        reduce(&mut records, 0.1, false);
        let first: Vec<_> = records.iter().map(|r| r.series_idx).collect();
        reduce(&mut records, 0.1, false);
        let second: Vec<_> = records.iter().map(|r| r.series_idx).collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![Some(0), Some(1), Some(1), Some(0)]);
    }
}

//! Run numbering
//!
//! Included acquisitions that would otherwise share a filename get
//! `run-1..n` in acquisition order. Two records collide when subject,
//! session, datatype, suffix and every entity except `run` agree. Field
//! maps are numbered by the section resolver instead.

use crate::bids::{entity_string, Datatype, Entity, Suffix};
use crate::record::AcquisitionRecord;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RunKey {
    subject: String,
    session: String,
    datatype: Datatype,
    suffix: Suffix,
    entities: String,
}

impl RunKey {
    fn of(record: &AcquisitionRecord) -> Option<Self> {
        let (datatype, suffix) = record.classification.role()?;
        let mut entities = record.entities.clone();
        entities.remove(&Entity::Run);
        Some(Self {
            subject: record.subject.clone(),
            session: record.session.clone(),
            datatype,
            suffix,
            entities: entity_string(&entities),
        })
    }
}

/// Collision groups, in the order records were observed
#[derive(Debug, Default)]
pub struct RunCounter {
    groups: BTreeMap<RunKey, Vec<usize>>,
}

impl RunCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a record toward its group; ignored when not a run candidate
    pub fn observe(&mut self, record: &AcquisitionRecord) {
        if !record.classification.include
            || record.classification.datatype == Some(Datatype::Fmap)
            || record.entities.contains_key(&Entity::Run)
        {
            return;
        }
        if let Some(key) = RunKey::of(record) {
            self.groups.entry(key).or_default().push(record.idx);
        }
    }

    /// `(record idx, run)` for every group with more than one member
    pub fn into_assignments(self) -> Vec<(usize, u32)> {
        self.groups
            .into_values()
            .filter(|members| members.len() > 1)
            .flat_map(|members| {
                members
                    .into_iter()
                    .enumerate()
                    .map(|(i, idx)| (idx, i as u32 + 1))
            })
            .collect()
    }
}

/// Number colliding acquisitions; `records` must be in scan order
pub fn assign_runs(records: &mut [AcquisitionRecord]) -> usize {
    let mut counter = RunCounter::new();
    for record in records.iter() {
        counter.observe(record);
    }

    let assignments = counter.into_assignments();
    for (idx, run) in &assignments {
        if let Some(record) = records.iter_mut().find(|r| r.idx == *idx) {
            record.set_entity(Entity::Run, run.to_string());
        }
    }
    debug!(numbered = assignments.len(), "Assigned run numbers");
    assignments.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Classification, Sidecar};
    use std::path::PathBuf;

    fn record(idx: usize, datatype: Datatype, suffix: Suffix, task: &str) -> AcquisitionRecord {
        let mut r = AcquisitionRecord::new(PathBuf::from(format!("{}.nii", idx)), PathBuf::new(), &Sidecar::default());
        r.idx = idx;
        r.subject = "01".to_string();
        r.classification = Classification::accepted(datatype, suffix, "test");
        if !task.is_empty() {
            r.set_entity(Entity::Task, task);
        }
        r
    }

    fn run_of(r: &AcquisitionRecord) -> Option<&str> {
        r.entities.get(&Entity::Run).map(String::as_str)
    }

    #[test]
    fn test_repeats_are_numbered_in_order() {
        let mut records = vec![
            record(0, Datatype::Anat, Suffix::T1w, ""),
            record(1, Datatype::Func, Suffix::Bold, "rest"),
            record(2, Datatype::Func, Suffix::Bold, "nback"),
            record(3, Datatype::Func, Suffix::Bold, "rest"),
        ];
        assert_eq!(assign_runs(&mut records), 2);
        assert_eq!(run_of(&records[0]), None);
        assert_eq!(run_of(&records[1]), Some("1"));
        assert_eq!(run_of(&records[2]), None);
        assert_eq!(run_of(&records[3]), Some("2"));
    }

    #[test]
    fn test_excluded_and_fieldmaps_skipped() {
        let mut records = vec![
            record(0, Datatype::Fmap, Suffix::Epi, ""),
            record(1, Datatype::Fmap, Suffix::Epi, ""),
            record(2, Datatype::Func, Suffix::Bold, "rest"),
            record(3, Datatype::Func, Suffix::Bold, "rest"),
        ];
        records[3].exclude("duplicate");
        assert_eq!(assign_runs(&mut records), 0);
        assert!(records.iter().all(|r| run_of(r).is_none()));
    }

    #[test]
    fn test_sessions_count_separately() {
        let mut records = vec![
            record(0, Datatype::Func, Suffix::Bold, "rest"),
            record(1, Datatype::Func, Suffix::Bold, "rest"),
        ];
        records[1].session = "2".to_string();
        assert_eq!(assign_runs(&mut records), 0);
    }

    #[test]
    fn test_explicit_run_kept() {
        let mut records = vec![
            record(0, Datatype::Func, Suffix::Bold, "rest"),
            record(1, Datatype::Func, Suffix::Bold, "rest"),
        ];
        records[0].set_entity(Entity::Run, "7");
        assign_runs(&mut records);
        assert_eq!(run_of(&records[0]), Some("7"));
        assert_eq!(run_of(&records[1]), None);
    }
}

//! Subject and session identity
//!
//! **Subject priority:**
//! 1. `sub-<label>` token anywhere in the image or sidecar path
//! 2. PatientName
//! 3. PatientID
//! 4. PatientBirthDate
//! 5. `"unknown"`
//!
//! Values are reduced to alphanumerics; anonymization placeholders are
//! skipped. Sessions come from a `ses-<label>` path token, or, when a
//! subject was scanned on more than one date, are numbered `1..n` by date.

use crate::record::AcquisitionRecord;
use crate::text::sanitize_label;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::debug;

const ANONYMIZED_MARKERS: &[&str] = &["anonymous", "anonymized", "anon", "unknown", "na", "none", "xxx"];

/// Label following `<prefix>-` in any path component
pub fn path_label(path: &Path, prefix: &str) -> Option<String> {
    let needle = format!("{}-", prefix);
    path.iter().filter_map(|c| c.to_str()).find_map(|component| {
        component.split('_').find_map(|token| {
            let label = token.strip_prefix(&needle)?;
            let label = label.split('.').next().unwrap_or_default();
            let label = sanitize_label(label);
            (!label.is_empty()).then_some(label)
        })
    })
}

fn usable(value: &str) -> Option<String> {
    let cleaned: String = value.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    if cleaned.is_empty() || ANONYMIZED_MARKERS.contains(&cleaned.to_ascii_lowercase().as_str()) {
        None
    } else {
        Some(cleaned)
    }
}

/// Subject label for one record
pub fn subject_for(record: &AcquisitionRecord) -> String {
    path_label(&record.image_path, "sub")
        .or_else(|| path_label(&record.sidecar_path, "sub"))
        .or_else(|| usable(&record.patient.patient_name))
        .or_else(|| usable(&record.patient.patient_id))
        .or_else(|| usable(&record.patient.patient_birth_date))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Resolve subject and session for every record
pub fn assign_identity(records: &mut [AcquisitionRecord]) {
    for record in records.iter_mut() {
        let subject = subject_for(record);
        let session = path_label(&record.image_path, "ses")
            .or_else(|| path_label(&record.sidecar_path, "ses"))
            .unwrap_or_default();
        record.set_identity(subject, session);
    }

    // Subjects scanned on several dates get date-ordered sessions
    let mut dates: BTreeMap<String, BTreeSet<NaiveDate>> = BTreeMap::new();
    for record in records.iter().filter(|r| r.session.is_empty()) {
        if let Some(date) = record.acquisition_date {
            dates.entry(record.subject.clone()).or_default().insert(date);
        }
    }

    for (subject, subject_dates) in &dates {
        if subject_dates.len() < 2 {
            continue;
        }
        debug!(subject = %subject, sessions = subject_dates.len(), "Numbering sessions by date");
        for record in records
            .iter_mut()
            .filter(|r| &r.subject == subject && r.session.is_empty())
        {
            if let Some(pos) = record
                .acquisition_date
                .and_then(|d| subject_dates.iter().position(|x| *x == d))
            {
                record.session = (pos + 1).to_string();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{PatientInfo, Sidecar};
    use std::path::PathBuf;

    fn record(path: &str, patient: PatientInfo, date: Option<NaiveDate>) -> AcquisitionRecord {
        let sidecar = Sidecar {
            patient,
            acquisition_date: date,
            ..Sidecar::default()
        };
        AcquisitionRecord::new(PathBuf::from(path), PathBuf::from(path), &sidecar)
    }

    #[test]
    fn test_path_token_wins() {
        let r = record(
            "/data/sub-0042/ses-pre/anat/sub-0042_ses-pre_T1w.nii.gz",
            PatientInfo {
                patient_name: "Doe^John".to_string(),
                ..PatientInfo::default()
            },
            None,
        );
        assert_eq!(subject_for(&r), "0042");
        assert_eq!(path_label(&r.image_path, "ses").as_deref(), Some("pre"));
    }

    #[test]
    fn test_anonymized_name_falls_through_to_id() {
        let r = record(
            "/data/5_t1.nii.gz",
            PatientInfo {
                patient_name: "Anonymous".to_string(),
                patient_id: "P-17".to_string(),
                ..PatientInfo::default()
            },
            None,
        );
        assert_eq!(subject_for(&r), "P17");
    }

    #[test]
    fn test_unknown_when_nothing_usable() {
        let r = record("/data/5_t1.nii.gz", PatientInfo::default(), None);
        assert_eq!(subject_for(&r), "unknown");
    }

    #[test]
    fn test_sessions_numbered_by_date() {
        let patient = PatientInfo {
            patient_id: "S1".to_string(),
            ..PatientInfo::default()
        };
        let d1 = NaiveDate::from_ymd_opt(2023, 1, 5);
        let d2 = NaiveDate::from_ymd_opt(2023, 3, 9);
        let mut records = vec![
            record("/x/b.nii.gz", patient.clone(), d2),
            record("/x/a.nii.gz", patient.clone(), d1),
            record("/x/c.nii.gz", patient, d2),
        ];
        assign_identity(&mut records);
        assert_eq!(records[0].session, "2");
        assert_eq!(records[1].session, "1");
        assert_eq!(records[2].session, "2");
    }

    #[test]
    fn test_single_date_has_no_session() {
        let patient = PatientInfo {
            patient_id: "S1".to_string(),
            ..PatientInfo::default()
        };
        let d = NaiveDate::from_ymd_opt(2023, 1, 5);
        let mut records = vec![record("/x/a.nii.gz", patient.clone(), d), record("/x/b.nii.gz", patient, d)];
        assign_identity(&mut records);
        assert!(records.iter().all(|r| r.session.is_empty()));
    }
}

//! Output document
//!
//! The single handoff to review and write-out: dataset description, README
//! text, the participants column schema, one entry per subject, one per
//! unique series and one per acquisition ("object"). A previous document
//! can be fed back in as a reference (see [`crate::reference`]).

use crate::bids::{Datatype, EntityMap};
use crate::record::{AcquisitionRecord, PatientInfo};
use crate::reducer::{Fingerprint, UniqueSeries};
use bidsmith_common::config::DatasetSettings;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

const GENERATOR: &str = env!("CARGO_PKG_NAME");
const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeneratedBy {
    pub name: String,
    pub version: String,
}

/// `dataset_description.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatasetDescription {
    pub name: String,
    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,
    pub dataset_type: String,
    pub license: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub generated_by: Vec<GeneratedBy>,
}

impl Default for DatasetDescription {
    fn default() -> Self {
        Self::from_settings(&DatasetSettings::default())
    }
}

impl DatasetDescription {
    pub fn from_settings(settings: &DatasetSettings) -> Self {
        Self {
            name: settings.name.clone(),
            bids_version: settings.bids_version.clone(),
            dataset_type: "raw".to_string(),
            license: settings.license.clone(),
            authors: settings.authors.clone(),
            generated_by: vec![GeneratedBy {
                name: GENERATOR.to_string(),
                version: GENERATOR_VERSION.to_string(),
            }],
        }
    }
}

/// One `participants.json` column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnDescription {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub levels: BTreeMap<String, String>,
}

pub fn participants_columns() -> BTreeMap<String, ColumnDescription> {
    let mut columns = BTreeMap::new();
    columns.insert(
        "age".to_string(),
        ColumnDescription {
            description: "Age of the participant at the first scan".to_string(),
            units: Some("years".to_string()),
            levels: BTreeMap::new(),
        },
    );
    columns.insert(
        "sex".to_string(),
        ColumnDescription {
            description: "Sex of the participant as reported by the scanner".to_string(),
            units: None,
            levels: [("M", "male"), ("F", "female"), ("O", "other")]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        },
    );
    columns
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubjectEntry {
    pub subject: String,
    pub sessions: Vec<String>,
    pub age: Option<u32>,
    pub sex: String,
    pub patient: PatientInfo,
}

/// One unique series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SeriesEntry {
    pub series_idx: usize,
    pub series_number: i64,
    pub description: String,
    pub fingerprint: Fingerprint,
    /// `"datatype/suffix"`, `"exclude"` or `""`
    #[serde(rename = "type")]
    pub kind: String,
    pub entities: EntityMap,
    pub include: bool,
    pub rationale: String,
    pub warnings: Vec<String>,
    /// Localizer/scout series; bounds sections on a rerun
    pub localizer: bool,
    /// For `fmap/epi`: the kind of series it corrects
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corrects: Option<Datatype>,
    /// `series_idx` of the series this field map corrects
    pub intended_for: Vec<usize>,
    pub members: Vec<usize>,
    pub from_reference: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResults {
    pub volume_count: u32,
    pub ndim: u8,
    pub file_size: u64,
    pub orientation: Option<String>,
    pub errors: Vec<String>,
}

/// One physical acquisition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ObjectEntry {
    pub idx: usize,
    pub series_idx: Option<usize>,
    pub subject: String,
    pub session: String,
    pub series_number: String,
    pub image_path: PathBuf,
    pub sidecar_path: PathBuf,
    pub aux_paths: Vec<PathBuf>,
    #[serde(rename = "type")]
    pub kind: String,
    pub entities: EntityMap,
    pub include: bool,
    pub rationale: String,
    pub section: Option<usize>,
    pub intended_for: Vec<usize>,
    pub corrected_by: Vec<usize>,
    pub analysis_results: AnalysisResults,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    pub dataset_description: DatasetDescription,
    pub readme: String,
    pub participants_column: BTreeMap<String, ColumnDescription>,
    pub subjects: Vec<SubjectEntry>,
    pub series: Vec<SeriesEntry>,
    pub objects: Vec<ObjectEntry>,
}

/// Age in years from a DICOM age string (`032Y`, `006M`, `010W`, `003D`)
pub fn parse_patient_age(age: &str) -> Option<u32> {
    let age = age.trim();
    let unit = age.chars().last()?;
    let value: u32 = age[..age.len() - unit.len_utf8()].trim().parse().ok()?;
    match unit.to_ascii_uppercase() {
        'Y' => Some(value),
        'M' => Some(value / 12),
        'W' => Some(value / 52),
        'D' => Some(value / 365),
        _ => None,
    }
}

/// Whole years between a `YYYYMMDD` birth date and the scan date
pub fn age_at(birth_date: &str, scan_date: NaiveDate) -> Option<u32> {
    let birth = NaiveDate::parse_from_str(birth_date.trim(), "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(birth_date.trim(), "%Y-%m-%d"))
        .ok()?;
    let mut years = scan_date.year() - birth.year();
    if (scan_date.month(), scan_date.day()) < (birth.month(), birth.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

fn subject_entries(records: &[AcquisitionRecord]) -> Vec<SubjectEntry> {
    let mut by_subject: BTreeMap<&str, Vec<&AcquisitionRecord>> = BTreeMap::new();
    for record in records {
        by_subject.entry(record.subject.as_str()).or_default().push(record);
    }

    by_subject
        .into_iter()
        .map(|(subject, members)| {
            let sessions: BTreeSet<&str> = members
                .iter()
                .map(|r| r.session.as_str())
                .filter(|s| !s.is_empty())
                .collect();
            let patient = members
                .iter()
                .map(|r| &r.patient)
                .find(|p| !p.patient_id.is_empty() || !p.patient_name.is_empty())
                .or_else(|| members.first().map(|r| &r.patient))
                .cloned()
                .unwrap_or_default();
            let first_scan = members.iter().filter_map(|r| r.acquisition_date).min();
            let age = parse_patient_age(&patient.patient_age).or_else(|| {
                first_scan.and_then(|date| age_at(&patient.patient_birth_date, date))
            });
            SubjectEntry {
                subject: subject.to_string(),
                sessions: sessions.into_iter().map(str::to_string).collect(),
                age,
                sex: patient.patient_sex.clone(),
                patient,
            }
        })
        .collect()
}

/// Series entries reflect the most recent member, which holds the
/// field-map resolver's final decision
fn series_entries(records: &[AcquisitionRecord], series: &[UniqueSeries]) -> Vec<SeriesEntry> {
    let series_of: BTreeMap<usize, usize> = records
        .iter()
        .filter_map(|r| r.series_idx.map(|s| (r.idx, s)))
        .collect();
    let by_idx: BTreeMap<usize, &AcquisitionRecord> = records.iter().map(|r| (r.idx, r)).collect();

    series
        .iter()
        .map(|s| {
            let latest = s
                .members
                .iter()
                .rev()
                .find_map(|idx| by_idx.get(idx).copied());
            let (classification, entities) = match latest {
                Some(r) => (&r.classification, &r.entities),
                None => (&s.classification, &s.entities),
            };
            let intended_for: BTreeSet<usize> = s
                .members
                .iter()
                .filter_map(|idx| by_idx.get(idx))
                .flat_map(|r| r.intended_for.iter())
                .filter_map(|target| series_of.get(target).copied())
                .collect();
            SeriesEntry {
                series_idx: s.series_idx,
                series_number: s.record.series_number,
                description: s.record.description().to_string(),
                fingerprint: s.fingerprint.clone(),
                kind: classification.type_string(),
                entities: entities.clone(),
                include: classification.include,
                rationale: classification.rationale.clone(),
                warnings: classification.warnings.clone(),
                localizer: classification.localizer,
                corrects: classification.corrects,
                intended_for: intended_for.into_iter().collect(),
                members: s.members.clone(),
                from_reference: s.from_reference,
            }
        })
        .collect()
}

fn object_entry(record: &AcquisitionRecord) -> ObjectEntry {
    ObjectEntry {
        idx: record.idx,
        series_idx: record.series_idx,
        subject: record.subject.clone(),
        session: record.session.clone(),
        series_number: record.series_number_padded.clone(),
        image_path: record.image_path.clone(),
        sidecar_path: record.sidecar_path.clone(),
        aux_paths: record.aux_paths.clone(),
        kind: record.classification.type_string(),
        entities: record.entities.clone(),
        include: record.classification.include,
        rationale: record.classification.rationale.clone(),
        section: record.section,
        intended_for: record.intended_for.clone(),
        corrected_by: record.corrected_by.clone(),
        analysis_results: AnalysisResults {
            volume_count: record.volume_count,
            ndim: record.ndim,
            file_size: record.file_size,
            orientation: record.orientation.clone(),
            errors: record.errors.clone(),
        },
    }
}

fn readme(settings: &DatasetSettings, subjects: usize, records: &[AcquisitionRecord]) -> String {
    let included = records.iter().filter(|r| r.classification.include).count();
    format!(
        "# {}\n\nConverted with {} {}.\n\n{} subject(s), {} acquisition(s), {} selected for conversion.\n",
        settings.name,
        GENERATOR,
        GENERATOR_VERSION,
        subjects,
        records.len(),
        included
    )
}

/// Assemble the output document from resolved records and series
pub fn assemble(settings: &DatasetSettings, records: &[AcquisitionRecord], series: &[UniqueSeries]) -> Document {
    let subjects = subject_entries(records);
    Document {
        dataset_description: DatasetDescription::from_settings(settings),
        readme: readme(settings, subjects.len(), records),
        participants_column: participants_columns(),
        subjects,
        series: series_entries(records, series),
        objects: records.iter().map(object_entry).collect(),
    }
}

//! Normalized per-acquisition records
//!
//! A sidecar is parsed leniently into [`Sidecar`]: numbers may arrive as
//! strings, `ImageType` may be a list or a backslash-joined string, and any
//! missing field simply stays empty. [`AcquisitionRecord`] is built once
//! from a sidecar and then updated stage by stage through its setters.

use crate::bids::{Datatype, Entity, EntityMap, PhaseEncoding, Suffix};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Patient metadata carried through to the participants table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PatientInfo {
    #[serde(rename = "PatientID")]
    pub patient_id: String,
    pub patient_name: String,
    pub patient_birth_date: String,
    pub patient_sex: String,
    pub patient_age: String,
}

/// Converter's own `BidsGuess` (`["func", "_task-rest_bold"]`)
#[derive(Debug, Clone, PartialEq)]
pub struct BidsGuess {
    pub datatype: String,
    pub label: String,
}

impl BidsGuess {
    fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        let datatype = items.first()?.as_str()?.trim().to_string();
        let label = items
            .get(1)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        Some(Self { datatype, label })
    }

    /// Final `_`-separated token of the label (`bold` in `_task-rest_bold`)
    pub fn suffix_token(&self) -> &str {
        self.label.rsplit('_').next().unwrap_or_default()
    }
}

/// Fields extracted from one JSON sidecar
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sidecar {
    pub series_description: String,
    pub protocol_name: String,
    pub image_type: Vec<String>,
    pub repetition_time: Option<f64>,
    pub echo_time: Option<f64>,
    pub echo_number: Option<u32>,
    pub inversion_time: Option<f64>,
    pub phase_encoding_direction: Option<String>,
    pub manufacturer: String,
    pub acquisition_date: Option<NaiveDate>,
    pub acquisition_time: Option<NaiveTime>,
    pub series_number: Option<i64>,
    pub patient: PatientInfo,
    pub bids_guess: Option<BidsGuess>,
}

fn string_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn float_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    match value.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn image_type_field(value: &Value) -> Vec<String> {
    let raw: Vec<String> = match value.get("ImageType") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s.split('\\').map(str::to_string).collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y%m%d"))
        .ok()
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H%M%S%.f"))
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y%m%d%H%M%S%.f"))
        .ok()
}

impl Sidecar {
    /// Extract known fields from a sidecar JSON object
    pub fn from_value(value: &Value) -> Self {
        let (mut acquisition_date, mut acquisition_time) = (None, None);
        let date_time = string_field(value, "AcquisitionDateTime");
        if let Some(dt) = parse_date_time(&date_time) {
            acquisition_date = Some(dt.date());
            acquisition_time = Some(dt.time());
        }
        if acquisition_date.is_none() {
            acquisition_date = parse_date(&string_field(value, "AcquisitionDate"));
        }
        if acquisition_time.is_none() {
            acquisition_time = parse_time(&string_field(value, "AcquisitionTime"));
        }

        let phase_encoding_direction = Some(string_field(value, "PhaseEncodingDirection"))
            .filter(|s| !s.is_empty());

        Self {
            series_description: string_field(value, "SeriesDescription"),
            protocol_name: string_field(value, "ProtocolName"),
            image_type: image_type_field(value),
            repetition_time: float_field(value, "RepetitionTime"),
            echo_time: float_field(value, "EchoTime"),
            echo_number: int_field(value, "EchoNumber").and_then(|n| u32::try_from(n).ok()),
            inversion_time: float_field(value, "InversionTime"),
            phase_encoding_direction,
            manufacturer: string_field(value, "Manufacturer"),
            acquisition_date,
            acquisition_time,
            series_number: int_field(value, "SeriesNumber"),
            patient: PatientInfo {
                patient_id: string_field(value, "PatientID"),
                patient_name: string_field(value, "PatientName"),
                patient_birth_date: string_field(value, "PatientBirthDate"),
                patient_sex: string_field(value, "PatientSex"),
                patient_age: string_field(value, "PatientAge"),
            },
            bids_guess: value.get("BidsGuess").and_then(BidsGuess::from_value),
        }
    }
}

/// Classifier outcome for one series
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub datatype: Option<Datatype>,
    pub suffix: Option<Suffix>,
    pub include: bool,
    /// Human-readable reason for the decision
    pub rationale: String,
    pub warnings: Vec<String>,
    /// Localizer/scout series; opens a new section
    pub localizer: bool,
    /// For `fmap/epi`: which kind of target it corrects
    pub corrects: Option<Datatype>,
}

impl Default for Classification {
    fn default() -> Self {
        Self::unresolved()
    }
}

impl Classification {
    /// State before the classifier has run
    pub fn unresolved() -> Self {
        Self {
            datatype: None,
            suffix: None,
            include: false,
            rationale: "Not yet classified".to_string(),
            warnings: Vec::new(),
            localizer: false,
            corrects: None,
        }
    }

    pub fn accepted(datatype: Datatype, suffix: Suffix, rationale: impl Into<String>) -> Self {
        Self {
            datatype: Some(datatype),
            suffix: Some(suffix),
            include: true,
            rationale: rationale.into(),
            warnings: Vec::new(),
            localizer: false,
            corrects: None,
        }
    }

    pub fn excluded(rationale: impl Into<String>) -> Self {
        let mut c = Self::unresolved();
        c.exclude(rationale);
        c
    }

    /// Mark excluded, keeping datatype/suffix for the reviewer
    pub fn exclude(&mut self, rationale: impl Into<String>) {
        let rationale = rationale.into();
        self.include = false;
        self.rationale = if rationale.trim().is_empty() {
            "Excluded".to_string()
        } else {
            rationale
        };
    }

    /// `"exclude"` when not included, `"dt/suffix"` otherwise, `""` if unresolved
    pub fn type_string(&self) -> String {
        if !self.include {
            return "exclude".to_string();
        }
        match (self.datatype, self.suffix) {
            (Some(dt), Some(suffix)) => format!("{}/{}", dt, suffix),
            _ => String::new(),
        }
    }

    /// Included and classified as exactly this datatype/suffix
    pub fn is(&self, datatype: Datatype, suffix: Suffix) -> bool {
        self.include && self.datatype == Some(datatype) && self.suffix == Some(suffix)
    }

    /// Datatype/suffix regardless of inclusion
    pub fn role(&self) -> Option<(Datatype, Suffix)> {
        Some((self.datatype?, self.suffix?))
    }
}

/// One converted series-file pair
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRecord {
    /// Position in the sorted record list
    pub idx: usize,
    pub subject: String,
    pub session: String,
    pub series_number: i64,
    pub series_number_padded: String,
    pub acquisition_date: Option<NaiveDate>,
    pub acquisition_time: Option<NaiveTime>,
    pub series_description: String,
    pub protocol_name: String,
    pub image_type: Vec<String>,
    pub repetition_time: Option<f64>,
    pub echo_time: Option<f64>,
    pub echo_number: Option<u32>,
    pub inversion_time: Option<f64>,
    pub volume_count: u32,
    pub ndim: u8,
    pub phase_encoding: Option<PhaseEncoding>,
    pub manufacturer: String,
    pub image_path: PathBuf,
    pub sidecar_path: PathBuf,
    /// Gradient tables and other companions
    pub aux_paths: Vec<PathBuf>,
    pub file_size: u64,
    pub orientation: Option<String>,
    pub convertible: bool,
    pub errors: Vec<String>,
    pub bids_guess: Option<BidsGuess>,
    pub patient: PatientInfo,

    pub series_idx: Option<usize>,
    pub classification: Classification,
    pub entities: EntityMap,
    /// Records this field map corrects
    pub intended_for: Vec<usize>,
    /// Field-map records that correct this record
    pub corrected_by: Vec<usize>,
    pub section: Option<usize>,
}

impl AcquisitionRecord {
    pub fn new(image_path: PathBuf, sidecar_path: PathBuf, sidecar: &Sidecar) -> Self {
        let series_number = sidecar.series_number.unwrap_or(0);
        Self {
            idx: 0,
            subject: String::new(),
            session: String::new(),
            series_number,
            series_number_padded: format!("{:02}", series_number),
            acquisition_date: sidecar.acquisition_date,
            acquisition_time: sidecar.acquisition_time,
            series_description: sidecar.series_description.clone(),
            protocol_name: sidecar.protocol_name.clone(),
            image_type: sidecar.image_type.clone(),
            repetition_time: sidecar.repetition_time,
            echo_time: sidecar.echo_time,
            echo_number: sidecar.echo_number,
            inversion_time: sidecar.inversion_time,
            volume_count: 1,
            ndim: 3,
            phase_encoding: sidecar
                .phase_encoding_direction
                .as_deref()
                .and_then(PhaseEncoding::parse),
            manufacturer: sidecar.manufacturer.clone(),
            image_path,
            sidecar_path,
            aux_paths: Vec::new(),
            file_size: 0,
            orientation: None,
            convertible: true,
            errors: Vec::new(),
            bids_guess: sidecar.bids_guess.clone(),
            patient: sidecar.patient.clone(),
            series_idx: None,
            classification: Classification::unresolved(),
            entities: EntityMap::new(),
            intended_for: Vec::new(),
            corrected_by: Vec::new(),
            section: None,
        }
    }

    /// Series description, falling back to the protocol name
    pub fn description(&self) -> &str {
        if self.series_description.is_empty() {
            &self.protocol_name
        } else {
            &self.series_description
        }
    }

    /// Both `.bval` and `.bvec` companions are present
    pub fn has_gradient_table(&self) -> bool {
        let has_ext = |ext: &str| {
            self.aux_paths
                .iter()
                .any(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
        };
        has_ext("bval") && has_ext("bvec")
    }

    /// File stem without `.nii.gz` / `.nii` / `.json`
    pub fn file_stem(&self) -> String {
        let name = self
            .image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let mut stem = name;
        for ext in [".nii.gz", ".nii", ".json"] {
            if let Some(s) = stem.strip_suffix(ext) {
                stem = s;
                break;
            }
        }
        stem.to_string()
    }

    /// Phase image: `_ph` filename token or a phase `ImageType`
    pub fn has_phase_marker(&self) -> bool {
        let stem = self.file_stem();
        stem.split('_').any(|t| t.eq_ignore_ascii_case("ph"))
            || self.image_type.iter().any(|t| t == "P" || t == "PHASE")
    }

    pub fn is_magnitude_image(&self) -> bool {
        self.image_type.iter().any(|t| t == "M" || t == "MAGNITUDE")
    }

    pub fn image_type_has(&self, tag: &str) -> bool {
        self.image_type.iter().any(|t| t == tag)
    }

    pub fn assign_series(&mut self, series_idx: usize) {
        self.series_idx = Some(series_idx);
    }

    pub fn apply_classification(&mut self, classification: Classification, entities: EntityMap) {
        self.classification = classification;
        self.entities = entities;
    }

    pub fn exclude(&mut self, rationale: impl Into<String>) {
        self.classification.exclude(rationale);
    }

    pub fn set_section(&mut self, section: usize) {
        self.section = Some(section);
    }

    pub fn set_entity(&mut self, entity: Entity, value: impl Into<String>) {
        self.entities.insert(entity, value.into());
    }

    pub fn set_intended_for(&mut self, targets: Vec<usize>) {
        self.intended_for = targets;
    }

    pub fn add_corrected_by(&mut self, fieldmap: usize) {
        if !self.corrected_by.contains(&fieldmap) {
            self.corrected_by.push(fieldmap);
        }
    }

    pub fn set_identity(&mut self, subject: String, session: String) {
        self.subject = subject;
        self.session = session;
    }
}

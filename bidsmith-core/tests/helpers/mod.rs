//! Shared fixtures for pipeline tests
#![allow(dead_code)]

use bidsmith_common::config::TomlConfig;
use bidsmith_core::manifest::{Manifest, ManifestEntry};
use bidsmith_core::record::AcquisitionRecord;
use bidsmith_core::vocabulary::TaskVocabulary;
use bidsmith_core::{Classified, Pipeline};
use serde_json::{json, Value};

/// Sidecar for one series of subject P01, scanned one minute per series number
pub fn sidecar(description: &str, series_number: i64, extra: Value) -> Value {
    let mut base = json!({
        "SeriesDescription": description,
        "SeriesNumber": series_number,
        "AcquisitionDateTime": format!("2024-03-05T10:{:02}:00", series_number),
        "PatientID": "P01",
        "PatientSex": "F",
        "ImageType": ["ORIGINAL", "PRIMARY", "M", "ND"],
        "EchoTime": 0.03,
        "RepetitionTime": 2.0,
        "Manufacturer": "Siemens"
    });
    if let (Some(fields), Value::Object(extra)) = (base.as_object_mut(), extra) {
        for (key, value) in extra {
            fields.insert(key, value);
        }
    }
    base
}

pub fn entry(file: &str, sidecar: Value) -> ManifestEntry {
    ManifestEntry::inline(format!("/raw/{}", file), sidecar)
}

/// 4-D functional run with 120 volumes
pub fn bold(file: &str, description: &str, series_number: i64) -> ManifestEntry {
    entry(file, sidecar(description, series_number, json!({"PhaseEncodingDirection": "j-"}))).with_volumes(4, 120)
}

/// Spin-echo field map with three volumes
pub fn spin_echo(file: &str, description: &str, series_number: i64, pe: &str) -> ManifestEntry {
    entry(
        file,
        sidecar(
            description,
            series_number,
            json!({"PhaseEncodingDirection": pe, "EchoTime": 0.066, "RepetitionTime": 8.0}),
        ),
    )
    .with_volumes(4, 3)
}

/// Two magnitude images and a phase-difference image from one GRE field map
pub fn gre_set(first_series: i64) -> Vec<ManifestEntry> {
    let magnitude = |echo: u32, te: f64| {
        entry(
            &format!("{}_gre_field_mapping_e{}.nii.gz", first_series, echo),
            sidecar(
                "gre_field_mapping",
                first_series,
                json!({"EchoNumber": echo, "EchoTime": te, "RepetitionTime": 0.5}),
            ),
        )
    };
    let phase = entry(
        &format!("{}_gre_field_mapping_e2_ph.nii.gz", first_series + 1),
        sidecar(
            "gre_field_mapping",
            first_series + 1,
            json!({
                "EchoNumber": 2,
                "EchoTime": 0.00738,
                "RepetitionTime": 0.5,
                "ImageType": ["ORIGINAL", "PRIMARY", "P", "ND"]
            }),
        ),
    );
    vec![magnitude(1, 0.00492), magnitude(2, 0.00738), phase]
}

pub fn pipeline() -> Pipeline {
    Pipeline::new(TomlConfig::default(), TaskVocabulary::builtin())
}

pub fn classify(entries: Vec<ManifestEntry>) -> Classified {
    pipeline()
        .classify(&Manifest::from_entries(entries))
        .expect("pipeline should accept the manifest")
}

/// Record whose image file name is `file`
pub fn record<'a>(classified: &'a Classified, file: &str) -> &'a AcquisitionRecord {
    classified
        .records
        .iter()
        .find(|r| r.image_path.file_name().and_then(|n| n.to_str()) == Some(file))
        .unwrap_or_else(|| panic!("no record for {}", file))
}

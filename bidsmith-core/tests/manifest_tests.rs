//! Manifest loading against files on disk

mod helpers;

use bidsmith_core::manifest::Manifest;
use bidsmith_core::IngestError;
use serde_json::json;
use std::fs;
use tempfile::TempDir;

fn write_json(dir: &TempDir, name: &str, value: &serde_json::Value) {
    fs::write(dir.path().join(name), serde_json::to_string_pretty(value).unwrap()).unwrap();
}

#[test]
fn test_relative_sidecars_resolve_against_manifest_dir() {
    let dir = TempDir::new().unwrap();
    write_json(
        &dir,
        "5_rest_fMRI.json",
        &helpers::sidecar("rest_fMRI", 5, json!({"PhaseEncodingDirection": "j-"})),
    );
    write_json(
        &dir,
        "manifest.json",
        &json!({"entries": [{
            "image": "5_rest_fMRI.nii.gz",
            "sidecar": "5_rest_fMRI.json",
            "ndim": 4,
            "volume_count": 200,
            "file_size": 1024
        }]}),
    );

    let manifest = Manifest::load(&dir.path().join("manifest.json")).unwrap();
    let document = helpers::pipeline().run(&manifest).unwrap();

    assert_eq!(document.objects.len(), 1);
    let object = &document.objects[0];
    assert_eq!(object.kind, "func/bold");
    assert_eq!(object.sidecar_path, dir.path().join("5_rest_fMRI.json"));
    assert_eq!(object.analysis_results.volume_count, 200);
    assert_eq!(document.subjects[0].subject, "P01");
}

#[test]
fn test_missing_sidecar_file_is_excluded_not_fatal() {
    let dir = TempDir::new().unwrap();
    write_json(&dir, "2_t1.json", &helpers::sidecar("t1_mprage", 2, json!({})));
    write_json(
        &dir,
        "manifest.json",
        &json!({"entries": [
            {"image": "2_t1.nii.gz", "sidecar": "2_t1.json"},
            {"image": "3_gone.nii.gz", "sidecar": "3_gone.json"}
        ]}),
    );

    let manifest = Manifest::load(&dir.path().join("manifest.json")).unwrap();
    let classified = helpers::pipeline().classify(&manifest).unwrap();
    let gone = classified
        .records
        .iter()
        .find(|r| r.image_path.ends_with("3_gone.nii.gz"))
        .unwrap();
    assert!(!gone.convertible);
    assert!(!gone.classification.include);
    assert!(gone.classification.rationale.contains("cannot read sidecar"));
}

#[test]
fn test_empty_manifest_aborts() {
    let dir = TempDir::new().unwrap();
    write_json(&dir, "manifest.json", &json!({"entries": []}));
    let err = Manifest::load(&dir.path().join("manifest.json")).unwrap_err();
    assert!(matches!(err, IngestError::EmptyManifest(_)));
}

#[test]
fn test_malformed_manifest_aborts() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("manifest.json"), "{ not json").unwrap();
    let err = Manifest::load(&dir.path().join("manifest.json")).unwrap_err();
    assert!(matches!(err, IngestError::MalformedManifest(_)));
}

#[test]
fn test_no_readable_sidecar_aborts() {
    let dir = TempDir::new().unwrap();
    write_json(
        &dir,
        "manifest.json",
        &json!({"entries": [{"image": "1.nii.gz", "sidecar": "missing.json"}]}),
    );
    let manifest = Manifest::load(&dir.path().join("manifest.json")).unwrap();
    let err = helpers::pipeline().classify(&manifest).unwrap_err();
    assert!(matches!(err, IngestError::MalformedManifest(_)));
}

//! End-to-end classification scenarios

mod helpers;

use bidsmith_core::bids::{Datatype, Entity, Suffix};
use helpers::*;
use serde_json::json;

#[test]
fn test_spin_echo_pair_corrects_both_functional_runs() {
    let classified = classify(vec![
        spin_echo("3_se_fieldmap_AP.nii.gz", "se_fieldmap_AP", 3, "j-"),
        spin_echo("4_se_fieldmap_PA.nii.gz", "se_fieldmap_PA", 4, "j"),
        bold("5_rest_fMRI.nii.gz", "rest_fMRI", 5),
        bold("6_nback_fMRI.nii.gz", "nback_fMRI", 6),
    ]);

    let rest = record(&classified, "5_rest_fMRI.nii.gz");
    let nback = record(&classified, "6_nback_fMRI.nii.gz");
    for file in ["3_se_fieldmap_AP.nii.gz", "4_se_fieldmap_PA.nii.gz"] {
        let map = record(&classified, file);
        assert!(map.classification.is(Datatype::Fmap, Suffix::Epi), "{}", map.classification.rationale);
        assert_eq!(map.intended_for, vec![rest.idx, nback.idx]);
    }
    assert_eq!(rest.corrected_by.len(), 2);

    let ap = record(&classified, "3_se_fieldmap_AP.nii.gz");
    assert_eq!(ap.entities.get(&Entity::Direction).map(String::as_str), Some("AP"));

    let document = pipeline()
        .run(&bidsmith_core::manifest::Manifest::from_entries(vec![
            spin_echo("3_se_fieldmap_AP.nii.gz", "se_fieldmap_AP", 3, "j-"),
            spin_echo("4_se_fieldmap_PA.nii.gz", "se_fieldmap_PA", 4, "j"),
            bold("5_rest_fMRI.nii.gz", "rest_fMRI", 5),
            bold("6_nback_fMRI.nii.gz", "nback_fMRI", 6),
        ]))
        .unwrap();
    let bold_series: Vec<usize> = document
        .series
        .iter()
        .filter(|s| s.kind == "func/bold")
        .map(|s| s.series_idx)
        .collect();
    assert_eq!(bold_series.len(), 2);
    assert_eq!(document.series[0].intended_for, bold_series);
}

#[test]
fn test_single_spin_echo_needs_pair() {
    let classified = classify(vec![
        spin_echo("3_se_fieldmap_AP.nii.gz", "se_fieldmap_AP", 3, "j-"),
        bold("5_rest_fMRI.nii.gz", "rest_fMRI", 5),
    ]);

    let map = record(&classified, "3_se_fieldmap_AP.nii.gz");
    assert!(!map.classification.include);
    assert!(map.classification.rationale.contains("needs pair"));
    assert!(map.intended_for.is_empty());
    assert!(record(&classified, "5_rest_fMRI.nii.gz").corrected_by.is_empty());
}

#[test]
fn test_mprage_without_norm_gets_cnr_caveat() {
    let classified = classify(vec![entry(
        "2_t1_mprage_sag.nii.gz",
        helpers::sidecar("t1_mprage_sag", 2, json!({"EchoTime": 0.0029, "RepetitionTime": 2.3})),
    )]);

    let t1 = record(&classified, "2_t1_mprage_sag.nii.gz");
    assert!(t1.classification.is(Datatype::Anat, Suffix::T1w));
    assert!(t1.classification.rationale.contains("CNR caveat"));
    assert!(t1.classification.rationale.contains("mprage"));
}

#[test]
fn test_repeated_magnitude_phase_sets_keep_most_recent() {
    let mut entries = gre_set(5);
    entries.extend(gre_set(7));
    entries.push(bold("9_rest_fMRI.nii.gz", "rest_fMRI", 9));
    let classified = classify(entries);
    let rest = record(&classified, "9_rest_fMRI.nii.gz");

    for file in [
        "5_gre_field_mapping_e1.nii.gz",
        "5_gre_field_mapping_e2.nii.gz",
        "6_gre_field_mapping_e2_ph.nii.gz",
    ] {
        let r = record(&classified, file);
        assert!(!r.classification.include, "{} should be excluded", file);
        assert!(r.classification.rationale.contains("Multiple sets"));
    }

    let kept = [
        ("7_gre_field_mapping_e1.nii.gz", Suffix::Magnitude1),
        ("7_gre_field_mapping_e2.nii.gz", Suffix::Magnitude2),
        ("8_gre_field_mapping_e2_ph.nii.gz", Suffix::Phasediff),
    ];
    for (file, suffix) in kept {
        let r = record(&classified, file);
        assert!(r.classification.is(Datatype::Fmap, suffix), "{}: {}", file, r.classification.rationale);
        assert_eq!(r.intended_for, vec![rest.idx]);
    }
}

#[test]
fn test_resting_state_bold_gets_task() {
    let classified = classify(vec![bold("5_rest_fMRI.nii.gz", "rest_fMRI", 5)]);

    let rest = record(&classified, "5_rest_fMRI.nii.gz");
    assert!(rest.classification.is(Datatype::Func, Suffix::Bold));
    assert_eq!(rest.entities.get(&Entity::Task).map(String::as_str), Some("rest"));
    assert!(rest.classification.warnings.is_empty());
}

#[test]
fn test_localizer_opens_new_section() {
    let localizer = |file: &str, n: i64| {
        entry(file, helpers::sidecar("localizer", n, json!({"EchoTime": 0.004, "RepetitionTime": 0.0086})))
            .with_volumes(3, 1)
    };
    let classified = classify(vec![
        localizer("1_localizer.nii.gz", 1),
        bold("2_rest_fMRI.nii.gz", "rest_fMRI", 2),
        localizer("3_localizer.nii.gz", 3),
        bold("4_rest_fMRI.nii.gz", "rest_fMRI", 4),
    ]);

    let first = record(&classified, "1_localizer.nii.gz");
    assert!(!first.classification.include);
    assert!(first.classification.localizer);
    assert_eq!(record(&classified, "2_rest_fMRI.nii.gz").section, Some(1));
    assert_eq!(record(&classified, "4_rest_fMRI.nii.gz").section, Some(2));

    // Repeated runs of one task are numbered
    assert_eq!(
        record(&classified, "4_rest_fMRI.nii.gz").entities.get(&Entity::Run).map(String::as_str),
        Some("2")
    );
}

//! Datatype/suffix classifier
//!
//! **Precedence (first success wins):**
//! 1. Unreadable source → excluded
//! 2. Path hints: a `/<datatype>/` directory and/or a trailing `_<suffix>`
//!    filename token. A datatype-only hint restricts the rule search.
//! 3. The converter's own `BidsGuess`, unless it names a localizer or an
//!    unknown datatype
//! 4. Rule table: first entry whose search term matches and whose
//!    conditions all pass. A matching entry with failing conditions becomes
//!    the best guess in an exclusion rationale, never an acceptance
//! 5. Nothing matched → excluded
//!
//! Two corrective passes run after every series is classified: low-volume
//! or b0 diffusion series become `fmap/epi`, and individual echoes of a
//! combined-echo (mean/rms) anatomical series are excluded.

use crate::bids::{Datatype, Suffix};
use crate::record::{AcquisitionRecord, Classification};
use crate::reducer::UniqueSeries;
use crate::rules::{
    description_has, first_term, Predicate, RuleEntry, RuleTable, B0_MARKERS, COMBINED_ECHO_MARKERS,
    DIFFUSION_TERMS, LOCALIZER_TERMS,
};
use crate::sequence::SeriesView;
use crate::text::normalize;
use bidsmith_common::config::ClassificationSettings;
use tracing::{debug, info};

/// Filename tokens too generic to name a suffix; some still imply a datatype
const ROLE_SYNONYMS: &[(&str, Option<Datatype>)] = &[
    ("fieldmap", Some(Datatype::Fmap)),
    ("magnitude", Some(Datatype::Fmap)),
    ("epi", Some(Datatype::Fmap)),
    ("physio", Some(Datatype::Func)),
    ("events", None),
    ("sbref", None),
    ("stim", None),
];

/// Anatomical suffixes that get the CNR caveat without a NORM tag
const NORM_CAVEAT_SUFFIXES: &[Suffix] = &[
    Suffix::T1w,
    Suffix::T2w,
    Suffix::Flair,
    Suffix::PDw,
    Suffix::T2starw,
    Suffix::Pdt2,
];

const CNR_CAVEAT: &str = "CNR caveat: ImageType has no NORM tag, so this image was not \
     intensity-normalized and may show lower contrast-to-noise than a normalized version.";

/// What the file path says about a series
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PathHint {
    pub datatype: Option<Datatype>,
    pub suffix: Option<Suffix>,
}

/// Read datatype and suffix hints from an image path
pub fn path_hint(record: &AcquisitionRecord) -> PathHint {
    let mut hint = PathHint::default();

    if let Some(parent) = record.image_path.parent() {
        hint.datatype = parent
            .iter()
            .filter_map(|c| c.to_str())
            .find_map(|c| Datatype::ALL.iter().copied().find(|d| d.as_str() == c));
    }

    let stem = record.file_stem();
    let token = stem.rsplit('_').next().unwrap_or_default();
    if token.is_empty() || token == stem {
        return hint;
    }

    if let Some((_, implied)) = ROLE_SYNONYMS.iter().find(|(t, _)| *t == token) {
        if hint.datatype.is_none() {
            hint.datatype = *implied;
        }
    } else {
        hint.suffix = Suffix::parse(token);
    }
    hint
}

/// Classifies unique series against a rule table
pub struct Classifier<'a> {
    table: &'a RuleTable,
    settings: &'a ClassificationSettings,
}

impl<'a> Classifier<'a> {
    pub fn new(table: &'a RuleTable, settings: &'a ClassificationSettings) -> Self {
        Self { table, settings }
    }

    /// Classify one series, then apply the accepted-series annotations
    pub fn classify(&self, view: &SeriesView<'_>) -> Classification {
        let record = view.current();

        if !record.convertible {
            let detail = if record.errors.is_empty() {
                "implausible pixel data".to_string()
            } else {
                record.errors.join("; ")
            };
            return Classification::excluded(format!(
                "Source file is unreadable or malformed ({})",
                detail
            ));
        }

        let hint = path_hint(record);
        if let Some(c) = self.from_path(&hint) {
            return self.finalize(c, record);
        }

        if let Some(c) = self.from_guess(record) {
            return if c.include { self.finalize(c, record) } else { c };
        }

        let c = self.from_rules(view, hint.datatype);
        if c.include {
            self.finalize(c, record)
        } else {
            c
        }
    }

    fn from_path(&self, hint: &PathHint) -> Option<Classification> {
        let suffix = hint.suffix?;
        let datatype = match hint.datatype {
            Some(dt) => {
                self.table.lookup(dt, suffix)?;
                dt
            }
            None => *self.table.datatypes_for(suffix).first()?,
        };
        Some(Classification::accepted(
            datatype,
            suffix,
            format!("Classified as {}/{} from the file path", datatype, suffix),
        ))
    }

    fn from_guess(&self, record: &AcquisitionRecord) -> Option<Classification> {
        let guess = record.bids_guess.as_ref()?;
        let label = guess.label.to_ascii_lowercase();
        let guessed_type = guess.datatype.to_ascii_lowercase();

        if guessed_type == "discard"
            || guessed_type == "localizer"
            || first_term(&label, LOCALIZER_TERMS).is_some()
        {
            let mut c = Classification::excluded(format!(
                "Converter guessed a localizer/scout series ({} {}); localizers are not converted",
                guess.datatype, guess.label
            ));
            c.localizer = true;
            return Some(c);
        }

        let datatype = Datatype::parse(&guess.datatype)?;
        let suffix = Suffix::parse(guess.suffix_token())?;
        self.table.lookup(datatype, suffix)?;
        Some(Classification::accepted(
            datatype,
            suffix,
            format!("Classified as {}/{} from the converter's own guess", datatype, suffix),
        ))
    }

    fn from_rules(&self, view: &SeriesView<'_>, restrict: Option<Datatype>) -> Classification {
        let record = view.current();
        let description = record.description();

        if description.trim().is_empty() {
            return Classification::excluded(
                "Insufficient information to classify: no series description or protocol name",
            );
        }

        if let Some(term) = first_term(description, LOCALIZER_TERMS) {
            if record.volume_count <= self.settings.max_fmap_volumes {
                let mut c = Classification::excluded(format!(
                    "Localizer/scout series (description matched '{}'); localizers are not converted",
                    term.trim_matches('_')
                ));
                c.localizer = true;
                return c;
            }
        }

        let mut best: Option<(&RuleEntry, &str, Vec<String>)> = None;
        for entry in self.table.searchable(restrict) {
            let Some(term) = entry.matched_term(description) else {
                continue;
            };
            let failures = entry.failures(view);
            if failures.is_empty() {
                let mut rationale = format!(
                    "Description matched '{}' for {}/{}",
                    term.trim_matches('_'),
                    entry.datatype,
                    entry.suffix
                );
                if !entry.conditions.is_empty() {
                    let satisfied: Vec<String> = entry.conditions.iter().map(|c| c.describe()).collect();
                    rationale.push_str(&format!("; satisfied: {}", satisfied.join(", ")));
                }
                return Classification::accepted(entry.datatype, entry.suffix, rationale);
            }

            let explained: Vec<String> = failures.iter().map(|c| c.explain(view)).collect();
            let better = best
                .as_ref()
                .map_or(true, |(_, _, prev)| explained.len() < prev.len());
            if better {
                best = Some((entry, term, explained));
            }
        }

        match best {
            Some((entry, term, failures)) => Classification::excluded(format!(
                "Best guess {}/{} (description matched '{}') was rejected: {}",
                entry.datatype,
                entry.suffix,
                term.trim_matches('_'),
                failures.join("; ")
            )),
            None => Classification::excluded(format!(
                "Insufficient information to classify: description '{}' matches no rule",
                description
            )),
        }
    }

    /// Annotations for accepted series: CNR caveat, field-map target kind
    fn finalize(&self, mut c: Classification, record: &AcquisitionRecord) -> Classification {
        let Some((datatype, suffix)) = c.role() else {
            return c;
        };

        if datatype == Datatype::Anat
            && NORM_CAVEAT_SUFFIXES.contains(&suffix)
            && !record.image_type_has("NORM")
        {
            c.rationale.push_str(". ");
            c.rationale.push_str(CNR_CAVEAT);
        }

        if datatype == Datatype::Fmap && suffix == Suffix::Epi {
            c.corrects = Some(epi_target_kind(record.description()));
        }
        c
    }

    /// Classify every series not already resolved from a reference document
    pub fn classify_all(&self, series: &mut [UniqueSeries]) {
        let results: Vec<Option<Classification>> = (0..series.len())
            .map(|i| {
                if series[i].from_reference {
                    return None;
                }
                SeriesView::new(series, i).map(|view| self.classify(&view))
            })
            .collect();

        for (s, result) in series.iter_mut().zip(results) {
            if let Some(c) = result {
                debug!(
                    series_idx = s.series_idx,
                    kind = %c.type_string(),
                    rationale = %c.rationale,
                    "Classified series"
                );
                s.classification = c;
            }
        }

        reclassify_low_volume_dwi(series, self.settings);
        exclude_individual_echoes(series);

        let included = series.iter().filter(|s| s.classification.include).count();
        info!(series = series.len(), included, "Classification complete");
    }
}

/// Kind of series an `fmap/epi` corrects, judged from its description
pub fn epi_target_kind(description: &str) -> Datatype {
    if description_has(description, DIFFUSION_TERMS) || description_has(description, B0_MARKERS) {
        Datatype::Dwi
    } else {
        Datatype::Func
    }
}

/// Diffusion series that are really b=0 field maps become `fmap/epi`
pub fn reclassify_low_volume_dwi(series: &mut [UniqueSeries], settings: &ClassificationSettings) {
    for s in series.iter_mut().filter(|s| !s.from_reference) {
        if !s.classification.is(Datatype::Dwi, Suffix::Dwi) {
            continue;
        }
        let record = &s.record;
        let low_volume =
            record.volume_count <= settings.low_volume_dwi_threshold && !record.has_gradient_table();
        let b0 = description_has(record.description(), B0_MARKERS);
        if !(low_volume || b0) {
            continue;
        }

        let reason = if b0 {
            "description marks a b0 map".to_string()
        } else {
            format!(
                "only {} volume(s) and no gradient table",
                record.volume_count
            )
        };
        let mut c = Classification::accepted(
            Datatype::Fmap,
            Suffix::Epi,
            format!("Reclassified from dwi/dwi to fmap/epi: {}", reason),
        );
        c.corrects = Some(Datatype::Dwi);
        c.warnings = std::mem::take(&mut s.classification.warnings);
        debug!(series_idx = s.series_idx, %reason, "Diffusion series reclassified as field map");
        s.classification = c;
    }
}

fn combined_echo_base(description: &str) -> Option<String> {
    let normalized = normalize(description);
    let tokens: Vec<&str> = normalized.split('_').collect();
    if !tokens.iter().any(|t| COMBINED_ECHO_MARKERS.contains(t)) {
        return None;
    }
    Some(
        tokens
            .into_iter()
            .filter(|t| !COMBINED_ECHO_MARKERS.contains(t))
            .collect::<Vec<_>>()
            .join("_"),
    )
}

/// Exclude single echoes when a combined-echo anatomical series exists
pub fn exclude_individual_echoes(series: &mut [UniqueSeries]) {
    let combined: Vec<(usize, String)> = series
        .iter()
        .filter(|s| s.classification.include && s.classification.datatype == Some(Datatype::Anat))
        .filter_map(|s| combined_echo_base(s.record.description()).map(|base| (s.series_idx, base)))
        .collect();

    for (combined_idx, base) in &combined {
        for s in series.iter_mut().filter(|s| !s.from_reference) {
            if s.series_idx == *combined_idx
                || !s.classification.include
                || s.classification.datatype != Some(Datatype::Anat)
                || normalize(s.record.description()) != *base
            {
                continue;
            }
            debug!(series_idx = s.series_idx, combined = combined_idx, "Excluding individual echo");
            s.classification.exclude(format!(
                "Individual echo of combined-echo series {}; the combined image is kept instead",
                combined_idx
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bids::PhaseEncoding;
    use crate::record::{BidsGuess, Sidecar};
    use crate::reducer::reduce;
    use std::path::PathBuf;

    struct Spec {
        desc: &'static str,
        path: &'static str,
        ndim: u8,
        volumes: u32,
        echo: Option<u32>,
        image_type: &'static [&'static str],
        pe: Option<&'static str>,
    }

    fn spec(desc: &'static str, path: &'static str) -> Spec {
        Spec {
            desc,
            path,
            ndim: 3,
            volumes: 1,
            echo: None,
            image_type: &["ORIGINAL", "PRIMARY", "M", "ND"],
            pe: None,
        }
    }

    fn build(specs: Vec<Spec>) -> Vec<UniqueSeries> {
        let mut records: Vec<AcquisitionRecord> = specs
            .into_iter()
            .enumerate()
            .map(|(i, s)| {
                let sidecar = Sidecar {
                    series_description: s.desc.to_string(),
                    echo_number: s.echo,
                    echo_time: Some(0.001 * (i as f64 + 1.0)),
                    image_type: s.image_type.iter().map(|t| t.to_string()).collect(),
                    ..Sidecar::default()
                };
                let mut r = AcquisitionRecord::new(PathBuf::from(s.path), PathBuf::new(), &sidecar);
                r.idx = i;
                r.ndim = s.ndim;
                r.volume_count = s.volumes;
                r.phase_encoding = s.pe.and_then(PhaseEncoding::parse);
                r
            })
            .collect();
        reduce(&mut records, 0.1, false)
    }

    fn run(series: &mut [UniqueSeries]) {
        let settings = ClassificationSettings::default();
        let table = RuleTable::standard(&settings);
        Classifier::new(&table, &settings).classify_all(series);
    }

    #[test]
    fn test_mprage_is_t1w_with_cnr_caveat() {
        let mut series = build(vec![spec("t1_mprage_sag", "/raw/2_t1_mprage_sag.nii.gz")]);
        run(&mut series);
        let c = &series[0].classification;
        assert!(c.is(Datatype::Anat, Suffix::T1w));
        assert!(c.rationale.contains("CNR caveat"));
    }

    #[test]
    fn test_norm_tag_suppresses_caveat() {
        let mut s = spec("t1_mprage_sag", "/raw/2_t1.nii.gz");
        s.image_type = &["ORIGINAL", "PRIMARY", "M", "NORM"];
        let mut series = build(vec![s]);
        run(&mut series);
        assert!(!series[0].classification.rationale.contains("CNR"));
    }

    #[test]
    fn test_unreadable_is_excluded() {
        let mut series = build(vec![spec("rest", "/raw/1.nii.gz")]);
        series[0].record.convertible = false;
        run(&mut series);
        let c = &series[0].classification;
        assert!(!c.include);
        assert!(c.rationale.contains("unreadable"));
    }

    #[test]
    fn test_path_hint_wins_over_description() {
        let mut series = build(vec![spec("mystery", "/bids/sub-01/anat/sub-01_T2w.nii.gz")]);
        run(&mut series);
        assert!(series[0].classification.is(Datatype::Anat, Suffix::T2w));
    }

    #[test]
    fn test_path_datatype_restricts_search() {
        let hint = path_hint(&build(vec![spec("x", "/d/func/7_fieldmap.nii.gz")])[0].record);
        assert_eq!(hint.datatype, Some(Datatype::Func));
        assert_eq!(hint.suffix, None);

        let hint = path_hint(&build(vec![spec("x", "/d/7_gre_fieldmap.nii.gz")])[0].record);
        assert_eq!(hint.datatype, Some(Datatype::Fmap));
    }

    #[test]
    fn test_localizer_guess_excluded() {
        let mut series = build(vec![spec("AAHead_Scout", "/raw/1.nii.gz")]);
        series[0].record.bids_guess = Some(BidsGuess {
            datatype: "discard".to_string(),
            label: "_acq-AAHead_Scout".to_string(),
        });
        run(&mut series);
        let c = &series[0].classification;
        assert!(!c.include);
        assert!(c.localizer);
    }

    #[test]
    fn test_guess_accepted() {
        let mut series = build(vec![spec("cmrr_mbep2d", "/raw/1.nii.gz")]);
        series[0].record.bids_guess = Some(BidsGuess {
            datatype: "func".to_string(),
            label: "_task-rest_bold".to_string(),
        });
        run(&mut series);
        assert!(series[0].classification.is(Datatype::Func, Suffix::Bold));
    }

    #[test]
    fn test_unknown_guess_falls_through_to_rules() {
        let mut s = spec("rest_fmri", "/raw/1.nii.gz");
        s.ndim = 4;
        s.volumes = 200;
        let mut series = build(vec![s]);
        series[0].record.bids_guess = Some(BidsGuess {
            datatype: "perf".to_string(),
            label: "_asl".to_string(),
        });
        run(&mut series);
        assert!(series[0].classification.is(Datatype::Func, Suffix::Bold));
    }

    #[test]
    fn test_localizer_description_excluded() {
        let mut series = build(vec![spec("localizer_3plane", "/raw/1.nii.gz")]);
        run(&mut series);
        assert!(series[0].classification.localizer);
        assert!(!series[0].classification.include);
    }

    #[test]
    fn test_near_miss_keeps_best_guess_in_rationale() {
        let mut s = spec("rest_fmri", "/raw/1.nii.gz");
        s.ndim = 3;
        s.volumes = 1;
        let mut series = build(vec![s]);
        run(&mut series);
        let c = &series[0].classification;
        assert!(!c.include);
        assert!(c.datatype.is_none());
        assert!(c.rationale.contains("Best guess func/"));
    }

    #[test]
    fn test_no_match() {
        let mut series = build(vec![spec("qwerty", "/raw/1.nii.gz")]);
        run(&mut series);
        assert!(series[0].classification.rationale.contains("matches no rule"));
    }

    #[test]
    fn test_bold_and_sbref() {
        let sbref = spec("rest_fmri_SBRef", "/raw/4.nii.gz");
        let mut bold = spec("rest_fmri", "/raw/5.nii.gz");
        bold.ndim = 4;
        bold.volumes = 300;
        let mut series = build(vec![sbref, bold]);
        run(&mut series);
        assert!(series[0].classification.is(Datatype::Func, Suffix::Sbref));
        assert!(series[1].classification.is(Datatype::Func, Suffix::Bold));
    }

    #[test]
    fn test_gre_fieldmap_roles() {
        let mut mag1 = spec("gre_field_mapping", "/raw/5_gre_field_mapping_e1.nii.gz");
        mag1.echo = Some(1);
        let mut mag2 = spec("gre_field_mapping", "/raw/5_gre_field_mapping_e2.nii.gz");
        mag2.echo = Some(2);
        let mut diff = spec("gre_field_mapping", "/raw/6_gre_field_mapping_e2_ph.nii.gz");
        diff.echo = Some(2);
        diff.image_type = &["ORIGINAL", "PRIMARY", "P", "ND"];
        let mut series = build(vec![mag1, mag2, diff]);
        run(&mut series);
        assert!(series[0].classification.is(Datatype::Fmap, Suffix::Magnitude1));
        assert!(series[1].classification.is(Datatype::Fmap, Suffix::Magnitude2));
        assert!(series[2].classification.is(Datatype::Fmap, Suffix::Phasediff));
    }

    #[test]
    fn test_phase1_phase2() {
        let mut p1 = spec("gre_field_mapping", "/raw/6_gre_field_mapping_e1_ph.nii.gz");
        p1.echo = Some(1);
        p1.image_type = &["ORIGINAL", "PRIMARY", "P", "ND"];
        let mut p2 = spec("gre_field_mapping", "/raw/6_gre_field_mapping_e2_ph.nii.gz");
        p2.echo = Some(2);
        p2.image_type = &["ORIGINAL", "PRIMARY", "P", "ND"];
        let mut series = build(vec![p1, p2]);
        run(&mut series);
        assert!(series[0].classification.is(Datatype::Fmap, Suffix::Phase1));
        assert!(series[1].classification.is(Datatype::Fmap, Suffix::Phase2));
    }

    #[test]
    fn test_spin_echo_fieldmap_targets_func() {
        let mut s = spec("SpinEchoFieldMap_AP", "/raw/3.nii.gz");
        s.volumes = 3;
        s.pe = Some("j-");
        let mut series = build(vec![s]);
        run(&mut series);
        let c = &series[0].classification;
        assert!(c.is(Datatype::Fmap, Suffix::Epi));
        assert_eq!(c.corrects, Some(Datatype::Func));
    }

    #[test]
    fn test_low_volume_dwi_becomes_fieldmap() {
        let mut s = spec("dMRI_PA", "/raw/9.nii.gz");
        s.ndim = 4;
        s.volumes = 2;
        let mut series = build(vec![s]);
        run(&mut series);
        let c = &series[0].classification;
        assert!(c.is(Datatype::Fmap, Suffix::Epi));
        assert_eq!(c.corrects, Some(Datatype::Dwi));
        assert!(c.rationale.contains("Reclassified"));
    }

    #[test]
    fn test_derived_dwi_map_excluded() {
        let mut s = spec("dwi_ADC", "/raw/10.nii.gz");
        s.image_type = &["DERIVED", "PRIMARY", "DIFFUSION", "ADC"];
        let mut series = build(vec![s]);
        run(&mut series);
        let c = &series[0].classification;
        assert!(!c.include);
        assert!(c.rationale.contains("derived diffusion map"));
    }

    #[test]
    fn test_individual_echoes_excluded_when_combined_exists() {
        let echo1 = spec("T1w_MEMPRAGE", "/raw/2_e1.nii.gz");
        let echo2 = spec("T1w_MEMPRAGE", "/raw/2_e2.nii.gz");
        let rms = spec("T1w_MEMPRAGE_RMS", "/raw/3.nii.gz");
        let mut series = build(vec![echo1, echo2, rms]);
        run(&mut series);
        assert!(!series[0].classification.include);
        assert!(!series[1].classification.include);
        assert!(series[0].classification.rationale.contains("combined-echo"));
        assert!(series[2].classification.is(Datatype::Anat, Suffix::T1w));
    }

    #[test]
    fn test_reviewed_echo_survives_combined_series() {
        let echo1 = spec("T1w_MEMPRAGE", "/raw/2_e1.nii.gz");
        let echo2 = spec("T1w_MEMPRAGE", "/raw/2_e2.nii.gz");
        let rms = spec("T1w_MEMPRAGE_RMS", "/raw/3.nii.gz");
        let mut series = build(vec![echo1, echo2, rms]);
        series[0].classification =
            Classification::accepted(Datatype::Anat, Suffix::T1w, "Taken from reference document as anat/T1w");
        series[0].from_reference = true;
        run(&mut series);
        assert!(series[0].classification.include);
        assert!(series[0].classification.is(Datatype::Anat, Suffix::T1w));
        assert!(!series[1].classification.include);
    }
}

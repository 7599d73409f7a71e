//! Rule table
//!
//! An ordered list of (datatype, suffix) entries. Each entry carries search
//! terms matched against the normalized series description, the entities
//! the suffix accepts and requires, and a fixed list of eligibility
//! conditions evaluated through the [`Predicate`] interface.
//!
//! Entry order matters: the classifier takes the first entry whose terms
//! match and whose conditions all pass, so more specific entries come
//! before broader ones (`t1map` before `t1`, `sbref` before `bold`).
//! Entries with no search terms are reachable only from path hints and the
//! converter's guess; they exist so every suffix has an entity whitelist.

use crate::bids::{Datatype, Entity, Suffix};
use crate::sequence::SeriesView;
use crate::text::padded;
use bidsmith_common::config::ClassificationSettings;

/// Localizer/scout descriptions; these open new sections
pub const LOCALIZER_TERMS: &[&str] = &[
    "localizer", "localiser", "scout", "survey", "aahead", "_3plane_", "tri_plane", "_loc_",
];

/// Diffusion descriptions
pub const DIFFUSION_TERMS: &[&str] = &[
    "dwi", "dti", "dmri", "_diff", "diffusion", "hardi", "_dsi_", "_dw_", "noddi",
];

/// Diffusion b=0 acquisitions used as field maps
pub const B0_MARKERS: &[&str] = &["_b0_", "_b0s_", "bzero", "_nodif_"];

/// Combined-echo (mean/rms) anatomical series
pub const COMBINED_ECHO_MARKERS: &[&str] = &["mean", "rms"];

/// Derived diffusion maps that are not raw dwi data
pub const DERIVED_DIFFUSION_TAGS: &[&str] = &["ADC", "TRACEW", "FA", "COLFA", "TENSOR", "EXP"];

const FIELDMAP_TERMS: &[&str] = &[
    "fmap", "fieldmap", "field_map", "field_mapping", "spinecho", "spin_echo", "_se_epi", "sefmri",
    "pepolar", "topup", "_se_", "distortion", "grefieldmap",
];
const SBREF_TERMS: &[&str] = &["sbref", "_sbr_", "single_band"];
const BOLD_TERMS: &[&str] = &[
    "bold", "func", "fmri", "fcmri", "rsfmri", "rsbold", "resting", "_rest", "task", "_ep2d_",
    "mbep2d", "_run_",
];

const ANAT_ENTITIES: &[Entity] = &[
    Entity::Task,
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Run,
    Entity::Part,
    Entity::Chunk,
];
const ANAT_MAP_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Run,
];
const ECHO_COLLECTION_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Run,
    Entity::Echo,
    Entity::Part,
    Entity::Chunk,
];
const FLIP_COLLECTION_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Run,
    Entity::Flip,
    Entity::Part,
    Entity::Chunk,
];
const INV_COLLECTION_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Run,
    Entity::Inversion,
    Entity::Part,
    Entity::Chunk,
];
const MP2RAGE_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Run,
    Entity::Echo,
    Entity::Flip,
    Entity::Inversion,
    Entity::Part,
    Entity::Chunk,
];
const FUNC_ENTITIES: &[Entity] = &[
    Entity::Task,
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Direction,
    Entity::Run,
    Entity::Echo,
    Entity::Part,
    Entity::Chunk,
];
const FUNC_AUX_ENTITIES: &[Entity] = &[
    Entity::Task,
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Direction,
    Entity::Run,
    Entity::Recording,
];
const DWI_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Reconstruction,
    Entity::Direction,
    Entity::Run,
    Entity::Part,
    Entity::Chunk,
];
const FMAP_GRE_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Run,
    Entity::Chunk,
];
const FMAP_EPI_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Direction,
    Entity::Run,
    Entity::Part,
    Entity::Chunk,
];
const FMAP_B1_ENTITIES: &[Entity] = &[
    Entity::Acquisition,
    Entity::Ceagent,
    Entity::Reconstruction,
    Entity::Flip,
    Entity::Inversion,
    Entity::Part,
    Entity::Run,
    Entity::Chunk,
];
const PET_ENTITIES: &[Entity] = &[
    Entity::Task,
    Entity::Tracer,
    Entity::Reconstruction,
    Entity::Run,
];
const BLOOD_ENTITIES: &[Entity] = &[
    Entity::Task,
    Entity::Tracer,
    Entity::Reconstruction,
    Entity::Run,
    Entity::Recording,
];
const MEG_ENTITIES: &[Entity] = &[
    Entity::Task,
    Entity::Acquisition,
    Entity::Run,
    Entity::Processing,
    Entity::Split,
];
const BEH_ENTITIES: &[Entity] = &[Entity::Task, Entity::Acquisition, Entity::Run];

const REQUIRE_NONE: &[Entity] = &[];
const REQUIRE_TASK: &[Entity] = &[Entity::Task];
const REQUIRE_DIRECTION: &[Entity] = &[Entity::Direction];
const REQUIRE_INVERSION: &[Entity] = &[Entity::Inversion];
const REQUIRE_ECHO: &[Entity] = &[Entity::Echo];
const REQUIRE_FLIP: &[Entity] = &[Entity::Flip];
const REQUIRE_BLOOD: &[Entity] = &[Entity::Recording];

/// Boolean test over a series and its neighbors
pub trait Predicate {
    fn name(&self) -> &'static str;
    fn check(&self, view: &SeriesView<'_>) -> bool;
    /// What the predicate requires
    fn describe(&self) -> String;
    /// Why it failed for this series
    fn explain(&self, view: &SeriesView<'_>) -> String;
}

/// Eligibility conditions used by the rule table
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    MaxVolumes(u32),
    MinVolumes(u32),
    ExactVolumes(u32),
    Dimensionality(u8),
    EchoNumber(u32),
    EchoNumberAbsent,
    PhaseMarker,
    NoPhaseMarker,
    /// One or two series back is an echo-1 phase image
    PriorPhaseOne,
    NoPriorPhaseOne,
    PhaseEncodingPresent,
    MagnitudeImage,
    NotMagnitudeImage,
    DescriptionHas(&'static [&'static str]),
    /// Not a scanner-derived diffusion map (ADC, FA, ...)
    NotDerivedMap,
    /// Next series has more than one volume
    NextIsMultiVolume,
}

fn prior_phase_one(view: &SeriesView<'_>) -> bool {
    [1, 2].iter().any(|&n| {
        view.back(n)
            .map(|r| r.has_phase_marker() && r.echo_number == Some(1))
            .unwrap_or(false)
    })
}

/// Padded, normalized description contains any of `terms`
pub fn description_has(description: &str, terms: &[&str]) -> bool {
    let haystack = padded(description);
    terms.iter().any(|t| haystack.contains(t))
}

/// First of `terms` found in the description
pub fn first_term<'t>(description: &str, terms: &[&'t str]) -> Option<&'t str> {
    let haystack = padded(description);
    terms.iter().copied().find(|t| haystack.contains(t))
}

fn is_derived_map(record: &crate::record::AcquisitionRecord) -> bool {
    record.image_type_has("DERIVED")
        && DERIVED_DIFFUSION_TAGS.iter().any(|tag| record.image_type_has(tag))
}

impl Predicate for Condition {
    fn name(&self) -> &'static str {
        match self {
            Condition::MaxVolumes(_) => "max_volumes",
            Condition::MinVolumes(_) => "min_volumes",
            Condition::ExactVolumes(_) => "exact_volumes",
            Condition::Dimensionality(_) => "dimensionality",
            Condition::EchoNumber(_) => "echo_number",
            Condition::EchoNumberAbsent => "echo_number_absent",
            Condition::PhaseMarker => "phase_marker",
            Condition::NoPhaseMarker => "no_phase_marker",
            Condition::PriorPhaseOne => "prior_phase_one",
            Condition::NoPriorPhaseOne => "no_prior_phase_one",
            Condition::PhaseEncodingPresent => "phase_encoding_present",
            Condition::MagnitudeImage => "magnitude_image",
            Condition::NotMagnitudeImage => "not_magnitude_image",
            Condition::DescriptionHas(_) => "description_has",
            Condition::NotDerivedMap => "not_derived_map",
            Condition::NextIsMultiVolume => "next_is_multi_volume",
        }
    }

    fn check(&self, view: &SeriesView<'_>) -> bool {
        let r = view.current();
        match self {
            Condition::MaxVolumes(n) => r.volume_count <= *n,
            Condition::MinVolumes(n) => r.volume_count >= *n,
            Condition::ExactVolumes(n) => r.volume_count == *n,
            Condition::Dimensionality(d) => r.ndim == *d,
            Condition::EchoNumber(n) => r.echo_number == Some(*n),
            Condition::EchoNumberAbsent => r.echo_number.is_none(),
            Condition::PhaseMarker => r.has_phase_marker(),
            Condition::NoPhaseMarker => !r.has_phase_marker(),
            Condition::PriorPhaseOne => prior_phase_one(view),
            Condition::NoPriorPhaseOne => !prior_phase_one(view),
            Condition::PhaseEncodingPresent => r.phase_encoding.is_some(),
            Condition::MagnitudeImage => r.is_magnitude_image(),
            Condition::NotMagnitudeImage => !r.is_magnitude_image(),
            Condition::DescriptionHas(terms) => description_has(r.description(), terms),
            Condition::NotDerivedMap => !is_derived_map(r),
            Condition::NextIsMultiVolume => view.ahead(1).map(|n| n.volume_count > 1).unwrap_or(false),
        }
    }

    fn describe(&self) -> String {
        match self {
            Condition::MaxVolumes(n) => format!("at most {} volumes", n),
            Condition::MinVolumes(n) => format!("at least {} volumes", n),
            Condition::ExactVolumes(n) => format!("exactly {} volume(s)", n),
            Condition::Dimensionality(d) => format!("{}-D image", d),
            Condition::EchoNumber(n) => format!("EchoNumber {}", n),
            Condition::EchoNumberAbsent => "no EchoNumber".to_string(),
            Condition::PhaseMarker => "phase image".to_string(),
            Condition::NoPhaseMarker => "not a phase image".to_string(),
            Condition::PriorPhaseOne => "preceded by an echo-1 phase image".to_string(),
            Condition::NoPriorPhaseOne => "not preceded by an echo-1 phase image".to_string(),
            Condition::PhaseEncodingPresent => "PhaseEncodingDirection present".to_string(),
            Condition::MagnitudeImage => "magnitude image".to_string(),
            Condition::NotMagnitudeImage => "not a magnitude image".to_string(),
            Condition::DescriptionHas(terms) => format!("description contains one of {:?}", terms),
            Condition::NotDerivedMap => "not a derived diffusion map".to_string(),
            Condition::NextIsMultiVolume => "followed by a multi-volume series".to_string(),
        }
    }

    fn explain(&self, view: &SeriesView<'_>) -> String {
        let r = view.current();
        let observed = match self {
            Condition::MaxVolumes(_) | Condition::MinVolumes(_) | Condition::ExactVolumes(_) => {
                format!("has {} volumes", r.volume_count)
            }
            Condition::Dimensionality(_) => format!("is {}-D", r.ndim),
            Condition::EchoNumber(_) | Condition::EchoNumberAbsent => match r.echo_number {
                Some(n) => format!("EchoNumber is {}", n),
                None => "EchoNumber is missing".to_string(),
            },
            Condition::PhaseEncodingPresent => "PhaseEncodingDirection is missing".to_string(),
            Condition::NotDerivedMap => format!("ImageType is {}", r.image_type.join("\\")),
            Condition::NextIsMultiVolume => match view.ahead(1) {
                Some(next) => format!("next series has {} volume(s)", next.volume_count),
                None => "it is the last series".to_string(),
            },
            _ => "does not".to_string(),
        };
        format!("requires {} but {}", self.describe(), observed)
    }
}

/// One (datatype, suffix) entry
#[derive(Debug, Clone)]
pub struct RuleEntry {
    pub datatype: Datatype,
    pub suffix: Suffix,
    pub search_terms: &'static [&'static str],
    pub accepted: &'static [Entity],
    pub required: &'static [Entity],
    pub conditions: Vec<Condition>,
}

impl RuleEntry {
    fn new(datatype: Datatype, suffix: Suffix, accepted: &'static [Entity]) -> Self {
        Self {
            datatype,
            suffix,
            search_terms: &[],
            accepted,
            required: REQUIRE_NONE,
            conditions: Vec::new(),
        }
    }

    fn terms(mut self, terms: &'static [&'static str]) -> Self {
        self.search_terms = terms;
        self
    }

    fn requires(mut self, required: &'static [Entity]) -> Self {
        self.required = required;
        self
    }

    fn when(mut self, conditions: Vec<Condition>) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn accepts(&self, entity: Entity) -> bool {
        self.accepted.contains(&entity)
    }

    /// First search term present in the description
    pub fn matched_term(&self, description: &str) -> Option<&'static str> {
        first_term(description, self.search_terms)
    }

    /// Conditions that fail for this view
    pub fn failures<'e>(&'e self, view: &SeriesView<'_>) -> Vec<&'e Condition> {
        self.conditions.iter().filter(|c| !c.check(view)).collect()
    }
}

/// Compiled rule table
#[derive(Debug, Clone)]
pub struct RuleTable {
    entries: Vec<RuleEntry>,
}

impl RuleTable {
    /// Built-in table, with volume thresholds from `settings`
    pub fn standard(settings: &ClassificationSettings) -> Self {
        use Condition::*;
        use Datatype::*;

        let max_fmap = settings.max_fmap_volumes;
        let entries = vec![
            // Field maps
            RuleEntry::new(Fmap, Suffix::Fieldmap, FMAP_GRE_ENTITIES)
                .terms(&["b0map", "b0_map", "fieldmap_hz"])
                .when(vec![NotMagnitudeImage]),
            RuleEntry::new(Fmap, Suffix::Magnitude, FMAP_GRE_ENTITIES)
                .terms(&["b0map", "b0_map"])
                .when(vec![MagnitudeImage]),
            RuleEntry::new(Fmap, Suffix::Epi, FMAP_EPI_ENTITIES)
                .terms(FIELDMAP_TERMS)
                .requires(REQUIRE_DIRECTION)
                .when(vec![EchoNumberAbsent, MaxVolumes(max_fmap), PhaseEncodingPresent]),
            RuleEntry::new(Fmap, Suffix::Magnitude1, FMAP_GRE_ENTITIES)
                .terms(FIELDMAP_TERMS)
                .when(vec![EchoNumber(1), NoPhaseMarker]),
            RuleEntry::new(Fmap, Suffix::Magnitude2, FMAP_GRE_ENTITIES)
                .terms(FIELDMAP_TERMS)
                .when(vec![EchoNumber(2), NoPhaseMarker]),
            RuleEntry::new(Fmap, Suffix::Phase1, FMAP_GRE_ENTITIES)
                .terms(FIELDMAP_TERMS)
                .when(vec![EchoNumber(1), PhaseMarker]),
            RuleEntry::new(Fmap, Suffix::Phase2, FMAP_GRE_ENTITIES)
                .terms(FIELDMAP_TERMS)
                .when(vec![EchoNumber(2), PhaseMarker, PriorPhaseOne]),
            RuleEntry::new(Fmap, Suffix::Phasediff, FMAP_GRE_ENTITIES)
                .terms(FIELDMAP_TERMS)
                .when(vec![EchoNumber(2), PhaseMarker, NoPriorPhaseOne]),
            RuleEntry::new(Fmap, Suffix::Tb1tfl, FMAP_B1_ENTITIES)
                .terms(&["tfl_b1", "b1map", "tb1tfl", "tfl_rfmap"]),
            // Single-band references
            RuleEntry::new(Dwi, Suffix::Sbref, DWI_ENTITIES)
                .terms(SBREF_TERMS)
                .when(vec![DescriptionHas(DIFFUSION_TERMS), ExactVolumes(1)]),
            RuleEntry::new(Func, Suffix::Sbref, FUNC_ENTITIES)
                .terms(SBREF_TERMS)
                .requires(REQUIRE_TASK)
                .when(vec![ExactVolumes(1)]),
            // Diffusion
            RuleEntry::new(Dwi, Suffix::Dwi, DWI_ENTITIES)
                .terms(DIFFUSION_TERMS)
                .when(vec![NotDerivedMap]),
            // Functional
            RuleEntry::new(Func, Suffix::Cbv, FUNC_ENTITIES)
                .terms(&["cbv", "vaso"])
                .requires(REQUIRE_TASK)
                .when(vec![Dimensionality(4), MinVolumes(2)]),
            RuleEntry::new(Func, Suffix::Bold, FUNC_ENTITIES)
                .terms(BOLD_TERMS)
                .requires(REQUIRE_TASK)
                .when(vec![Dimensionality(4), MinVolumes(2)]),
            RuleEntry::new(Func, Suffix::Sbref, FUNC_ENTITIES)
                .terms(BOLD_TERMS)
                .requires(REQUIRE_TASK)
                .when(vec![Dimensionality(3), ExactVolumes(1), NextIsMultiVolume]),
            RuleEntry::new(Func, Suffix::Physio, FUNC_AUX_ENTITIES)
                .terms(&["physio", "physlog", "_pmu_"])
                .requires(REQUIRE_TASK),
            // Quantitative anatomical maps and file collections
            RuleEntry::new(Anat, Suffix::Unit1, ANAT_MAP_ENTITIES).terms(&["_uni_", "unit1", "uni_images"]),
            RuleEntry::new(Anat, Suffix::T2starmap, ANAT_MAP_ENTITIES)
                .terms(&["t2starmap", "t2star_map", "t2smap"]),
            RuleEntry::new(Anat, Suffix::R2starmap, ANAT_MAP_ENTITIES).terms(&["r2starmap", "r2star", "r2smap"]),
            RuleEntry::new(Anat, Suffix::T1map, ANAT_MAP_ENTITIES).terms(&["t1map", "t1_map", "t1_images"]),
            RuleEntry::new(Anat, Suffix::T2map, ANAT_MAP_ENTITIES).terms(&["t2map", "t2_map"]),
            RuleEntry::new(Anat, Suffix::R1map, ANAT_MAP_ENTITIES).terms(&["r1map", "r1_map"]),
            RuleEntry::new(Anat, Suffix::R2map, ANAT_MAP_ENTITIES).terms(&["r2map", "r2_map"]),
            RuleEntry::new(Anat, Suffix::PDmap, ANAT_MAP_ENTITIES).terms(&["pdmap", "pd_map"]),
            RuleEntry::new(Anat, Suffix::Mp2rage, MP2RAGE_ENTITIES)
                .terms(&["mp2rage"])
                .requires(REQUIRE_INVERSION)
                .when(vec![DescriptionHas(&["inv1", "inv2", "_inv_"])]),
            RuleEntry::new(Anat, Suffix::Irt1, INV_COLLECTION_ENTITIES)
                .terms(&["irt1", "inversion_recovery", "_ir_"])
                .requires(REQUIRE_INVERSION),
            RuleEntry::new(Anat, Suffix::Megre, ECHO_COLLECTION_ENTITIES)
                .terms(&["megre", "me_gre", "multiecho_gre", "gre_me"])
                .requires(REQUIRE_ECHO),
            RuleEntry::new(Anat, Suffix::Mese, ECHO_COLLECTION_ENTITIES)
                .terms(&["mese", "me_se", "multiecho_se", "cpmg"])
                .requires(REQUIRE_ECHO),
            RuleEntry::new(Anat, Suffix::Vfa, FLIP_COLLECTION_ENTITIES)
                .terms(&["vfa", "despot"])
                .requires(REQUIRE_FLIP),
            // Conventional anatomical images
            RuleEntry::new(Anat, Suffix::InplaneT1, ANAT_ENTITIES).terms(&["inplanet1", "inplane_t1"]),
            RuleEntry::new(Anat, Suffix::InplaneT2, ANAT_ENTITIES).terms(&["inplanet2", "inplane_t2"]),
            RuleEntry::new(Anat, Suffix::Pdt2, ANAT_ENTITIES)
                .terms(&["pdt2", "pd_t2", "dual_echo"])
                .when(vec![ExactVolumes(1)]),
            RuleEntry::new(Anat, Suffix::Flair, ANAT_ENTITIES)
                .terms(&["flair"])
                .when(vec![ExactVolumes(1)]),
            RuleEntry::new(Anat, Suffix::Angio, ANAT_ENTITIES).terms(&["angio", "_tof", "_mra_"]),
            RuleEntry::new(Anat, Suffix::T2starw, ANAT_ENTITIES)
                .terms(&["t2starw", "t2star", "t2_star", "_swi_"])
                .when(vec![ExactVolumes(1)]),
            RuleEntry::new(Anat, Suffix::T1w, ANAT_ENTITIES)
                .terms(&["t1w", "t1_w", "mprage", "mp_rage", "spgr", "tfl3d", "bravo", "_mpr_", "t1"])
                .when(vec![ExactVolumes(1)]),
            RuleEntry::new(Anat, Suffix::T2w, ANAT_ENTITIES)
                .terms(&["t2w", "t2_w", "_space_", "_tse_", "t2"])
                .when(vec![ExactVolumes(1)]),
            RuleEntry::new(Anat, Suffix::PDw, ANAT_ENTITIES)
                .terms(&["pdw", "pd_w", "_pd_"])
                .when(vec![ExactVolumes(1)]),
            // Other modalities
            RuleEntry::new(Pet, Suffix::Pet, PET_ENTITIES).terms(&["_pet_", "_fdg", "_pib_", "av45", "amyloid"]),
            // Reachable from path hints or the converter's guess only
            RuleEntry::new(Func, Suffix::Events, FUNC_AUX_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Func, Suffix::Stim, FUNC_AUX_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Fmap, Suffix::Tb1dam, FMAP_B1_ENTITIES),
            RuleEntry::new(Fmap, Suffix::Tb1epi, FMAP_B1_ENTITIES),
            RuleEntry::new(Pet, Suffix::Blood, BLOOD_ENTITIES).requires(REQUIRE_BLOOD),
            RuleEntry::new(Pet, Suffix::Events, PET_ENTITIES),
            RuleEntry::new(Meg, Suffix::Meg, MEG_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Meg, Suffix::Channels, MEG_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Meg, Suffix::Events, MEG_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Beh, Suffix::Beh, BEH_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Beh, Suffix::Events, BEH_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Beh, Suffix::Physio, BEH_ENTITIES).requires(REQUIRE_TASK),
            RuleEntry::new(Beh, Suffix::Stim, BEH_ENTITIES).requires(REQUIRE_TASK),
        ];

        Self { entries }
    }

    pub fn entries(&self) -> &[RuleEntry] {
        &self.entries
    }

    /// First entry for a (datatype, suffix) pair
    pub fn lookup(&self, datatype: Datatype, suffix: Suffix) -> Option<&RuleEntry> {
        self.entries
            .iter()
            .find(|e| e.datatype == datatype && e.suffix == suffix)
    }

    /// Datatypes that define `suffix`, in table order
    pub fn datatypes_for(&self, suffix: Suffix) -> Vec<Datatype> {
        let mut out: Vec<Datatype> = Vec::new();
        for entry in self.entries.iter().filter(|e| e.suffix == suffix) {
            if !out.contains(&entry.datatype) {
                out.push(entry.datatype);
            }
        }
        out
    }

    /// Entries with search terms, optionally restricted to one datatype
    pub fn searchable(&self, datatype: Option<Datatype>) -> impl Iterator<Item = &RuleEntry> {
        self.entries.iter().filter(move |e| {
            !e.search_terms.is_empty() && datatype.map_or(true, |d| e.datatype == d)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AcquisitionRecord, Sidecar};
    use crate::reducer::reduce;
    use std::path::PathBuf;

    fn table() -> RuleTable {
        RuleTable::standard(&ClassificationSettings::default())
    }

    fn series_of(specs: &[(&str, &str, Option<u32>)]) -> Vec<crate::reducer::UniqueSeries> {
        let mut records: Vec<AcquisitionRecord> = specs
            .iter()
            .enumerate()
            .map(|(i, (desc, file, echo))| {
                let sidecar = Sidecar {
                    series_description: desc.to_string(),
                    echo_number: *echo,
                    echo_time: Some(0.001 * (i as f64 + 1.0)),
                    ..Sidecar::default()
                };
                let mut r = AcquisitionRecord::new(PathBuf::from(*file), PathBuf::new(), &sidecar);
                r.idx = i;
                r
            })
            .collect();
        reduce(&mut records, 0.1, false)
    }

    #[test]
    fn test_every_suffix_has_an_entry() {
        let table = table();
        for suffix in Suffix::ALL {
            assert!(
                !table.datatypes_for(*suffix).is_empty(),
                "no rule entry for {}",
                suffix
            );
        }
    }

    #[test]
    fn test_required_entities_are_accepted() {
        for entry in table().entries() {
            for required in entry.required {
                assert!(entry.accepts(*required), "{}/{}", entry.datatype, entry.suffix);
            }
        }
    }

    #[test]
    fn test_lookup_and_datatypes_for() {
        let table = table();
        assert!(table.lookup(Datatype::Func, Suffix::Bold).is_some());
        assert!(table.lookup(Datatype::Anat, Suffix::Bold).is_none());
        assert_eq!(table.datatypes_for(Suffix::Sbref), vec![Datatype::Dwi, Datatype::Func]);
    }

    #[test]
    fn test_description_matching_uses_tokens() {
        assert!(description_has("SE fieldmap AP", &["_se_"]));
        assert!(!description_has("sense_ref", &["_se_"]));
        assert_eq!(first_term("T1w MPRAGE", &["mprage", "t1"]), Some("mprage"));
    }

    #[test]
    fn test_prior_phase_one_looks_back_one_and_two() {
        let list = series_of(&[
            ("gre_field_mapping", "/d/5_gre_e1_ph.nii", Some(1)),
            ("gre_field_mapping", "/d/5_gre_e2_ph.nii", Some(2)),
        ]);
        let view = SeriesView::new(&list, 1).unwrap();
        assert!(Condition::PriorPhaseOne.check(&view));
        assert!(!Condition::NoPriorPhaseOne.check(&view));

        let first = SeriesView::new(&list, 0).unwrap();
        assert!(!Condition::PriorPhaseOne.check(&first));
    }

    #[test]
    fn test_explain_names_observed_value() {
        let list = series_of(&[("rest", "/d/rest.nii", None)]);
        let view = SeriesView::new(&list, 0).unwrap();
        let cond = Condition::Dimensionality(4);
        assert!(!cond.check(&view));
        assert_eq!(cond.explain(&view), "requires 4-D image but is 3-D");
        assert_eq!(cond.name(), "dimensionality");
    }
}

//! Section and field-map resolver
//!
//! Runs on per-acquisition records after fan-out, one (subject, session)
//! at a time. Each group is split into sections at localizer runs, then
//! every section pairs its field maps with the series they correct:
//!
//! | Group | Rule |
//! |-------|------|
//! | Spin-echo `fmap/epi` | needs two with opposite polarity on one axis; most recent two kept; targets are the section's functional series |
//! | Magnitude/phase | sets of exactly 3 (mag1, mag2, phasediff) or 4 (mag1, mag2, phase1, phase2); most recent complete set kept |
//! | Diffusion `fmap/epi` | most recent kept; targets are diffusion series with opposite polarity on the same axis |
//! | `fieldmap` + `magnitude` | most recent pair kept |
//!
//! A field map with no eligible target is excluded. When the same kind of
//! group survives in more than one section it gets `run-N` by section order.
//!
//! Groups are independent, so they resolve in parallel; the resulting
//! [`Resolution`]s are applied in group order.

use crate::bids::{Datatype, Entity, Suffix};
use crate::record::AcquisitionRecord;
use crate::sections::partition;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// One change to apply to the record list
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Exclude { record: usize, reason: String },
    Correct { fieldmap: usize, targets: Vec<usize> },
    Run { record: usize, run: u32 },
    Section { record: usize, section: usize },
}

/// Kinds of field-map acquisition, paired by different rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldMapGroup {
    SpinEcho,
    MagnitudePhase,
    Diffusion,
    Direct,
}

impl FieldMapGroup {
    pub fn of(record: &AcquisitionRecord) -> Option<Self> {
        let c = &record.classification;
        if !c.include {
            return None;
        }
        match c.role()? {
            (Datatype::Fmap, Suffix::Epi) => Some(if c.corrects == Some(Datatype::Dwi) {
                FieldMapGroup::Diffusion
            } else {
                FieldMapGroup::SpinEcho
            }),
            (
                Datatype::Fmap,
                Suffix::Magnitude1 | Suffix::Magnitude2 | Suffix::Phase1 | Suffix::Phase2 | Suffix::Phasediff,
            ) => Some(FieldMapGroup::MagnitudePhase),
            (Datatype::Fmap, Suffix::Fieldmap | Suffix::Magnitude) => Some(FieldMapGroup::Direct),
            _ => None,
        }
    }
}

fn is_functional_target(record: &AcquisitionRecord) -> bool {
    record.classification.include
        && matches!(
            record.classification.role(),
            Some((Datatype::Func, Suffix::Bold | Suffix::Cbv | Suffix::Sbref))
        )
}

fn is_diffusion_target(record: &AcquisitionRecord) -> bool {
    record.classification.include
        && matches!(
            record.classification.role(),
            Some((Datatype::Dwi, Suffix::Dwi | Suffix::Sbref))
        )
}

fn opposite_polarity(a: &AcquisitionRecord, b: &AcquisitionRecord) -> bool {
    match (a.phase_encoding, b.phase_encoding) {
        (Some(a), Some(b)) => a.is_opposite(&b),
        _ => false,
    }
}

/// Split magnitude/phase images into acquisition sets
///
/// A set closes after `phasediff` or `phase2`; `magnitude1` always opens one.
fn split_sets<'r>(maps: &[&'r AcquisitionRecord]) -> Vec<Vec<&'r AcquisitionRecord>> {
    let mut sets: Vec<Vec<&AcquisitionRecord>> = Vec::new();
    let mut closed = true;
    for &record in maps {
        let suffix = record.classification.suffix;
        if closed || suffix == Some(Suffix::Magnitude1) {
            sets.push(Vec::new());
        }
        if let Some(set) = sets.last_mut() {
            set.push(record);
        }
        closed = matches!(suffix, Some(Suffix::Phasediff | Suffix::Phase2));
    }
    sets
}

fn is_complete_set(set: &[&AcquisitionRecord]) -> bool {
    let count = |suffix: Suffix| {
        set.iter()
            .filter(|r| r.classification.suffix == Some(suffix))
            .count()
    };
    let magnitudes = count(Suffix::Magnitude1) + count(Suffix::Magnitude2);
    match set.len() {
        3 => magnitudes == 2 && count(Suffix::Phasediff) == 1,
        4 => magnitudes == 2 && count(Suffix::Phase1) == 1 && count(Suffix::Phase2) == 1,
        _ => false,
    }
}

/// Field-map pairing within one section
pub struct SectionResolver<'a> {
    section: usize,
    records: Vec<&'a AcquisitionRecord>,
    resolutions: Vec<Resolution>,
    kept: Vec<(FieldMapGroup, Vec<usize>)>,
}

impl<'a> SectionResolver<'a> {
    pub fn new(section: usize, records: Vec<&'a AcquisitionRecord>) -> Self {
        Self {
            section,
            records,
            resolutions: Vec::new(),
            kept: Vec::new(),
        }
    }

    fn members(&self, group: FieldMapGroup) -> Vec<&'a AcquisitionRecord> {
        self.records
            .iter()
            .copied()
            .filter(|r| FieldMapGroup::of(r) == Some(group))
            .collect()
    }

    fn functional_targets(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| is_functional_target(r))
            .map(|r| r.idx)
            .collect()
    }

    fn all_targets(&self) -> Vec<usize> {
        self.records
            .iter()
            .filter(|r| is_functional_target(r) || is_diffusion_target(r))
            .map(|r| r.idx)
            .collect()
    }

    fn exclude(&mut self, record: &AcquisitionRecord, reason: String) {
        debug!(idx = record.idx, section = self.section, %reason, "Field map excluded");
        self.resolutions.push(Resolution::Exclude {
            record: record.idx,
            reason,
        });
    }

    fn exclude_all(&mut self, records: &[&AcquisitionRecord], reason: &str) {
        for record in records {
            self.exclude(record, reason.to_string());
        }
    }

    fn correct(&mut self, group: FieldMapGroup, maps: &[&AcquisitionRecord], targets: Vec<usize>) {
        for map in maps {
            self.resolutions.push(Resolution::Correct {
                fieldmap: map.idx,
                targets: targets.clone(),
            });
        }
        self.kept.push((group, maps.iter().map(|m| m.idx).collect()));
    }

    /// Opposite-polarity spin-echo pair for functional series
    pub fn spin_echo(&mut self) {
        let maps = self.members(FieldMapGroup::SpinEcho);
        if maps.is_empty() {
            return;
        }
        if maps.len() == 1 {
            let reason = format!(
                "Spin-echo field map needs pair: no opposite phase-encoding partner in section {}",
                self.section
            );
            self.exclude(maps[0], reason);
            return;
        }

        let targets = self.functional_targets();
        if targets.is_empty() {
            let reason = format!(
                "Spin-echo field map has no destination: no included functional series in section {}",
                self.section
            );
            self.exclude_all(&maps, &reason);
            return;
        }

        let (earlier, pair) = maps.split_at(maps.len() - 2);
        let reason = format!(
            "Multiple spin-echo field map pairs in section {}; only the most recent pair is kept",
            self.section
        );
        self.exclude_all(earlier, &reason);

        if !opposite_polarity(pair[0], pair[1]) {
            self.exclude_all(
                pair,
                "Spin-echo field map pair needs opposite phase-encoding polarity on the same axis",
            );
            return;
        }
        self.correct(FieldMapGroup::SpinEcho, pair, targets);
    }

    /// Magnitude and phase(diff) images as one set
    pub fn magnitude_phase(&mut self) {
        let maps = self.members(FieldMapGroup::MagnitudePhase);
        if maps.is_empty() {
            return;
        }

        let (complete, partial): (Vec<_>, Vec<_>) =
            split_sets(&maps).into_iter().partition(|set| is_complete_set(set));
        for set in &partial {
            let reason = format!(
                "Magnitude/phase field map set has {} image(s) in section {}; expected 3 \
                 (magnitude1, magnitude2, phasediff) or 4 (magnitude1, magnitude2, phase1, phase2)",
                set.len(),
                self.section
            );
            self.exclude_all(set, &reason);
        }

        let Some((latest, earlier)) = complete.split_last() else {
            return;
        };
        let reason = format!(
            "Multiple sets of magnitude/phase field maps in section {}; only the most recent set is kept",
            self.section
        );
        for set in earlier {
            self.exclude_all(set, &reason);
        }

        let targets = self.all_targets();
        if targets.is_empty() {
            let reason = format!(
                "Magnitude/phase field maps have no destination: no included functional or diffusion series in section {}",
                self.section
            );
            self.exclude_all(latest, &reason);
            return;
        }
        self.correct(FieldMapGroup::MagnitudePhase, latest, targets);
    }

    /// Reverse-polarity b=0 map for diffusion series
    pub fn diffusion(&mut self) {
        let maps = self.members(FieldMapGroup::Diffusion);
        let Some((latest, earlier)) = maps.split_last() else {
            return;
        };
        let latest = *latest;
        let reason = format!(
            "Multiple diffusion field maps in section {}; only the most recent is kept",
            self.section
        );
        self.exclude_all(earlier, &reason);

        let diffusion: Vec<&AcquisitionRecord> = self
            .records
            .iter()
            .copied()
            .filter(|r| is_diffusion_target(r))
            .collect();
        if diffusion.is_empty() {
            let reason = format!(
                "Diffusion field map has no destination: no included diffusion series in section {}",
                self.section
            );
            self.exclude(latest, reason);
            return;
        }

        let targets: Vec<usize> = diffusion
            .iter()
            .filter(|t| opposite_polarity(latest, t))
            .map(|t| t.idx)
            .collect();
        if targets.is_empty() {
            self.exclude(
                latest,
                "Diffusion field map needs opposite phase-encoding polarity on the same axis as a diffusion series"
                    .to_string(),
            );
            return;
        }
        self.correct(FieldMapGroup::Diffusion, &[latest], targets);
    }

    /// Precomputed field map with its magnitude image
    pub fn direct(&mut self) {
        let maps = self.members(FieldMapGroup::Direct);
        if maps.is_empty() {
            return;
        }
        let latest = |suffix: Suffix| {
            maps.iter()
                .rev()
                .copied()
                .find(|r| r.classification.suffix == Some(suffix))
        };
        let (Some(fieldmap), Some(magnitude)) = (latest(Suffix::Fieldmap), latest(Suffix::Magnitude)) else {
            let reason = format!(
                "Field map needs pair: fieldmap and magnitude images must both be present in section {}",
                self.section
            );
            self.exclude_all(&maps, &reason);
            return;
        };

        let earlier: Vec<&AcquisitionRecord> = maps
            .iter()
            .copied()
            .filter(|r| r.idx != fieldmap.idx && r.idx != magnitude.idx)
            .collect();
        let reason = format!(
            "Multiple fieldmap/magnitude pairs in section {}; only the most recent pair is kept",
            self.section
        );
        self.exclude_all(&earlier, &reason);

        let pair = [fieldmap, magnitude];
        let targets = self.all_targets();
        if targets.is_empty() {
            let reason = format!(
                "Field map has no destination: no included functional or diffusion series in section {}",
                self.section
            );
            self.exclude_all(&pair, &reason);
            return;
        }
        self.correct(FieldMapGroup::Direct, &pair, targets);
    }

    /// Run every pairing rule; returns resolutions and the groups kept
    pub fn resolve(mut self) -> (Vec<Resolution>, Vec<(FieldMapGroup, Vec<usize>)>) {
        let section = self.section;
        let placements: Vec<Resolution> = self
            .records
            .iter()
            .map(|r| Resolution::Section {
                record: r.idx,
                section,
            })
            .collect();
        self.resolutions.extend(placements);

        self.spin_echo();
        self.magnitude_phase();
        self.diffusion();
        self.direct();
        (self.resolutions, self.kept)
    }
}

/// Resolve one (subject, session) group; `records` must be in scan order
pub fn resolve_group(records: &[&AcquisitionRecord]) -> Vec<Resolution> {
    let scans: Vec<(usize, bool)> = records
        .iter()
        .map(|r| (r.idx, r.classification.localizer))
        .collect();
    let by_idx: HashMap<usize, &AcquisitionRecord> = records.iter().map(|r| (r.idx, *r)).collect();

    let mut resolutions = Vec::new();
    let mut occurrences: BTreeMap<FieldMapGroup, Vec<Vec<usize>>> = BTreeMap::new();

    for section in partition(&scans) {
        let members: Vec<&AcquisitionRecord> = section
            .members
            .iter()
            .filter_map(|idx| by_idx.get(idx).copied())
            .collect();
        let (section_resolutions, kept) = SectionResolver::new(section.id, members).resolve();
        resolutions.extend(section_resolutions);
        for (group, ids) in kept {
            occurrences.entry(group).or_default().push(ids);
        }
    }

    for (group, sets) in occurrences {
        if sets.len() < 2 {
            continue;
        }
        debug!(?group, occurrences = sets.len(), "Field map recurs across sections");
        for (n, ids) in sets.iter().enumerate() {
            for idx in ids {
                resolutions.push(Resolution::Run {
                    record: *idx,
                    run: n as u32 + 1,
                });
            }
        }
    }

    resolutions
}

/// Sections, field-map targets, exclusions and recurrence runs for all records
pub fn resolve_field_maps(records: &mut [AcquisitionRecord]) {
    let mut groups: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for (pos, record) in records.iter().enumerate() {
        groups
            .entry((record.subject.clone(), record.session.clone()))
            .or_default()
            .push(pos);
    }
    let groups: Vec<Vec<usize>> = groups.into_values().collect();

    let view: &[AcquisitionRecord] = records;
    let resolved: Vec<Vec<Resolution>> = groups
        .par_iter()
        .map(|positions| {
            let members: Vec<&AcquisitionRecord> = positions.iter().map(|p| &view[*p]).collect();
            resolve_group(&members)
        })
        .collect();

    let position: HashMap<usize, usize> = records
        .iter()
        .enumerate()
        .map(|(pos, r)| (r.idx, pos))
        .collect();

    let mut corrections = 0usize;
    let mut exclusions = 0usize;
    for resolution in resolved.into_iter().flatten() {
        match resolution {
            Resolution::Exclude { record, reason } => {
                if let Some(&pos) = position.get(&record) {
                    records[pos].exclude(reason);
                    records[pos].set_intended_for(Vec::new());
                    exclusions += 1;
                }
            }
            Resolution::Correct { fieldmap, targets } => {
                for target in &targets {
                    if let Some(&pos) = position.get(target) {
                        records[pos].add_corrected_by(fieldmap);
                    }
                }
                if let Some(&pos) = position.get(&fieldmap) {
                    records[pos].set_intended_for(targets);
                    corrections += 1;
                }
            }
            Resolution::Run { record, run } => {
                if let Some(&pos) = position.get(&record) {
                    records[pos].set_entity(Entity::Run, run.to_string());
                }
            }
            Resolution::Section { record, section } => {
                if let Some(&pos) = position.get(&record) {
                    records[pos].set_section(section);
                }
            }
        }
    }

    info!(
        groups = groups.len(),
        field_maps = corrections,
        excluded = exclusions,
        "Resolved field maps"
    );
}

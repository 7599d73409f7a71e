//! Entity label extraction
//!
//! **Algorithm (per classified unique series):**
//! 1. Take `key-value` pairs already present in the description, then the
//!    filename (`_task-rest`, `_dir-AP`, ...), first hit per key
//! 2. Derive what is still missing:
//!    - `dir` from `PhaseEncodingDirection` for field-map and diffusion roles
//!    - `echo` for multi-echo series (never for field maps)
//!    - `task` from the task vocabulary
//!    - `inv` from an `invN` token or the inversion-time rank
//!    - `part` from phase/real/imaginary image-type tags
//! 3. Drop entities the suffix does not accept (`echo` on anatomical
//!    images is kept), sanitize values, and warn about missing required
//!    entities
//!
//! A post-pass labels an existing magnitude partner of a `part-phase`
//! series as `part-mag`. Partners are never synthesized.

use crate::bids::{Datatype, Entity, EntityMap, Suffix};
use crate::reducer::UniqueSeries;
use crate::rules::RuleTable;
use crate::text::{normalize, sanitize_label};
use crate::vocabulary::TaskVocabulary;
use bidsmith_common::config::ClassificationSettings;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static KEY_VALUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:^|[_/\s])(task|acq|ce|trc|rec|dir|run|echo|flip|inv|mt|part|proc|split|recording|chunk)-([a-z0-9.]+)",
    )
    .expect("valid key-value pattern")
});

static INV_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|_)inv_?(\d+)(?:_|$)").expect("valid inversion pattern"));

/// `key-value` pairs in `text`, first occurrence per key
pub fn key_value_pairs(text: &str) -> EntityMap {
    let mut found = EntityMap::new();
    for caps in KEY_VALUE.captures_iter(text) {
        if let (Some(key), Some(value)) = (caps.get(1), caps.get(2)) {
            if let Some(entity) = Entity::from_key(key.as_str()) {
                found
                    .entry(entity)
                    .or_insert_with(|| value.as_str().to_string());
            }
        }
    }
    found
}

/// Outcome of extraction for one series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub entities: EntityMap,
    pub warnings: Vec<String>,
}

/// Derives entity labels for classified series
pub struct EntityExtractor<'a> {
    table: &'a RuleTable,
    vocabulary: &'a TaskVocabulary,
    settings: &'a ClassificationSettings,
}

impl<'a> EntityExtractor<'a> {
    pub fn new(
        table: &'a RuleTable,
        vocabulary: &'a TaskVocabulary,
        settings: &'a ClassificationSettings,
    ) -> Self {
        Self {
            table,
            vocabulary,
            settings,
        }
    }

    /// Entities for `series[index]`; siblings inform echo and inversion labels
    pub fn extract(&self, series: &[UniqueSeries], index: usize) -> Extraction {
        let Some(current) = series.get(index) else {
            return Extraction::default();
        };
        let Some((datatype, suffix)) = current.classification.role() else {
            return Extraction::default();
        };
        let Some(entry) = self.table.lookup(datatype, suffix) else {
            return Extraction::default();
        };
        let record = &current.record;
        let description = record.description();

        // Explicit key-value hints: description first, then the filename
        let mut entities = key_value_pairs(description);
        for (entity, value) in key_value_pairs(&record.file_stem()) {
            entities.entry(entity).or_insert(value);
        }

        if !entities.contains_key(&Entity::Direction)
            && matches!(datatype, Datatype::Fmap | Datatype::Dwi)
            && entry.accepts(Entity::Direction)
        {
            if let Some(pe) = record.phase_encoding {
                entities.insert(Entity::Direction, pe.direction_label().to_string());
            }
        }

        if !entities.contains_key(&Entity::Echo)
            && datatype != Datatype::Fmap
            && (entry.accepts(Entity::Echo) || datatype == Datatype::Anat)
        {
            if let Some(echo) = record.echo_number.filter(|_| is_multi_echo(series, index)) {
                entities.insert(Entity::Echo, echo.to_string());
            }
        }

        if !entities.contains_key(&Entity::Task) && entry.accepts(Entity::Task) {
            if let Some(task) = self
                .vocabulary
                .match_description(description, self.settings.min_task_name_len)
            {
                entities.insert(Entity::Task, task);
            }
        }

        if !entities.contains_key(&Entity::Inversion) && entry.accepts(Entity::Inversion) {
            if let Some(inv) = inversion_index(series, index) {
                entities.insert(Entity::Inversion, inv.to_string());
            }
        }

        if !entities.contains_key(&Entity::Part) && entry.accepts(Entity::Part) {
            let part = if record.has_phase_marker() && datatype != Datatype::Fmap {
                Some("phase")
            } else if record.image_type_has("REAL") {
                Some("real")
            } else if record.image_type_has("IMAGINARY") || record.image_type_has("IMAG") {
                Some("imag")
            } else {
                None
            };
            if let Some(part) = part {
                entities.insert(Entity::Part, part.to_string());
            }
        }

        // Whitelist and sanitize
        let entities: EntityMap = entities
            .into_iter()
            .filter(|(entity, _)| {
                entry.accepts(*entity) || (*entity == Entity::Echo && datatype == Datatype::Anat)
            })
            .map(|(entity, value)| (entity, sanitize_label(&value)))
            .filter(|(_, value)| !value.is_empty())
            .collect();

        let missing: Vec<&str> = entry
            .required
            .iter()
            .filter(|e| !entities.contains_key(*e))
            .map(|e| e.name())
            .collect();
        let mut warnings = Vec::new();
        if !missing.is_empty() {
            warnings.push(format!(
                "Missing required entity label(s) for {}/{}: {}",
                datatype,
                suffix,
                missing.join(", ")
            ));
        }

        Extraction { entities, warnings }
    }

    /// Extract entities for every included series not taken from a reference
    pub fn extract_all(&self, series: &mut [UniqueSeries]) {
        let view: &[UniqueSeries] = series;
        let results: Vec<Option<Extraction>> = view
            .iter()
            .enumerate()
            .map(|(i, s)| {
                (s.classification.include && !s.from_reference).then(|| self.extract(view, i))
            })
            .collect();

        for (s, result) in series.iter_mut().zip(results) {
            if let Some(extraction) = result {
                debug!(
                    series_idx = s.series_idx,
                    entities = %crate::bids::entity_string(&extraction.entities),
                    "Extracted entities"
                );
                s.entities = extraction.entities;
                s.classification.warnings.extend(extraction.warnings);
            }
        }

        label_magnitude_partners(series, self.table);
    }
}

/// Another series with the same description carries a different echo number
fn is_multi_echo(series: &[UniqueSeries], index: usize) -> bool {
    let current = &series[index];
    let Some(echo) = current.record.echo_number else {
        return false;
    };
    series.iter().enumerate().any(|(i, other)| {
        i != index
            && other.fingerprint.description == current.fingerprint.description
            && other.record.subject == current.record.subject
            && other.record.echo_number.map_or(false, |e| e != echo)
    })
}

/// `invN` token, else rank of this series' inversion time among siblings
fn inversion_index(series: &[UniqueSeries], index: usize) -> Option<u32> {
    let current = &series[index];
    let normalized = normalize(current.record.description());
    if let Some(caps) = INV_TOKEN.captures(&normalized) {
        if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse().ok()) {
            return Some(n);
        }
    }

    let ti = current.record.inversion_time?;
    let mut times: Vec<f64> = series
        .iter()
        .filter(|s| {
            s.fingerprint.description == current.fingerprint.description
                && s.record.subject == current.record.subject
        })
        .filter_map(|s| s.record.inversion_time)
        .collect();
    times.sort_by(|a, b| a.total_cmp(b));
    times.dedup_by(|a, b| (*a - *b).abs() < 1e-6);
    times
        .iter()
        .position(|t| (*t - ti).abs() < 1e-6)
        .map(|p| p as u32 + 1)
}

/// Label existing magnitude partners of `part-phase` series as `part-mag`
pub fn label_magnitude_partners(series: &mut [UniqueSeries], table: &RuleTable) {
    let phase_keys: Vec<(Option<Datatype>, Option<Suffix>, EntityMap)> = series
        .iter()
        .filter(|s| s.classification.include)
        .filter(|s| s.entities.get(&Entity::Part).map(String::as_str) == Some("phase"))
        .map(|s| {
            let mut key = s.entities.clone();
            key.remove(&Entity::Part);
            (s.classification.datatype, s.classification.suffix, key)
        })
        .collect();

    for s in series.iter_mut() {
        if !s.classification.include || s.entities.contains_key(&Entity::Part) {
            continue;
        }
        let Some((datatype, suffix)) = s.classification.role() else {
            continue;
        };
        let accepts_part = table
            .lookup(datatype, suffix)
            .map_or(false, |e| e.accepts(Entity::Part));
        let pairs = phase_keys.iter().any(|(dt, sfx, key)| {
            *dt == Some(datatype) && *sfx == Some(suffix) && *key == s.entities
        });
        if accepts_part && pairs {
            debug!(series_idx = s.series_idx, "Labeling magnitude partner of phase series");
            s.entities.insert(Entity::Part, "mag".to_string());
        }
    }
}

//! Reviewed-document reuse
//!
//! A document produced by an earlier run, after a reviewer corrected it,
//! can be supplied as a reference. Any unique series whose fingerprint
//! matches a reference series takes the reviewed type and entities and
//! skips classification. Unmatched series go through the heuristics.

use crate::bids::{Datatype, Suffix};
use crate::classifier::epi_target_kind;
use crate::document::{Document, SeriesEntry};
use crate::error::{IngestError, IngestResult};
use crate::record::Classification;
use crate::reducer::{Fingerprint, UniqueSeries};
use std::path::Path;
use tracing::{debug, info};

/// Parse a `"datatype/suffix"` or `"exclude"` type string
pub fn parse_type(kind: &str, rationale: &str) -> Option<Classification> {
    let kind = kind.trim();
    if kind.eq_ignore_ascii_case("exclude") {
        let reason = if rationale.trim().is_empty() {
            "Excluded by reviewer".to_string()
        } else {
            format!("Excluded by reviewer: {}", rationale.trim())
        };
        return Some(Classification::excluded(reason));
    }
    let (datatype, suffix) = kind.split_once('/')?;
    let datatype = Datatype::parse(datatype)?;
    let suffix = Suffix::parse_loose(suffix)?;
    Some(Classification::accepted(
        datatype,
        suffix,
        format!("Taken from reference document as {}/{}", datatype, suffix),
    ))
}

/// Reviewed series, searchable by fingerprint
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    entries: Vec<SeriesEntry>,
}

impl ReferenceIndex {
    pub fn from_document(document: Document) -> Self {
        let entries = document
            .series
            .into_iter()
            .filter(|s| !s.kind.trim().is_empty())
            .collect();
        Self { entries }
    }

    /// Read a previously written document
    pub fn load(path: &Path) -> IngestResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            IngestError::Reference(format!("cannot read {}: {}", path.display(), e))
        })?;
        let document: Document = serde_json::from_str(&text).map_err(|e| {
            IngestError::Reference(format!("{} is not an output document: {}", path.display(), e))
        })?;
        let index = Self::from_document(document);
        info!(path = %path.display(), series = index.len(), "Loaded reference document");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First reviewed series whose fingerprint matches
    pub fn find(&self, fingerprint: &Fingerprint, tolerance: f64) -> Option<&SeriesEntry> {
        self.entries
            .iter()
            .find(|entry| entry.fingerprint.matches(fingerprint, tolerance))
    }

    /// Copy reviewed decisions onto matching series; returns how many matched
    pub fn apply(&self, series: &mut [UniqueSeries], tolerance: f64) -> usize {
        let mut matched = 0;
        for s in series.iter_mut() {
            let Some(entry) = self.find(&s.fingerprint, tolerance) else {
                continue;
            };
            let Some(mut classification) = parse_type(&entry.kind, &entry.rationale) else {
                debug!(series_idx = s.series_idx, kind = %entry.kind, "Reference type not recognized");
                continue;
            };
            classification.localizer = entry.localizer;
            if classification.is(Datatype::Fmap, Suffix::Epi) {
                classification.corrects = entry
                    .corrects
                    .or_else(|| Some(epi_target_kind(s.record.description())));
            }
            s.entities = if classification.include {
                entry.entities.clone()
            } else {
                Default::default()
            };
            s.classification = classification;
            s.from_reference = true;
            matched += 1;
        }
        info!(matched, total = series.len(), "Applied reference document");
        matched
    }
}

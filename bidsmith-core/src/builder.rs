//! Acquisition record builder
//!
//! **Algorithm:**
//! 1. For each manifest entry, load the sidecar (inline or from disk)
//! 2. Normalize it into a [`Sidecar`]; an unreadable sidecar yields defaults
//!    and marks the record non-convertible with the read error attached
//! 3. Copy shape and file information from the manifest entry
//!
//! Ordering is a separate step ([`sort_records`]) because it needs subject
//! and session identity, which is resolved in between.

use crate::error::{IngestError, IngestResult};
use crate::manifest::{Manifest, ManifestEntry, SidecarSource};
use crate::record::{AcquisitionRecord, Sidecar};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Load a sidecar as a JSON object
fn load_sidecar(manifest: &Manifest, entry: &ManifestEntry) -> Result<(PathBuf, Value), String> {
    match &entry.sidecar {
        SidecarSource::Inline(value) => {
            let path = entry.image.with_extension("json");
            if value.is_object() {
                Ok((path, value.clone()))
            } else {
                Err(format!("inline sidecar for {} is not an object", entry.image.display()))
            }
        }
        SidecarSource::Path(rel) => {
            let path = manifest.resolve(rel);
            let content = std::fs::read_to_string(&path)
                .map_err(|e| format!("cannot read sidecar {}: {}", path.display(), e))?;
            let value: Value = serde_json::from_str(&content)
                .map_err(|e| format!("cannot parse sidecar {}: {}", path.display(), e))?;
            if value.is_object() {
                Ok((path, value))
            } else {
                Err(format!("sidecar {} is not a JSON object", path.display()))
            }
        }
    }
}

/// Build one record per manifest entry, in manifest order
///
/// # Errors
///
/// - `EmptyManifest` if there are no entries
/// - `MalformedManifest` if not a single sidecar could be read
pub fn build_records(manifest: &Manifest) -> IngestResult<Vec<AcquisitionRecord>> {
    if manifest.entries.is_empty() {
        return Err(IngestError::EmptyManifest("no entries".to_string()));
    }

    let mut records = Vec::with_capacity(manifest.entries.len());
    let mut readable = 0usize;

    for (position, entry) in manifest.entries.iter().enumerate() {
        let (sidecar_path, sidecar, read_error) = match load_sidecar(manifest, entry) {
            Ok((path, value)) => {
                readable += 1;
                (path, Sidecar::from_value(&value), None)
            }
            Err(e) => {
                warn!(image = %entry.image.display(), error = %e, "Unreadable sidecar");
                let path = match &entry.sidecar {
                    SidecarSource::Path(p) => manifest.resolve(p),
                    SidecarSource::Inline(_) => entry.image.with_extension("json"),
                };
                (path, Sidecar::default(), Some(e))
            }
        };

        let mut record = AcquisitionRecord::new(manifest.resolve(&entry.image), sidecar_path, &sidecar);
        record.idx = position;
        record.ndim = entry.ndim;
        record.volume_count = entry.volume_count;
        record.file_size = entry.file_size;
        record.orientation = entry.orientation.clone();
        record.convertible = entry.convertible && read_error.is_none();
        record.aux_paths = entry
            .bval
            .iter()
            .chain(entry.bvec.iter())
            .map(|p| manifest.resolve(p))
            .collect();
        if let Some(e) = read_error {
            record.errors.push(e);
        }
        if let Some(e) = &entry.error {
            record.errors.push(e.clone());
        }

        debug!(
            idx = position,
            series_number = record.series_number,
            description = %record.description(),
            "Built acquisition record"
        );
        records.push(record);
    }

    if readable == 0 {
        return Err(IngestError::MalformedManifest(
            "none of the listed sidecars could be read".to_string(),
        ));
    }

    info!(records = records.len(), readable, "Built acquisition records");
    Ok(records)
}

/// Sort into scan order and renumber `idx` to match
///
/// Key: acquisition date, subject, session, acquisition time, series
/// number, sidecar path. Later stages rely on neighbors in this order
/// being neighbors in the scanner session.
pub fn sort_records(records: &mut [AcquisitionRecord]) {
    records.sort_by(|a, b| {
        a.acquisition_date
            .cmp(&b.acquisition_date)
            .then_with(|| a.subject.cmp(&b.subject))
            .then_with(|| a.session.cmp(&b.session))
            .then_with(|| a.acquisition_time.cmp(&b.acquisition_time))
            .then_with(|| a.series_number.cmp(&b.series_number))
            .then_with(|| a.sidecar_path.cmp(&b.sidecar_path))
    });
    for (position, record) in records.iter_mut().enumerate() {
        record.idx = position;
    }
}

//! Conversion manifest
//!
//! The converter hands over one JSON document listing every converted
//! series:
//!
//! ```json
//! {"entries": [{"image": "5_rest.nii.gz", "sidecar": "5_rest.json",
//!               "ndim": 4, "volume_count": 120}]}
//! ```
//!
//! `sidecar` is either a path (relative paths resolve against the manifest
//! directory) or the sidecar object inlined.

use crate::error::{IngestError, IngestResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Where a series' sidecar metadata lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SidecarSource {
    Path(PathBuf),
    Inline(Value),
}

/// One converted series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image: PathBuf,
    pub sidecar: SidecarSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bval: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bvec: Option<PathBuf>,
    #[serde(default = "default_ndim")]
    pub ndim: u8,
    #[serde(default = "default_volume_count")]
    pub volume_count: u32,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    /// False when the converter found implausible pixel data
    #[serde(default = "default_convertible")]
    pub convertible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn default_ndim() -> u8 {
    3
}

fn default_volume_count() -> u32 {
    1
}

fn default_convertible() -> bool {
    true
}

impl ManifestEntry {
    /// Entry with an inline sidecar and default shape (3-D, one volume)
    pub fn inline(image: impl Into<PathBuf>, sidecar: Value) -> Self {
        Self {
            image: image.into(),
            sidecar: SidecarSource::Inline(sidecar),
            bval: None,
            bvec: None,
            ndim: default_ndim(),
            volume_count: default_volume_count(),
            file_size: 0,
            orientation: None,
            convertible: true,
            error: None,
        }
    }

    pub fn with_volumes(mut self, ndim: u8, volume_count: u32) -> Self {
        self.ndim = ndim;
        self.volume_count = volume_count;
        self
    }

    /// Attach `.bval`/`.bvec` companions named after the image
    pub fn with_gradient_table(mut self) -> Self {
        let base = {
            let image = self.image.to_string_lossy();
            image
                .strip_suffix(".nii.gz")
                .or_else(|| image.strip_suffix(".nii"))
                .unwrap_or(&image)
                .to_string()
        };
        self.bval = Some(PathBuf::from(format!("{}.bval", base)));
        self.bvec = Some(PathBuf::from(format!("{}.bvec", base)));
        self
    }
}

/// Full manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
    /// Directory relative sidecar paths resolve against
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

impl Manifest {
    pub fn from_entries(entries: Vec<ManifestEntry>) -> Self {
        Self {
            entries,
            base_dir: None,
        }
    }

    /// Read and parse a manifest file
    ///
    /// # Errors
    ///
    /// - `MalformedManifest` if the file is not a manifest document
    /// - `EmptyManifest` if it lists no entries
    pub fn load(path: &Path) -> IngestResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut manifest: Manifest = serde_json::from_str(&content).map_err(|e| {
            IngestError::MalformedManifest(format!("{}: {}", path.display(), e))
        })?;

        if manifest.entries.is_empty() {
            return Err(IngestError::EmptyManifest(path.display().to_string()));
        }

        manifest.base_dir = path.parent().map(Path::to_path_buf);
        info!(
            path = %path.display(),
            entries = manifest.entries.len(),
            "Loaded manifest"
        );
        Ok(manifest)
    }

    /// Resolve a manifest-relative path
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entry_defaults() {
        let entry: ManifestEntry = serde_json::from_value(json!({
            "image": "1_t1.nii.gz",
            "sidecar": "1_t1.json"
        }))
        .unwrap();
        assert_eq!(entry.ndim, 3);
        assert_eq!(entry.volume_count, 1);
        assert!(entry.convertible);
        assert_eq!(entry.sidecar, SidecarSource::Path(PathBuf::from("1_t1.json")));
    }

    #[test]
    fn test_inline_sidecar() {
        let entry: ManifestEntry = serde_json::from_value(json!({
            "image": "1_t1.nii.gz",
            "sidecar": {"SeriesDescription": "t1_mprage"}
        }))
        .unwrap();
        assert!(matches!(entry.sidecar, SidecarSource::Inline(_)));
    }

    #[test]
    fn test_gradient_table_paths() {
        let entry = ManifestEntry::inline("dwi/7_dwi.nii.gz", json!({})).with_gradient_table();
        assert_eq!(entry.bval, Some(PathBuf::from("dwi/7_dwi.bval")));
        assert_eq!(entry.bvec, Some(PathBuf::from("dwi/7_dwi.bvec")));
    }

    #[test]
    fn test_resolve_relative() {
        let manifest = Manifest {
            entries: Vec::new(),
            base_dir: Some(PathBuf::from("/scans")),
        };
        assert_eq!(manifest.resolve(Path::new("a.json")), PathBuf::from("/scans/a.json"));
        assert_eq!(manifest.resolve(Path::new("/abs.json")), PathBuf::from("/abs.json"));
    }
}

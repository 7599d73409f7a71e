//! # bidsmith core
//!
//! Heuristic classification of converted neuroimaging series into BIDS
//! datatypes, suffixes and entity labels.
//!
//! **Pipeline:** manifest → acquisition records → unique series → classifier
//! → entity extractor → run numbering → section & field-map resolver →
//! output document.
//!
//! Per-record problems never abort a run. They surface as `include = false`
//! plus a rationale on the affected record. Only an empty or wholly
//! malformed manifest is an error.

pub mod bids;
pub mod builder;
pub mod classifier;
pub mod document;
pub mod entities;
pub mod error;
pub mod fieldmaps;
pub mod identity;
pub mod manifest;
pub mod pipeline;
pub mod record;
pub mod reducer;
pub mod reference;
pub mod rules;
pub mod runs;
pub mod sections;
pub mod sequence;
pub mod text;
pub mod vocabulary;

pub use error::{IngestError, IngestResult};
pub use pipeline::{Classified, Pipeline};

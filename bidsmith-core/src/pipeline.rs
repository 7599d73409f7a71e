//! End-to-end classification pipeline
//!
//! **Stages:**
//! 1. Build records from the manifest
//! 2. Resolve subject/session, then sort into scan order
//! 3. Reduce to unique series
//! 4. Apply the reference document, if any
//! 5. Classify, extract entities, fan results out to every record
//! 6. Number runs, then resolve sections and field maps
//!
//! Only an empty or wholly malformed manifest stops the pipeline.

use crate::builder::{build_records, sort_records};
use crate::classifier::Classifier;
use crate::document::{assemble, Document};
use crate::entities::EntityExtractor;
use crate::error::IngestResult;
use crate::fieldmaps::resolve_field_maps;
use crate::identity::assign_identity;
use crate::manifest::Manifest;
use crate::record::AcquisitionRecord;
use crate::reducer::{fan_out, is_bids_input, reduce, UniqueSeries};
use crate::reference::ReferenceIndex;
use crate::rules::RuleTable;
use crate::runs::assign_runs;
use crate::vocabulary::TaskVocabulary;
use bidsmith_common::config::TomlConfig;
use tracing::info;

/// Records and unique series after every stage has run
#[derive(Debug, Clone)]
pub struct Classified {
    pub records: Vec<AcquisitionRecord>,
    pub series: Vec<UniqueSeries>,
}

/// Configured classification run
pub struct Pipeline {
    config: TomlConfig,
    table: RuleTable,
    vocabulary: TaskVocabulary,
    reference: Option<ReferenceIndex>,
}

impl Pipeline {
    pub fn new(config: TomlConfig, vocabulary: TaskVocabulary) -> Self {
        let table = RuleTable::standard(&config.classification);
        let vocabulary = vocabulary.with_extra(&config.tasks.extra);
        Self {
            config,
            table,
            vocabulary,
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: ReferenceIndex) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn rule_table(&self) -> &RuleTable {
        &self.table
    }

    pub fn config(&self) -> &TomlConfig {
        &self.config
    }

    /// Run every stage up to field-map resolution
    pub fn classify(&self, manifest: &Manifest) -> IngestResult<Classified> {
        let settings = &self.config.classification;

        let mut records = build_records(manifest)?;
        assign_identity(&mut records);
        sort_records(&mut records);

        let bids_input = is_bids_input(&records);
        let mut series = reduce(&mut records, settings.time_tolerance, bids_input);

        if let Some(reference) = &self.reference {
            reference.apply(&mut series, settings.time_tolerance);
        }

        Classifier::new(&self.table, settings).classify_all(&mut series);
        EntityExtractor::new(&self.table, &self.vocabulary, settings).extract_all(&mut series);
        fan_out(&series, &mut records);

        assign_runs(&mut records);
        resolve_field_maps(&mut records);

        info!(
            records = records.len(),
            series = series.len(),
            included = records.iter().filter(|r| r.classification.include).count(),
            "Pipeline complete"
        );
        Ok(Classified { records, series })
    }

    /// Classify and assemble the output document
    pub fn run(&self, manifest: &Manifest) -> IngestResult<Document> {
        let classified = self.classify(manifest)?;
        Ok(assemble(
            &self.config.dataset,
            &classified.records,
            &classified.series,
        ))
    }
}

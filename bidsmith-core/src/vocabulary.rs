//! Task-name vocabulary
//!
//! A built-in list of common paradigm names, extended with site-specific
//! names from config and optionally with the Cognitive Atlas task listing.
//! Names are stored compacted (lowercase alphanumerics), so "N-Back Task"
//! and "nback" are the same entry.

use crate::error::{IngestError, IngestResult};
use crate::text::compact;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const BUILTIN_TASKS: &[&str] = &[
    "rest", "nback", "stroop", "flanker", "gonogo", "stopsignal", "faces", "emotion", "gambling",
    "language", "motor", "relational", "social", "workingmemory", "wm", "mid", "sst",
    "checkerboard", "movie", "fingertapping", "reward", "oddball", "localizer", "visual",
    "auditory", "sternberg", "msit", "posner", "learning", "memory", "encoding", "retrieval",
];

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct RemoteTask {
    #[serde(default)]
    name: String,
}

/// Lowercase, drop a trailing "task"/"paradigm", keep alphanumerics
pub fn normalize_task_name(name: &str) -> String {
    let lower = name.trim().to_ascii_lowercase();
    let stripped = lower
        .strip_suffix(" task")
        .or_else(|| lower.strip_suffix(" paradigm"))
        .unwrap_or(&lower);
    compact(stripped)
}

/// Known task names
#[derive(Debug, Clone, PartialEq)]
pub struct TaskVocabulary {
    /// Longest first, so the most specific name wins
    names: Vec<String>,
}

impl Default for TaskVocabulary {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TaskVocabulary {
    pub fn builtin() -> Self {
        Self::from_names(BUILTIN_TASKS.iter().copied())
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut vocabulary = Self { names: Vec::new() };
        vocabulary.extend(names);
        vocabulary
    }

    /// Add names, keeping the list deduplicated and longest-first
    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for name in names {
            let normalized = normalize_task_name(name.as_ref());
            if !normalized.is_empty() && !self.names.contains(&normalized) {
                self.names.push(normalized);
            }
        }
        self.names
            .sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    }

    pub fn with_extra<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extend(names);
        self
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&normalize_task_name(name))
    }

    /// Task name found in a series description
    ///
    /// Names of at least `min_len` characters match as substrings of the
    /// compacted description. Shorter names only match an explicit
    /// `task-<name>` token.
    pub fn match_description(&self, description: &str, min_len: usize) -> Option<String> {
        let lower = description.to_ascii_lowercase();
        let compacted = compact(description);

        self.names
            .iter()
            .find(|name| {
                if name.len() >= min_len {
                    compacted.contains(name.as_str())
                } else {
                    has_task_token(&lower, name)
                }
            })
            .cloned()
    }

    /// Fetch task names from a Cognitive Atlas style endpoint
    ///
    /// The endpoint returns a JSON array of objects with a `name` field.
    pub async fn fetch(url: &str) -> IngestResult<Vec<String>> {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| IngestError::Vocabulary(format!("HTTP client: {}", e)))?;

        debug!(url, "Fetching task vocabulary");
        let tasks: Vec<RemoteTask> = client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::Vocabulary(format!("request to {} failed: {}", url, e)))?
            .error_for_status()
            .map_err(|e| IngestError::Vocabulary(format!("{} returned an error: {}", url, e)))?
            .json()
            .await
            .map_err(|e| IngestError::Vocabulary(format!("cannot parse task list: {}", e)))?;

        let names: Vec<String> = tasks
            .into_iter()
            .map(|t| t.name)
            .filter(|n| !n.trim().is_empty())
            .collect();
        info!(url, tasks = names.len(), "Fetched task vocabulary");
        Ok(names)
    }
}

fn has_task_token(lower_description: &str, name: &str) -> bool {
    let needle = format!("task-{}", name);
    lower_description.match_indices(&needle).any(|(pos, _)| {
        lower_description[pos + needle.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_ascii_alphanumeric())
    })
}

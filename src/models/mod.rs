//! Core data types flowing through the acquisition pipeline.

mod artifact;
mod candidate;
mod record;

pub use artifact::StoredArtifact;
pub use candidate::{Candidate, FetchResult};
pub use record::DownloadRecord;

use std::collections::BTreeSet;

use thiserror::Error;

/// Errors raised when a request is built with out-of-range values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("target count must be at least 1")]
    ZeroTarget,
}

/// What a run is looking for. Built once per run and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    topic: String,
    target_count: usize,
    exclude_terms: BTreeSet<String>,
}

impl SearchRequest {
    /// Create a request, rejecting an empty topic or a zero target.
    ///
    /// Exclusion terms are trimmed and lowercased; blank entries are dropped.
    pub fn new<I, S>(
        topic: impl Into<String>,
        target_count: usize,
        exclude_terms: I,
    ) -> Result<Self, RequestError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topic = topic.into().trim().to_string();
        if topic.is_empty() {
            return Err(RequestError::EmptyTopic);
        }
        if target_count == 0 {
            return Err(RequestError::ZeroTarget);
        }

        let exclude_terms = exclude_terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .collect();

        Ok(Self {
            topic,
            target_count,
            exclude_terms,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn target_count(&self) -> usize {
        self.target_count
    }

    pub fn exclude_terms(&self) -> &BTreeSet<String> {
        &self.exclude_terms
    }
}

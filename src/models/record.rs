use std::path::PathBuf;

use chrono::{DateTime, Utc};

use super::{Candidate, StoredArtifact};

/// Metadata-store row for one downloaded item, keyed by
/// `(source_name, source_key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRecord {
    pub source_name: String,
    pub source_key: String,
    pub title: Option<String>,
    pub attribution: Option<String>,
    pub tags: Vec<String>,
    pub topic: String,
    pub original_url: String,
    pub file_path: PathBuf,
    pub content_hash: String,
    pub sequence_number: u64,
    pub width: u32,
    pub height: u32,
    pub downloaded_at: DateTime<Utc>,
}

impl DownloadRecord {
    /// Build the record for an artifact that was just written.
    pub fn new(artifact: &StoredArtifact, candidate: &Candidate, topic: &str) -> Self {
        Self {
            source_name: candidate.source_name.clone(),
            source_key: candidate.store_key().to_string(),
            title: candidate.title.clone(),
            attribution: candidate.attribution.clone(),
            tags: candidate.tags.clone(),
            topic: topic.to_string(),
            original_url: artifact.original_url.clone(),
            file_path: artifact.file_path.clone(),
            content_hash: artifact.content_hash.clone(),
            sequence_number: artifact.sequence_number,
            width: artifact.width,
            height: artifact.height,
            downloaded_at: Utc::now(),
        }
    }

    /// Record for a candidate whose content is already stored under
    /// another key. It shares the existing file, so a later run treats the
    /// candidate as downloaded.
    pub fn alias(existing: &DownloadRecord, candidate: &Candidate, topic: &str) -> Self {
        Self {
            source_name: candidate.source_name.clone(),
            source_key: candidate.store_key().to_string(),
            title: candidate.title.clone(),
            attribution: candidate.attribution.clone(),
            tags: candidate.tags.clone(),
            topic: topic.to_string(),
            original_url: candidate.url.clone(),
            file_path: existing.file_path.clone(),
            content_hash: existing.content_hash.clone(),
            sequence_number: existing.sequence_number,
            width: existing.width,
            height: existing.height,
            downloaded_at: Utc::now(),
        }
    }
}

use std::path::PathBuf;

/// A normalized image written to disk, plus its bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// 1-based, gapless within a run.
    pub sequence_number: u64,
    pub file_path: PathBuf,
    /// Hex SHA-256 of the downloaded bytes.
    pub content_hash: String,
    pub source_name: String,
    pub original_url: String,
    pub width: u32,
    pub height: u32,
}

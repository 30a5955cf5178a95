//! Run counters, the final report, and progress events.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::models::StoredArtifact;

/// Why a candidate was dropped without counting as a failure of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RejectReason {
    InvalidUrl,
    DuplicateUrl,
    DuplicateContent,
    ContentType,
    TooSmall,
    Undecodable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "blacklisted/invalid url",
            Self::DuplicateUrl => "duplicate url",
            Self::DuplicateContent => "duplicate content",
            Self::ContentType => "wrong content type",
            Self::TooSmall => "too small",
            Self::Undecodable => "undecodable",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateOutcome {
    Stored(StoredArtifact),
    /// Already downloaded in an earlier run.
    Skipped,
    Rejected(RejectReason),
    Failed(String),
}

impl CandidateOutcome {
    /// Outcomes that extend the consecutive-failure streak.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Failed(_))
    }
}

/// Why a run ended without reaching its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    /// Every source and topic variant ran out of candidates.
    Exhausted,
    /// Too many rejected or failed candidates in a row.
    FailureStreak(u32),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted => f.write_str("all sources exhausted"),
            Self::FailureStreak(n) => write!(f, "{} consecutive failures", n),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done,
    Aborted(AbortReason),
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::Aborted(reason) => write!(f, "aborted ({})", reason),
        }
    }
}

/// Per-source counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceTally {
    pub found: u64,
    pub stored: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub failed: u64,
}

impl SourceTally {
    fn count(&mut self, outcome: &CandidateOutcome) {
        self.found += 1;
        match outcome {
            CandidateOutcome::Stored(_) => self.stored += 1,
            CandidateOutcome::Skipped => self.skipped += 1,
            CandidateOutcome::Rejected(_) => self.rejected += 1,
            CandidateOutcome::Failed(_) => self.failed += 1,
        }
    }
}

/// Final summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub target: usize,
    pub stored: u64,
    pub skipped: u64,
    pub rejected: u64,
    pub failed: u64,
    /// Every candidate a source delivered and the pipeline looked at.
    pub total_found: u64,
    pub rejections: BTreeMap<RejectReason, u64>,
    pub per_source: BTreeMap<String, SourceTally>,
    pub output_dir: PathBuf,
    pub artifacts: Vec<StoredArtifact>,
}

impl RunReport {
    pub(crate) fn new(target: usize, output_dir: PathBuf) -> Self {
        Self {
            outcome: RunOutcome::Aborted(AbortReason::Exhausted),
            target,
            stored: 0,
            skipped: 0,
            rejected: 0,
            failed: 0,
            total_found: 0,
            rejections: BTreeMap::new(),
            per_source: BTreeMap::new(),
            output_dir,
            artifacts: Vec::new(),
        }
    }

    pub(crate) fn count(&mut self, source: &str, outcome: &CandidateOutcome) {
        self.total_found += 1;
        self.per_source
            .entry(source.to_string())
            .or_default()
            .count(outcome);
        match outcome {
            CandidateOutcome::Stored(artifact) => {
                self.stored += 1;
                self.artifacts.push(artifact.clone());
            }
            CandidateOutcome::Skipped => self.skipped += 1,
            CandidateOutcome::Rejected(reason) => {
                self.rejected += 1;
                *self.rejections.entry(*reason).or_default() += 1;
            }
            CandidateOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn is_done(&self) -> bool {
        self.outcome == RunOutcome::Done
    }

    /// Stored over found, in `0.0..=1.0`.
    pub fn success_rate(&self) -> f64 {
        self.stored as f64 / self.total_found.max(1) as f64
    }
}

/// Progress notifications sent while a run is in flight.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Searching {
        source: String,
        query: String,
    },
    BatchFound {
        source: String,
        count: usize,
    },
    Stored {
        source: String,
        sequence_number: u64,
        path: PathBuf,
    },
    Skipped {
        source: String,
        url: String,
    },
    Rejected {
        source: String,
        url: String,
        reason: RejectReason,
    },
    Failed {
        source: String,
        url: String,
        error: String,
    },
    SourceExhausted {
        source: String,
        query: String,
    },
    Finished {
        outcome: RunOutcome,
        stored: u64,
        target: usize,
    },
}

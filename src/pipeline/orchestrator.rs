//! Drives sources through the pipeline until the target is met.
//!
//! A run walks a plan of `(source, query)` pairs: the bare topic across
//! every source in priority order, then each topic modifier. Every
//! delivered candidate passes through URL validation, URL dedup, the
//! metadata store, the downloader, content dedup, the normalizer and
//! finally the writer. Sequence numbers are handed out only when a file
//! is actually written, so they stay gapless.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::dedup::{content_hash, DedupKey, Deduplicator};
use super::downloader::{DownloadError, Downloader};
use super::normalizer::{MediaPolicy, Normalizer, Rejection};
use super::stats::{AbortReason, CandidateOutcome, PipelineEvent, RejectReason, RunOutcome, RunReport};
use super::validator::UrlValidator;
use super::{PipelineConfig, PipelineError};
use crate::models::{Candidate, DownloadRecord, SearchRequest};
use crate::repository::DownloadRepository;
use crate::scrapers::config::SourceConfig;
use crate::scrapers::retry::{Sleeper, TokioSleeper};
use crate::scrapers::sources::{build_adapter, AdapterContext};
use crate::scrapers::{PageCursor, SourceAdapter};
use crate::storage::ArtifactWriter;

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Searching,
    Downloading,
    Done,
    Aborted(AbortReason),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Aborted(_))
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Searching => f.write_str("searching"),
            Self::Downloading => f.write_str("downloading"),
            Self::Done => f.write_str("done"),
            Self::Aborted(reason) => write!(f, "aborted: {}", reason),
        }
    }
}

/// One adapter plus the per-source policy applied to its candidates.
pub struct SourceEntry {
    adapter: Box<dyn SourceAdapter>,
    normalizer: Normalizer,
    blacklist: Vec<String>,
    topic_modifiers: Vec<String>,
    allow_octet_stream: bool,
    priority: u32,
}

impl SourceEntry {
    pub fn new(adapter: Box<dyn SourceAdapter>, policy: MediaPolicy) -> Self {
        Self {
            adapter,
            normalizer: Normalizer::new(policy),
            blacklist: Vec::new(),
            topic_modifiers: Vec::new(),
            allow_octet_stream: false,
            priority: 0,
        }
    }

    /// Build the adapter and policy for a configured source.
    pub fn from_config(
        name: &str,
        config: &SourceConfig,
        ctx: &AdapterContext,
    ) -> Result<Self, PipelineError> {
        let policy = config.media_policy().map_err(|error| PipelineError::Policy {
            name: name.to_string(),
            error,
        })?;
        let adapter = build_adapter(name, config, ctx).map_err(|error| PipelineError::Setup {
            name: name.to_string(),
            error,
        })?;

        Ok(Self::new(adapter, policy)
            .with_blacklist(config.blacklist.clone())
            .with_topic_modifiers(config.topic_modifiers.clone())
            .with_octet_stream(config.allow_octet_stream)
            .with_priority(config.priority))
    }

    pub fn with_blacklist(mut self, terms: Vec<String>) -> Self {
        self.blacklist = terms;
        self
    }

    pub fn with_topic_modifiers(mut self, modifiers: Vec<String>) -> Self {
        self.topic_modifiers = modifiers
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        self
    }

    pub fn with_octet_stream(mut self, allow: bool) -> Self {
        self.allow_octet_stream = allow;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        self.adapter.name()
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    fn url_validator(&self, request: &SearchRequest, max_length: usize) -> UrlValidator {
        UrlValidator::new(
            self.blacklist.iter().chain(request.exclude_terms()),
            max_length,
            self.adapter.allows_data_uris(),
        )
    }
}

/// Per-run state, dropped when the run ends.
struct Run<'a> {
    request: &'a SearchRequest,
    writer: ArtifactWriter,
    dedup: Deduplicator,
    report: RunReport,
    streak: u32,
    state: RunState,
}

impl Run<'_> {
    fn target_reached(&self) -> bool {
        self.report.stored as usize >= self.request.target_count()
    }

    fn remaining(&self) -> usize {
        self.request
            .target_count()
            .saturating_sub(self.report.stored as usize)
    }

    fn transition(&mut self, next: RunState) {
        if self.state != next {
            debug!("run state: {} -> {}", self.state, next);
            self.state = next;
        }
    }
}

/// Runs search requests against a fixed set of sources.
pub struct Orchestrator {
    config: PipelineConfig,
    sources: Vec<SourceEntry>,
    downloader: Downloader,
    output_root: PathBuf,
    store: Option<Arc<DownloadRepository>>,
    sleeper: Arc<dyn Sleeper>,
    events: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl Orchestrator {
    /// Sources are tried in ascending priority; ties keep their given order.
    pub fn new(
        config: PipelineConfig,
        mut sources: Vec<SourceEntry>,
        downloader: Downloader,
        output_root: impl Into<PathBuf>,
    ) -> Self {
        sources.sort_by_key(|s| s.priority);
        Self {
            config,
            sources,
            downloader,
            output_root: output_root.into(),
            store: None,
            sleeper: Arc::new(TokioSleeper),
            events: None,
        }
    }

    /// Skip items already recorded and record every new artifact.
    pub fn with_store(mut self, store: Arc<DownloadRepository>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<PipelineEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// The `(source index, query)` pairs a run walks, in order.
    ///
    /// The bare topic goes to every source first. Modifiers follow, each
    /// one offered to every source that lists it.
    pub fn plan(&self, request: &SearchRequest) -> Vec<(usize, String)> {
        let topic = request.topic();
        let mut plan: Vec<(usize, String)> =
            (0..self.sources.len()).map(|i| (i, topic.to_string())).collect();

        let mut modifiers: Vec<&str> = Vec::new();
        for entry in &self.sources {
            for m in &entry.topic_modifiers {
                if !modifiers.contains(&m.as_str()) {
                    modifiers.push(m);
                }
            }
        }
        for modifier in modifiers {
            for (i, entry) in self.sources.iter().enumerate() {
                if entry.topic_modifiers.iter().any(|m| m == modifier) {
                    plan.push((i, format!("{} {}", topic, modifier)));
                }
            }
        }
        plan
    }

    /// Execute one request to completion.
    ///
    /// Fails only before the first candidate is fetched: no sources, a
    /// source that cannot run, or an unusable output directory. Everything
    /// after that ends in a [`RunReport`].
    pub async fn run(&self, request: &SearchRequest) -> Result<RunReport, PipelineError> {
        if self.sources.is_empty() {
            return Err(PipelineError::NoSources);
        }
        for entry in &self.sources {
            entry.adapter.validate().map_err(|error| PipelineError::Setup {
                name: entry.name().to_string(),
                error,
            })?;
        }

        let writer = ArtifactWriter::new(&self.output_root, request.topic())?;
        info!(
            "Collecting {} images for '{}' into {}",
            request.target_count(),
            request.topic(),
            writer.dir().display()
        );

        let mut run = Run {
            request,
            report: RunReport::new(request.target_count(), writer.dir().to_path_buf()),
            writer,
            dedup: Deduplicator::new(),
            streak: 0,
            state: RunState::Searching,
        };
        let mut dead_sources: HashSet<usize> = HashSet::new();
        let mut first_page = true;

        'plan: for (index, query) in self.plan(request) {
            if dead_sources.contains(&index) {
                continue;
            }
            let entry = &self.sources[index];
            let validator = entry.url_validator(request, self.config.max_url_length());
            let mut cursor = PageCursor::new(query.clone(), self.config.empty_page_limit());

            self.emit(PipelineEvent::Searching {
                source: entry.name().to_string(),
                query: query.clone(),
            });

            loop {
                if run.target_reached() {
                    break 'plan;
                }
                run.transition(RunState::Searching);

                if !first_page {
                    self.sleeper.sleep(self.config.page_delay()).await;
                }
                first_page = false;

                let batch = match cursor
                    .next_batch(entry.adapter.as_ref(), request, run.remaining())
                    .await
                {
                    Ok(Some(batch)) => batch,
                    Ok(None) => {
                        debug!("{}: exhausted for '{}'", entry.name(), query);
                        self.emit(PipelineEvent::SourceExhausted {
                            source: entry.name().to_string(),
                            query: query.clone(),
                        });
                        break;
                    }
                    Err(e) => {
                        warn!("{}: giving up on source: {}", entry.name(), e);
                        dead_sources.insert(index);
                        break;
                    }
                };

                self.emit(PipelineEvent::BatchFound {
                    source: entry.name().to_string(),
                    count: batch.len(),
                });
                run.transition(RunState::Downloading);

                for candidate in batch {
                    if run.target_reached() {
                        break 'plan;
                    }

                    let (outcome, hit_network) =
                        self.process(entry, &validator, &mut run, &candidate).await;
                    if matches!(outcome, CandidateOutcome::Failed(_)) {
                        // A later query may deliver the same URL again.
                        run.dedup.forget(&DedupKey::url(&candidate.url));
                    }

                    if matches!(outcome, CandidateOutcome::Stored(_)) {
                        run.streak = 0;
                    } else if outcome.is_failure() {
                        run.streak += 1;
                    }
                    self.emit(outcome_event(&candidate, &outcome));
                    run.report.count(entry.name(), &outcome);

                    if run.streak >= self.config.max_consecutive_failures() {
                        warn!(
                            "Aborting after {} consecutive failed candidates",
                            run.streak
                        );
                        run.transition(RunState::Aborted(AbortReason::FailureStreak(run.streak)));
                        break 'plan;
                    }

                    if hit_network && !run.target_reached() {
                        self.politeness_delay().await;
                    }
                }
            }
        }

        if !run.state.is_terminal() {
            let terminal = if run.target_reached() {
                RunState::Done
            } else {
                RunState::Aborted(AbortReason::Exhausted)
            };
            run.transition(terminal);
        }
        run.report.outcome = match &run.state {
            RunState::Aborted(reason) => RunOutcome::Aborted(reason.clone()),
            _ => RunOutcome::Done,
        };

        info!(
            "Run {}: {}/{} stored, {} skipped, {} rejected, {} failed of {} found",
            run.report.outcome,
            run.report.stored,
            run.report.target,
            run.report.skipped,
            run.report.rejected,
            run.report.failed,
            run.report.total_found
        );
        self.emit(PipelineEvent::Finished {
            outcome: run.report.outcome.clone(),
            stored: run.report.stored,
            target: run.report.target,
        });

        Ok(run.report)
    }

    /// Take one candidate through every stage. The flag reports whether
    /// the downloader went to the network.
    async fn process(
        &self,
        entry: &SourceEntry,
        validator: &UrlValidator,
        run: &mut Run<'_>,
        candidate: &Candidate,
    ) -> (CandidateOutcome, bool) {
        if let Err(e) = validator.check(&candidate.url) {
            debug!("{}: rejected {}: {}", entry.name(), candidate.url, e);
            return (CandidateOutcome::Rejected(RejectReason::InvalidUrl), false);
        }
        if !run.dedup.mark(DedupKey::url(&candidate.url)) {
            return (CandidateOutcome::Rejected(RejectReason::DuplicateUrl), false);
        }

        if let Some(store) = &self.store {
            match store.lookup(&candidate.source_name, candidate.store_key()) {
                Ok(Some(existing)) => {
                    debug!(
                        "{}: {} already stored at {}",
                        entry.name(),
                        candidate.store_key(),
                        existing.file_path.display()
                    );
                    // Mirrors of one file share a hash; only the first counts as skipped.
                    if !run.dedup.mark(DedupKey::hash(&existing.content_hash)) {
                        return (
                            CandidateOutcome::Rejected(RejectReason::DuplicateContent),
                            false,
                        );
                    }
                    return (CandidateOutcome::Skipped, false);
                }
                Ok(None) => {}
                Err(e) => warn!("Store lookup failed for {}: {}", candidate.url, e),
            }
        }

        let hit_network = !candidate.is_data_uri();
        let fetched = match self
            .downloader
            .fetch(
                candidate,
                self.config.request_timeout(),
                self.config.max_download_bytes(),
                entry.allow_octet_stream,
            )
            .await
        {
            Ok(fetched) => fetched,
            Err(e) => return (download_outcome(e), hit_network),
        };

        let hash = content_hash(&fetched.bytes);
        let first_in_run = run.dedup.mark(DedupKey::hash(&hash));
        if let Some(store) = &self.store {
            match store.find_by_hash(&hash) {
                Ok(Some(existing)) => {
                    self.record_alias(store, &existing, candidate, run.request.topic());
                    let outcome = if first_in_run {
                        CandidateOutcome::Skipped
                    } else {
                        CandidateOutcome::Rejected(RejectReason::DuplicateContent)
                    };
                    return (outcome, hit_network);
                }
                Ok(None) => {}
                Err(e) => warn!("Store hash check failed for {}: {}", candidate.url, e),
            }
        }
        if !first_in_run {
            return (
                CandidateOutcome::Rejected(RejectReason::DuplicateContent),
                hit_network,
            );
        }

        let image = match entry.normalizer.normalize(&fetched.bytes) {
            Ok(image) => image,
            Err(rejection) => {
                debug!("{}: {}: {}", entry.name(), candidate.url, rejection);
                return (rejection_outcome(rejection), hit_network);
            }
        };

        let sequence_number = run.report.stored + 1;
        let artifact = match run
            .writer
            .store(&image, sequence_number, candidate, &hash)
        {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!("Failed to write {}: {}", candidate.url, e);
                return (CandidateOutcome::Failed(e.to_string()), hit_network);
            }
        };

        if let Some(store) = &self.store {
            let record = DownloadRecord::new(&artifact, candidate, run.request.topic());
            if let Err(e) = store.record(&record) {
                warn!("Failed to record {}: {}", artifact.file_path.display(), e);
            }
        }

        (CandidateOutcome::Stored(artifact), hit_network)
    }

    /// Point this candidate's key at content already on disk, so the next
    /// run skips it without downloading.
    fn record_alias(
        &self,
        store: &DownloadRepository,
        existing: &DownloadRecord,
        candidate: &Candidate,
        topic: &str,
    ) {
        if existing.source_name == candidate.source_name
            && existing.source_key == candidate.store_key()
        {
            return;
        }
        debug!(
            "{}: {} has the same content as {}/{}",
            candidate.source_name,
            candidate.store_key(),
            existing.source_name,
            existing.source_key
        );
        let alias = DownloadRecord::alias(existing, candidate, topic);
        if let Err(e) = store.record(&alias) {
            warn!("Failed to record {}: {}", candidate.url, e);
        }
    }

    async fn politeness_delay(&self) {
        let (min, max) = self.config.delay_range();
        let delay = if min >= max {
            min
        } else {
            let ms = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
            Duration::from_millis(ms)
        };
        self.sleeper.sleep(delay).await;
    }

    fn emit(&self, event: PipelineEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn download_outcome(error: DownloadError) -> CandidateOutcome {
    match error {
        DownloadError::ContentType(_) => CandidateOutcome::Rejected(RejectReason::ContentType),
        DownloadError::DataUri(_) => CandidateOutcome::Rejected(RejectReason::InvalidUrl),
        other => CandidateOutcome::Failed(other.to_string()),
    }
}

fn rejection_outcome(rejection: Rejection) -> CandidateOutcome {
    match rejection {
        Rejection::TooSmall { .. } => CandidateOutcome::Rejected(RejectReason::TooSmall),
        Rejection::NotAnImage(_) | Rejection::Undecodable(_) => {
            CandidateOutcome::Rejected(RejectReason::Undecodable)
        }
        Rejection::Encode(e) => CandidateOutcome::Failed(e),
    }
}

fn outcome_event(candidate: &Candidate, outcome: &CandidateOutcome) -> PipelineEvent {
    let source = candidate.source_name.clone();
    match outcome {
        CandidateOutcome::Stored(artifact) => PipelineEvent::Stored {
            source,
            sequence_number: artifact.sequence_number,
            path: artifact.file_path.clone(),
        },
        CandidateOutcome::Skipped => PipelineEvent::Skipped {
            source,
            url: candidate.url.clone(),
        },
        CandidateOutcome::Rejected(reason) => PipelineEvent::Rejected {
            source,
            url: candidate.url.clone(),
            reason: *reason,
        },
        CandidateOutcome::Failed(error) => PipelineEvent::Failed {
            source,
            url: candidate.url.clone(),
            error: error.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OutputFormat;
    use crate::scrapers::retry::RecordingSleeper;
    use crate::scrapers::{CandidatePage, SourceError};
    use async_trait::async_trait;
    use base64::Engine;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    /// Serves fixed candidate lists per query, one page each.
    struct Stub {
        name: String,
        pages: Vec<(String, Vec<Candidate>)>,
        queries: Mutex<Vec<String>>,
        fail_validate: bool,
    }

    impl Stub {
        fn new(name: &str, pages: Vec<(&str, Vec<Candidate>)>) -> Self {
            Self {
                name: name.to_string(),
                pages: pages
                    .into_iter()
                    .map(|(q, c)| (q.to_string(), c))
                    .collect(),
                queries: Mutex::new(Vec::new()),
                fail_validate: false,
            }
        }
    }

    #[async_trait]
    impl SourceAdapter for Stub {
        fn name(&self) -> &str {
            &self.name
        }

        fn allows_data_uris(&self) -> bool {
            true
        }

        fn validate(&self) -> Result<(), SourceError> {
            if self.fail_validate {
                return Err(SourceError::MissingCredential("api_key".into()));
            }
            Ok(())
        }

        async fn fetch_page(
            &self,
            _request: &SearchRequest,
            query: &str,
            page: u32,
            _count_needed: usize,
        ) -> Result<CandidatePage, SourceError> {
            self.queries.lock().unwrap().push(format!("{}#{}", query, page));
            let candidates = self
                .pages
                .iter()
                .find(|(q, _)| q == query)
                .map(|(_, c)| c.clone())
                .unwrap_or_default();
            Ok(CandidatePage::new(candidates, true))
        }
    }

    fn png(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([shade, 255 - shade, 7]));
        let mut buf = Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn data_candidate(source: &str, tag: &str, bytes: &[u8]) -> Candidate {
        let payload = base64::engine::general_purpose::STANDARD.encode(bytes);
        Candidate::new(format!("data:image/png;name={};base64,{}", tag, payload), source)
            .with_key(tag)
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder().no_delays().build().unwrap()
    }

    fn entry(stub: Stub) -> SourceEntry {
        SourceEntry::new(
            Box::new(stub),
            MediaPolicy::new(8, 8, OutputFormat::Png).unwrap(),
        )
    }

    fn orchestrator(sources: Vec<SourceEntry>, root: &Path) -> Orchestrator {
        Orchestrator::new(config(), sources, Downloader::new(None).unwrap(), root)
            .with_sleeper(Arc::new(RecordingSleeper::new()))
    }

    #[tokio::test]
    async fn test_no_sources() {
        let dir = tempfile::tempdir().unwrap();
        let orch = orchestrator(Vec::new(), dir.path());
        let request = SearchRequest::new("cats", 1, Vec::<String>::new()).unwrap();
        assert!(matches!(
            orch.run(&request).await,
            Err(PipelineError::NoSources)
        ));
    }

    #[tokio::test]
    async fn test_setup_failure_stops_before_fetching() {
        let dir = tempfile::tempdir().unwrap();
        let mut stub = Stub::new("gifs", vec![]);
        stub.fail_validate = true;
        let orch = orchestrator(vec![entry(stub)], dir.path());
        let request = SearchRequest::new("cats", 1, Vec::<String>::new()).unwrap();

        let err = orch.run(&request).await.unwrap_err();
        assert!(matches!(err, PipelineError::Setup { ref name, .. } if name == "gifs"));
        assert!(!dir.path().join("cats").exists());
    }

    #[tokio::test]
    async fn test_done_when_target_met() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = (0..5u8)
            .map(|i| data_candidate("a", &format!("c{}", i), &png(16, 16, i * 40)))
            .collect();
        let orch = orchestrator(vec![entry(Stub::new("a", vec![("cats", candidates)]))], dir.path());
        let request = SearchRequest::new("cats", 3, Vec::<String>::new()).unwrap();

        let report = orch.run(&request).await.unwrap();
        assert!(report.is_done());
        assert_eq!(report.stored, 3);
        assert_eq!(report.total_found, 3);
        let seqs: Vec<u64> = report.artifacts.iter().map(|a| a.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_failure_streak_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = (0..6u8)
            .map(|i| data_candidate("a", &format!("tiny{}", i), &png(2, 2, i)))
            .collect();
        let config = PipelineConfig::builder()
            .no_delays()
            .max_consecutive_failures(4)
            .build()
            .unwrap();
        let orch = Orchestrator::new(
            config,
            vec![entry(Stub::new("a", vec![("cats", candidates)]))],
            Downloader::new(None).unwrap(),
            dir.path(),
        );
        let request = SearchRequest::new("cats", 2, Vec::<String>::new()).unwrap();

        let report = orch.run(&request).await.unwrap();
        assert_eq!(
            report.outcome,
            RunOutcome::Aborted(AbortReason::FailureStreak(4))
        );
        assert_eq!(report.total_found, 4);
        assert_eq!(report.rejections.get(&RejectReason::TooSmall), Some(&4));
    }

    #[tokio::test]
    async fn test_duplicate_content_and_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let a = png(16, 16, 10);
        let b = png(16, 16, 200);
        let candidates = vec![
            data_candidate("a", "a", &a),
            data_candidate("a", "b", &b),
            data_candidate("a", "a-again", &a),
            data_candidate("a", "b-again", &b),
            data_candidate("a", "junk", b"definitely not pixels"),
        ];
        let orch = orchestrator(vec![entry(Stub::new("a", vec![("cats", candidates)]))], dir.path());
        let request = SearchRequest::new("cats", 10, Vec::<String>::new()).unwrap();

        let report = orch.run(&request).await.unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted(AbortReason::Exhausted));
        assert_eq!(report.stored, 2);
        assert_eq!(report.total_found, 5);
        assert_eq!(report.rejections.get(&RejectReason::DuplicateContent), Some(&2));
        assert_eq!(report.rejections.get(&RejectReason::Undecodable), Some(&1));

        let hashes: HashSet<_> = report.artifacts.iter().map(|a| &a.content_hash).collect();
        assert_eq!(hashes.len(), 2);
    }

    #[tokio::test]
    async fn test_modifiers_follow_bare_topic() {
        let dir = tempfile::tempdir().unwrap();
        let first = entry(Stub::new("first", vec![])).with_topic_modifiers(vec!["art".into()]);
        let second = entry(Stub::new("second", vec![]))
            .with_priority(1)
            .with_topic_modifiers(vec!["art".into(), "photo".into()]);
        let orch = orchestrator(vec![second, first], dir.path());
        let request = SearchRequest::new("cats", 1, Vec::<String>::new()).unwrap();

        let plan: Vec<(String, String)> = orch
            .plan(&request)
            .into_iter()
            .map(|(i, q)| (orch.sources[i].name().to_string(), q))
            .collect();
        assert_eq!(
            plan,
            vec![
                ("first".to_string(), "cats".to_string()),
                ("second".to_string(), "cats".to_string()),
                ("first".to_string(), "cats art".to_string()),
                ("second".to_string(), "cats art".to_string()),
                ("second".to_string(), "cats photo".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_exclude_terms_reject_urls() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![data_candidate("a", "ok", &png(16, 16, 1))];
        let orch = orchestrator(vec![entry(Stub::new("a", vec![("cats", candidates)]))], dir.path());
        let request = SearchRequest::new("cats", 1, vec!["NAME=OK"]).unwrap();

        let report = orch.run(&request).await.unwrap();
        assert_eq!(report.stored, 0);
        assert_eq!(report.rejections.get(&RejectReason::InvalidUrl), Some(&1));
    }

    #[tokio::test]
    async fn test_store_skips_known_items() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DownloadRepository::in_memory().unwrap());
        let make = || {
            (0..3u8)
                .map(|i| data_candidate("a", &format!("k{}", i), &png(16, 16, i * 50)))
                .collect::<Vec<_>>()
        };

        let orch = orchestrator(vec![entry(Stub::new("a", vec![("cats", make())]))], dir.path())
            .with_store(store.clone());
        let request = SearchRequest::new("cats", 3, Vec::<String>::new()).unwrap();
        let first = orch.run(&request).await.unwrap();
        assert_eq!(first.stored, 3);
        assert_eq!(store.count(None).unwrap(), 3);

        let orch = orchestrator(vec![entry(Stub::new("a", vec![("cats", make())]))], dir.path())
            .with_store(store.clone());
        let second = orch.run(&request).await.unwrap();
        assert_eq!(second.stored, 0);
        assert_eq!(second.skipped, 3);
        assert_eq!(second.outcome, RunOutcome::Aborted(AbortReason::Exhausted));
    }

    #[tokio::test]
    async fn test_events_are_sent() {
        let dir = tempfile::tempdir().unwrap();
        let candidates = vec![data_candidate("a", "one", &png(16, 16, 3))];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let orch = orchestrator(vec![entry(Stub::new("a", vec![("cats", candidates)]))], dir.path())
            .with_events(tx);
        let request = SearchRequest::new("cats", 1, Vec::<String>::new()).unwrap();
        orch.run(&request).await.unwrap();

        let mut stored = 0;
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::Stored { sequence_number, .. } => {
                    assert_eq!(sequence_number, 1);
                    stored += 1;
                }
                PipelineEvent::Finished { outcome, .. } => {
                    assert_eq!(outcome, RunOutcome::Done);
                    finished = true;
                }
                _ => {}
            }
        }
        assert_eq!(stored, 1);
        assert!(finished);
    }
}

//! Terminal progress for scrape runs.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;

use crate::pipeline::{PipelineEvent, RunOutcome};

/// Renders [`PipelineEvent`]s on a progress bar until the channel closes.
pub struct RunProgress {
    bar: Option<ProgressBar>,
}

impl RunProgress {
    pub fn new(target: usize, quiet: bool) -> Self {
        let bar = if quiet {
            None
        } else {
            let pb = ProgressBar::new(target as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        };
        Self { bar }
    }

    /// Consume events until the sender side is dropped.
    pub async fn drive(self, mut events: mpsc::UnboundedReceiver<PipelineEvent>) {
        while let Some(event) = events.recv().await {
            self.handle(&event);
        }
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }

    fn handle(&self, event: &PipelineEvent) {
        let Some(bar) = &self.bar else {
            return;
        };
        match event {
            PipelineEvent::Searching { source, query } => {
                bar.set_message(format!("searching {} for '{}'", source, query));
            }
            PipelineEvent::BatchFound { source, count } => {
                bar.set_message(format!("{}: {} candidates", source, count));
            }
            PipelineEvent::Stored {
                sequence_number,
                path,
                ..
            } => {
                bar.set_position(*sequence_number);
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                bar.set_message(name);
            }
            PipelineEvent::Skipped { .. } | PipelineEvent::Rejected { .. } => {
                bar.tick();
            }
            PipelineEvent::Failed { url, error, .. } => {
                bar.println(format!("{} {}: {}", style("✗").red(), url, error));
            }
            PipelineEvent::SourceExhausted { source, query } => {
                bar.println(format!(
                    "{} {} has nothing more for '{}'",
                    style("!").yellow(),
                    source,
                    query
                ));
            }
            PipelineEvent::Finished { outcome, .. } => match outcome {
                RunOutcome::Done => bar.set_message("done"),
                RunOutcome::Aborted(reason) => bar.set_message(format!("aborted: {}", reason)),
            },
        }
    }
}

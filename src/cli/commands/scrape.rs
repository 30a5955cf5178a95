//! The scrape command: run the pipeline for one topic.

use std::sync::Arc;

use console::style;
use tokio::sync::mpsc;

use crate::cli::helpers::{acknowledge_terms, prompt, split_terms, truncate};
use crate::cli::progress::RunProgress;
use crate::config::Settings;
use crate::models::SearchRequest;
use crate::pipeline::{Downloader, Orchestrator, RunReport, SourceEntry};
use crate::repository::DownloadRepository;
use crate::scrapers::config::SourceKind;
use crate::scrapers::retry::{Sleeper, TokioSleeper};
use crate::scrapers::sources::AdapterContext;

/// Options for [`cmd_scrape`] beyond the loaded settings.
#[derive(Debug, Clone, Default)]
pub struct ScrapeOptions {
    /// Asked for interactively when missing.
    pub topic: Option<String>,
    pub count: usize,
    pub exclude: Vec<String>,
    /// Restrict the run to these configured sources.
    pub sources: Vec<String>,
    pub pixiv_session: Option<String>,
    /// Do not consult or update the metadata store.
    pub no_store: bool,
    pub quiet: bool,
    pub assume_yes: bool,
}

/// Collect images for a topic.
pub async fn cmd_scrape(settings: &Settings, mut options: ScrapeOptions) -> anyhow::Result<()> {
    let topic = match options.topic.take().filter(|t| !t.trim().is_empty()) {
        Some(topic) => topic,
        None => {
            let topic = prompt("Topic")?;
            if options.exclude.is_empty() {
                options.exclude = split_terms(&prompt("Exclude terms (comma-separated, optional)")?);
            }
            topic
        }
    };
    let request = SearchRequest::new(topic, options.count, &options.exclude)?;
    let pipeline = settings.pipeline_config()?;

    let selected: Vec<_> = settings
        .enabled_sources()
        .into_iter()
        .filter(|(name, _)| options.sources.is_empty() || options.sources.iter().any(|s| s == name))
        .collect();
    if selected.is_empty() {
        println!(
            "{} No enabled sources match. Add sources to your config file or check --source.",
            style("✗").red()
        );
        return Ok(());
    }

    let names: Vec<&str> = selected.iter().map(|(name, _)| *name).collect();
    if !acknowledge_terms(&names, options.assume_yes)? {
        println!("{} Cancelled", style("!").yellow());
        return Ok(());
    }

    let needs_session = selected
        .iter()
        .any(|(_, config)| config.kind == SourceKind::Pixiv);
    if needs_session && options.pixiv_session.is_none() && !options.assume_yes {
        let session = prompt("Pixiv PHPSESSID (leave empty to skip)")?;
        if !session.is_empty() {
            options.pixiv_session = Some(session);
        }
    }

    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let ctx = AdapterContext {
        timeout: settings.request_timeout(),
        user_agent: Some(settings.user_agent.clone()),
        retry: settings.retry_policy()?,
        sleeper: sleeper.clone(),
        pixiv_session: options.pixiv_session.clone(),
    };
    let entries = selected
        .iter()
        .map(|(name, config)| SourceEntry::from_config(name, config, &ctx))
        .collect::<Result<Vec<_>, _>>()?;

    let downloader = Downloader::new(Some(&settings.user_agent))?
        .with_retry(settings.retry_policy()?, sleeper.clone());

    settings.ensure_directories()?;
    let mut orchestrator = Orchestrator::new(pipeline, entries, downloader, &settings.output_root)
        .with_sleeper(sleeper);
    if !options.no_store {
        let store = DownloadRepository::new(&settings.database_path())?;
        orchestrator = orchestrator.with_store(Arc::new(store));
    }

    println!(
        "\n{} Collecting {} images for '{}' from {}",
        style("→").cyan(),
        request.target_count(),
        style(request.topic()).bold(),
        names.join(", ")
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = orchestrator.with_events(tx);
    let progress = tokio::spawn(RunProgress::new(request.target_count(), options.quiet).drive(rx));

    let result = orchestrator.run(&request).await;
    // Dropping the orchestrator closes the event channel.
    drop(orchestrator);
    let _ = progress.await;

    let report = result?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &RunReport) {
    let marker = if report.is_done() {
        style("✓").green()
    } else {
        style("!").yellow()
    };
    println!(
        "\n{} {}: {}/{} images stored in {}",
        marker,
        report.outcome,
        report.stored,
        report.target,
        report.output_dir.display()
    );

    println!("\n{}", style("Summary").bold());
    println!("{}", "-".repeat(60));
    println!("{:<25} {}", "Found:", report.total_found);
    println!("{:<25} {}", "Stored:", report.stored);
    println!("{:<25} {}", "Already downloaded:", report.skipped);
    println!("{:<25} {}", "Rejected:", report.rejected);
    for (reason, count) in &report.rejections {
        println!("{:<25} {}", format!("  {}:", reason), count);
    }
    println!("{:<25} {}", "Failed:", report.failed);
    println!(
        "{:<25} {:.1}%",
        "Success rate:",
        report.success_rate() * 100.0
    );

    if report.per_source.len() > 1 {
        println!("\n{:<20} {:>8} {:>8} {:>8} {:>8}", "Source", "Found", "Stored", "Rejected", "Failed");
        println!("{}", "-".repeat(60));
        for (name, tally) in &report.per_source {
            println!(
                "{:<20} {:>8} {:>8} {:>8} {:>8}",
                truncate(name, 19),
                tally.found,
                tally.stored,
                tally.rejected,
                tally.failed
            );
        }
    }
}


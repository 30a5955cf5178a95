//! Download history command.

use console::style;

use crate::cli::helpers::truncate;
use crate::config::Settings;
use crate::repository::DownloadRepository;

/// Show the most recent downloads, optionally for one source.
pub async fn cmd_history(
    settings: &Settings,
    source: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    if !db_path.exists() {
        println!("{} Nothing downloaded yet.", style("!").yellow());
        return Ok(());
    }

    let repo = DownloadRepository::new(&db_path)?;
    let total = repo.count(source)?;
    let records = repo.list(source, limit)?;

    if records.is_empty() {
        println!("{} No downloads recorded.", style("!").yellow());
        return Ok(());
    }

    println!("\n{}", style("Download History").bold());
    println!("{}", "-".repeat(80));
    println!(
        "{:<17} {:<12} {:<16} {:>5} {:<10} File",
        "When", "Source", "Topic", "Seq", "Size"
    );
    println!("{}", "-".repeat(80));

    for record in &records {
        let file = record
            .file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        println!(
            "{:<17} {:<12} {:<16} {:>5} {:<10} {}",
            record.downloaded_at.format("%Y-%m-%d %H:%M").to_string(),
            truncate(&record.source_name, 11),
            truncate(&record.topic, 15),
            record.sequence_number,
            format!("{}x{}", record.width, record.height),
            truncate(&file, 30)
        );
    }

    if total as usize > records.len() {
        println!(
            "\n{} Showing {} of {} records. Use --limit to see more.",
            style("→").cyan(),
            records.len(),
            total
        );
    }

    Ok(())
}

//! Metadata store maintenance.

use console::style;

use crate::cli::helpers::confirm;
use crate::config::Settings;
use crate::repository::DownloadRepository;

/// Drop records whose files are gone, or forget one item so it can be
/// downloaded again.
pub async fn cmd_prune(
    settings: &Settings,
    forget: Option<(String, String)>,
    assume_yes: bool,
) -> anyhow::Result<()> {
    let db_path = settings.database_path();
    if !db_path.exists() {
        println!("{} No metadata store at {}", style("!").yellow(), db_path.display());
        return Ok(());
    }
    let repo = DownloadRepository::new(&db_path)?;

    if let Some((source, key)) = forget {
        if !assume_yes && !confirm(&format!("Forget {}/{}?", source, key))? {
            println!("{} Cancelled", style("!").yellow());
            return Ok(());
        }
        if repo.remove(&source, &key)? {
            println!("{} Forgot {}/{}", style("✓").green(), source, key);
        } else {
            println!("{} No record for {}/{}", style("✗").red(), source, key);
        }
        return Ok(());
    }

    let before = repo.count(None)?;
    let purged = repo.purge_stale()?;
    println!(
        "{} Removed {} stale record(s), {} remain",
        style("✓").green(),
        purged,
        before.saturating_sub(purged as u64)
    );
    Ok(())
}

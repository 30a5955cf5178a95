//! Source listing command.

use console::style;

use crate::config::Settings;
use crate::scrapers::config::SourceConfig;
use crate::scrapers::sources::{build_adapter, AdapterContext};

use crate::cli::helpers::truncate;

/// List configured sources and whether each one is ready to run.
pub async fn cmd_sources(settings: &Settings, pixiv_session: Option<String>) -> anyhow::Result<()> {
    if settings.sources.is_empty() {
        println!(
            "{} No sources configured. Add a [sources] table to imgharvest.toml.",
            style("!").yellow()
        );
        return Ok(());
    }

    let ctx = AdapterContext {
        pixiv_session,
        ..Default::default()
    };

    println!("\n{}", style("Sources").bold());
    println!("{}", "-".repeat(72));
    println!(
        "{:<16} {:<12} {:>4} {:<10} {:<12} Status",
        "Name", "Kind", "Pri", "Min size", "Format"
    );
    println!("{}", "-".repeat(72));

    let mut sources: Vec<(&String, &SourceConfig)> = settings.sources.iter().collect();
    sources.sort_by_key(|(_, c)| c.priority);

    for (name, config) in sources {
        let (size, format) = match config.media_policy() {
            Ok(policy) => (
                format!("{}x{}", policy.min_width(), policy.min_height()),
                policy.format().to_string(),
            ),
            Err(e) => ("-".to_string(), format!("invalid: {}", e)),
        };

        let status = if !config.enabled {
            style("disabled".to_string()).dim()
        } else {
            match build_adapter(name, config, &ctx).and_then(|a| a.validate()) {
                Ok(()) => style("✓ ready".to_string()).green(),
                Err(e) => style(format!("✗ {}", e)).red(),
            }
        };

        println!(
            "{:<16} {:<12} {:>4} {:<10} {:<12} {}",
            truncate(name, 15),
            config.kind.as_str(),
            config.priority,
            size,
            truncate(&format, 11),
            status
        );
    }

    Ok(())
}

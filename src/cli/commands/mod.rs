//! CLI command implementations.

mod history;
mod prune;
mod scrape;
mod sources;

pub use history::cmd_history;
pub use prune::cmd_prune;
pub use scrape::{cmd_scrape, ScrapeOptions};
pub use sources::cmd_sources;

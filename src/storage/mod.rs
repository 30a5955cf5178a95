//! On-disk persistence of normalized images.

pub mod filename;
mod writer;

pub use filename::{identifying_token, sanitize_filename, truncate_utf8};
pub use writer::ArtifactWriter;

//! Writes normalized images under `<output_root>/<topic>/`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::filename::{identifying_token, sanitize_filename};
use crate::models::{Candidate, StoredArtifact};
use crate::pipeline::NormalizedImage;

/// Gives up looking for a free name after this many suffixes.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Writes artifacts for one topic.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Create the writer, creating `<output_root>/<sanitized topic>` if needed.
    pub fn new(output_root: &Path, topic: &str) -> io::Result<Self> {
        let dir = output_root.join(sanitize_filename(topic));
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory artifacts are written to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `image` as `<sequence_number>_<token>.<ext>`.
    ///
    /// The bytes go to a temporary file in the same directory first and
    /// are linked into place without replacing anything; an existing file
    /// gets `_<n>` appended to the new name instead.
    pub fn store(
        &self,
        image: &NormalizedImage,
        sequence_number: u64,
        candidate: &Candidate,
        content_hash: &str,
    ) -> io::Result<StoredArtifact> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&image.bytes)?;
        tmp.as_file().sync_all()?;

        let stem = format!("{}_{}", sequence_number, identifying_token(candidate));
        let mut suffix = 0;
        let file_path = loop {
            let name = if suffix == 0 {
                format!("{}.{}", stem, image.extension)
            } else {
                format!("{}_{}.{}", stem, suffix, image.extension)
            };
            let path = self.dir.join(name);

            match tmp.persist_noclobber(&path) {
                Ok(_) => break path,
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                    debug!("{} exists, trying next suffix", path.display());
                    tmp = e.file;
                    suffix += 1;
                    if suffix > MAX_COLLISION_SUFFIX {
                        return Err(io::Error::new(
                            io::ErrorKind::AlreadyExists,
                            format!("no free file name for {}", stem),
                        ));
                    }
                }
                Err(e) => return Err(e.error),
            }
        };

        Ok(StoredArtifact {
            sequence_number,
            file_path,
            content_hash: content_hash.to_string(),
            source_name: candidate.source_name.clone(),
            original_url: candidate.url.clone(),
            width: image.width,
            height: image.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(bytes: &[u8]) -> NormalizedImage {
        NormalizedImage {
            bytes: bytes.to_vec(),
            width: 10,
            height: 20,
            extension: "png",
        }
    }

    #[test]
    fn test_store_uses_deterministic_path() {
        let root = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(root.path(), "cats: cute?").unwrap();
        assert_eq!(writer.dir(), root.path().join("cats_ cute_"));

        let candidate = Candidate::new("https://example.com/img/tabby.png", "src");
        let artifact = writer.store(&image(b"one"), 7, &candidate, "abc").unwrap();

        assert_eq!(artifact.file_path, writer.dir().join("7_tabby.png"));
        assert_eq!(std::fs::read(&artifact.file_path).unwrap(), b"one");
        assert_eq!(artifact.sequence_number, 7);
        assert_eq!((artifact.width, artifact.height), (10, 20));
    }

    #[test]
    fn test_collision_appends_suffix() {
        let root = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(root.path(), "cats").unwrap();
        std::fs::write(writer.dir().join("1_tabby.png"), b"existing").unwrap();

        let candidate = Candidate::new("https://example.com/tabby.png", "src");
        let first = writer.store(&image(b"new"), 1, &candidate, "h1").unwrap();
        let second = writer.store(&image(b"newer"), 1, &candidate, "h2").unwrap();

        assert_eq!(first.file_path, writer.dir().join("1_tabby_1.png"));
        assert_eq!(second.file_path, writer.dir().join("1_tabby_2.png"));
        assert_eq!(std::fs::read(writer.dir().join("1_tabby.png")).unwrap(), b"existing");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let root = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(root.path(), "cats").unwrap();
        let candidate = Candidate::new("https://example.com/a.png", "src");
        writer.store(&image(b"x"), 1, &candidate, "h").unwrap();

        let names: Vec<_> = std::fs::read_dir(writer.dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["1_a.png".to_string()]);
    }
}

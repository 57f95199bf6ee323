use crate::error::{MaterializeError, Result};
use crate::materialize::layout::sanitize_component;
use std::collections::HashSet;
use std::fs::File;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Local file header signature of a ZIP archive
pub const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Unpacks a bulk export into a directory
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` under `dest`, returning the files written
    fn extract(&self, archive: &Path, dest: &Path) -> Result<Vec<PathBuf>>;
}

/// Whether `path` starts with the ZIP local file header
pub fn is_zip(path: &Path) -> std::io::Result<bool> {
    use std::io::Read;
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    match file.read_exact(&mut head) {
        Ok(()) => Ok(&head == ZIP_MAGIC),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// [`ArchiveExtractor`] for ZIP exports
///
/// Entries whose path escapes the destination are skipped. Every remaining path
/// component goes through [`sanitize_component`], so the extracted tree obeys the same
/// naming rules as a tree built from enumeration. Entries that sanitize to the same file
/// (ignoring case) are kept apart as `name (1).ext`, `name (2).ext` in archive order.
#[derive(Debug, Clone)]
pub struct ZipExtractor {
    max_name_len: usize,
}

impl ZipExtractor {
    /// Extractor that limits each path component to `max_name_len` bytes
    pub fn new(max_name_len: usize) -> Self {
        Self { max_name_len }
    }

    fn safe_relative(&self, enclosed: &Path) -> Option<PathBuf> {
        let mut out = PathBuf::new();
        for component in enclosed.components() {
            match component {
                Component::Normal(part) => {
                    out.push(sanitize_component(&part.to_string_lossy(), self.max_name_len))
                }
                Component::CurDir => {}
                _ => return None,
            }
        }
        (!out.as_os_str().is_empty()).then_some(out)
    }
}

fn claim_key(path: &Path) -> String {
    path.to_string_lossy().to_lowercase()
}

/// First of `target`, `stem (1).ext`, `stem (2).ext`, ... not yet in `claimed`
fn unclaimed(target: PathBuf, claimed: &HashSet<String>) -> PathBuf {
    if !claimed.contains(&claim_key(&target)) {
        return target;
    }
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = target.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|i| {
            let name = match &ext {
                Some(ext) => format!("{stem} ({i}).{ext}"),
                None => format!("{stem} ({i})"),
            };
            target.with_file_name(name)
        })
        .find(|candidate| !claimed.contains(&claim_key(candidate)))
        .unwrap_or(target)
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive_path: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let archive_err = |reason: String| MaterializeError::Archive {
            archive: archive_path.to_path_buf(),
            reason,
        };

        let file = File::open(archive_path)?;
        let mut archive =
            zip::ZipArchive::new(file).map_err(|e| archive_err(format!("failed to open: {e}")))?;
        debug!(archive = %archive_path.display(), entries = archive.len(), "extracting ZIP export");

        let mut written = Vec::new();
        let mut claimed = HashSet::new();
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| archive_err(format!("failed to read entry {index}: {e}")))?;

            let Some(relative) = entry.enclosed_name().and_then(|p| self.safe_relative(p)) else {
                warn!(entry = entry.name(), "skipping entry with unsafe path");
                continue;
            };
            let target = dest.join(relative);

            if entry.is_dir() {
                std::fs::create_dir_all(&target)?;
                continue;
            }
            let sanitized = target;
            let target = unclaimed(sanitized.clone(), &claimed);
            if target != sanitized {
                warn!(entry = entry.name(), path = %target.display(), "entry name collides, renamed");
            }
            claimed.insert(claim_key(&target));
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            std::io::copy(&mut entry, &mut out)
                .map_err(|e| archive_err(format!("failed to extract {}: {e}", entry.name())))?;
            written.push(target);
        }

        debug!(files = written.len(), "ZIP export extracted");
        Ok(written)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        for (name, bytes) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("export.zip");
        build_zip(
            &archive,
            &[("A/doc1.pdf", b"%PDF one"), ("B/C/doc2.pdf", b"%PDF two")],
        );
        assert!(is_zip(&archive).unwrap());

        let out = dir.path().join("out");
        let written = ZipExtractor::new(200).extract(&archive, &out).unwrap();

        assert_eq!(written.len(), 2);
        assert_eq!(std::fs::read(out.join("A/doc1.pdf")).unwrap(), b"%PDF one");
        assert_eq!(std::fs::read(out.join("B/C/doc2.pdf")).unwrap(), b"%PDF two");
    }

    #[test]
    fn skips_escaping_entries() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("evil.zip");
        build_zip(&archive, &[("../escape.txt", b"x"), ("ok.txt", b"y")]);

        let out = dir.path().join("out");
        let written = ZipExtractor::new(200).extract(&archive, &out).unwrap();

        assert_eq!(written, vec![out.join("ok.txt")]);
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[test]
    fn sanitizes_entry_names() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("export.zip");
        build_zip(&archive, &[("Q1: Plan?/deck.pdf", b"%PDF")]);

        let out = dir.path().join("out");
        ZipExtractor::new(200).extract(&archive, &out).unwrap();
        assert!(out.join("Q1_ Plan/deck.pdf").exists());
    }

    #[test]
    fn colliding_entries_are_kept_apart() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("export.zip");
        build_zip(
            &archive,
            &[("a?.pdf", b"first"), ("a*.pdf", b"second"), ("A_.PDF", b"third")],
        );

        let out = dir.path().join("out");
        let written = ZipExtractor::new(200).extract(&archive, &out).unwrap();

        assert_eq!(
            written,
            vec![out.join("a_.pdf"), out.join("a_ (1).pdf"), out.join("A_ (2).PDF")]
        );
        assert_eq!(std::fs::read(out.join("a_.pdf")).unwrap(), b"first");
        assert_eq!(std::fs::read(out.join("a_ (1).pdf")).unwrap(), b"second");
        assert_eq!(std::fs::read(out.join("A_ (2).PDF")).unwrap(), b"third");
    }

    #[test]
    fn non_zip_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("deck.pdf");
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();
        assert!(!is_zip(&pdf).unwrap());

        let tiny = dir.path().join("tiny");
        std::fs::write(&tiny, b"P").unwrap();
        assert!(!is_zip(&tiny).unwrap());
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"PK\x03\x04garbage").unwrap();
        assert!(ZipExtractor::new(200).extract(&archive, &dir.path().join("out")).is_err());
    }
}

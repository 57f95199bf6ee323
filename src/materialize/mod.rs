//! Filesystem materialization
//!
//! Everything a run writes goes through [`Materializer`]. Strategies work inside a
//! staging directory created under the output root; only finished artifacts are moved
//! into place with [`Materializer::commit_file`] or [`Materializer::commit_tree`], so a
//! failed tier never leaves a partial file in the mirrored tree. Staging directories are
//! removed when their [`TempDir`] handle is dropped.

pub mod archive;
pub mod layout;
pub mod pdf;

use crate::config::FileCollisionAction;
use crate::error::{MaterializeError, Result};
use crate::orchestrator::PageSet;
use crate::utils::{get_unique_path, move_file};
use archive::ArchiveExtractor;
use pdf::PdfEncoder;
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Prefix of staging directories inside the output root
pub const STAGING_PREFIX: &str = ".grabber-";

/// Writes the output tree of one run
pub struct Materializer {
    root: PathBuf,
    collision: FileCollisionAction,
    encoder: Arc<dyn PdfEncoder>,
    extractor: Arc<dyn ArchiveExtractor>,
    created: Mutex<HashSet<PathBuf>>,
}

impl Materializer {
    /// Materializer rooted at `root`
    pub fn new(
        root: impl Into<PathBuf>,
        collision: FileCollisionAction,
        encoder: Arc<dyn PdfEncoder>,
        extractor: Arc<dyn ArchiveExtractor>,
    ) -> Self {
        Self {
            root: root.into(),
            collision,
            encoder,
            extractor,
            created: Mutex::new(HashSet::new()),
        }
    }

    /// Output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `root/relative` and its parents, once per run
    pub async fn ensure_dir(&self, relative: &Path) -> Result<PathBuf> {
        let dir = self.root.join(relative);
        let mut created = self.created.lock().await;
        if !created.contains(&dir) {
            fs::create_dir_all(&dir).await?;
            created.insert(dir.clone());
        }
        Ok(dir)
    }

    /// A fresh staging directory under the output root
    pub async fn staging(&self) -> Result<TempDir> {
        self.ensure_dir(Path::new("")).await?;
        let root = self.root.clone();
        let dir = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .tempdir_in(root)
        })
        .await
        .map_err(|e| MaterializeError::Join(e.to_string()))??;
        Ok(dir)
    }

    /// Move a staged file to `destination`, applying the collision action
    ///
    /// Returns the path actually written, which differs from `destination` when
    /// renaming was needed.
    pub async fn commit_file(&self, source: &Path, destination: &Path) -> Result<PathBuf> {
        if let Some(parent) = destination.parent() {
            let relative = parent.strip_prefix(&self.root).unwrap_or(parent);
            self.ensure_dir(relative).await?;
        }

        let final_path = get_unique_path(destination, self.collision)?;
        move_file(source, &final_path).await?;
        debug!(from = %source.display(), to = %final_path.display(), "committed file");
        Ok(final_path)
    }

    /// Move every file under `source` into `destination`, keeping relative paths
    pub fn commit_tree<'a>(
        &'a self,
        source: &'a Path,
        destination: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PathBuf>>> + Send + 'a>> {
        Box::pin(async move {
            fs::create_dir_all(destination).await?;

            let mut written = Vec::new();
            let mut entries = fs::read_dir(source).await?;
            while let Some(entry) = entries.next_entry().await? {
                let source_entry = entry.path();
                let dest_entry = destination.join(entry.file_name());
                let file_type = entry.file_type().await?;

                if file_type.is_file() {
                    written.push(self.commit_file(&source_entry, &dest_entry).await?);
                } else if file_type.is_dir() {
                    written.extend(self.commit_tree(&source_entry, &dest_entry).await?);
                    fs::remove_dir(&source_entry).await?;
                }
            }
            Ok(written)
        })
    }

    /// Compile `pages` into `staging/<file_name>` and return the staged path
    pub async fn compile_pdf(
        &self,
        pages: &PageSet,
        staging: &Path,
        file_name: &str,
    ) -> Result<PathBuf> {
        let mut images = Vec::with_capacity(pages.pages.len());
        for (_, path) in &pages.pages {
            images.push(fs::read(path).await?);
        }

        let encoder = Arc::clone(&self.encoder);
        let pdf = tokio::task::spawn_blocking(move || encoder.compile(&images))
            .await
            .map_err(|e| MaterializeError::Join(e.to_string()))??;

        let out = staging.join(file_name);
        fs::write(&out, pdf).await?;
        Ok(out)
    }

    /// Extract a bulk archive into `dest`
    pub async fn extract_archive(&self, archive: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
        let extractor = Arc::clone(&self.extractor);
        let (archive, dest) = (archive.to_path_buf(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || extractor.extract(&archive, &dest))
            .await
            .map_err(|e| MaterializeError::Join(e.to_string()))?
    }

    /// Write the landing page snapshot as a one-page PDF named `name` at the root
    pub async fn write_landing(&self, png: Vec<u8>, name: &str) -> Result<PathBuf> {
        let staging = self.staging().await?;
        let encoder = Arc::clone(&self.encoder);
        let pdf = tokio::task::spawn_blocking(move || encoder.compile(&[png]))
            .await
            .map_err(|e| MaterializeError::Join(e.to_string()))??;

        let staged = staging.path().join(name);
        fs::write(&staged, pdf).await?;
        let path = self.commit_file(&staged, &self.root.join(name)).await?;
        info!(path = %path.display(), "landing snapshot written");
        Ok(path)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::materialize::archive::ZipExtractor;
    use crate::materialize::pdf::LopdfEncoder;
    use crate::test_helpers::png;

    fn materializer(root: &Path, collision: FileCollisionAction) -> Materializer {
        Materializer::new(
            root,
            collision,
            Arc::new(LopdfEncoder),
            Arc::new(ZipExtractor::new(200)),
        )
    }

    fn staging_dirs(root: &Path) -> usize {
        std::fs::read_dir(root)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(STAGING_PREFIX)
            })
            .count()
    }

    #[tokio::test]
    async fn staging_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("room");
        let m = materializer(&root, FileCollisionAction::Rename);

        let staging = m.staging().await.unwrap();
        std::fs::write(staging.path().join("partial.png"), b"half").unwrap();
        assert_eq!(staging_dirs(&root), 1);

        drop(staging);
        assert_eq!(staging_dirs(&root), 0);
    }

    #[tokio::test]
    async fn commit_file_renames_on_collision() {
        let dir = tempfile::tempdir().unwrap();
        let m = materializer(dir.path(), FileCollisionAction::Rename);
        let staging = m.staging().await.unwrap();

        let dest = dir.path().join("A/deck.pdf");
        for body in ["one", "two"] {
            let staged = staging.path().join("deck.pdf");
            std::fs::write(&staged, body).unwrap();
            m.commit_file(&staged, &dest).await.unwrap();
        }

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "one");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("A/deck (1).pdf")).unwrap(),
            "two"
        );
    }

    #[tokio::test]
    async fn commit_tree_moves_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let m = materializer(dir.path(), FileCollisionAction::Rename);
        let staging = m.staging().await.unwrap();
        std::fs::create_dir_all(staging.path().join("B/C")).unwrap();
        std::fs::write(staging.path().join("B/C/doc2.pdf"), b"x").unwrap();
        std::fs::write(staging.path().join("top.pdf"), b"y").unwrap();

        let written = m.commit_tree(staging.path(), dir.path()).await.unwrap();

        assert_eq!(written.len(), 2);
        assert!(dir.path().join("B/C/doc2.pdf").exists());
        assert!(dir.path().join("top.pdf").exists());
    }

    #[tokio::test]
    async fn compiles_page_set() {
        let dir = tempfile::tempdir().unwrap();
        let m = materializer(dir.path(), FileCollisionAction::Rename);
        let staging = m.staging().await.unwrap();

        let mut pages = PageSet::default();
        for page in 1..=2u32 {
            let path = staging.path().join(format!("{page:04}.png"));
            std::fs::write(&path, png(8, 8)).unwrap();
            pages.pages.push((page, path));
        }

        let out = m.compile_pdf(&pages, staging.path(), "deck.pdf").await.unwrap();
        let doc = lopdf::Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[tokio::test]
    async fn landing_snapshot_is_a_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let m = materializer(dir.path(), FileCollisionAction::Rename);

        let path = m
            .write_landing(png(32, 16), "_dataroom_index.pdf")
            .await
            .unwrap();

        assert_eq!(path, dir.path().join("_dataroom_index.pdf"));
        assert!(std::fs::read(&path).unwrap().starts_with(b"%PDF"));
        assert_eq!(staging_dirs(dir.path()), 0);
    }
}

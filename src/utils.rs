//! Utility functions for file operations and path manipulation

use crate::config::FileCollisionAction;
use crate::error::{MaterializeError, Result};
use std::path::{Path, PathBuf};

/// Maximum number of rename attempts when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Get a unique path for a file, handling collisions according to the specified action
///
/// For `Rename`, an existing `report.pdf` yields `report (1).pdf`, then `report (2).pdf`,
/// and so on. For `Skip`, an existing file is an error. For `Overwrite`, the original
/// path is returned unchanged.
///
/// # Examples
///
/// ```
/// use grabber::utils::get_unique_path;
/// use grabber::config::FileCollisionAction;
/// use std::path::Path;
///
/// let path = Path::new("/tmp/definitely-not-here/deck.pdf");
/// let unique = get_unique_path(path, FileCollisionAction::Rename).unwrap();
/// assert_eq!(unique, path);
/// ```
pub fn get_unique_path(path: &Path, action: FileCollisionAction) -> Result<PathBuf> {
    match action {
        FileCollisionAction::Overwrite => Ok(path.to_path_buf()),
        FileCollisionAction::Skip => {
            if path.exists() {
                return Err(MaterializeError::FileCollision {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Ok(path.to_path_buf())
        }
        FileCollisionAction::Rename => {
            if !path.exists() {
                return Ok(path.to_path_buf());
            }

            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| MaterializeError::InvalidPath {
                    path: path.to_path_buf(),
                    reason: "cannot extract file stem".to_string(),
                })?;
            let extension = path.extension().and_then(|e| e.to_str());
            let parent = path.parent().ok_or_else(|| MaterializeError::InvalidPath {
                path: path.to_path_buf(),
                reason: "cannot extract parent directory".to_string(),
            })?;

            for i in 1..=MAX_RENAME_ATTEMPTS {
                let new_name = match extension {
                    Some(ext) => format!("{stem} ({i}).{ext}"),
                    None => format!("{stem} ({i})"),
                };
                let new_path = parent.join(new_name);
                if !new_path.exists() {
                    return Ok(new_path);
                }
            }

            Err(MaterializeError::FileCollision {
                path: path.to_path_buf(),
            }
            .into())
        }
    }
}

/// Move a file, falling back to copy and delete when a rename crosses filesystems
pub async fn move_file(source: &Path, destination: &Path) -> Result<()> {
    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {
            tokio::fs::copy(source, destination).await?;
            tokio::fs::remove_file(source).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

//! Observation of browser-native downloads
//!
//! Bulk archives and direct document downloads are started by clicking an affordance in
//! the page; the browser writes the file. The engine never fetches these by URL, it waits
//! for the session to report the file and then for the file size to stop changing.

use crate::config::NativeDownloadConfig;
use crate::error::{Error, Result};
use crate::session::{DownloadPoll, Session};
use crate::types::DownloadHandle;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

/// Trigger the download behind `handle` and return the finished file
pub async fn download_native(
    session: &mut dyn Session,
    handle: &DownloadHandle,
    config: &NativeDownloadConfig,
) -> Result<PathBuf> {
    let deadline = Instant::now() + config.timeout;
    let id = session.trigger_native_download(handle).await?;
    tracing::debug!(handle = %handle, download = %id, "native download started");

    let path = match session.poll_download(&id, config.timeout).await? {
        DownloadPoll::Completed(path) => path,
        DownloadPoll::TimedOut => {
            return Err(Error::NativeDownloadTimeout {
                id: id.to_string(),
                timeout: config.timeout,
            });
        }
    };

    wait_until_stable(&path, config, deadline).await?;
    tracing::info!(download = %id, path = %path.display(), "native download landed");
    Ok(path)
}

/// Wait until `path` exists and its size is unchanged over `stability_checks` consecutive polls
pub async fn wait_until_stable(
    path: &Path,
    config: &NativeDownloadConfig,
    deadline: Instant,
) -> Result<u64> {
    let mut last_len: Option<u64> = None;
    let mut stable = 0u32;

    loop {
        match tokio::fs::metadata(path).await {
            Ok(meta) => {
                let len = meta.len();
                if last_len == Some(len) {
                    stable += 1;
                    if stable >= config.stability_checks {
                        return Ok(len);
                    }
                } else {
                    stable = 0;
                }
                last_len = Some(len);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                last_len = None;
                stable = 0;
            }
            Err(e) => return Err(e.into()),
        }

        if Instant::now() >= deadline {
            return Err(Error::NativeDownloadTimeout {
                id: path.display().to_string(),
                timeout: config.timeout,
            });
        }
        tokio::time::sleep(config.stability_interval).await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::scripted::ScriptedSession;
    use std::time::Duration;

    fn quick() -> NativeDownloadConfig {
        NativeDownloadConfig {
            timeout: Duration::from_secs(2),
            stability_interval: Duration::from_millis(10),
            stability_checks: 2,
        }
    }

    #[tokio::test]
    async fn returns_landed_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut session =
            ScriptedSession::new(dir.path()).file("btn", "report.pdf", b"%PDF-1.4 data".to_vec());

        let path = download_native(&mut session, &DownloadHandle("btn".into()), &quick())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("report.pdf"));
    }

    #[tokio::test]
    async fn stalled_download_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path()).stalled("btn");

        let err = download_native(&mut session, &DownloadHandle("btn".into()), &quick())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NativeDownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn missing_file_hits_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let config = NativeDownloadConfig {
            timeout: Duration::from_millis(50),
            ..quick()
        };
        let deadline = Instant::now() + config.timeout;
        let err = wait_until_stable(&dir.path().join("never.zip"), &config, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NativeDownloadTimeout { .. }));
    }

    #[tokio::test]
    async fn growing_file_is_awaited() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("growing.zip");
        std::fs::write(&path, b"PK").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                let mut data = std::fs::read(&writer_path).unwrap();
                data.extend_from_slice(b"more");
                std::fs::write(&writer_path, data).unwrap();
            }
        });

        let len = wait_until_stable(&path, &quick(), Instant::now() + Duration::from_secs(2))
            .await
            .unwrap();
        writer.await.unwrap();
        assert!(len >= 2);
    }
}

//! Chrome DevTools session
//!
//! Attaches to an already running, already authenticated Chrome through its remote
//! debugging endpoint and drives a single tab. Native downloads are routed into a
//! directory owned by the session and detected by watching it for new files.

use super::scripts;
use super::{Condition, DownloadPoll, NativeDownloadId, PageKind, Query, RenderedState, Session};
use crate::error::SessionError;
use crate::types::DownloadHandle;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::Browser;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const PARTIAL_SUFFIX: &str = "crdownload";

/// [`Session`] backed by a remote Chrome instance
pub struct CdpSession {
    _browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    closed: Arc<AtomicBool>,
    download_dir: PathBuf,
    pending: HashMap<NativeDownloadId, HashSet<PathBuf>>,
    next_download: u64,
}

impl CdpSession {
    /// Connect to the browser at `endpoint` (`http://127.0.0.1:9222` or a `ws://` URL)
    ///
    /// Downloads triggered through the session land in `download_dir`.
    pub async fn connect(
        endpoint: &str,
        download_dir: impl Into<PathBuf>,
    ) -> Result<Self, SessionError> {
        let download_dir = download_dir.into();
        tokio::fs::create_dir_all(&download_dir)
            .await
            .map_err(|e| SessionError::Download(e.to_string()))?;

        let ws_url = websocket_url(endpoint).await?;
        info!(endpoint, "connecting to browser");
        let (browser, mut handler) = Browser::connect(ws_url).await.map_err(classify)?;

        let closed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&closed);
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            flag.store(true, Ordering::SeqCst);
            warn!("browser connection closed");
        });

        let page = browser.new_page("about:blank").await.map_err(classify)?;
        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(download_dir.to_string_lossy().into_owned())
            .build()
            .map_err(SessionError::Download)?;
        browser.execute(behavior).await.map_err(classify)?;

        Ok(Self {
            _browser: browser,
            page,
            handler,
            closed,
            download_dir,
            pending: HashMap::new(),
            next_download: 0,
        })
    }

    fn check_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Disconnected("browser connection closed".to_string()));
        }
        Ok(())
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> Result<T, SessionError> {
        self.check_open()?;
        self.page
            .evaluate(script.to_string())
            .await
            .map_err(classify)?
            .into_value()
            .map_err(|e| SessionError::Script(e.to_string()))
    }

    async fn finished_files(&self) -> Result<HashSet<PathBuf>, SessionError> {
        finished_files(&self.download_dir)
            .await
            .map_err(|e| SessionError::Download(e.to_string()))
    }
}

impl Drop for CdpSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait]
impl Session for CdpSession {
    async fn navigate(&mut self, url: &Url) -> Result<RenderedState, SessionError> {
        self.check_open()?;
        debug!(url = %url, "navigating");
        self.page.goto(url.as_str()).await.map_err(classify)?;

        let final_url = self
            .page
            .url()
            .await
            .map_err(classify)?
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| url.clone());
        let title = self
            .page
            .get_title()
            .await
            .map_err(classify)?
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let kind = match self.eval::<String>(scripts::PAGE_KIND).await?.as_str() {
            "document" => PageKind::Document,
            "collection" => PageKind::Collection,
            _ => PageKind::Unknown,
        };
        let gated = self.eval::<bool>(scripts::GATED).await?;

        Ok(RenderedState {
            url: final_url,
            title,
            kind,
            gated,
        })
    }

    async fn query(&mut self, query: Query) -> Result<Vec<serde_json::Value>, SessionError> {
        let script = match query {
            Query::FolderChildren => scripts::FOLDER_CHILDREN,
            Query::PageImages => scripts::PAGE_IMAGES,
            Query::DownloadAffordance => scripts::DOWNLOAD_AFFORDANCE,
            Query::BulkAffordance => scripts::BULK_AFFORDANCE,
        };
        self.eval(script).await
    }

    async fn wait_for_condition(
        &mut self,
        condition: Condition,
        timeout: Duration,
    ) -> Result<bool, SessionError> {
        let script = match condition {
            Condition::CollectionReady => scripts::COLLECTION_READY,
            Condition::ViewerReady => scripts::VIEWER_READY,
        };
        let deadline = Instant::now() + timeout;
        loop {
            if self.eval::<bool>(script).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn trigger_native_download(
        &mut self,
        handle: &DownloadHandle,
    ) -> Result<NativeDownloadId, SessionError> {
        let before = self.finished_files().await?;
        if !self.eval::<bool>(&scripts::click(&handle.0)).await? {
            return Err(SessionError::Download(format!("no element matches {handle}")));
        }

        self.next_download += 1;
        let id = NativeDownloadId(format!("cdp-{}", self.next_download));
        self.pending.insert(id.clone(), before);
        debug!(%id, %handle, "native download triggered");
        Ok(id)
    }

    async fn poll_download(
        &mut self,
        id: &NativeDownloadId,
        timeout: Duration,
    ) -> Result<DownloadPoll, SessionError> {
        let Some(before) = self.pending.get(id).cloned() else {
            return Err(SessionError::Download(format!("unknown download {id}")));
        };

        let deadline = Instant::now() + timeout;
        loop {
            self.check_open()?;
            let now = self.finished_files().await?;
            if let Some(path) = now.difference(&before).min().cloned() {
                self.pending.remove(id);
                return Ok(DownloadPoll::Completed(path));
            }
            if Instant::now() >= deadline {
                return Ok(DownloadPoll::TimedOut);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn capture_snapshot(&mut self) -> Result<Vec<u8>, SessionError> {
        self.check_open()?;
        self.page
            .screenshot(ScreenshotParams::builder().full_page(true).build())
            .await
            .map_err(classify)
    }
}

/// Resolve the browser-level websocket URL from a debugging endpoint
async fn websocket_url(endpoint: &str) -> Result<String, SessionError> {
    let is_ws = endpoint.starts_with("ws://") || endpoint.starts_with("wss://");
    if is_ws && endpoint.contains("/devtools/") {
        return Ok(endpoint.to_string());
    }

    let http = endpoint
        .replace("ws://", "http://")
        .replace("wss://", "https://");
    let version_url = format!("{}/json/version", http.trim_end_matches('/'));
    let info: serde_json::Value = reqwest::get(&version_url)
        .await
        .map_err(|e| SessionError::Disconnected(format!("{version_url}: {e}")))?
        .json()
        .await
        .map_err(|e| SessionError::Script(format!("bad version info: {e}")))?;

    info.get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| SessionError::Script("no webSocketDebuggerUrl in version info".to_string()))
}

async fn finished_files(dir: &Path) -> std::io::Result<HashSet<PathBuf>> {
    let mut files = HashSet::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let partial = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case(PARTIAL_SUFFIX));
        if !partial && entry.file_type().await?.is_file() {
            files.insert(path);
        }
    }
    Ok(files)
}

fn classify(error: CdpError) -> SessionError {
    match error {
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            SessionError::Disconnected(error.to_string())
        }
        other => SessionError::Script(other.to_string()),
    }
}

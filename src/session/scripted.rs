//! An in-memory [`Session`] driven by a fixed site map
//!
//! Useful for exercising the engine offline: every URL maps to a [`ScriptedPage`] holding
//! the raw query results the page would produce, and every download handle maps to a file
//! the "browser" writes into its download directory. All calls are journaled.

use super::{Condition, DownloadPoll, NativeDownloadId, PageKind, Query, RenderedState, Session};
use crate::error::SessionError;
use crate::types::DownloadHandle;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// One scripted page
#[derive(Clone, Debug)]
pub struct ScriptedPage {
    title: Option<String>,
    kind: PageKind,
    gated: bool,
    ready: bool,
    children: Vec<Value>,
    page_batches: Vec<Vec<Value>>,
    download: Option<String>,
    bulk: Option<String>,
    nav_error: Option<SessionError>,
}

impl ScriptedPage {
    fn new(kind: PageKind, title: &str) -> Self {
        Self {
            title: Some(title.to_string()),
            kind,
            gated: false,
            ready: true,
            children: Vec::new(),
            page_batches: Vec::new(),
            download: None,
            bulk: None,
            nav_error: None,
        }
    }

    /// A folder listing page
    pub fn collection(title: &str) -> Self {
        Self::new(PageKind::Collection, title)
    }

    /// A document viewer page
    pub fn document(title: &str) -> Self {
        Self::new(PageKind::Document, title)
    }

    /// Append a raw listing entry
    pub fn child(mut self, value: Value) -> Self {
        self.children.push(value);
        self
    }

    /// Page images returned by the first `PageImages` query
    pub fn pages(mut self, pages: Vec<Value>) -> Self {
        self.page_batches = vec![pages];
        self
    }

    /// Page images returned by the next `PageImages` query (fresh signatures after a revisit)
    pub fn then_pages(mut self, pages: Vec<Value>) -> Self {
        self.page_batches.push(pages);
        self
    }

    /// Expose a per-document download affordance
    pub fn download(mut self, handle: &str) -> Self {
        self.download = Some(handle.to_string());
        self
    }

    /// Expose a collection-wide download affordance
    pub fn bulk(mut self, handle: &str) -> Self {
        self.bulk = Some(handle.to_string());
        self
    }

    /// Put the page behind an access gate
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    /// The page never reaches its render condition
    pub fn never_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Navigating here fails with `error`
    pub fn failing(mut self, error: SessionError) -> Self {
        self.nav_error = Some(error);
        self
    }
}

/// A call made against a [`ScriptedSession`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCall {
    /// `navigate`
    Navigate(Url),
    /// `query`
    Query(Query),
    /// `wait_for_condition`
    Wait(Condition),
    /// `trigger_native_download`
    Trigger(DownloadHandle),
    /// `poll_download`
    Poll(NativeDownloadId),
    /// `capture_snapshot`
    Snapshot,
}

#[derive(Clone, Debug)]
enum ScriptedFile {
    Ready { name: String, bytes: Vec<u8> },
    Stalled,
}

/// In-memory session
pub struct ScriptedSession {
    pages: HashMap<String, ScriptedPage>,
    files: HashMap<String, ScriptedFile>,
    download_dir: PathBuf,
    current: Option<String>,
    page_queries: HashMap<String, usize>,
    downloads: HashMap<NativeDownloadId, Option<PathBuf>>,
    snapshot: Vec<u8>,
    navigations: usize,
    disconnect_after: Option<usize>,
    journal: Vec<SessionCall>,
}

impl ScriptedSession {
    /// Create a session whose native downloads land in `download_dir`
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            pages: HashMap::new(),
            files: HashMap::new(),
            download_dir: download_dir.into(),
            current: None,
            page_queries: HashMap::new(),
            downloads: HashMap::new(),
            snapshot: Vec::new(),
            navigations: 0,
            disconnect_after: None,
            journal: Vec::new(),
        }
    }

    /// Register a page at `url`
    pub fn page(mut self, url: &str, page: ScriptedPage) -> Self {
        self.pages.insert(normalize(url), page);
        self
    }

    /// Triggering `handle` writes `name` with `bytes` into the download directory
    pub fn file(mut self, handle: &str, name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(
            handle.to_string(),
            ScriptedFile::Ready {
                name: name.to_string(),
                bytes: bytes.into(),
            },
        );
        self
    }

    /// Triggering `handle` starts a download that never finishes
    pub fn stalled(mut self, handle: &str) -> Self {
        self.files.insert(handle.to_string(), ScriptedFile::Stalled);
        self
    }

    /// Bytes returned by `capture_snapshot`
    pub fn snapshot(mut self, png: impl Into<Vec<u8>>) -> Self {
        self.snapshot = png.into();
        self
    }

    /// After `n` navigations every call reports a lost session
    pub fn disconnect_after(mut self, n: usize) -> Self {
        self.disconnect_after = Some(n);
        self
    }

    /// Every call made so far
    pub fn calls(&self) -> &[SessionCall] {
        &self.journal
    }

    /// Number of navigations to `url`
    pub fn visits(&self, url: &str) -> usize {
        let target = normalize(url);
        self.journal
            .iter()
            .filter(|c| matches!(c, SessionCall::Navigate(u) if normalize(u.as_str()) == target))
            .count()
    }

    fn check_connected(&self) -> Result<(), SessionError> {
        match self.disconnect_after {
            Some(limit) if self.navigations > limit => {
                Err(SessionError::Disconnected("scripted disconnect".to_string()))
            }
            _ => Ok(()),
        }
    }

    fn current_page(&self) -> Result<&ScriptedPage, SessionError> {
        self.current
            .as_ref()
            .and_then(|url| self.pages.get(url))
            .ok_or_else(|| SessionError::Script("no page loaded".to_string()))
    }
}

fn normalize(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn handle_value(handle: &Option<String>) -> Vec<Value> {
    handle
        .iter()
        .map(|h| serde_json::json!({ "handle": h }))
        .collect()
}

#[async_trait]
impl Session for ScriptedSession {
    async fn navigate(&mut self, url: &Url) -> Result<RenderedState, SessionError> {
        self.journal.push(SessionCall::Navigate(url.clone()));
        self.navigations += 1;
        self.check_connected()?;

        let key = normalize(url.as_str());
        let page = self
            .pages
            .get(&key)
            .ok_or_else(|| SessionError::Script(format!("no page scripted for {url}")))?;
        if let Some(error) = &page.nav_error {
            return Err(error.clone());
        }
        let state = RenderedState {
            url: url.clone(),
            title: page.title.clone(),
            kind: page.kind,
            gated: page.gated,
        };
        self.current = Some(key);
        Ok(state)
    }

    async fn query(&mut self, query: Query) -> Result<Vec<Value>, SessionError> {
        self.journal.push(SessionCall::Query(query));
        self.check_connected()?;

        let key = self.current.clone().unwrap_or_default();
        let page = self.current_page()?;
        let values = match query {
            Query::FolderChildren => page.children.clone(),
            Query::DownloadAffordance => handle_value(&page.download),
            Query::BulkAffordance => handle_value(&page.bulk),
            Query::PageImages => {
                let batches = page.page_batches.clone();
                let n = self.page_queries.entry(key).or_insert(0);
                let batch = batches
                    .get((*n).min(batches.len().saturating_sub(1)))
                    .cloned()
                    .unwrap_or_default();
                *n += 1;
                batch
            }
        };
        Ok(values)
    }

    async fn wait_for_condition(
        &mut self,
        condition: Condition,
        _timeout: Duration,
    ) -> Result<bool, SessionError> {
        self.journal.push(SessionCall::Wait(condition));
        self.check_connected()?;
        Ok(self.current_page()?.ready)
    }

    async fn trigger_native_download(
        &mut self,
        handle: &DownloadHandle,
    ) -> Result<NativeDownloadId, SessionError> {
        self.journal.push(SessionCall::Trigger(handle.clone()));
        self.check_connected()?;

        let file = self
            .files
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| SessionError::Download(format!("nothing behind {handle}")))?;
        let id = NativeDownloadId(format!("dl-{}", self.downloads.len() + 1));
        let landed = match file {
            ScriptedFile::Ready { name, bytes } => {
                tokio::fs::create_dir_all(&self.download_dir)
                    .await
                    .map_err(|e| SessionError::Download(e.to_string()))?;
                let path = self.download_dir.join(name);
                tokio::fs::write(&path, bytes)
                    .await
                    .map_err(|e| SessionError::Download(e.to_string()))?;
                Some(path)
            }
            ScriptedFile::Stalled => None,
        };
        self.downloads.insert(id.clone(), landed);
        Ok(id)
    }

    async fn poll_download(
        &mut self,
        id: &NativeDownloadId,
        _timeout: Duration,
    ) -> Result<DownloadPoll, SessionError> {
        self.journal.push(SessionCall::Poll(id.clone()));
        self.check_connected()?;
        match self.downloads.get(id) {
            Some(Some(path)) => Ok(DownloadPoll::Completed(path.clone())),
            Some(None) => Ok(DownloadPoll::TimedOut),
            None => Err(SessionError::Download(format!("unknown download {id}"))),
        }
    }

    async fn capture_snapshot(&mut self) -> Result<Vec<u8>, SessionError> {
        self.journal.push(SessionCall::Snapshot);
        self.check_connected()?;
        if self.snapshot.is_empty() {
            return Err(SessionError::Script("no snapshot scripted".to_string()));
        }
        Ok(self.snapshot.clone())
    }
}

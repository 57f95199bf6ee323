//! The control-plane session
//!
//! A [`Session`] is one authenticated browsing context with a single active tab. Every
//! method takes `&mut self`, so the engine can only ever have one navigation or query in
//! flight. How the browser was launched and logged in is not this crate's concern.
//!
//! Query results come back as raw JSON and are validated by [`schema`] before use.

pub mod schema;
pub mod scripted;

#[cfg(feature = "browser")]
pub mod cdp;
#[cfg(feature = "browser")]
mod scripts;

use crate::error::SessionError;
use crate::types::DownloadHandle;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// What kind of page a navigation landed on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    /// A single document viewer
    Document,
    /// A collection listing
    Collection,
    /// Could not tell
    Unknown,
}

/// Snapshot of the page after a navigation settled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedState {
    /// Final URL after redirects
    pub url: Url,
    /// Page title, if any
    pub title: Option<String>,
    /// What the page looks like
    pub kind: PageKind,
    /// An access gate (login, email form, permission wall) covers the content
    pub gated: bool,
}

/// Structured questions asked of the currently rendered page
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Direct children of the displayed folder
    FolderChildren,
    /// Page images of the displayed document
    PageImages,
    /// The displayed document's own download affordance
    DownloadAffordance,
    /// An aggregate download affordance for the whole collection
    BulkAffordance,
}

/// Render conditions the engine waits on instead of sleeping
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The folder listing has rendered
    CollectionReady,
    /// The document viewer has rendered its pages
    ViewerReady,
}

/// Identifier of a download started with [`Session::trigger_native_download`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NativeDownloadId(pub String);

impl std::fmt::Display for NativeDownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// State of a native download
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadPoll {
    /// The browser reports the file as written at this path
    Completed(PathBuf),
    /// Nothing finished within the timeout
    TimedOut,
}

/// A controlled browsing context
#[async_trait]
pub trait Session: Send {
    /// Load `url` and return the settled page state
    async fn navigate(&mut self, url: &Url) -> Result<RenderedState, SessionError>;

    /// Ask the current page a structured question; results are unvalidated
    async fn query(&mut self, query: Query) -> Result<Vec<serde_json::Value>, SessionError>;

    /// Wait until `condition` holds; `Ok(false)` when the timeout elapsed first
    async fn wait_for_condition(
        &mut self,
        condition: Condition,
        timeout: Duration,
    ) -> Result<bool, SessionError>;

    /// Start a browser-native download through an affordance on the current page
    async fn trigger_native_download(
        &mut self,
        handle: &DownloadHandle,
    ) -> Result<NativeDownloadId, SessionError>;

    /// Wait for a native download to land on disk
    async fn poll_download(
        &mut self,
        id: &NativeDownloadId,
        timeout: Duration,
    ) -> Result<DownloadPoll, SessionError>;

    /// Capture the current page as a PNG image
    async fn capture_snapshot(&mut self) -> Result<Vec<u8>, SessionError>;
}

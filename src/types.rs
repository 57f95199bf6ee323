//! Core types for grabber

use crate::error::FailureKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Identifier of a document or folder, unique within one run
///
/// Platform identifiers are opaque strings (slugs, UUIDs, numeric ids); they are kept verbatim.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    /// Create a new NodeId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a node holds content or other nodes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A viewable document
    Document,
    /// A container of documents and folders
    Folder,
}

/// What a request points at
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// A single document viewer
    Document,
    /// A multi-document collection (dataroom)
    Collection,
}

impl TargetKind {
    /// Guess the target kind from a viewer URL
    ///
    /// Single-document links carry a `/d/` path segment; anything else is treated as a collection.
    pub fn from_url(url: &Url) -> Self {
        let is_document = url
            .path_segments()
            .map(|mut segments| segments.any(|s| s == "d"))
            .unwrap_or(false);
        if is_document {
            TargetKind::Document
        } else {
            TargetKind::Collection
        }
    }
}

/// Opaque token a [`Session`](crate::session::Session) understands as "start this native download"
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadHandle(pub String);

impl std::fmt::Display for DownloadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A page image reference discovered on a viewer, before it is stamped with a lifetime
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    /// 1-based page number
    pub page: u32,
    /// Signed image URL
    pub url: Url,
}

/// Asset references found for a document without leaving the enumeration pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRefs {
    /// Native download affordance for this document, if the listing exposed one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadHandle>,
    /// Page images, if the listing exposed them inline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageRef>,
}

/// A document or folder in a collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentNode {
    /// Unique identifier
    pub id: NodeId,
    /// Document or folder
    pub kind: NodeKind,
    /// Display name as shown by the platform
    pub name: String,
    /// Viewer URL for this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    /// Parent folder, `None` for the root
    pub parent_id: Option<NodeId>,
    /// Path of folder ids from the root down to (excluding) this node
    pub ancestors: Vec<NodeId>,
    /// Child ids in platform order (folders only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeId>,
    /// Inline asset references
    #[serde(default)]
    pub assets: AssetRefs,
}

impl DocumentNode {
    /// Create the root folder of a collection
    pub fn root(id: NodeId, name: impl Into<String>, url: Option<Url>) -> Self {
        Self {
            id,
            kind: NodeKind::Folder,
            name: name.into(),
            url,
            parent_id: None,
            ancestors: Vec::new(),
            children: Vec::new(),
            assets: AssetRefs::default(),
        }
    }

    /// A document requested on its own, outside any collection
    pub fn standalone(id: NodeId, name: impl Into<String>, url: Url) -> Self {
        Self {
            kind: NodeKind::Document,
            ..Self::root(id, name, Some(url))
        }
    }

    /// Whether this node is a document leaf
    pub fn is_document(&self) -> bool {
        self.kind == NodeKind::Document
    }

    /// Depth below the root (root = 0)
    pub fn depth(&self) -> usize {
        self.ancestors.len()
    }
}

/// A signed, time-limited page image
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAsset {
    /// Document the page belongs to
    pub document_id: NodeId,
    /// 1-based page index; defines page order in the compiled PDF
    pub page_index: u32,
    /// Signed URL
    pub source_url: Url,
    /// When the URL was extracted
    pub issued_at: DateTime<Utc>,
    /// When the URL stops working
    pub expires_at: DateTime<Utc>,
}

impl ImageAsset {
    /// Stamp a freshly extracted URL with its lifetime
    pub fn issue(
        document_id: NodeId,
        page_index: u32,
        source_url: Url,
        issued_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = issued_at
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            document_id,
            page_index,
            source_url,
            issued_at,
            expires_at,
        }
    }

    /// Whether the URL may still be used at `now`
    pub fn is_actionable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    /// Whether the URL may still be used right now
    pub fn is_actionable(&self) -> bool {
        self.is_actionable_at(Utc::now())
    }

    /// Time until expiry, zero once expired
    pub fn time_left(&self) -> Duration {
        (self.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Lifecycle of a [`DownloadTask`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet picked up by a worker
    Pending,
    /// A worker is fetching it
    InFlight,
    /// Bytes are on disk
    Succeeded,
    /// Retry budget exhausted on transient errors
    FailedRetryable,
    /// Failed in a way retrying cannot fix (expired, forbidden, cancelled)
    FailedTerminal,
}

impl TaskStatus {
    /// Whether the task can no longer change state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::FailedRetryable | TaskStatus::FailedTerminal
        )
    }

    /// Whether the task ended in a failure state
    pub fn is_failed(&self) -> bool {
        matches!(self, TaskStatus::FailedRetryable | TaskStatus::FailedTerminal)
    }
}

/// Why a task failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    /// Classification
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
}

/// One page fetch scheduled on the download orchestrator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadTask {
    /// The asset to fetch
    pub asset: ImageAsset,
    /// Where the bytes go
    pub destination_path: PathBuf,
    /// Number of fetch attempts made so far
    pub attempt: u32,
    /// Current state
    pub status: TaskStatus,
    /// Failure detail for failed tasks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,
}

impl DownloadTask {
    /// Create a pending task
    pub fn new(asset: ImageAsset, destination_path: PathBuf) -> Self {
        Self {
            asset,
            destination_path,
            attempt: 0,
            status: TaskStatus::Pending,
            failure: None,
        }
    }
}

/// Acquisition tier, in fixed priority order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// One aggregate archive for the whole target
    Bulk,
    /// Native per-document download
    Direct,
    /// Rendered page images compiled into a PDF
    PageExtraction,
}

impl Tier {
    /// All tiers in the order they are tried
    pub const ORDER: [Tier; 3] = [Tier::Bulk, Tier::Direct, Tier::PageExtraction];
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Bulk => write!(f, "bulk"),
            Tier::Direct => write!(f, "direct"),
            Tier::PageExtraction => write!(f, "page-extraction"),
        }
    }
}

/// How tiers are chosen
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierMode {
    /// Try every applicable tier in priority order until one succeeds
    #[default]
    Auto,
    /// Try only this tier; failure is final
    Forced(Tier),
}

impl TierMode {
    /// Whether `tier` may be attempted under this mode
    pub fn allows(&self, tier: Tier) -> bool {
        match self {
            TierMode::Auto => true,
            TierMode::Forced(forced) => *forced == tier,
        }
    }
}

/// Result of one tier attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The tier produced the document's artifacts
    Succeeded,
    /// The tier did not produce anything usable
    Failed {
        /// Classification
        kind: FailureKind,
        /// Detail
        reason: String,
    },
}

/// Record of one tier tried for one target
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    /// Tier tried
    pub tier: Tier,
    /// Document (or collection root) it was tried on
    pub document_id: NodeId,
    /// What happened
    pub outcome: AttemptOutcome,
    /// Wall time spent in the attempt
    pub elapsed_ms: u64,
}

impl StrategyAttempt {
    /// Whether this attempt succeeded
    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

/// Kind of non-fatal irregularity seen during a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// The same node id was listed twice
    DuplicateNode,
    /// A folder listed itself or one of its ancestors
    Cycle,
    /// A listing entry did not match the expected shape
    MalformedNode,
    /// A folder could not be opened and was skipped
    SkippedFolder,
    /// A folder lies deeper than the configured limit
    DepthLimit,
    /// A node has no URL to navigate to
    MissingUrl,
    /// The landing page snapshot could not be written
    LandingSnapshot,
}

/// A non-fatal irregularity, kept in the run report
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    /// Classification
    pub kind: AnomalyKind,
    /// Node concerned, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeId>,
    /// Detail
    pub detail: String,
}

impl Anomaly {
    /// Create an anomaly
    pub fn new(kind: AnomalyKind, node_id: Option<NodeId>, detail: impl Into<String>) -> Self {
        Self {
            kind,
            node_id,
            detail: detail.into(),
        }
    }
}

/// Event emitted during an acquisition run
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A run started
    RunStarted {
        /// Requested URL
        url: String,
        /// Resolved target kind
        kind: TargetKind,
    },

    /// A folder was listed during enumeration
    FolderVisited {
        /// Folder id
        id: NodeId,
        /// Folder name
        name: String,
        /// Depth below the root
        depth: usize,
        /// Number of valid children found
        children: usize,
    },

    /// Enumeration finished
    EnumerationComplete {
        /// Documents discovered
        documents: usize,
        /// Folders discovered (including the root)
        folders: usize,
        /// Anomalies recorded
        anomalies: usize,
    },

    /// A tier attempt started
    TierStarted {
        /// Target id
        id: NodeId,
        /// Tier
        tier: Tier,
    },

    /// A tier attempt failed
    TierFailed {
        /// Target id
        id: NodeId,
        /// Tier
        tier: Tier,
        /// Classification
        kind: FailureKind,
        /// Detail
        reason: String,
    },

    /// Page download progress for one document
    PageProgress {
        /// Document id
        id: NodeId,
        /// Pages on disk
        completed: usize,
        /// Pages failed
        failed: usize,
        /// Pages scheduled
        total: usize,
    },

    /// A document's artifacts are in place
    DocumentComplete {
        /// Document id
        id: NodeId,
        /// Tier that produced them
        tier: Tier,
        /// Primary output path
        path: PathBuf,
        /// Pages missing from a page-extraction PDF
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        page_gaps: Vec<u32>,
    },

    /// A document could not be acquired
    DocumentFailed {
        /// Document id
        id: NodeId,
        /// Error message
        error: String,
    },

    /// The run finished
    RunComplete {
        /// Documents acquired
        succeeded: usize,
        /// Documents that failed
        failed: usize,
    },

    /// The run stopped early because the session was lost
    RunAborted {
        /// Why
        reason: String,
    },
}

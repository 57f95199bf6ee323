//! Collection enumeration
//!
//! Walks a folder hierarchy through the session, one folder at a time, and builds a
//! [`DocumentTree`]. Traversal uses an explicit stack plus a visited set, so a platform
//! that lists a folder inside itself (or the same document twice) cannot make the walk
//! loop; such entries are recorded as [`Anomaly`]s and skipped.
//!
//! Only a lost session stops the walk, and even then everything reached so far is kept.
//! A folder that times out, sits behind an access gate, or never finishes rendering is
//! skipped with a warning and its siblings continue.

use crate::config::NavigationConfig;
use crate::error::{Error, Result};
use crate::session::{Condition, Query, Session, schema};
use crate::strategy::open_page;
use crate::tree::{DocumentTree, NewNode};
use crate::types::{Anomaly, AnomalyKind, AssetRefs, DocumentNode, Event, NodeId, NodeKind};
use std::collections::HashSet;
use tokio::sync::broadcast;
use url::Url;

/// Result of walking a collection
#[derive(Debug)]
pub struct Enumeration {
    /// Every node reached
    pub tree: DocumentTree,
    /// Irregularities seen on the way
    pub anomalies: Vec<Anomaly>,
    /// Fatal session failure that cut the walk short; `tree` holds what was reached
    pub aborted: Option<Error>,
}

/// Depth-first collection walker
pub struct TreeEnumerator {
    config: NavigationConfig,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl TreeEnumerator {
    /// Create an enumerator with the given navigation limits
    pub fn new(config: NavigationConfig) -> Self {
        Self {
            config,
            event_tx: None,
        }
    }

    /// Report progress on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            tx.send(event).ok();
        }
    }

    /// Walk the collection rooted at `root`
    ///
    /// `root` must be a folder carrying the collection URL. A fatal session failure
    /// stops the walk and is returned in [`Enumeration::aborted`] next to the partial tree.
    pub async fn run(&self, session: &mut dyn Session, root: DocumentNode) -> Enumeration {
        let mut tree = DocumentTree::new(root);
        let mut anomalies = Vec::new();
        let mut aborted = None;
        let mut visited: HashSet<NodeId> = HashSet::new();
        let mut stack = vec![tree.root().id.clone()];
        visited.insert(tree.root().id.clone());

        while let Some(folder_id) = stack.pop() {
            let Some(folder) = tree.get(&folder_id).cloned() else {
                continue;
            };

            let Some(url) = folder.url.clone() else {
                tracing::warn!(folder = %folder_id, "folder has no URL, skipping");
                anomalies.push(Anomaly::new(
                    AnomalyKind::MissingUrl,
                    Some(folder_id.clone()),
                    format!("folder '{}' has no URL", folder.name),
                ));
                continue;
            };

            let raw = match self.list_folder(session, &url).await {
                Ok(raw) => raw,
                Err(e) if e.is_fatal() => {
                    tracing::error!(folder = %folder_id, error = %e, "session lost during enumeration");
                    aborted = Some(e);
                    break;
                }
                Err(e) => {
                    tracing::warn!(folder = %folder_id, url = %url, error = %e, "skipping folder");
                    anomalies.push(Anomaly::new(
                        AnomalyKind::SkippedFolder,
                        Some(folder_id.clone()),
                        e.to_string(),
                    ));
                    continue;
                }
            };

            let validated = schema::folder_children(raw);
            for rejected in validated.rejected {
                tracing::warn!(
                    folder = %folder_id,
                    index = rejected.index,
                    reason = %rejected.reason,
                    "malformed listing entry"
                );
                anomalies.push(Anomaly::new(
                    AnomalyKind::MalformedNode,
                    rejected.id.map(NodeId::from),
                    format!("entry {} in '{}': {}", rejected.index, folder.name, rejected.reason),
                ));
            }

            let child_depth = folder.depth() + 1;
            let mut subfolders = Vec::new();
            let mut accepted = 0usize;

            for record in validated.records {
                let id = NodeId::from(record.id);

                if id == folder_id || folder.ancestors.contains(&id) {
                    tracing::warn!(folder = %folder_id, child = %id, "folder lists its own ancestor");
                    anomalies.push(Anomaly::new(
                        AnomalyKind::Cycle,
                        Some(id),
                        format!("listed inside '{}'", folder.name),
                    ));
                    continue;
                }
                if visited.contains(&id) {
                    tracing::warn!(folder = %folder_id, child = %id, "node already seen");
                    anomalies.push(Anomaly::new(
                        AnomalyKind::DuplicateNode,
                        Some(id),
                        format!("listed again inside '{}'", folder.name),
                    ));
                    continue;
                }
                if record.kind == NodeKind::Folder && child_depth > self.config.max_depth {
                    tracing::warn!(child = %id, depth = child_depth, "folder beyond depth limit");
                    anomalies.push(Anomaly::new(
                        AnomalyKind::DepthLimit,
                        Some(id),
                        format!("'{}' is {child_depth} levels deep", record.name),
                    ));
                    continue;
                }

                let assets = AssetRefs {
                    download: record.download.map(crate::types::DownloadHandle),
                    pages: record
                        .pages
                        .into_iter()
                        .filter_map(schema::PageRecord::into_ref)
                        .collect(),
                };
                if record.kind == NodeKind::Document
                    && record.url.is_none()
                    && assets.download.is_none()
                    && assets.pages.is_empty()
                {
                    anomalies.push(Anomaly::new(
                        AnomalyKind::MissingUrl,
                        Some(id.clone()),
                        format!("document '{}' has no URL or assets", record.name),
                    ));
                }

                visited.insert(id.clone());
                let child = NewNode {
                    id: id.clone(),
                    kind: record.kind,
                    name: record.name,
                    url: record.url,
                    assets,
                };
                match tree.insert_child(&folder_id, child) {
                    Ok(_) => {
                        accepted += 1;
                        if record.kind == NodeKind::Folder {
                            subfolders.push(id);
                        }
                    }
                    Err(e) => {
                        anomalies.push(Anomaly::new(
                            AnomalyKind::DuplicateNode,
                            Some(id),
                            e.to_string(),
                        ));
                    }
                }
            }

            tracing::debug!(
                folder = %folder_id,
                depth = folder.depth(),
                children = accepted,
                "folder listed"
            );
            self.emit(Event::FolderVisited {
                id: folder_id.clone(),
                name: folder.name.clone(),
                depth: folder.depth(),
                children: accepted,
            });

            // Reverse so the first listed subfolder is walked first
            stack.extend(subfolders.into_iter().rev());
        }

        let documents = tree.documents().len();
        tracing::info!(
            documents,
            folders = tree.folder_count(),
            anomalies = anomalies.len(),
            "enumeration complete"
        );
        self.emit(Event::EnumerationComplete {
            documents,
            folders: tree.folder_count(),
            anomalies: anomalies.len(),
        });

        Enumeration {
            tree,
            anomalies,
            aborted,
        }
    }

    /// Open one folder and read its raw listing
    async fn list_folder(
        &self,
        session: &mut dyn Session,
        url: &Url,
    ) -> Result<Vec<serde_json::Value>> {
        open_page(session, url, Condition::CollectionReady, self.config.timeout).await?;
        Ok(session.query(Query::FolderChildren).await?)
    }
}

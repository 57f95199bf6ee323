use super::{AcquireRequest, Grabber, commit_selection, fail, settle};
use crate::enumerate::TreeEnumerator;
use crate::error::{Error, Result};
use crate::materialize::Materializer;
use crate::materialize::layout::{LayoutPlan, sanitize_component};
use crate::report::{AcquisitionResult, DocumentOutcome, DocumentStatus};
use crate::session::{Condition, Session};
use crate::strategy::{Target, TierContext, open_page};
use crate::types::{Anomaly, AnomalyKind, DocumentNode, Event, NodeId, Tier, TierMode};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const DEFAULT_COLLECTION_NAME: &str = "dataroom";

impl Grabber {
    /// Snapshot, bulk export, and otherwise enumerate and acquire document by document
    pub(super) async fn acquire_collection(
        &self,
        session: &mut dyn Session,
        request: &AcquireRequest,
        cancel: CancellationToken,
    ) -> Result<AcquisitionResult> {
        let timeout = self.config.navigation.timeout;
        let title = match open_page(session, &request.url, Condition::CollectionReady, timeout).await
        {
            Ok(state) => state.title,
            Err(e) => {
                tracing::error!(url = %request.url, error = %e, "collection root unavailable");
                let output = request
                    .output
                    .clone()
                    .unwrap_or_else(|| self.config.output.collections_dir.clone());
                let mut result = self.empty_result(request, output);
                result.aborted = Some(e.to_string());
                return Ok(result);
            }
        };

        let name = title.unwrap_or_else(|| DEFAULT_COLLECTION_NAME.to_string());
        let root_dir = self.collection_root(request, &name);
        tokio::fs::create_dir_all(&root_dir).await?;
        tracing::info!(root = %root_dir.display(), "collection output root ready");

        let mut result = self.empty_result(request, root_dir.clone());
        let materializer = self.materializer(&root_dir);
        let orchestrator = self.orchestrator(&cancel);

        match self.write_landing(session, &materializer).await {
            Ok(path) => result.landing_snapshot = Some(path),
            Err(e) if e.is_fatal() => {
                result.aborted = Some(e.to_string());
                return Ok(result);
            }
            Err(e) => {
                tracing::warn!(error = %e, "landing snapshot not written");
                result.anomalies.push(Anomaly::new(
                    AnomalyKind::LandingSnapshot,
                    None,
                    e.to_string(),
                ));
            }
        }

        let root = DocumentNode::root(
            NodeId::from(request.url.as_str()),
            name.clone(),
            Some(request.url.clone()),
        );
        let mut ctx = TierContext {
            session,
            config: &self.config,
            orchestrator: &orchestrator,
            materializer: &materializer,
            cancel: cancel.clone(),
            events: Some(self.event_tx.clone()),
        };

        // Collection-wide export first; on success the whole room is done
        let target = Target::Collection(root.clone());
        let selection = self.selector.run(&mut ctx, &target, request.mode).await;
        let committed = match &selection.success {
            Some(selected) => Some(
                commit_selection(
                    &materializer,
                    &selected.output.staged,
                    &root_dir,
                    DEFAULT_COLLECTION_NAME,
                    self.config.output.max_name_len,
                    false,
                )
                .await,
            ),
            None => None,
        };
        if committed.is_some() {
            let tier = selection.success.as_ref().map(|s| s.tier);
            let mut outcome = DocumentOutcome::pending(root.id.clone(), name, Vec::new());
            settle(&mut outcome, selection, committed);
            result.attempts = outcome.attempts.clone();
            self.report_document(&outcome, tier);
            result.documents.push(outcome);
            return Ok(result);
        }
        result.attempts = selection.attempts;
        if let Some(fatal) = selection.fatal {
            result.aborted = Some(fatal.to_string());
            return Ok(result);
        }
        if request.mode == TierMode::Forced(Tier::Bulk) {
            tracing::warn!("forced bulk export failed, not enumerating");
            return Ok(result);
        }

        let enumeration = TreeEnumerator::new(self.config.navigation.clone())
            .with_events(self.event_tx.clone())
            .run(&mut *ctx.session, root)
            .await;
        result.anomalies.extend(enumeration.anomalies);
        let tree = enumeration.tree;
        let layout = LayoutPlan::plan(&tree, self.config.output.max_name_len);

        // Documents found before a lost session are still reported, as not attempted
        let mut aborted: Option<Error> = enumeration.aborted;
        for node in tree.documents() {
            let logical_path = tree
                .ancestor_names(node)
                .into_iter()
                .map(str::to_string)
                .collect();
            let mut outcome = DocumentOutcome::pending(node.id.clone(), &node.name, logical_path);

            if let Some(e) = &aborted {
                fail(&mut outcome, e);
                outcome.status = DocumentStatus::NotAttempted;
                result.documents.push(outcome);
                continue;
            }

            let relative = layout
                .document(&node.id)
                .cloned()
                .unwrap_or_else(|| {
                    PathBuf::from(sanitize_component(
                        &node.name,
                        self.config.output.max_name_len,
                    ))
                });
            let (dir, stem) = split_relative(&root_dir, &relative);

            let target = Target::Document {
                node: node.clone(),
                standalone: false,
            };
            let mut selection = self.selector.run(&mut ctx, &target, request.mode).await;
            let committed = match &selection.success {
                Some(selected) => Some(
                    commit_selection(
                        &materializer,
                        &selected.output.staged,
                        &dir,
                        &stem,
                        self.config.output.max_name_len,
                        true,
                    )
                    .await,
                ),
                None => None,
            };
            let tier = selection.success.as_ref().map(|s| s.tier);
            if selection.fatal.is_none() && ctx.cancel.is_cancelled() {
                selection.fatal = Some(Error::FatalSession("run cancelled".to_string()));
            }
            aborted = settle(&mut outcome, selection, committed);

            self.report_document(&outcome, tier);
            result.documents.push(outcome);
        }

        if let Some(e) = aborted {
            result.aborted = Some(e.to_string());
        }
        Ok(result)
    }

    fn collection_root(&self, request: &AcquireRequest, name: &str) -> PathBuf {
        match &request.output {
            Some(dir) => dir.clone(),
            None => self
                .config
                .output
                .collections_dir
                .join(sanitize_component(name, self.config.output.max_name_len)),
        }
    }

    async fn write_landing(
        &self,
        session: &mut dyn Session,
        materializer: &Materializer,
    ) -> Result<PathBuf> {
        let png = session.capture_snapshot().await?;
        materializer
            .write_landing(png, &self.config.output.landing_name)
            .await
    }

    pub(super) fn report_document(&self, outcome: &DocumentOutcome, tier: Option<Tier>) {
        match (outcome.has_output(), tier, outcome.outputs.first()) {
            (true, Some(tier), Some(path)) => {
                tracing::info!(document = %outcome.node_id, %tier, path = %path.display(), "document acquired");
                self.emit(Event::DocumentComplete {
                    id: outcome.node_id.clone(),
                    tier,
                    path: path.clone(),
                    page_gaps: outcome.page_gaps.clone(),
                });
            }
            _ => {
                if let Some(error) = &outcome.error {
                    self.emit(Event::DocumentFailed {
                        id: outcome.node_id.clone(),
                        error: error.message.clone(),
                    });
                }
            }
        }
    }
}

/// Split a document's relative layout path into its absolute directory and file stem
fn split_relative(root: &Path, relative: &Path) -> (PathBuf, String) {
    let stem = relative
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "untitled".to_string());
    let dir = match relative.parent() {
        Some(parent) => root.join(parent),
        None => root.to_path_buf(),
    };
    (dir, stem)
}

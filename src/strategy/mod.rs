//! Tiered acquisition strategies
//!
//! A [`Strategy`] turns a [`Target`] into staged files using one acquisition tier. The
//! [`StrategySelector`] tries the tiers in fixed order (bulk export, direct download,
//! page extraction) and stops at the first success. Every attempt is recorded whether it
//! succeeded or not. A tier failure moves on to the next tier; a lost session stops the
//! selector immediately.
//!
//! Strategies never write into the output tree. They work in the staging directory they
//! are handed and describe the result as a [`Staged`] value; the caller commits it.

pub mod bulk;
pub mod direct;
pub mod extraction;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::materialize::Materializer;
use crate::orchestrator::DownloadOrchestrator;
use crate::session::{Condition, RenderedState, Session};
use crate::types::{AttemptOutcome, DocumentNode, Event, StrategyAttempt, Tier, TierMode};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

pub use bulk::BulkExport;
pub use direct::DirectDownload;
pub use extraction::PageExtraction;

/// What a strategy is asked to acquire
#[derive(Debug, Clone)]
pub enum Target {
    /// A whole collection, identified by its root folder
    Collection(DocumentNode),
    /// One document
    Document {
        /// The document node
        node: DocumentNode,
        /// Requested on its own rather than found while walking a collection
        standalone: bool,
    },
}

impl Target {
    /// Node behind the target
    pub fn node(&self) -> &DocumentNode {
        match self {
            Target::Collection(node) => node,
            Target::Document { node, .. } => node,
        }
    }

    /// URL to navigate to, if known
    pub fn url(&self) -> Option<&Url> {
        self.node().url.as_ref()
    }

    /// Render condition of the target's page
    pub fn ready_condition(&self) -> Condition {
        match self {
            Target::Collection(_) => Condition::CollectionReady,
            Target::Document { .. } => Condition::ViewerReady,
        }
    }
}

/// Files a successful tier left in staging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staged {
    /// One file standing for the target document
    File(PathBuf),
    /// A directory whose contents mirror the collection
    Tree(PathBuf),
}

/// Output of a successful tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSuccess {
    /// Staged artifacts
    pub staged: Staged,
    /// Pages missing from a page-extraction PDF
    pub page_gaps: Vec<u32>,
}

impl TierSuccess {
    /// A single complete file
    pub fn file(path: PathBuf) -> Self {
        Self {
            staged: Staged::File(path),
            page_gaps: Vec::new(),
        }
    }
}

/// Collaborators shared by every tier attempt
pub struct TierContext<'a> {
    /// Control-plane session
    pub session: &'a mut dyn Session,
    /// Run configuration
    pub config: &'a Config,
    /// Page image download pool
    pub orchestrator: &'a DownloadOrchestrator,
    /// Output tree writer
    pub materializer: &'a Materializer,
    /// Run cancellation
    pub cancel: CancellationToken,
    /// Progress events
    pub events: Option<broadcast::Sender<Event>>,
}

impl TierContext<'_> {
    fn emit(&self, event: Event) {
        if let Some(tx) = &self.events {
            tx.send(event).ok();
        }
    }

    /// Navigate to `url` and wait for `condition`, bounded by the navigation timeout
    pub async fn open(&mut self, url: &Url, condition: Condition) -> Result<RenderedState> {
        open_page(&mut *self.session, url, condition, self.config.navigation.timeout).await
    }
}

/// Navigate to `url` and wait until `condition` holds
///
/// The whole visit is bounded by `timeout`. A gated page fails with
/// [`Error::AccessGate`], a page that never settles with [`Error::NavigationTimeout`].
pub async fn open_page(
    session: &mut dyn Session,
    url: &Url,
    condition: Condition,
    timeout: Duration,
) -> Result<RenderedState> {
    let visit = async {
        let state = session.navigate(url).await?;
        if state.gated {
            return Err(Error::AccessGate(format!("{url} is gated")));
        }
        if !session.wait_for_condition(condition, timeout).await? {
            return Err(Error::NavigationTimeout {
                url: url.to_string(),
                timeout,
            });
        }
        Ok::<_, Error>(state)
    };

    match tokio::time::timeout(timeout, visit).await {
        Ok(result) => result,
        Err(_) => Err(Error::NavigationTimeout {
            url: url.to_string(),
            timeout,
        }),
    }
}

/// One acquisition tier
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Tier implemented
    fn tier(&self) -> Tier;

    /// Whether this tier applies to `target` at all
    fn supports(&self, target: &Target) -> bool;

    /// Acquire `target` into `staging`
    async fn attempt(
        &self,
        ctx: &mut TierContext<'_>,
        target: &Target,
        staging: &Path,
    ) -> Result<TierSuccess>;
}

/// The tier that succeeded, with its staged output
#[derive(Debug)]
pub struct Selected {
    /// Tier
    pub tier: Tier,
    /// Output
    pub output: TierSuccess,
    /// Staging directory holding the output; removed on drop
    pub staging: TempDir,
}

/// Everything the selector did for one target
#[derive(Debug, Default)]
pub struct Selection {
    /// Attempts in the order they were made
    pub attempts: Vec<StrategyAttempt>,
    /// First successful tier
    pub success: Option<Selected>,
    /// Fatal error that stopped the selector
    pub fatal: Option<Error>,
}

impl Selection {
    /// Outcome of the last failed attempt
    pub fn last_failure(&self) -> Option<&AttemptOutcome> {
        self.attempts
            .iter()
            .rev()
            .map(|a| &a.outcome)
            .find(|o| matches!(o, AttemptOutcome::Failed { .. }))
    }
}

/// Runs strategies in tier order until one succeeds
pub struct StrategySelector {
    strategies: Vec<Box<dyn Strategy>>,
}

impl Default for StrategySelector {
    fn default() -> Self {
        Self::new(vec![
            Box::new(BulkExport),
            Box::new(DirectDownload),
            Box::new(PageExtraction),
        ])
    }
}

impl StrategySelector {
    /// Selector over `strategies`, ordered by tier
    pub fn new(mut strategies: Vec<Box<dyn Strategy>>) -> Self {
        strategies.sort_by_key(|s| s.tier());
        Self { strategies }
    }

    /// Tiers that would be tried for `target` under `mode`, in order
    pub fn plan(&self, target: &Target, mode: TierMode) -> Vec<Tier> {
        self.candidates(target, mode).map(|s| s.tier()).collect()
    }

    fn candidates<'s>(
        &'s self,
        target: &'s Target,
        mode: TierMode,
    ) -> impl Iterator<Item = &'s dyn Strategy> + 's {
        self.strategies
            .iter()
            .map(|s| s.as_ref())
            .filter(move |s| mode.allows(s.tier()) && s.supports(target))
    }

    /// Try each applicable tier until one succeeds
    ///
    /// Each attempt gets its own staging directory, dropped (and removed) as soon as the
    /// attempt fails. With a forced tier only that tier is tried.
    pub async fn run(&self, ctx: &mut TierContext<'_>, target: &Target, mode: TierMode) -> Selection {
        let mut selection = Selection::default();
        let id = target.node().id.clone();

        for strategy in self.candidates(target, mode) {
            let tier = strategy.tier();
            if ctx.cancel.is_cancelled() {
                selection.fatal = Some(Error::FatalSession("run cancelled".to_string()));
                break;
            }

            ctx.emit(Event::TierStarted {
                id: id.clone(),
                tier,
            });
            tracing::info!(node = %id, %tier, "trying tier");
            let started = Instant::now();

            let result = match ctx.materializer.staging().await {
                Ok(staging) => strategy
                    .attempt(ctx, target, staging.path())
                    .await
                    .map(|output| (output, staging)),
                Err(e) => Err(e),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok((output, staging)) => {
                    tracing::info!(node = %id, %tier, elapsed_ms, "tier succeeded");
                    selection.attempts.push(StrategyAttempt {
                        tier,
                        document_id: id.clone(),
                        outcome: AttemptOutcome::Succeeded,
                        elapsed_ms,
                    });
                    selection.success = Some(Selected {
                        tier,
                        output,
                        staging,
                    });
                    break;
                }
                Err(e) => {
                    let kind = e.failure_kind();
                    tracing::warn!(node = %id, %tier, error = %e, "tier failed");
                    selection.attempts.push(StrategyAttempt {
                        tier,
                        document_id: id.clone(),
                        outcome: AttemptOutcome::Failed {
                            kind,
                            reason: e.to_string(),
                        },
                        elapsed_ms,
                    });
                    ctx.emit(Event::TierFailed {
                        id: id.clone(),
                        tier,
                        kind,
                        reason: e.to_string(),
                    });
                    if e.is_fatal() {
                        selection.fatal = Some(e);
                        break;
                    }
                }
            }
        }

        selection
    }
}

//! Page extraction tier
//!
//! Reads the signed page image URLs the viewer exposes, downloads them through the
//! [`DownloadOrchestrator`](crate::orchestrator::DownloadOrchestrator) and compiles the
//! pages that arrived into one PDF. Page URLs expire a few minutes after they are issued,
//! so the assets are stamped with their deadline at the moment they are read.
//!
//! The viewer may announce pages it could not sign. Those count towards the document's
//! length, so a document whose last pages never got a URL is reported with gaps.
//!
//! When some pages fail and re-issuing is enabled, the viewer is opened once more to get
//! fresh signatures and only the failed pages are fetched again. There is no second
//! re-issue round.

use super::{Strategy, Target, TierContext, TierSuccess};
use crate::error::{Error, FailureKind, MaterializeError, Result};
use crate::orchestrator::PageSet;
use crate::session::{Query, schema};
use crate::types::{DocumentNode, DownloadTask, ImageAsset, PageRef, TaskFailure, Tier};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Downloads page images and compiles them into a PDF
#[derive(Debug, Clone, Copy, Default)]
pub struct PageExtraction;

/// Pages the viewer exposed
struct PageListing {
    /// Signed pages
    pages: Vec<PageRef>,
    /// Highest page number announced, signed or not
    expected: u32,
}

impl PageListing {
    fn from_refs(pages: Vec<PageRef>) -> Self {
        let expected = pages.iter().map(|p| p.page).max().unwrap_or(0);
        Self { pages, expected }
    }

    /// Announced pages that came without a URL
    fn unsigned(&self) -> HashSet<u32> {
        let signed: HashSet<u32> = self.pages.iter().map(|p| p.page).collect();
        (1..=self.expected).filter(|p| !signed.contains(p)).collect()
    }
}

impl PageExtraction {
    /// Open the viewer and read its current page images
    async fn read_pages(ctx: &mut TierContext<'_>, target: &Target) -> Result<PageListing> {
        let node = target.node();
        let Some(url) = &node.url else {
            return Ok(PageListing::from_refs(node.assets.pages.clone()));
        };

        ctx.open(url, target.ready_condition()).await?;
        let validated = schema::page_images(ctx.session.query(Query::PageImages).await?);
        for r in &validated.rejected {
            tracing::warn!(document = %node.id, index = r.index, reason = %r.reason, "malformed page entry");
        }

        let expected = validated.records.iter().map(|r| r.page).max().unwrap_or(0);
        let pages: Vec<PageRef> = validated
            .records
            .into_iter()
            .filter_map(schema::PageRecord::into_ref)
            .collect();
        if pages.is_empty() {
            return Ok(PageListing::from_refs(node.assets.pages.clone()));
        }
        Ok(PageListing { pages, expected })
    }

    /// Error for a document none of whose pages arrived
    ///
    /// When every failure has the same cause the document reports that cause.
    fn no_pages(node: &DocumentNode, finished: &BTreeMap<u32, DownloadTask>) -> Error {
        let failures: Vec<(u32, &TaskFailure)> = finished
            .values()
            .filter_map(|t| t.failure.as_ref().map(|f| (t.asset.page_index, f)))
            .collect();
        let shared = failures
            .first()
            .map(|(_, f)| f.kind)
            .filter(|kind| failures.iter().all(|(_, f)| f.kind == *kind));

        match (shared, failures.first()) {
            (Some(FailureKind::ExpiredAsset), Some((page, _))) => Error::ExpiredAsset {
                document: node.name.clone(),
                page: *page,
            },
            (Some(FailureKind::TransientNetwork), Some((_, failure))) => {
                Error::TransientNetwork(failure.message.clone())
            }
            _ => MaterializeError::NoPages {
                document: node.name.clone(),
            }
            .into(),
        }
    }

    fn tasks(
        ctx: &TierContext<'_>,
        node: &DocumentNode,
        pages: &[PageRef],
        staging: &Path,
        only: Option<&HashSet<u32>>,
    ) -> Vec<DownloadTask> {
        let issued_at = Utc::now();
        let ttl = ctx.config.download.asset_ttl;
        pages
            .iter()
            .filter(|p| only.is_none_or(|set| set.contains(&p.page)))
            .map(|p| {
                let asset =
                    ImageAsset::issue(node.id.clone(), p.page, p.url.clone(), issued_at, ttl);
                DownloadTask::new(asset, staging.join(format!("page-{:05}.img", p.page)))
            })
            .collect()
    }
}

#[async_trait]
impl Strategy for PageExtraction {
    fn tier(&self) -> Tier {
        Tier::PageExtraction
    }

    fn supports(&self, target: &Target) -> bool {
        matches!(target, Target::Document { .. })
    }

    async fn attempt(
        &self,
        ctx: &mut TierContext<'_>,
        target: &Target,
        staging: &Path,
    ) -> Result<TierSuccess> {
        let node = target.node();
        let listing = Self::read_pages(ctx, target).await?;
        let pages = &listing.pages;
        if pages.is_empty() {
            return Err(Error::AffordanceAbsent {
                tier: Tier::PageExtraction,
                reason: format!("'{}' exposes no page images", node.name),
            });
        }

        tracing::info!(document = %node.id, pages = pages.len(), "extracting pages");
        let tasks = Self::tasks(ctx, node, pages, staging, None);
        let mut finished: BTreeMap<u32, DownloadTask> = ctx
            .orchestrator
            .run(tasks)
            .await
            .into_iter()
            .map(|t| (t.asset.page_index, t))
            .collect();

        if ctx.cancel.is_cancelled() {
            return Err(Error::FatalSession("run cancelled".to_string()));
        }

        let mut failed: HashSet<u32> = finished
            .values()
            .filter(|t| t.status.is_failed())
            .map(|t| t.asset.page_index)
            .collect();
        failed.extend(listing.unsigned());
        let mut expected = listing.expected;

        if !failed.is_empty() && ctx.config.download.reissue_failed_pages && node.url.is_some() {
            tracing::info!(document = %node.id, failed = failed.len(), "re-issuing failed pages");
            match Self::read_pages(ctx, target).await {
                Ok(fresh) => {
                    expected = expected.max(fresh.expected);
                    let retry = Self::tasks(ctx, node, &fresh.pages, staging, Some(&failed));
                    for task in ctx.orchestrator.run(retry).await {
                        finished.insert(task.asset.page_index, task);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(document = %node.id, error = %e, "could not re-issue pages");
                }
            }
        }

        let set = PageSet::from_tasks(finished.values()).expecting(expected);
        if set.pages.is_empty() {
            let error = Self::no_pages(node, &finished);
            tracing::warn!(document = %node.id, error = %error, "every page failed");
            return Err(error);
        }
        if !set.is_complete() {
            tracing::warn!(document = %node.id, gaps = ?set.gaps, "compiling with missing pages");
        }

        let pdf = ctx
            .materializer
            .compile_pdf(&set, staging, "document.pdf")
            .await?;
        Ok(TierSuccess {
            staged: super::Staged::File(pdf),
            page_gaps: set.gaps,
        })
    }
}

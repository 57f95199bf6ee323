//! Bulk export tier: one aggregate download for the whole target

use super::{Staged, Strategy, Target, TierContext, TierSuccess};
use crate::error::{Error, Result};
use crate::materialize::archive::is_zip;
use crate::materialize::layout::sanitize_component;
use crate::orchestrator::native::download_native;
use crate::session::{Query, schema};
use crate::types::Tier;
use crate::utils::move_file;
use async_trait::async_trait;
use std::path::Path;

/// Uses the platform's "download all" affordance
///
/// A ZIP export is unpacked into staging and committed as a tree; any other file is
/// taken as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkExport;

#[async_trait]
impl Strategy for BulkExport {
    fn tier(&self) -> Tier {
        Tier::Bulk
    }

    fn supports(&self, target: &Target) -> bool {
        match target {
            Target::Collection(_) => true,
            Target::Document { standalone, .. } => *standalone,
        }
    }

    async fn attempt(
        &self,
        ctx: &mut TierContext<'_>,
        target: &Target,
        staging: &Path,
    ) -> Result<TierSuccess> {
        let url = target.url().ok_or_else(|| Error::AffordanceAbsent {
            tier: Tier::Bulk,
            reason: "target has no URL".to_string(),
        })?;
        ctx.open(url, target.ready_condition()).await?;

        let (handle, rejected) = schema::affordance(ctx.session.query(Query::BulkAffordance).await?);
        for r in rejected {
            tracing::warn!(index = r.index, reason = %r.reason, "malformed bulk affordance");
        }
        let handle = handle.ok_or_else(|| Error::AffordanceAbsent {
            tier: Tier::Bulk,
            reason: "no bulk download offered".to_string(),
        })?;

        let landed = download_native(ctx.session, &handle, &ctx.config.native).await?;
        let max_len = ctx.config.output.max_name_len;

        if is_zip(&landed)? {
            let tree = staging.join("export");
            let written = ctx.materializer.extract_archive(&landed, &tree).await;
            if let Err(e) = tokio::fs::remove_file(&landed).await {
                tracing::debug!(path = %landed.display(), error = %e, "could not remove export archive");
            }
            let written = written?;
            tracing::info!(files = written.len(), "bulk export unpacked");

            return match (target, written.as_slice()) {
                (_, []) => Err(Error::AffordanceAbsent {
                    tier: Tier::Bulk,
                    reason: "bulk export was empty".to_string(),
                }),
                (Target::Document { .. }, [single]) => Ok(TierSuccess::file(single.clone())),
                _ => Ok(TierSuccess {
                    staged: Staged::Tree(tree),
                    page_gaps: Vec::new(),
                }),
            };
        }

        let name = landed
            .file_name()
            .map(|n| sanitize_component(&n.to_string_lossy(), max_len))
            .unwrap_or_else(|| "export".to_string());
        match target {
            Target::Collection(_) => {
                let tree = staging.join("export");
                tokio::fs::create_dir_all(&tree).await?;
                move_file(&landed, &tree.join(&name)).await?;
                Ok(TierSuccess {
                    staged: Staged::Tree(tree),
                    page_gaps: Vec::new(),
                })
            }
            Target::Document { .. } => {
                let staged = staging.join(&name);
                move_file(&landed, &staged).await?;
                Ok(TierSuccess::file(staged))
            }
        }
    }
}

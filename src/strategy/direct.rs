//! Direct download tier: the document's own download affordance

use super::{Strategy, Target, TierContext, TierSuccess};
use crate::error::{Error, Result};
use crate::materialize::layout::file_name;
use crate::orchestrator::native::download_native;
use crate::session::{Query, schema};
use crate::types::Tier;
use crate::utils::move_file;
use async_trait::async_trait;
use std::path::Path;

/// Clicks the per-document download affordance and keeps the file the browser writes
///
/// The handle is read from the document's own page when it has one. A handle captured in
/// the folder listing is used when the page offers none, or when the document has no URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectDownload;

#[async_trait]
impl Strategy for DirectDownload {
    fn tier(&self) -> Tier {
        Tier::Direct
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

        let mut handle = None;
        if let Some(url) = &node.url {
            ctx.open(url, target.ready_condition()).await?;
            let (found, rejected) =
                schema::affordance(ctx.session.query(Query::DownloadAffordance).await?);
            for r in rejected {
                tracing::warn!(document = %node.id, reason = %r.reason, "malformed download affordance");
            }
            handle = found;
        }
        let handle = handle
            .or_else(|| node.assets.download.clone())
            .ok_or_else(|| Error::AffordanceAbsent {
                tier: Tier::Direct,
                reason: format!("'{}' offers no download", node.name),
            })?;

        let landed = download_native(ctx.session, &handle, &ctx.config.native).await?;
        let ext = landed
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or("pdf")
            .to_ascii_lowercase();

        let staged = staging.join(file_name("document", &ext, ctx.config.output.max_name_len));
        move_file(&landed, &staged).await?;
        tracing::debug!(document = %node.id, path = %staged.display(), "direct download staged");
        Ok(TierSuccess::file(staged))
    }
}

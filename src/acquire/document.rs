use super::{AcquireRequest, Grabber, fail, settle};
use crate::error::Result;
use crate::materialize::Materializer;
use crate::materialize::layout::{document_stem, file_name};
use crate::report::{AcquisitionResult, DocumentOutcome};
use crate::session::{Condition, Session};
use crate::strategy::{Staged, Target, TierContext, open_page};
use crate::types::{DocumentNode, NodeId};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

const DEFAULT_OUTPUT: &str = "output.pdf";

impl Grabber {
    /// Acquire one document through every applicable tier
    pub(super) async fn acquire_document(
        &self,
        session: &mut dyn Session,
        request: &AcquireRequest,
        cancel: CancellationToken,
    ) -> Result<AcquisitionResult> {
        let id = NodeId::from(request.url.as_str());
        let timeout = self.config.navigation.timeout;

        let title = match open_page(session, &request.url, Condition::ViewerReady, timeout).await {
            Ok(state) => state.title,
            Err(e) => {
                tracing::error!(url = %request.url, error = %e, "document viewer unavailable");
                let output = request
                    .output
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));
                let mut result = self.empty_result(request, output);
                let name = request.url.to_string();
                let mut outcome = DocumentOutcome::pending(id, name, Vec::new());
                fail(&mut outcome, &e);
                if e.is_fatal() {
                    result.aborted = Some(e.to_string());
                }
                self.report_document(&outcome, None);
                result.documents.push(outcome);
                return Ok(result);
            }
        };

        let max_name_len = self.config.output.max_name_len;
        let output = match &request.output {
            Some(path) => path.clone(),
            None => {
                let name = match title.as_deref() {
                    Some(t) if !t.trim().is_empty() => {
                        file_name(&document_stem(t, max_name_len), "pdf", max_name_len)
                    }
                    _ => DEFAULT_OUTPUT.to_string(),
                };
                std::env::current_dir()?.join(name)
            }
        };
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        tokio::fs::create_dir_all(&dir).await?;

        let name = title.unwrap_or_else(|| DEFAULT_OUTPUT.to_string());
        let node = DocumentNode::standalone(id.clone(), name.clone(), request.url.clone());
        let mut result = self.empty_result(request, output.clone());
        let materializer = self.materializer(&dir);
        let orchestrator = self.orchestrator(&cancel);
        let mut ctx = TierContext {
            session,
            config: &self.config,
            orchestrator: &orchestrator,
            materializer: &materializer,
            cancel: cancel.clone(),
            events: Some(self.event_tx.clone()),
        };

        let target = Target::Document {
            node,
            standalone: true,
        };
        let selection = self.selector.run(&mut ctx, &target, request.mode).await;
        let committed = match &selection.success {
            Some(selected) => Some(place(&materializer, &selected.output.staged, &output).await),
            None => None,
        };
        let tier = selection.success.as_ref().map(|s| s.tier);

        let mut outcome = DocumentOutcome::pending(id, name, Vec::new());
        if let Some(fatal) = settle(&mut outcome, selection, committed) {
            result.aborted = Some(fatal.to_string());
        }
        if let Some(first) = outcome.outputs.first() {
            result.output_root = match outcome.outputs.len() {
                1 => first.clone(),
                _ => first.parent().map(Path::to_path_buf).unwrap_or(dir),
            };
        }
        self.report_document(&outcome, tier);
        result.documents.push(outcome);
        Ok(result)
    }
}

/// Put a standalone document's staged output at `output`
///
/// A single file takes the requested name but keeps the extension the tier produced, so a
/// spreadsheet delivered by direct download is not mislabelled as a PDF. A tree (a bulk
/// export holding several files) goes into a directory named after the output stem.
async fn place(materializer: &Materializer, staged: &Staged, output: &Path) -> Result<Vec<PathBuf>> {
    match staged {
        Staged::File(path) => {
            let produced = path.extension().and_then(|e| e.to_str()).unwrap_or("pdf");
            let requested = output.extension().and_then(|e| e.to_str());
            let dest = match requested {
                Some(ext) if ext.eq_ignore_ascii_case(produced) => output.to_path_buf(),
                _ => output.with_extension(produced),
            };
            Ok(vec![materializer.commit_file(path, &dest).await?])
        }
        Staged::Tree(tree) => {
            let dest = output.with_extension("");
            materializer.commit_tree(tree, &dest).await
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::FailureKind;
    use crate::report::DocumentStatus;
    use crate::session::scripted::{ScriptedPage, ScriptedSession};
    use crate::test_helpers::FakeFetcher;
    use crate::types::Tier;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const DOC: &str = "https://rooms.test/v/acme/d/deck";

    fn grabber() -> Grabber {
        let mut config = Config::default();
        config.download.politeness_interval = Duration::ZERO;
        Grabber::new(config)
            .unwrap()
            .with_fetcher(Arc::new(FakeFetcher::new()))
    }

    fn pages(n: u32) -> Vec<serde_json::Value> {
        (1..=n)
            .map(|p| json!({"page": p, "url": format!("https://cdn.test/deck/{p}.png")}))
            .collect()
    }

    #[tokio::test]
    async fn direct_download_wins_over_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Deck").download("btn").pages(pages(2)))
            .file("btn", "Deck.pdf", b"%PDF-1.7".to_vec());

        let request = AcquireRequest::new(DOC.parse().unwrap()).output(dir.path().join("out/deck.pdf"));
        let result = grabber().acquire(&mut session, request).await.unwrap();

        let doc = &result.documents[0];
        assert_eq!(doc.status, DocumentStatus::Succeeded);
        assert_eq!(doc.tier, Some(Tier::Direct));
        let tiers: Vec<Tier> = doc.attempts.iter().map(|a| a.tier).collect();
        assert_eq!(tiers, vec![Tier::Bulk, Tier::Direct]);
        assert_eq!(result.output_root, dir.path().join("out/deck.pdf"));
        assert_eq!(std::fs::read(&result.output_root).unwrap(), b"%PDF-1.7");
    }

    #[tokio::test]
    async fn falls_through_to_page_extraction() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Deck").pages(pages(3)));

        let request = AcquireRequest::new(DOC.parse().unwrap()).output(dir.path().join("deck.pdf"));
        let result = grabber().acquire(&mut session, request).await.unwrap();

        assert!(result.is_complete(), "{}", result.summary());
        assert_eq!(result.documents[0].tier, Some(Tier::PageExtraction));
        let pdf = lopdf::Document::load(dir.path().join("deck.pdf")).unwrap();
        assert_eq!(pdf.get_pages().len(), 3);
    }

    #[tokio::test]
    async fn keeps_produced_extension() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Model").download("btn"))
            .file("btn", "model.xlsx", b"sheet".to_vec());

        let request = AcquireRequest::new(DOC.parse().unwrap())
            .output(dir.path().join("model.pdf"))
            .forced(Tier::Direct);
        let result = grabber().acquire(&mut session, request).await.unwrap();

        assert_eq!(result.output_root, dir.path().join("model.xlsx"));
        assert!(!dir.path().join("model.pdf").exists());
    }

    #[tokio::test]
    async fn forced_tier_failure_is_final() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Deck").pages(pages(1)));

        let request = AcquireRequest::new(DOC.parse().unwrap())
            .output(dir.path().join("deck.pdf"))
            .forced(Tier::Direct);
        let result = grabber().acquire(&mut session, request).await.unwrap();

        let doc = &result.documents[0];
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert_eq!(doc.attempts.len(), 1);
        assert_eq!(doc.error.as_ref().unwrap().kind, FailureKind::AffordanceAbsent);
        assert!(!dir.path().join("deck.pdf").exists());
    }

    #[tokio::test]
    async fn gated_viewer_fails_without_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Deck").gated());

        let result = grabber()
            .acquire(&mut session, AcquireRequest::new(DOC.parse().unwrap()))
            .await
            .unwrap();

        assert!(result.aborted.is_none());
        assert_eq!(result.documents[0].error.as_ref().unwrap().kind, FailureKind::AccessGate);
        assert_eq!(result.failed(), 1);
    }

    #[tokio::test]
    async fn page_gaps_make_a_partial_document() {
        use crate::error::FetchError;
        use crate::test_helpers::FakeReply;

        let dir = tempfile::tempdir().unwrap();
        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Deck").pages(pages(3)));
        let fetcher = FakeFetcher::new().reply_always(
            "https://cdn.test/deck/2.png",
            FakeReply::Fail(FetchError::Client { code: 404 }),
        );
        let mut config = Config::default();
        config.download.politeness_interval = Duration::ZERO;
        config.download.reissue_failed_pages = false;
        let grabber = Grabber::new(config).unwrap().with_fetcher(Arc::new(fetcher));

        let request = AcquireRequest::new(DOC.parse().unwrap()).output(dir.path().join("deck.pdf"));
        let result = grabber.acquire(&mut session, request).await.unwrap();

        let doc = &result.documents[0];
        assert_eq!(doc.status, DocumentStatus::Partial);
        assert_eq!(doc.page_gaps, vec![2]);
        assert_eq!(doc.error.as_ref().unwrap().kind, FailureKind::PartialDownload);
        assert!(result.partial_failure());
    }

    #[tokio::test]
    async fn engine_is_reusable_after_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let grabber = grabber();
        let stale = grabber.cancellation_token();
        grabber.cancel();
        assert!(stale.is_cancelled());

        let mut session = ScriptedSession::new(dir.path().join("downloads"))
            .page(DOC, ScriptedPage::document("Deck").pages(pages(2)));
        let request = AcquireRequest::new(DOC.parse().unwrap()).output(dir.path().join("deck.pdf"));
        let result = grabber.acquire(&mut session, request).await.unwrap();

        assert!(result.is_complete(), "{}", result.summary());
        assert!(!grabber.cancellation_token().is_cancelled());
    }
}

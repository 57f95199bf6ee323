//! Top-level acquisition driver
//!
//! [`Grabber`] ties the pieces together for one request:
//! - [`collection`] - landing snapshot, bulk export, enumeration, per-document tiers
//! - [`document`] - a single document through all three tiers
//!
//! A run only returns `Err` when it cannot start (the output location cannot be
//! created). Everything that goes wrong afterwards, including a lost session, is
//! reported in the [`AcquisitionResult`].

mod collection;
mod document;

use crate::config::Config;
use crate::error::{Error, FailureKind, Result};
use crate::materialize::Materializer;
use crate::materialize::archive::{ArchiveExtractor, ZipExtractor};
use crate::materialize::layout::file_name;
use crate::materialize::pdf::{LopdfEncoder, PdfEncoder};
use crate::orchestrator::DownloadOrchestrator;
use crate::orchestrator::fetcher::{AssetFetcher, HttpFetcher};
use crate::report::{AcquisitionResult, DocumentError, DocumentOutcome, DocumentStatus};
use crate::session::Session;
use crate::strategy::{Selection, Staged, StrategySelector};
use crate::types::{AttemptOutcome, Event, TargetKind, Tier, TierMode};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

/// What to acquire and where to put it
#[derive(Clone, Debug)]
pub struct AcquireRequest {
    /// Viewer URL of a document or collection
    pub url: Url,
    /// Target kind; guessed from the URL when absent
    pub kind: Option<TargetKind>,
    /// Output file (documents) or directory (collections); defaults apply when absent
    pub output: Option<PathBuf>,
    /// Tier selection
    pub mode: TierMode,
}

impl AcquireRequest {
    /// Request for `url` with every default
    pub fn new(url: Url) -> Self {
        Self {
            url,
            kind: None,
            output: None,
            mode: TierMode::Auto,
        }
    }

    /// Override the target kind
    pub fn kind(mut self, kind: TargetKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Write to `output` instead of the default location
    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Only try `tier`, with no fallback
    pub fn forced(mut self, tier: Tier) -> Self {
        self.mode = TierMode::Forced(tier);
        self
    }

    /// Resolved target kind
    pub fn target_kind(&self) -> TargetKind {
        self.kind.unwrap_or_else(|| TargetKind::from_url(&self.url))
    }
}

/// Document and collection acquisition engine
///
/// # Examples
///
/// ```no_run
/// use grabber::{AcquireRequest, Config, Grabber};
/// use grabber::session::scripted::ScriptedSession;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let grabber = Grabber::new(Config::default())?;
/// let mut events = grabber.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         tracing::info!(?event, "grabber event");
///     }
/// });
///
/// let mut session = ScriptedSession::new("/tmp/downloads");
/// let request = AcquireRequest::new("https://rooms.example/s/abc".parse()?);
/// let result = grabber.acquire(&mut session, request).await?;
/// println!("{}", result.summary());
/// # Ok(())
/// # }
/// ```
pub struct Grabber {
    config: Config,
    fetcher: Arc<dyn AssetFetcher>,
    encoder: Arc<dyn PdfEncoder>,
    extractor: Arc<dyn ArchiveExtractor>,
    selector: StrategySelector,
    event_tx: broadcast::Sender<Event>,
    cancel: Mutex<CancellationToken>,
}

impl Grabber {
    /// Create an engine with the default collaborators
    ///
    /// Fails if `config` is invalid or the HTTP client cannot be built.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let fetcher = Arc::new(HttpFetcher::new(config.download.request_timeout)?);
        let extractor = Arc::new(ZipExtractor::new(config.output.max_name_len));
        let (event_tx, _rx) = broadcast::channel(1000);

        Ok(Self {
            config,
            fetcher,
            encoder: Arc::new(LopdfEncoder),
            extractor,
            selector: StrategySelector::default(),
            event_tx,
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    /// Fetch page images through `fetcher`
    pub fn with_fetcher(mut self, fetcher: Arc<dyn AssetFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Compile PDFs with `encoder`
    pub fn with_encoder(mut self, encoder: Arc<dyn PdfEncoder>) -> Self {
        self.encoder = encoder;
        self
    }

    /// Unpack bulk exports with `extractor`
    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Replace the tier list
    pub fn with_selector(mut self, selector: StrategySelector) -> Self {
        self.selector = selector;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Subscribe to run events
    ///
    /// Every subscriber gets every event. A subscriber more than 1000 events behind
    /// receives `RecvError::Lagged`.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Token that stops the current run, or the next one if none is in progress
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Stop the current run
    ///
    /// In-flight page downloads are abandoned and remaining documents are reported as
    /// not attempted. The engine stays usable: the next [`Grabber::acquire`] starts with
    /// a fresh token.
    pub fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Token for a run about to start, replacing one spent by an earlier cancellation
    fn run_token(&self) -> CancellationToken {
        let mut current = self.cancel.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_cancelled() {
            *current = CancellationToken::new();
        }
        current.clone()
    }

    /// Acquire the document or collection behind `request.url`
    pub async fn acquire(
        &self,
        session: &mut dyn Session,
        request: AcquireRequest,
    ) -> Result<AcquisitionResult> {
        let kind = request.target_kind();
        let cancel = self.run_token();
        tracing::info!(url = %request.url, ?kind, mode = ?request.mode, "starting acquisition");
        self.emit(Event::RunStarted {
            url: request.url.to_string(),
            kind,
        });

        let mut result = match kind {
            TargetKind::Collection => self.acquire_collection(session, &request, cancel).await?,
            TargetKind::Document => self.acquire_document(session, &request, cancel).await?,
        };
        result.finished_at = Utc::now();

        match &result.aborted {
            Some(reason) => {
                tracing::error!(reason = %reason, "acquisition aborted");
                self.emit(Event::RunAborted {
                    reason: reason.clone(),
                });
            }
            None => {
                tracing::info!(
                    succeeded = result.succeeded(),
                    failed = result.failed(),
                    "acquisition finished"
                );
                self.emit(Event::RunComplete {
                    succeeded: result.succeeded(),
                    failed: result.failed(),
                });
            }
        }
        Ok(result)
    }

    fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    fn orchestrator(&self, cancel: &CancellationToken) -> DownloadOrchestrator {
        DownloadOrchestrator::new(
            Arc::clone(&self.fetcher),
            self.config.download.clone(),
            self.config.retry.clone(),
        )
        .with_cancellation(cancel.clone())
        .with_events(self.event_tx.clone())
    }

    fn materializer(&self, root: &Path) -> Materializer {
        Materializer::new(
            root,
            self.config.output.file_collision,
            Arc::clone(&self.encoder),
            Arc::clone(&self.extractor),
        )
    }

    fn empty_result(&self, request: &AcquireRequest, output_root: PathBuf) -> AcquisitionResult {
        let now = Utc::now();
        AcquisitionResult {
            url: request.url.to_string(),
            kind: request.target_kind(),
            output_root,
            landing_snapshot: None,
            attempts: Vec::new(),
            documents: Vec::new(),
            anomalies: Vec::new(),
            aborted: None,
            started_at: now,
            finished_at: now,
        }
    }
}

/// Move a winning tier's staged output into place
///
/// A staged file lands at `dir/<stem>.<ext>`, keeping the extension the tier produced;
/// a staged tree is merged into `dir` (or `dir/<stem>` when `nest_tree` is set).
async fn commit_selection(
    materializer: &Materializer,
    staged: &Staged,
    dir: &Path,
    stem: &str,
    max_name_len: usize,
    nest_tree: bool,
) -> Result<Vec<PathBuf>> {
    match staged {
        Staged::File(path) => {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("pdf");
            let dest = dir.join(file_name(stem, ext, max_name_len));
            Ok(vec![materializer.commit_file(path, &dest).await?])
        }
        Staged::Tree(tree) => {
            let dest = if nest_tree {
                dir.join(stem)
            } else {
                dir.to_path_buf()
            };
            materializer.commit_tree(tree, &dest).await
        }
    }
}

/// Fold a finished selection into `outcome`
///
/// `committed` is the result of placing the winning tier's output, if there was one.
/// Returns the fatal error that stopped the selector, if any.
fn settle(
    outcome: &mut DocumentOutcome,
    mut selection: Selection,
    committed: Option<Result<Vec<PathBuf>>>,
) -> Option<Error> {
    outcome.attempts = std::mem::take(&mut selection.attempts);

    match (selection.success.take(), committed) {
        (Some(selected), Some(Ok(outputs))) => {
            outcome.tier = Some(selected.tier);
            outcome.outputs = outputs;
            outcome.page_gaps = selected.output.page_gaps;
            if outcome.page_gaps.is_empty() {
                outcome.status = DocumentStatus::Succeeded;
            } else {
                let missing = Error::PartialDownload {
                    document: outcome.name.clone(),
                    missing: outcome.page_gaps.clone(),
                };
                tracing::warn!(document = %outcome.node_id, error = %missing, "document incomplete");
                fail(outcome, &missing);
                outcome.status = DocumentStatus::Partial;
            }
        }
        (Some(_), Some(Err(e))) => {
            tracing::error!(document = %outcome.node_id, error = %e, "could not place artifacts");
            fail(outcome, &e);
        }
        _ => match (&selection.fatal, outcome.attempts.last().map(|a| a.outcome.clone())) {
            (Some(e), _) => fail(outcome, e),
            (None, Some(AttemptOutcome::Failed { kind, reason })) => {
                tracing::error!(document = %outcome.node_id, %reason, "document not acquired");
                outcome.status = DocumentStatus::Failed;
                outcome.error = Some(DocumentError {
                    kind,
                    message: reason,
                });
            }
            _ => {
                outcome.status = DocumentStatus::Failed;
                outcome.error = Some(DocumentError {
                    kind: FailureKind::AffordanceAbsent,
                    message: "no acquisition tier applies".to_string(),
                });
            }
        },
    }
    selection.fatal
}

fn fail(outcome: &mut DocumentOutcome, error: &Error) {
    outcome.status = DocumentStatus::Failed;
    outcome.error = Some(DocumentError {
        kind: error.failure_kind(),
        message: error.to_string(),
    });
}

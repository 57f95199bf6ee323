//! Deadline-aware page download pool
//!
//! [`DownloadOrchestrator::run`] drives a batch of [`DownloadTask`]s to a terminal
//! status with a fixed number of workers. Each task:
//!
//! - fails terminally without an attempt if its asset expired before a worker got to it
//! - waits for its document's politeness slot before every request
//! - retries transient failures with backoff, but never starts an attempt past expiry
//! - writes its bytes to `destination_path`
//!
//! Workers share only atomic counters and the politeness table.

pub mod fetcher;
pub mod native;
pub mod politeness;

use crate::config::{DownloadConfig, RetryConfig};
use crate::error::{FailureKind, FetchError};
use crate::retry::{IsRetryable, fetch_with_backoff};
use crate::types::{DownloadTask, Event, NodeId, TaskFailure, TaskStatus};
use fetcher::AssetFetcher;
use futures::stream::{self, StreamExt};
use politeness::Politeness;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Bounded-concurrency fetch engine for signed page images
pub struct DownloadOrchestrator {
    fetcher: Arc<dyn AssetFetcher>,
    config: DownloadConfig,
    retry: RetryConfig,
    politeness: Arc<Politeness>,
    cancel: CancellationToken,
    event_tx: Option<broadcast::Sender<Event>>,
}

struct BatchCounters {
    completed: AtomicUsize,
    failed: AtomicUsize,
    total: usize,
}

impl DownloadOrchestrator {
    /// Create an orchestrator fetching through `fetcher`
    pub fn new(fetcher: Arc<dyn AssetFetcher>, config: DownloadConfig, retry: RetryConfig) -> Self {
        let politeness = Arc::new(Politeness::new(config.politeness_interval));
        Self {
            fetcher,
            config,
            retry,
            politeness,
            cancel: CancellationToken::new(),
            event_tx: None,
        }
    }

    /// Stop picking up tasks when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Report progress on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Run every task to a terminal status
    ///
    /// Tasks come back ordered by document and page index, whatever order they finished in.
    pub async fn run(&self, tasks: Vec<DownloadTask>) -> Vec<DownloadTask> {
        let counters = BatchCounters {
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            total: tasks.len(),
        };
        let workers = self.config.workers.max(1);

        tracing::debug!(tasks = counters.total, workers, "starting page batch");

        let mut finished: Vec<DownloadTask> = stream::iter(tasks)
            .map(|task| self.run_task(task, &counters))
            .buffer_unordered(workers)
            .collect()
            .await;

        finished.sort_by(|a, b| {
            (&a.asset.document_id, a.asset.page_index).cmp(&(&b.asset.document_id, b.asset.page_index))
        });

        tracing::debug!(
            completed = counters.completed.load(Ordering::Relaxed),
            failed = counters.failed.load(Ordering::Relaxed),
            "page batch finished"
        );
        finished
    }

    async fn run_task(&self, mut task: DownloadTask, counters: &BatchCounters) -> DownloadTask {
        let document = task.asset.document_id.clone();
        let page = task.asset.page_index;

        if self.cancel.is_cancelled() {
            fail(&mut task, TaskStatus::FailedTerminal, FailureKind::FatalSession, "cancelled");
        } else if !task.asset.is_actionable() {
            tracing::warn!(document = %document, page, "asset expired before start");
            fail(
                &mut task,
                TaskStatus::FailedTerminal,
                FailureKind::ExpiredAsset,
                "asset expired before the download started",
            );
        } else {
            task.status = TaskStatus::InFlight;
            let attempts = AtomicU32::new(0);

            let result = tokio::select! {
                result = self.fetch_with_retry(&task, &attempts) => Some(result),
                _ = self.cancel.cancelled() => None,
            };
            task.attempt = attempts.load(Ordering::SeqCst);

            match result {
                Some(Ok(())) => task.status = TaskStatus::Succeeded,
                Some(Err(e)) => {
                    let status = if e.is_retryable() {
                        TaskStatus::FailedRetryable
                    } else {
                        TaskStatus::FailedTerminal
                    };
                    tracing::warn!(
                        document = %document,
                        page,
                        attempts = task.attempt,
                        error = %e,
                        "page download failed"
                    );
                    fail(&mut task, status, e.failure_kind(), &e.to_string());
                }
                None => fail(&mut task, TaskStatus::FailedTerminal, FailureKind::FatalSession, "cancelled"),
            }
        }

        if task.status == TaskStatus::Succeeded {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.emit_progress(&document, counters);
        task
    }

    async fn fetch_with_retry(
        &self,
        task: &DownloadTask,
        attempts: &AtomicU32,
    ) -> Result<(), FetchError> {
        let asset = &task.asset;
        let destination = task.destination_path.as_path();
        let fetcher = self.fetcher.as_ref();
        let politeness = self.politeness.as_ref();
        let deadline = tokio::time::Instant::now() + asset.time_left();

        fetch_with_backoff(&self.retry, Some(deadline), || async move {
            if !asset.is_actionable() {
                return Err(FetchError::DeadlinePassed);
            }
            politeness.wait_turn(&asset.document_id).await;
            if !asset.is_actionable() {
                return Err(FetchError::DeadlinePassed);
            }

            attempts.fetch_add(1, Ordering::SeqCst);
            let bytes = fetcher.fetch(&asset.source_url).await?;
            tokio::fs::write(destination, &bytes)
                .await
                .map_err(|e| FetchError::Write(e.to_string()))
        })
        .await
    }

    fn emit_progress(&self, document: &NodeId, counters: &BatchCounters) {
        if let Some(tx) = &self.event_tx {
            tx.send(Event::PageProgress {
                id: document.clone(),
                completed: counters.completed.load(Ordering::Relaxed),
                failed: counters.failed.load(Ordering::Relaxed),
                total: counters.total,
            })
            .ok();
        }
    }
}

fn fail(task: &mut DownloadTask, status: TaskStatus, kind: FailureKind, message: &str) {
    task.status = status;
    task.failure = Some(TaskFailure {
        kind,
        message: message.to_string(),
    });
}

/// Pages of one document, ready for compilation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSet {
    /// Downloaded pages in ascending page order
    pub pages: Vec<(u32, PathBuf)>,
    /// Page numbers that are missing, ascending
    pub gaps: Vec<u32>,
}

impl PageSet {
    /// Collect finished tasks into page order
    ///
    /// Gaps are the failed pages plus any page number below the highest one seen that no
    /// task covered at all.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a DownloadTask>) -> Self {
        let mut pages = Vec::new();
        let mut failed = Vec::new();
        for task in tasks {
            if task.status == TaskStatus::Succeeded {
                pages.push((task.asset.page_index, task.destination_path.clone()));
            } else {
                failed.push(task.asset.page_index);
            }
        }
        pages.sort_by_key(|(page, _)| *page);
        pages.dedup_by_key(|(page, _)| *page);

        let highest = pages
            .iter()
            .map(|(p, _)| *p)
            .chain(failed.iter().copied())
            .max()
            .unwrap_or(0);
        let gaps = (1..=highest)
            .filter(|p| pages.binary_search_by_key(p, |(page, _)| *page).is_err())
            .collect();

        Self { pages, gaps }
    }

    /// Treat pages up to `total` as part of the document even if no task covered them
    pub fn expecting(mut self, total: u32) -> Self {
        let known = self.gaps.last().copied().into_iter();
        let highest = self
            .pages
            .last()
            .map(|(p, _)| *p)
            .into_iter()
            .chain(known)
            .max()
            .unwrap_or(0);
        self.gaps.extend(highest + 1..=total);
        self
    }

    /// Whether every page up to the highest known one is present
    pub fn is_complete(&self) -> bool {
        self.gaps.is_empty()
    }
}

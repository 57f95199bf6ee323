//! Acquisition engine for viewer-only document platforms.
//!
//! A [`Grabber`] takes a viewer URL and a browsing [`Session`] and turns what the
//! viewer shows into files on disk: one PDF for a single document, or a directory
//! tree mirroring a dataroom's folders, with a landing-page snapshot at its root.
//!
//! Three tiers are tried per target, fastest first: the platform's bulk export, the
//! per-document download button, and finally page extraction, which fetches each
//! rendered page image before its signed URL expires and compiles them into a PDF.
//! One broken document or folder never stops the rest; every attempt and anomaly
//! lands in the returned [`AcquisitionResult`].
//!
//! ## Example
//!
//! ```no_run
//! use grabber::{AcquireRequest, Config, Grabber};
//! use grabber::session::scripted::ScriptedSession;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.workers = 8;
//!     let grabber = Grabber::new(config)?;
//!
//!     let mut progress = grabber.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = progress.recv().await {
//!             eprintln!("{event:?}");
//!         }
//!     });
//!
//!     // With the `browser` feature, `session::cdp::CdpSession` drives a real Chrome
//!     let mut session = ScriptedSession::new("/tmp/downloads");
//!     let request = AcquireRequest::new("https://rooms.example/s/abc".parse()?);
//!     let result = grabber.acquire(&mut session, request).await?;
//!     println!("{}", result.summary());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Top-level acquisition driver
pub mod acquire;
/// Configuration types
pub mod config;
/// Folder tree enumeration
pub mod enumerate;
/// Error types
pub mod error;
/// Output tree, PDF compilation and archive extraction
pub mod materialize;
/// Concurrent, deadline-aware page downloads
pub mod orchestrator;
/// Run report
pub mod report;
/// Retry logic with exponential backoff
pub mod retry;
/// Browser session abstraction
pub mod session;
/// Acquisition tiers and their selector
pub mod strategy;
/// Document tree arena
pub mod tree;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use acquire::{AcquireRequest, Grabber};
pub use config::{Config, FileCollisionAction};
pub use error::{Error, FailureKind, Result};
pub use report::{AcquisitionResult, DocumentOutcome, DocumentStatus};
pub use session::Session;
pub use types::{DocumentNode, Event, NodeId, TargetKind, Tier, TierMode};

/// Run one acquisition, cancelling it when a termination signal arrives.
///
/// The run is not dropped on a signal: it is cancelled and awaited, so the returned
/// result still describes everything that was written before the interruption.
///
/// SIGTERM and SIGINT are watched on unix, Ctrl+C elsewhere.
///
/// # Example
///
/// ```no_run
/// use grabber::{AcquireRequest, Config, Grabber, acquire_until_signal};
/// use grabber::session::scripted::ScriptedSession;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let grabber = Grabber::new(Config::default())?;
///     let mut session = ScriptedSession::new("/tmp/downloads");
///     let request = AcquireRequest::new("https://rooms.example/v/acme/d/deck".parse()?);
///
///     let result = acquire_until_signal(&grabber, &mut session, request).await?;
///     println!("{}", result.summary());
///     Ok(())
/// }
/// ```
pub async fn acquire_until_signal(
    grabber: &Grabber,
    session: &mut dyn Session,
    request: AcquireRequest,
) -> Result<AcquisitionResult> {
    let run = grabber.acquire(session, request);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = wait_for_signal() => {
            tracing::warn!("cancelling acquisition");
            grabber.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::SignalKind;

    tokio::select! {
        _ = unix_signal(SignalKind::terminate(), "SIGTERM") => {}
        _ = unix_signal(SignalKind::interrupt(), "SIGINT") => {}
    }
}

/// Resolves when `kind` arrives; never resolves if it cannot be registered
#[cfg(unix)]
async fn unix_signal(kind: tokio::signal::unix::SignalKind, name: &'static str) {
    match tokio::signal::unix::signal(kind) {
        Ok(mut stream) => {
            stream.recv().await;
            tracing::info!(signal = name, "termination signal received");
        }
        Err(e) => {
            // Restricted environments can refuse registration; the other signal still works
            tracing::warn!(signal = name, error = %e, "signal handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received");
}

//! Configuration types for grabber

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Page download behavior (concurrency, timeouts, asset lifetime)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Size of the page download worker pool (default: 16)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Timeout for a single asset request (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// Minimum spacing between two requests for pages of the same document (default: 50ms)
    #[serde(default = "default_politeness_interval", with = "millis_serde")]
    pub politeness_interval: Duration,

    /// Lifetime of a signed page URL from the moment it was extracted (default: 210 seconds)
    #[serde(default = "default_asset_ttl", with = "duration_serde")]
    pub asset_ttl: Duration,

    /// Return to the viewer once to fetch fresh URLs for pages that failed (default: true)
    #[serde(default = "default_true")]
    pub reissue_failed_pages: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            request_timeout: default_request_timeout(),
            politeness_interval: default_politeness_interval(),
            asset_ttl: default_asset_ttl(),
            reissue_failed_pages: true,
        }
    }
}

/// Retry configuration for transient fetch failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Number of retries after the first attempt (default: 2)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "millis_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 10 seconds)
    #[serde(default = "default_max_delay", with = "millis_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Control-plane navigation limits
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Timeout for a page load plus its render condition (default: 30 seconds)
    #[serde(default = "default_navigation_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Deepest folder level the enumerator descends into (default: 32)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            timeout: default_navigation_timeout(),
            max_depth: default_max_depth(),
        }
    }
}

/// Observation of browser-native downloads (bulk archives, direct files)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NativeDownloadConfig {
    /// How long to wait for the download to land on disk (default: 300 seconds)
    #[serde(default = "default_native_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Interval between file size checks (default: 500ms)
    #[serde(default = "default_stability_interval", with = "millis_serde")]
    pub stability_interval: Duration,

    /// Consecutive unchanged size checks before the file counts as complete (default: 2)
    #[serde(default = "default_stability_checks")]
    pub stability_checks: u32,
}

impl Default for NativeDownloadConfig {
    fn default() -> Self {
        Self {
            timeout: default_native_timeout(),
            stability_interval: default_stability_interval(),
            stability_checks: default_stability_checks(),
        }
    }
}

/// File collision handling strategy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to filename (default)
    #[default]
    Rename,
    /// Overwrite existing file
    Overwrite,
    /// Skip the file, keep existing
    Skip,
}

/// Output layout settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Parent directory for collection runs without an explicit output (default: ~/datarooms)
    #[serde(default = "default_collections_dir")]
    pub collections_dir: PathBuf,

    /// File name of the landing page snapshot in a collection root
    #[serde(default = "default_landing_name")]
    pub landing_name: String,

    /// What to do when a target file already exists
    #[serde(default)]
    pub file_collision: FileCollisionAction,

    /// Maximum length in bytes of a single sanitized path component (default: 200)
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            collections_dir: default_collections_dir(),
            landing_name: default_landing_name(),
            file_collision: FileCollisionAction::default(),
            max_name_len: default_max_name_len(),
        }
    }
}

/// Main configuration for [`Grabber`](crate::Grabber)
///
/// Every section has defaults, so `Config::default()` and `{}` in JSON are both valid.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Page download settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Retry behavior for page fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Navigation limits
    #[serde(default)]
    pub navigation: NavigationConfig,

    /// Native download observation
    #[serde(default)]
    pub native: NativeDownloadConfig,

    /// Output layout
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> Error {
            Error::Config {
                message: message.to_string(),
                key: Some(key.to_string()),
            }
        }

        if self.download.workers == 0 {
            return Err(invalid("download.workers", "at least one worker is required"));
        }
        if self.download.asset_ttl.is_zero() {
            return Err(invalid("download.asset_ttl", "asset lifetime must be positive"));
        }
        if self.download.request_timeout.is_zero() {
            return Err(invalid(
                "download.request_timeout",
                "request timeout must be positive",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(invalid(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        if self.navigation.timeout.is_zero() {
            return Err(invalid("navigation.timeout", "navigation timeout must be positive"));
        }
        if self.native.stability_checks == 0 {
            return Err(invalid(
                "native.stability_checks",
                "at least one stability check is required",
            ));
        }
        if self.output.landing_name.trim().is_empty() {
            return Err(invalid("output.landing_name", "landing page name is empty"));
        }
        if self.output.max_name_len < 16 {
            return Err(invalid(
                "output.max_name_len",
                "names shorter than 16 bytes cannot hold a disambiguation suffix",
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    16
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_politeness_interval() -> Duration {
    Duration::from_millis(50)
}

fn default_asset_ttl() -> Duration {
    Duration::from_secs(210)
}

fn default_true() -> bool {
    true
}

fn default_max_retries() -> u32 {
    2
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_navigation_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_depth() -> usize {
    32
}

fn default_native_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_stability_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_stability_checks() -> u32 {
    2
}

fn default_collections_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("datarooms")
}

fn default_landing_name() -> String {
    "_dataroom_index.pdf".to_string()
}

fn default_max_name_len() -> usize {
    200
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration serialization helper (milliseconds, for sub-second settings)
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

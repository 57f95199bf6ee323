//! Shared fakes for unit tests.

use crate::config::RetryConfig;
use crate::error::FetchError;
use crate::orchestrator::fetcher::AssetFetcher;
use crate::types::{ImageAsset, NodeId};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use url::Url;

/// Encode a solid-colour PNG of the given size
pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Encode a solid-colour JPEG of the given size
pub(crate) fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([40, 40, 200]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    buf.into_inner()
}

/// Retry settings with millisecond delays and no jitter
pub(crate) fn quick_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// A page asset at `https://cdn.test/<doc>/<page>.png` issued now
pub(crate) fn page_asset(doc: &str, page: u32, ttl: Duration) -> ImageAsset {
    ImageAsset::issue(
        NodeId::from(doc),
        page,
        Url::parse(&format!("https://cdn.test/{doc}/{page}.png")).unwrap(),
        Utc::now(),
        ttl,
    )
}

/// What a [`FakeFetcher`] answers for a URL
#[derive(Clone, Debug)]
pub(crate) enum FakeReply {
    Ok(Vec<u8>),
    Delayed(Duration, Vec<u8>),
    Fail(FetchError),
}

/// Scripted [`AssetFetcher`]; unknown URLs get a small PNG
pub(crate) struct FakeFetcher {
    replies: Mutex<HashMap<String, Vec<FakeReply>>>,
    always: HashMap<String, FakeReply>,
    calls: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub(crate) fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            always: HashMap::new(),
            calls: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        }
    }

    /// Answer `url` with `reply` every time
    pub(crate) fn reply_always(mut self, url: &str, reply: FakeReply) -> Self {
        self.always.insert(url.to_string(), reply);
        self
    }

    /// Answer `url` with `replies` in order, then fall back to the default
    pub(crate) fn reply_sequence(self, url: &str, replies: Vec<FakeReply>) -> Self {
        self.replies.lock().unwrap().insert(url.to_string(), replies);
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// URLs in the order their responses completed
    pub(crate) fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssetFetcher for FakeFetcher {
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = url.to_string();
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            match replies.get_mut(&key) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        }
        .or_else(|| self.always.get(&key).cloned())
        .unwrap_or_else(|| FakeReply::Ok(png(4, 4)));

        let result = match reply {
            FakeReply::Ok(bytes) => Ok(bytes),
            FakeReply::Delayed(delay, bytes) => {
                tokio::time::sleep(delay).await;
                Ok(bytes)
            }
            FakeReply::Fail(e) => Err(e),
        };
        self.completed.lock().unwrap().push(key);
        result
    }
}

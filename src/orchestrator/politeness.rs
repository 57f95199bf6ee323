//! Per-document request spacing
//!
//! Independent of the worker pool size, two requests for pages of the same document are
//! started at least `interval` apart. Each caller reserves the next free slot for its
//! document under a short lock and then sleeps outside the lock until the slot arrives.

use crate::types::NodeId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Spacing table keyed by owning document
#[derive(Debug)]
pub struct Politeness {
    interval: Duration,
    next_slot: Mutex<HashMap<NodeId, Instant>>,
}

impl Politeness {
    /// Space requests per document by `interval`; zero disables spacing
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until a request for `owner` may start
    pub async fn wait_turn(&self, owner: &NodeId) {
        if self.interval.is_zero() {
            return;
        }

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = slots
                .get(owner)
                .copied()
                .filter(|next| *next > now)
                .unwrap_or(now);
            slots.insert(owner.clone(), slot + self.interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn same_document_requests_are_spaced() {
        let politeness = Arc::new(Politeness::new(Duration::from_millis(50)));
        let owner = NodeId::from("doc");
        let start = Instant::now();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let politeness = politeness.clone();
            let owner = owner.clone();
            handles.push(tokio::spawn(async move {
                politeness.wait_turn(&owner).await;
                Instant::now()
            }));
        }

        let mut starts = Vec::new();
        for handle in handles {
            starts.push(handle.await.unwrap() - start);
        }
        starts.sort();
        assert_eq!(
            starts,
            vec![
                Duration::ZERO,
                Duration::from_millis(50),
                Duration::from_millis(100),
                Duration::from_millis(150)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn different_documents_do_not_wait_on_each_other() {
        let politeness = Politeness::new(Duration::from_millis(50));
        let start = Instant::now();
        politeness.wait_turn(&NodeId::from("a")).await;
        politeness.wait_turn(&NodeId::from("b")).await;
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_sleeps() {
        let politeness = Politeness::new(Duration::ZERO);
        let owner = NodeId::from("a");
        let start = Instant::now();
        for _ in 0..10 {
            politeness.wait_turn(&owner).await;
        }
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }
}

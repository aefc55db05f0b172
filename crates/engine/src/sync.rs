//! Deferred writes: mutating requests that failed offline, replayed when a
//! sync trigger arrives.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use waypost_core::{AppConfig, CacheDb, Error, InterceptedRequest, QueuedWrite};

use crate::fetch::{Fetcher, fetch_with_timeout};
use crate::notify::{Notification, Notifier};

/// Outcome of one replay trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReplayReport {
    pub tag: String,
    /// Ids of writes that went through and left the queue.
    pub replayed: Vec<i64>,
    /// Writes still queued under this tag.
    pub remaining: usize,
    pub notifications: Vec<Notification>,
}

impl ReplayReport {
    fn empty(tag: &str) -> Self {
        Self { tag: tag.to_string(), replayed: Vec::new(), remaining: 0, notifications: Vec::new() }
    }
}

/// Persistent FIFO of failed writes plus the replay protocol.
#[derive(Clone)]
pub struct DeferredWriteQueue {
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    notifier: Notifier,
    tag: String,
    timeout: Duration,
    replay_lock: Arc<Mutex<()>>,
}

impl DeferredWriteQueue {
    pub fn new(
        db: CacheDb, fetcher: Arc<dyn Fetcher>, notifier: Notifier, tag: impl Into<String>, timeout: Duration,
    ) -> Self {
        Self { db, fetcher, notifier, tag: tag.into(), timeout, replay_lock: Arc::new(Mutex::new(())) }
    }

    pub fn from_config(config: &AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>, notifier: Notifier) -> Self {
        Self::new(db, fetcher, notifier, config.sync_tag.clone(), config.timeout())
    }

    /// The trigger tag this queue answers to.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Persist a request snapshot for later replay.
    pub async fn enqueue(&self, request: &InterceptedRequest) -> Result<i64, Error> {
        let id = self.db.enqueue_write(&self.tag, request).await?;
        tracing::info!(id, method = %request.method, url = %request.url, tag = %self.tag, "write queued for replay");
        Ok(id)
    }

    /// Pending writes in enqueue order.
    pub async fn list_pending(&self) -> Result<Vec<QueuedWrite>, Error> {
        self.db.list_pending_writes(Some(&self.tag)).await
    }

    pub async fn remove(&self, id: i64) -> Result<bool, Error> {
        self.db.remove_write(id).await
    }

    /// Replay every pending write for `tag`, oldest first.
    ///
    /// A 2xx answer removes the write and emits a notification. Anything
    /// else leaves it queued for the next trigger. Overlapping triggers run
    /// one after the other, so a write is never sent twice by them. Tags
    /// other than this queue's are ignored.
    pub async fn replay(&self, tag: &str) -> Result<ReplayReport, Error> {
        if tag != self.tag {
            tracing::debug!(%tag, "ignoring unknown sync tag");
            return Ok(ReplayReport::empty(tag));
        }

        let _guard = self.replay_lock.lock().await;
        let pending = self.list_pending().await?;
        let mut report = ReplayReport::empty(tag);

        for write in &pending {
            if self.replay_one(write).await {
                let notification = Notification::replay_succeeded(tag);
                self.notifier.emit(notification.clone());
                report.replayed.push(write.id);
                report.notifications.push(notification);
            }
        }

        report.remaining = pending.len() - report.replayed.len();
        tracing::info!(%tag, replayed = report.replayed.len(), remaining = report.remaining, "replay finished");
        Ok(report)
    }

    /// Send one write. Returns whether the upstream accepted it; a failed
    /// removal afterwards is logged and does not change the answer.
    async fn replay_one(&self, write: &QueuedWrite) -> bool {
        let request = match write.to_request() {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(id = write.id, error = %e, "queued write cannot be rebuilt, keeping it");
                return false;
            }
        };

        match fetch_with_timeout(self.fetcher.as_ref(), &request, self.timeout).await {
            Ok(response) if response.is_success() => {
                tracing::info!(id = write.id, url = %request.url, status = response.status, "queued write replayed");
                if let Err(e) = self.db.remove_write(write.id).await {
                    tracing::error!(id = write.id, error = %e, "replayed write could not be removed from the queue");
                }
                true
            }
            Ok(response) => {
                tracing::debug!(id = write.id, status = response.status, "replay rejected, keeping write");
                false
            }
            Err(e) => {
                tracing::debug!(id = write.id, error = %e, "replay failed, keeping write");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFetcher, ok, url};
    use waypost_core::ResponseSnapshot;

    const TAG: &str = "document-generation";
    const ENDPOINT: &str = "https://us-central1-copilot.cloudfunctions.net/generate_application_http";

    async fn queue_with(fetcher: Arc<ScriptedFetcher>) -> (DeferredWriteQueue, Notifier) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let notifier = Notifier::new("/?view=results", "/");
        let queue = DeferredWriteQueue::new(db, fetcher, notifier.clone(), TAG, Duration::from_secs(3));
        (queue, notifier)
    }

    fn generate_request() -> InterceptedRequest {
        InterceptedRequest::new("POST", url(ENDPOINT))
            .with_header("content-type", "application/json")
            .with_body(r#"{"jobTitle":"Engineer"}"#)
    }

    #[tokio::test]
    async fn test_single_replay_sends_once_and_removes() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (queue, notifier) = queue_with(fetcher.clone()).await;
        let mut notifications = notifier.subscribe();

        let id = queue.enqueue(&generate_request()).await.unwrap();
        fetcher.respond(ENDPOINT, ok("done"));

        let report = queue.replay(TAG).await.unwrap();
        assert_eq!(report.replayed, vec![id]);
        assert_eq!(report.remaining, 0);
        assert_eq!(report.notifications.len(), 1);
        assert_eq!(fetcher.calls_to(ENDPOINT), 1);
        assert!(queue.list_pending().await.unwrap().is_empty());

        let notification = notifications.recv().await.unwrap();
        assert_eq!(notification.tag, TAG);
        assert_eq!(notification.actions[0].action, "view");

        let second = queue.replay(TAG).await.unwrap();
        assert!(second.replayed.is_empty());
        assert_eq!(fetcher.calls_to(ENDPOINT), 1);
    }

    #[tokio::test]
    async fn test_failed_replay_keeps_write() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (queue, _) = queue_with(fetcher.clone()).await;
        let id = queue.enqueue(&generate_request()).await.unwrap();

        let report = queue.replay(TAG).await.unwrap();
        assert!(report.replayed.is_empty());
        assert_eq!(report.remaining, 1);
        assert!(report.notifications.is_empty());

        fetcher.respond(ENDPOINT, ResponseSnapshot::new(502));
        let report = queue.replay(TAG).await.unwrap();
        assert_eq!(report.remaining, 1);

        let pending = queue.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].body.as_deref(), Some(br#"{"jobTitle":"Engineer"}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_replay_preserves_enqueue_order() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (queue, _) = queue_with(fetcher.clone()).await;
        let first = queue.enqueue(&InterceptedRequest::new("POST", url("https://app.test/api/a"))).await.unwrap();
        let second = queue.enqueue(&InterceptedRequest::new("PUT", url("https://app.test/api/b"))).await.unwrap();
        fetcher.respond("https://app.test/api/a", ResponseSnapshot::new(201));
        fetcher.respond("https://app.test/api/b", ResponseSnapshot::new(204));

        let report = queue.replay(TAG).await.unwrap();
        assert_eq!(report.replayed, vec![first, second]);
    }

    #[tokio::test]
    async fn test_unknown_tag_is_noop() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (queue, _) = queue_with(fetcher.clone()).await;
        queue.enqueue(&generate_request()).await.unwrap();
        fetcher.respond(ENDPOINT, ok("done"));

        let report = queue.replay("periodic-refresh").await.unwrap();
        assert!(report.replayed.is_empty());
        assert_eq!(fetcher.total_calls(), 0);
        assert_eq!(queue.list_pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_overlapping_triggers_send_once() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (queue, _) = queue_with(fetcher.clone()).await;
        queue.enqueue(&generate_request()).await.unwrap();
        fetcher.respond(ENDPOINT, ok("done"));

        let (a, b) = tokio::join!(queue.replay(TAG), queue.replay(TAG));
        let total = a.unwrap().replayed.len() + b.unwrap().replayed.len();
        assert_eq!(total, 1);
        assert_eq!(fetcher.calls_to(ENDPOINT), 1);
    }

    #[tokio::test]
    async fn test_delivered_write_reported_when_removal_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let db = CacheDb::open(&path).await.unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let notifier = Notifier::new("/?view=results", "/");
        let mut notifications = notifier.subscribe();
        let queue = DeferredWriteQueue::new(db, fetcher.clone(), notifier, TAG, Duration::from_secs(3));

        let first = queue.enqueue(&generate_request()).await.unwrap();
        let second = queue.enqueue(&InterceptedRequest::new("POST", url("https://app.test/api/b"))).await.unwrap();
        fetcher.respond(ENDPOINT, ok("done"));
        fetcher.respond("https://app.test/api/b", ok("done"));

        let raw = tokio_rusqlite::Connection::open(&path).await.unwrap();
        raw.call(|conn| {
            conn.execute_batch(
                "CREATE TRIGGER pin_queue BEFORE DELETE ON write_queue BEGIN SELECT RAISE(ABORT, 'pinned'); END;",
            )
        })
        .await
        .unwrap();

        let report = queue.replay(TAG).await.unwrap();
        assert_eq!(report.replayed, vec![first, second]);
        assert_eq!(report.notifications.len(), 2);
        assert_eq!(fetcher.total_calls(), 2);
        assert_eq!(notifications.recv().await.unwrap().tag, TAG);
    }

    #[tokio::test]
    async fn test_remove_by_id() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (queue, _) = queue_with(fetcher).await;
        let id = queue.enqueue(&generate_request()).await.unwrap();
        assert!(queue.remove(id).await.unwrap());
        assert!(!queue.remove(id).await.unwrap());
        assert!(queue.list_pending().await.unwrap().is_empty());
    }
}

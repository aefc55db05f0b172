//! The interception entry point wiring every component together.

use std::sync::Arc;
use tokio::sync::broadcast;
use waypost_core::http::QUEUED_HEADER;
use waypost_core::{AppConfig, CacheDb, Error, GenerationInfo, InterceptedRequest, QueuedWrite, ResponseSnapshot};

use crate::classify::{Classifier, ResourceClass};
use crate::fetch::Fetcher;
use crate::lifecycle::{ControlMessage, ControlReply, LifecycleController, LifecycleStatus};
use crate::manager::GenerationManager;
use crate::notify::{Notification, Notifier};
use crate::strategy::{ResponseSource, Served, StrategyEngine};
use crate::sync::{DeferredWriteQueue, ReplayReport};
use crate::tasks::BackgroundTasks;

/// A handled request: the response plus how it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub class: ResourceClass,
    pub source: ResponseSource,
    pub response: ResponseSnapshot,
}

impl Outcome {
    fn new(class: ResourceClass, served: Served) -> Self {
        Self { class, source: served.source, response: served.response }
    }
}

pub struct Engine {
    classifier: Classifier,
    strategies: StrategyEngine,
    manager: GenerationManager,
    queue: DeferredWriteQueue,
    lifecycle: LifecycleController,
    notifier: Notifier,
    tasks: BackgroundTasks,
}

impl Engine {
    /// Build every component from configuration over one store and one
    /// fetcher.
    pub fn from_config(config: &AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>) -> Result<Self, Error> {
        let tasks = BackgroundTasks::new();
        let notifier = Notifier::from_config(config);
        let manager = GenerationManager::from_config(config, db.clone(), fetcher.clone())?;

        Ok(Self {
            classifier: Classifier::from_config(config)?,
            strategies: StrategyEngine::from_config(config, db.clone(), fetcher.clone(), tasks.clone())?,
            queue: DeferredWriteQueue::from_config(config, db, fetcher, notifier.clone()),
            lifecycle: LifecycleController::from_config(config, manager.clone()),
            manager,
            notifier,
            tasks,
        })
    }

    /// Install and, unless told to wait, activate.
    pub async fn boot(&self) -> Result<(), Error> {
        let state = self.lifecycle.boot().await?;
        tracing::info!(version = %self.lifecycle.version(), %state, "engine booted");
        Ok(())
    }

    /// Produce the one response for an intercepted request.
    ///
    /// Until the engine is active nothing is read from or written to the
    /// cache, but an unreachable upstream still gets the class's offline
    /// answer. Mutating `api` and `document` requests that fail offline
    /// are queued for replay.
    ///
    /// # Errors
    ///
    /// Network failures the strategies do not recover from; see
    /// [`StrategyEngine::serve`].
    pub async fn handle(&self, request: &InterceptedRequest) -> Result<Outcome, Error> {
        let class = self.classifier.classify(request);

        if self.classifier.is_network_only(request) {
            tracing::debug!(url = %request.url, "network-only, passing through");
            return Ok(Outcome::new(class, self.strategies.pass_through(request).await?));
        }

        if request.is_mutating() && matches!(class, ResourceClass::Api | ResourceClass::Document) {
            return self.handle_write(request, class).await;
        }

        if !self.lifecycle.is_active() {
            tracing::debug!(url = %request.url, state = %self.lifecycle.state(), "not active, forwarding");
            return Ok(Outcome::new(class, self.strategies.forward(request, class).await?));
        }

        Ok(Outcome::new(class, self.strategies.serve(request, class).await?))
    }

    /// Send a mutating request, queueing it if the network is gone.
    async fn handle_write(&self, request: &InterceptedRequest, class: ResourceClass) -> Result<Outcome, Error> {
        let err = match self.strategies.pass_through(request).await {
            Ok(served) => return Ok(Outcome::new(class, served)),
            Err(e) if e.is_network_failure() => e,
            Err(e) => return Err(e),
        };

        tracing::warn!(method = %request.method, url = %request.url, error = %err, "write failed offline");

        let offline = match class {
            ResourceClass::Document => self.strategies.offline_document().await.response,
            _ => ResponseSnapshot::offline_api(),
        };

        let served = match self.queue.enqueue(request).await {
            Ok(id) => Served::new(offline.with_header(QUEUED_HEADER, id.to_string()), ResponseSource::Queued),
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "could not queue write");
                Served::new(offline, ResponseSource::Offline)
            }
        };

        Ok(Outcome::new(class, served))
    }

    pub async fn control(&self, message: ControlMessage) -> Result<ControlReply, Error> {
        self.lifecycle.handle_control(message).await
    }

    /// Background trigger: replay queued writes for `tag`.
    pub async fn sync(&self, tag: &str) -> Result<ReplayReport, Error> {
        self.queue.replay(tag).await
    }

    /// The trigger tag queued writes are replayed under.
    pub fn sync_tag(&self) -> &str {
        self.queue.tag()
    }

    /// URL the application should open for a notification click.
    pub fn notification_click(&self, action: Option<&str>) -> String {
        self.notifier.click_target(action).to_string()
    }

    pub fn subscribe_notifications(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    pub async fn pending_writes(&self) -> Result<Vec<QueuedWrite>, Error> {
        self.queue.list_pending().await
    }

    pub async fn generations(&self) -> Result<Vec<GenerationInfo>, Error> {
        self.manager.list().await
    }

    pub async fn status(&self) -> LifecycleStatus {
        self.lifecycle.status().await
    }

    pub fn version(&self) -> &str {
        self.lifecycle.version()
    }

    /// Wait for revalidations and background cache writes to finish.
    pub async fn wait_idle(&self) {
        self.tasks.wait_idle().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleState;
    use crate::testing::{ScriptedFetcher, ok, test_config, url};

    const GENERATE: &str = "https://us-central1-copilot.cloudfunctions.net/generate_application_http";

    fn online() -> Arc<ScriptedFetcher> {
        let fetcher = Arc::new(ScriptedFetcher::new());
        for path in ["/", "/index.html", "/app.js", "/offline.html"] {
            fetcher.respond(&format!("https://app.test{path}"), ok(path));
        }
        fetcher
    }

    async fn booted(fetcher: Arc<ScriptedFetcher>) -> Engine {
        let db = CacheDb::open_in_memory().await.unwrap();
        let engine = Engine::from_config(&test_config(), db, fetcher).unwrap();
        engine.boot().await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_requests_pass_through_before_activation() {
        let fetcher = online();
        let db = CacheDb::open_in_memory().await.unwrap();
        let engine = Engine::from_config(&test_config(), db, fetcher.clone()).unwrap();

        let outcome = engine.handle(&InterceptedRequest::get(url("https://app.test/app.js"))).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
        assert_eq!(engine.status().await.state, LifecycleState::Installing);
    }

    #[tokio::test]
    async fn test_precached_asset_served_from_cache_after_boot() {
        let fetcher = online();
        let engine = booted(fetcher.clone()).await;
        let before = fetcher.calls_to("https://app.test/app.js");

        let outcome = engine.handle(&InterceptedRequest::get(url("https://app.test/app.js"))).await.unwrap();
        assert_eq!(outcome.class, ResourceClass::StaticAsset);
        assert_eq!(outcome.source, ResponseSource::Cache);
        assert_eq!(fetcher.calls_to("https://app.test/app.js"), before);
    }

    #[tokio::test]
    async fn test_network_only_path_skips_cache() {
        let fetcher = online();
        let engine = booted(fetcher.clone()).await;
        fetcher.respond("https://app.test/api/health", ok("up"));

        let request = InterceptedRequest::get(url("https://app.test/api/health"));
        engine.handle(&request).await.unwrap();
        engine.wait_idle().await;

        assert!(engine.generations().await.unwrap().iter().all(|g| g.name != "waypost-dynamic-v2"));
    }

    #[tokio::test]
    async fn test_offline_write_is_queued_then_replayed() {
        let fetcher = online();
        let engine = booted(fetcher.clone()).await;
        let mut notifications = engine.subscribe_notifications();

        let request = InterceptedRequest::new("POST", url(GENERATE)).with_body(r#"{"company":"Acme"}"#);
        let outcome = engine.handle(&request).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Queued);
        assert_eq!(outcome.response.status, 503);

        let pending = engine.pending_writes().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(outcome.response.header(QUEUED_HEADER), Some(pending[0].id.to_string().as_str()));

        fetcher.respond(GENERATE, ok("generated"));
        let report = engine.sync("document-generation").await.unwrap();
        assert_eq!(report.replayed, vec![pending[0].id]);
        assert!(engine.pending_writes().await.unwrap().is_empty());
        assert_eq!(fetcher.calls_to(GENERATE), 2);

        let notification = notifications.recv().await.unwrap();
        assert_eq!(engine.notification_click(Some(&notification.actions[0].action)), "/?view=results");
        assert_eq!(engine.notification_click(None), "/");
    }

    #[tokio::test]
    async fn test_rejected_write_is_not_queued() {
        let fetcher = online();
        let engine = booted(fetcher.clone()).await;
        fetcher.respond(GENERATE, ResponseSnapshot::new(400));

        let outcome = engine.handle(&InterceptedRequest::new("POST", url(GENERATE))).await.unwrap();
        assert_eq!(outcome.source, ResponseSource::Network);
        assert_eq!(outcome.response.status, 400);
        assert!(engine.pending_writes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_before_activation_degrades_by_class() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let db = CacheDb::open_in_memory().await.unwrap();
        let engine = Engine::from_config(&test_config(), db, fetcher).unwrap();
        assert!(engine.boot().await.is_err());

        let api = engine.handle(&InterceptedRequest::get(url("https://app.test/api/themes"))).await.unwrap();
        assert_eq!(api.source, ResponseSource::Offline);
        assert_eq!(api.response, ResponseSnapshot::offline_api());

        let page = InterceptedRequest::get(url("https://app.test/results")).with_header("accept", "text/html");
        let document = engine.handle(&page).await.unwrap();
        assert_eq!(document.class, ResourceClass::Document);
        assert_eq!(document.response, ResponseSnapshot::offline_placeholder());

        assert!(engine.handle(&InterceptedRequest::get(url("https://app.test/app.js"))).await.is_err());
        assert!(engine.generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restart_offline_serves_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waypost.db");

        let fetcher = online();
        fetcher.respond("https://app.test/api/themes", ok("themes"));
        let engine = Engine::from_config(&test_config(), CacheDb::open(&path).await.unwrap(), fetcher).unwrap();
        engine.boot().await.unwrap();
        engine.handle(&InterceptedRequest::get(url("https://app.test/api/themes"))).await.unwrap();
        engine.wait_idle().await;
        drop(engine);

        let offline = Arc::new(ScriptedFetcher::new());
        let db = CacheDb::open(&path).await.unwrap();
        let engine = Engine::from_config(&test_config(), db, offline).unwrap();
        engine.boot().await.unwrap();
        assert_eq!(engine.status().await.state, LifecycleState::Active);

        let asset = engine.handle(&InterceptedRequest::get(url("https://app.test/app.js"))).await.unwrap();
        assert_eq!(asset.source, ResponseSource::Cache);

        let cached = engine.handle(&InterceptedRequest::get(url("https://app.test/api/themes"))).await.unwrap();
        assert_eq!(cached.source, ResponseSource::Cache);
        assert_eq!(cached.response.body, b"themes");

        let missing = engine.handle(&InterceptedRequest::get(url("https://app.test/api/other"))).await.unwrap();
        assert_eq!(missing.response, ResponseSnapshot::offline_api());

        let page = InterceptedRequest::get(url("https://app.test/results")).with_header("accept", "text/html");
        let document = engine.handle(&page).await.unwrap();
        assert_eq!(document.source, ResponseSource::Fallback);
        assert_eq!(document.response.body, b"/offline.html");
    }

    #[tokio::test]
    async fn test_offline_document_write_is_queued() {
        let engine = booted(online()).await;

        let form = InterceptedRequest::new("POST", url("https://app.test/results"))
            .with_header("accept", "text/html")
            .with_body("name=Acme");
        let outcome = engine.handle(&form).await.unwrap();
        assert_eq!(outcome.class, ResourceClass::Document);
        assert_eq!(outcome.source, ResponseSource::Queued);
        assert_eq!(outcome.response.body, b"/offline.html");
        assert!(outcome.response.header(QUEUED_HEADER).is_some());

        let pending = engine.pending_writes().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, "POST");
        assert_eq!(engine.sync_tag(), "document-generation");
    }

    #[tokio::test]
    async fn test_control_reports_version() {
        let engine = booted(online()).await;
        let reply = engine.control(ControlMessage::GetVersion).await.unwrap();
        assert_eq!(reply, ControlReply::Version { version: "v2".into() });
        assert_eq!(engine.version(), "v2");
    }
}

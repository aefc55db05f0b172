//! Serving strategies.
//!
//! [`StrategyEngine::serve`] picks a strategy from the resource class and
//! produces exactly one response, or one failure for classes that are
//! allowed to surface one. Generation names are resolved per call and
//! never held across requests.

mod cache_first;
mod network_first;
mod stale_while_revalidate;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use waypost_core::{AppConfig, CacheDb, Error, GenerationPurpose, InterceptedRequest, ResponseSnapshot, StoredEntry};

use crate::classify::ResourceClass;
use crate::fetch::{Fetcher, fetch_with_timeout, resolve};
use crate::manager::GenerationNames;
use crate::tasks::BackgroundTasks;

/// How a resource class is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    CacheFirst,
    NetworkFirst,
    StaleWhileRevalidate,
}

impl Strategy {
    pub fn for_class(class: ResourceClass) -> Self {
        match class {
            ResourceClass::StaticAsset => Strategy::CacheFirst,
            ResourceClass::Api | ResourceClass::Other => Strategy::NetworkFirst,
            ResourceClass::Document => Strategy::StaleWhileRevalidate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::CacheFirst => "cache-first",
            Strategy::NetworkFirst => "network-first",
            Strategy::StaleWhileRevalidate => "stale-while-revalidate",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    /// A cached entry for the request itself.
    Cache,
    /// The upstream, possibly after writing it to the cache.
    Network,
    /// The cached offline fallback page.
    Fallback,
    /// A synthesized offline response.
    Offline,
    /// A synthesized offline response for a write that was queued.
    Queued,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Network => "network",
            ResponseSource::Fallback => "fallback",
            ResponseSource::Offline => "offline",
            ResponseSource::Queued => "queued",
        }
    }
}

/// A response together with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub response: ResponseSnapshot,
    pub source: ResponseSource,
}

impl Served {
    pub fn new(response: ResponseSnapshot, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

/// Runs the three serving strategies against the cache store and the
/// upstream.
#[derive(Clone)]
pub struct StrategyEngine {
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    names: GenerationNames,
    timeout: Duration,
    offline_fallback: Option<Url>,
    tasks: BackgroundTasks,
}

impl StrategyEngine {
    pub fn new(
        db: CacheDb, fetcher: Arc<dyn Fetcher>, names: GenerationNames, timeout: Duration,
        offline_fallback: Option<Url>, tasks: BackgroundTasks,
    ) -> Self {
        Self { db, fetcher, names, timeout, offline_fallback, tasks }
    }

    pub fn from_config(
        config: &AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>, tasks: BackgroundTasks,
    ) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::Config(format!("origin: {e}")))?;
        let offline_fallback = config
            .offline_fallback
            .as_deref()
            .map(|path| resolve(&origin, path).map_err(|e| Error::Config(format!("offline_fallback: {e}"))))
            .transpose()?;

        Ok(Self::new(db, fetcher, GenerationNames::from_config(config), config.timeout(), offline_fallback, tasks))
    }

    /// Serve a request of the given class.
    ///
    /// Non-`GET` requests never touch the cache; see [`Self::forward`].
    ///
    /// # Errors
    ///
    /// Only network failures that no strategy can recover from are
    /// returned: a cache-first miss for a non-document, or a network-first
    /// failure for a class other than `api` with nothing cached.
    pub async fn serve(&self, request: &InterceptedRequest, class: ResourceClass) -> Result<Served, Error> {
        if !request.is_get() {
            return self.forward(request, class).await;
        }

        let strategy = Strategy::for_class(class);
        tracing::debug!(method = %request.method, url = %request.url, %class, %strategy, "serving request");

        match strategy {
            Strategy::CacheFirst => self.cache_first(request).await,
            Strategy::NetworkFirst => self.network_first(request, class).await,
            Strategy::StaleWhileRevalidate => self.stale_while_revalidate(request).await,
        }
    }

    /// Fetch without reading or writing the cache.
    pub async fn pass_through(&self, request: &InterceptedRequest) -> Result<Served, Error> {
        let response = self.fetch(request).await?;
        Ok(Served::new(response, ResponseSource::Network))
    }

    /// Fetch without reading or writing the cache, answering a network
    /// failure the way the class is owed: the offline JSON for `api`, the
    /// offline page or placeholder for `document`. Other classes get the
    /// failure.
    pub async fn forward(&self, request: &InterceptedRequest, class: ResourceClass) -> Result<Served, Error> {
        let err = match self.pass_through(request).await {
            Ok(served) => return Ok(served),
            Err(e) if e.is_network_failure() => e,
            Err(e) => return Err(e),
        };

        match class {
            ResourceClass::Api => {
                tracing::warn!(method = %request.method, url = %request.url, error = %err, "api unreachable");
                Ok(Served::new(ResponseSnapshot::offline_api(), ResponseSource::Offline))
            }
            ResourceClass::Document => {
                tracing::warn!(method = %request.method, url = %request.url, error = %err, "document unreachable");
                Ok(self.offline_document().await)
            }
            ResourceClass::StaticAsset | ResourceClass::Other => Err(err),
        }
    }

    /// The cached offline fallback page, else the built-in placeholder.
    pub async fn offline_document(&self) -> Served {
        match self.offline_page().await {
            Some(page) => Served::new(page, ResponseSource::Fallback),
            None => Served::new(ResponseSnapshot::offline_placeholder(), ResponseSource::Offline),
        }
    }

    pub fn names(&self) -> &GenerationNames {
        &self.names
    }

    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseSnapshot, Error> {
        fetch_with_timeout(self.fetcher.as_ref(), request, self.timeout).await
    }

    /// Look a key up in the given generations. Store errors count as a
    /// miss.
    async fn lookup(&self, generations: &[String], key: &str) -> Option<ResponseSnapshot> {
        match self.db.match_entry(generations, key).await {
            Ok(Some((generation, response))) => {
                tracing::debug!(%generation, "cache hit");
                Some(response)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// The cached offline fallback page, from any current generation.
    async fn offline_page(&self) -> Option<ResponseSnapshot> {
        let url = self.offline_fallback.clone()?;
        let key = InterceptedRequest::get(url).cache_key();
        self.lookup(&self.names.current(), &key).await
    }

    /// Write a 200 response into a generation. Failures are logged only.
    async fn persist(
        &self, generation: &str, purpose: GenerationPurpose, request: &InterceptedRequest, response: &ResponseSnapshot,
    ) {
        if !response.is_cacheable() {
            return;
        }

        let entry = StoredEntry::new(&request.method, request.url.as_str(), response.clone());
        if let Err(e) = self.db.put_entry(generation, purpose, entry).await {
            tracing::warn!(%generation, url = %request.url, error = %e, "cache write failed");
        }
    }

    /// [`Self::persist`] in a detached task.
    fn persist_detached(&self, purpose: GenerationPurpose, request: &InterceptedRequest, response: &ResponseSnapshot) {
        if !response.is_cacheable() {
            return;
        }

        let engine = self.clone();
        let request = request.clone();
        let response = response.clone();
        self.tasks.spawn("cache-write", async move {
            let generation = match purpose {
                GenerationPurpose::Static => engine.names.static_name().to_string(),
                GenerationPurpose::Dynamic => engine.names.dynamic_name().to_string(),
            };
            engine.persist(&generation, purpose, &request, &response).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFetcher, ok, test_config, url};

    pub(super) struct Harness {
        pub db: CacheDb,
        pub fetcher: Arc<ScriptedFetcher>,
        pub tasks: BackgroundTasks,
        pub engine: StrategyEngine,
    }

    pub(super) async fn harness() -> Harness {
        let db = CacheDb::open_in_memory().await.unwrap();
        let fetcher = Arc::new(ScriptedFetcher::new());
        let tasks = BackgroundTasks::new();
        let engine = StrategyEngine::from_config(&test_config(), db.clone(), fetcher.clone(), tasks.clone()).unwrap();
        Harness { db, fetcher, tasks, engine }
    }

    #[test]
    fn test_strategy_selection() {
        assert_eq!(Strategy::for_class(ResourceClass::StaticAsset), Strategy::CacheFirst);
        assert_eq!(Strategy::for_class(ResourceClass::Api), Strategy::NetworkFirst);
        assert_eq!(Strategy::for_class(ResourceClass::Document), Strategy::StaleWhileRevalidate);
        assert_eq!(Strategy::for_class(ResourceClass::Other), Strategy::NetworkFirst);
    }

    #[tokio::test]
    async fn test_non_get_bypasses_cache() {
        let h = harness().await;
        let request = InterceptedRequest::new("POST", url("https://app.test/api/generate")).with_body("{}");
        let key = request.cache_key();
        h.db.put_entry(
            h.engine.names().dynamic_name(),
            GenerationPurpose::Dynamic,
            StoredEntry::new("POST", "https://app.test/api/generate", ok("stale")),
        )
        .await
        .unwrap();
        h.fetcher.respond("https://app.test/api/generate", ok("fresh"));

        let served = h.engine.serve(&request, ResourceClass::Api).await.unwrap();
        assert_eq!(served.source, ResponseSource::Network);
        assert_eq!(served.response.body, b"fresh");

        h.tasks.wait_idle().await;
        let cached = h.db.get_entry(h.engine.names().dynamic_name(), &key).await.unwrap().unwrap();
        assert_eq!(cached.body, b"stale");
    }

    #[tokio::test]
    async fn test_non_get_failure_propagates_for_other() {
        let h = harness().await;
        let request = InterceptedRequest::new("POST", url("https://elsewhere.test/collect"));
        let err = h.engine.serve(&request, ResourceClass::Other).await.unwrap_err();
        assert!(err.is_network_failure());
    }

    #[tokio::test]
    async fn test_head_api_offline_gets_offline_json() {
        let h = harness().await;
        let request = InterceptedRequest::new("HEAD", url("https://app.test/api/themes"));
        let served = h.engine.serve(&request, ResourceClass::Api).await.unwrap();
        assert_eq!(served.source, ResponseSource::Offline);
        assert_eq!(served.response, ResponseSnapshot::offline_api());
    }

    #[tokio::test]
    async fn test_non_get_document_offline_gets_placeholder() {
        let h = harness().await;
        let request = InterceptedRequest::new("OPTIONS", url("https://app.test/results"));
        let served = h.engine.serve(&request, ResourceClass::Document).await.unwrap();
        assert_eq!(served.source, ResponseSource::Offline);
        assert_eq!(served.response.status, 503);
        assert_eq!(served.response.header("content-type"), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_response_source_names() {
        assert_eq!(ResponseSource::Fallback.as_str(), "fallback");
        assert_eq!(serde_json::to_string(&ResponseSource::Queued).unwrap(), "\"queued\"");
    }
}

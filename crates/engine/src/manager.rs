//! Cache generation lifecycle: install-time population and
//! activation-time cleanup.
//!
//! This is the only component allowed to create or delete whole
//! generations (apart from the lazy creation of the current dynamic
//! generation on its first write).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use url::Url;
use waypost_core::{AppConfig, CacheDb, Error, GenerationInfo, GenerationPurpose, InterceptedRequest, StoredEntry};

use crate::fetch::{Fetcher, fetch_with_timeout, resolve};

/// Names of the current generations and the prefix marking ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationNames {
    prefix: String,
    static_name: String,
    dynamic_name: String,
}

impl GenerationNames {
    /// Explicit names. Both should start with `{prefix}static-` and
    /// `{prefix}dynamic-` respectively for ownership checks to find them.
    pub fn new(prefix: impl Into<String>, static_name: impl Into<String>, dynamic_name: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), static_name: static_name.into(), dynamic_name: dynamic_name.into() }
    }

    /// `{prefix}static-{version}` / `{prefix}dynamic-{version}`.
    pub fn for_version(prefix: &str, version: &str) -> Self {
        Self::new(prefix, format!("{prefix}static-{version}"), format!("{prefix}dynamic-{version}"))
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.cache_prefix.clone(), config.static_cache_name(), config.dynamic_cache_name())
    }

    pub fn static_name(&self) -> &str {
        &self.static_name
    }

    pub fn dynamic_name(&self) -> &str {
        &self.dynamic_name
    }

    /// Current generations in lookup order.
    pub fn current(&self) -> Vec<String> {
        vec![self.static_name.clone(), self.dynamic_name.clone()]
    }

    pub fn is_current(&self, name: &str) -> bool {
        name == self.static_name || name == self.dynamic_name
    }

    /// Whether a generation was created by this engine (any version).
    pub fn is_owned(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str())
            .is_some_and(|rest| rest.starts_with("static-") || rest.starts_with("dynamic-"))
    }
}

/// Result of a successful install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub generation: String,
    pub assets: usize,
}

/// Creates the static generation on install and purges stale generations
/// on activation.
#[derive(Clone)]
pub struct GenerationManager {
    db: CacheDb,
    fetcher: Arc<dyn Fetcher>,
    names: GenerationNames,
    precache: Vec<Url>,
    timeout: Duration,
    concurrency: usize,
}

impl GenerationManager {
    pub fn new(
        db: CacheDb, fetcher: Arc<dyn Fetcher>, names: GenerationNames, precache: Vec<Url>, timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self { db, fetcher, names, precache, timeout, concurrency: concurrency.max(1) }
    }

    /// Build from configuration, resolving manifest entries against the
    /// origin.
    pub fn from_config(config: &AppConfig, db: CacheDb, fetcher: Arc<dyn Fetcher>) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::Config(format!("origin: {e}")))?;
        let precache = config
            .precache
            .iter()
            .map(|entry| resolve(&origin, entry).map_err(|e| Error::Config(format!("precache entry {entry:?}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(
            db,
            fetcher,
            GenerationNames::from_config(config),
            precache,
            config.timeout(),
            config.install_concurrency,
        ))
    }

    pub fn names(&self) -> &GenerationNames {
        &self.names
    }

    /// Fetch every precache asset and commit them as the static generation.
    ///
    /// All-or-nothing: if any asset fails to fetch or answers anything but
    /// 200, nothing is written and the static generation is left as it was.
    ///
    /// # Errors
    ///
    /// Returns `Error::InstallFailed` naming the first failing asset.
    pub async fn install(&self) -> Result<InstallReport, Error> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set = JoinSet::new();

        for (index, url) in self.precache.iter().cloned().enumerate() {
            let semaphore = semaphore.clone();
            let fetcher = self.fetcher.clone();
            let timeout = self.timeout;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let request = InterceptedRequest::get(url);
                let result = fetch_with_timeout(fetcher.as_ref(), &request, timeout).await;
                (index, request, result)
            });
        }

        let mut fetched = Vec::with_capacity(self.precache.len());

        while let Some(joined) = join_set.join_next().await {
            let (index, request, result) =
                joined.map_err(|e| Error::InvalidState(format!("install task failed: {e}")))?;

            let reason = match result {
                Ok(response) if response.is_cacheable() => {
                    fetched.push((index, StoredEntry::new(&request.method, request.url.as_str(), response)));
                    continue;
                }
                Ok(response) => format!("status {}", response.status),
                Err(e) => e.to_string(),
            };

            join_set.shutdown().await;
            return Err(Error::InstallFailed { asset: request.url.to_string(), reason });
        }

        fetched.sort_by_key(|(index, _)| *index);
        let entries: Vec<StoredEntry> = fetched.into_iter().map(|(_, entry)| entry).collect();
        let assets = entries.len();

        self.db
            .commit_generation(&self.names.static_name, GenerationPurpose::Static, entries)
            .await?;

        tracing::info!(generation = %self.names.static_name, assets, "static generation populated");

        Ok(InstallReport { generation: self.names.static_name.clone(), assets })
    }

    /// Whether the static generation for this version is already in the
    /// store. Install commits it in one transaction, so its presence means
    /// a complete install.
    pub async fn is_installed(&self) -> Result<bool, Error> {
        self.db.has_generation(&self.names.static_name).await
    }

    /// Delete every owned generation that is not current.
    ///
    /// Idempotent: a second call finds nothing to delete. Generations from
    /// other engines sharing the store are never touched.
    pub async fn activate(&self) -> Result<Vec<String>, Error> {
        let mut deleted = Vec::new();

        for generation in self.db.list_generations().await? {
            if !self.names.is_owned(&generation.name) || self.names.is_current(&generation.name) {
                continue;
            }

            if self.db.delete_generation(&generation.name).await? {
                tracing::info!(generation = %generation.name, "deleted stale cache generation");
                deleted.push(generation.name);
            }
        }

        Ok(deleted)
    }

    /// Inventory of every generation in the store.
    pub async fn list(&self) -> Result<Vec<GenerationInfo>, Error> {
        self.db.list_generations().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedFetcher, ok, test_config, url};
    use waypost_core::ResponseSnapshot;

    async fn manager_with(fetcher: Arc<ScriptedFetcher>) -> (CacheDb, GenerationManager) {
        let db = CacheDb::open_in_memory().await.unwrap();
        let manager = GenerationManager::from_config(&test_config(), db.clone(), fetcher).unwrap();
        (db, manager)
    }

    #[test]
    fn test_generation_names_ownership() {
        let names = GenerationNames::for_version("waypost-", "v2");
        assert_eq!(names.static_name(), "waypost-static-v2");
        assert_eq!(names.dynamic_name(), "waypost-dynamic-v2");
        assert!(names.is_owned("waypost-static-v1"));
        assert!(names.is_owned("waypost-dynamic-v1"));
        assert!(!names.is_owned("waypost-uploads"));
        assert!(!names.is_owned("other-app-static-v1"));
        assert!(names.is_current("waypost-static-v2"));
        assert!(!names.is_current("waypost-static-v1"));
    }

    #[tokio::test]
    async fn test_install_populates_static_generation() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        for path in ["/", "/index.html", "/app.js", "/offline.html"] {
            fetcher.respond(&format!("https://app.test{path}"), ok(path));
        }
        let (db, manager) = manager_with(fetcher.clone()).await;

        let report = manager.install().await.unwrap();
        assert_eq!(report.generation, "waypost-static-v2");
        assert_eq!(report.assets, 4);
        assert_eq!(db.count_entries("waypost-static-v2").await.unwrap(), 4);
        assert!(manager.is_installed().await.unwrap());

        let key = InterceptedRequest::get(url("https://app.test/app.js")).cache_key();
        let cached = db.get_entry("waypost-static-v2", &key).await.unwrap().unwrap();
        assert_eq!(cached.body, b"/app.js");
    }

    #[tokio::test]
    async fn test_install_fails_when_one_asset_unreachable() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("https://app.test/", ok("root"));
        fetcher.respond("https://app.test/index.html", ok("index"));
        fetcher.fail("https://app.test/app.js");

        let db = CacheDb::open_in_memory().await.unwrap();
        let config = AppConfig { precache: vec!["/".into(), "/index.html".into(), "/app.js".into()], ..test_config() };
        let manager = GenerationManager::from_config(&config, db.clone(), fetcher).unwrap();

        let err = manager.install().await.unwrap_err();
        assert!(matches!(&err, Error::InstallFailed { asset, .. } if asset == "https://app.test/app.js"));
        assert!(!db.has_generation("waypost-static-v2").await.unwrap());
        assert!(db.list_generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_install_rejects_non_200_asset() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond("https://app.test/", ok("root"));
        fetcher.respond("https://app.test/index.html", ok("index"));
        fetcher.respond("https://app.test/app.js", ResponseSnapshot::new(404));
        fetcher.respond("https://app.test/offline.html", ok("offline"));
        let (db, manager) = manager_with(fetcher).await;

        let err = manager.install().await.unwrap_err();
        assert!(err.to_string().contains("status 404"));
        assert!(!db.has_generation("waypost-static-v2").await.unwrap());
    }

    #[tokio::test]
    async fn test_activate_deletes_only_stale_owned_generations() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let db = CacheDb::open_in_memory().await.unwrap();
        let names = GenerationNames::new("", "static-v2", "dynamic-v2");
        let manager = GenerationManager::new(db.clone(), fetcher, names, Vec::new(), Duration::from_secs(1), 1);

        db.open_generation("static-v1", GenerationPurpose::Static).await.unwrap();
        db.open_generation("static-v2", GenerationPurpose::Static).await.unwrap();

        let deleted = manager.activate().await.unwrap();
        assert_eq!(deleted, vec!["static-v1".to_string()]);

        let remaining: Vec<String> = db.list_generations().await.unwrap().into_iter().map(|g| g.name).collect();
        assert_eq!(remaining, vec!["static-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_activate_twice_is_idempotent() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        let (db, manager) = manager_with(fetcher).await;

        for name in ["waypost-static-v1", "waypost-static-v2"] {
            db.open_generation(name, GenerationPurpose::Static).await.unwrap();
        }
        for name in ["waypost-dynamic-v1", "waypost-dynamic-v2"] {
            db.open_generation(name, GenerationPurpose::Dynamic).await.unwrap();
        }
        db.open_generation("another-origin-assets", GenerationPurpose::Static).await.unwrap();

        let first = manager.activate().await.unwrap();
        assert_eq!(first.len(), 2);
        let second = manager.activate().await.unwrap();
        assert!(second.is_empty());

        let mut remaining: Vec<String> = db.list_generations().await.unwrap().into_iter().map(|g| g.name).collect();
        remaining.sort();
        assert_eq!(
            remaining,
            vec![
                "another-origin-assets".to_string(),
                "waypost-dynamic-v2".to_string(),
                "waypost-static-v2".to_string()
            ]
        );
    }
}

use waypost_core::{Error, GenerationPurpose, InterceptedRequest, ResponseSnapshot};

use super::{ResponseSource, Served, StrategyEngine};
use crate::classify::ResourceClass;

impl StrategyEngine {
    /// Network first, cache on failure.
    ///
    /// Upstream answers of any status are returned as they are. Only a 200
    /// for an `api` request is copied into the dynamic generation, and that
    /// copy is written in the background.
    pub(super) async fn network_first(
        &self, request: &InterceptedRequest, class: ResourceClass,
    ) -> Result<Served, Error> {
        let err = match self.fetch(request).await {
            Ok(response) => {
                if class == ResourceClass::Api {
                    self.persist_detached(GenerationPurpose::Dynamic, request, &response);
                }
                return Ok(Served::new(response, ResponseSource::Network));
            }
            Err(e) => e,
        };

        if let Some(response) = self.lookup(&self.names.current(), &request.cache_key()).await {
            tracing::warn!(url = %request.url, error = %err, "network failed, serving cached copy");
            return Ok(Served::new(response, ResponseSource::Cache));
        }

        if class == ResourceClass::Api {
            tracing::warn!(url = %request.url, error = %err, "network failed, nothing cached");
            return Ok(Served::new(ResponseSnapshot::offline_api(), ResponseSource::Offline));
        }

        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::harness;
    use super::*;
    use crate::testing::{ok, url};
    use waypost_core::StoredEntry;

    #[tokio::test]
    async fn test_api_success_is_stored_byte_identical() {
        let h = harness().await;
        let body = br#"{"success":true,"themes":["modern","classic"]}"#.to_vec();
        h.fetcher.respond(
            "https://app.test/api/themes",
            ResponseSnapshot::new(200).with_header("content-type", "application/json").with_body(body.clone()),
        );

        let request = InterceptedRequest::get(url("https://app.test/api/themes"));
        let served = h.engine.serve(&request, ResourceClass::Api).await.unwrap();
        assert_eq!(served.source, ResponseSource::Network);

        h.tasks.wait_idle().await;
        let cached = h.db.get_entry("waypost-dynamic-v2", &request.cache_key()).await.unwrap().unwrap();
        assert_eq!(cached.body, served.response.body);
        assert_eq!(cached.body, body);
    }

    #[tokio::test]
    async fn test_api_failure_without_cache_is_offline_json() {
        let h = harness().await;
        let request = InterceptedRequest::get(url("https://us-central1-copilot.cloudfunctions.net/generate"));

        let served = h.engine.serve(&request, ResourceClass::Api).await.unwrap();
        assert_eq!(served.source, ResponseSource::Offline);
        assert_eq!(served.response.status, 503);

        let body: serde_json::Value = serde_json::from_slice(&served.response.body).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "success": false,
                "error": "Offline - please check your internet connection",
                "offline": true
            })
        );
    }

    #[tokio::test]
    async fn test_api_failure_serves_cached_copy() {
        let h = harness().await;
        h.db.put_entry(
            "waypost-dynamic-v2",
            GenerationPurpose::Dynamic,
            StoredEntry::new("GET", "https://app.test/api/themes", ok("cached themes")),
        )
        .await
        .unwrap();

        let request = InterceptedRequest::get(url("https://app.test/api/themes"));
        let served = h.engine.serve(&request, ResourceClass::Api).await.unwrap();
        assert_eq!(served.source, ResponseSource::Cache);
        assert_eq!(served.response.body, b"cached themes");
    }

    #[tokio::test]
    async fn test_server_error_is_returned_uncached() {
        let h = harness().await;
        h.fetcher.respond("https://app.test/api/themes", ResponseSnapshot::new(500).with_body("boom"));

        let request = InterceptedRequest::get(url("https://app.test/api/themes"));
        let served = h.engine.serve(&request, ResourceClass::Api).await.unwrap();
        assert_eq!(served.response.status, 500);

        h.tasks.wait_idle().await;
        assert!(h.db.get_entry("waypost-dynamic-v2", &request.cache_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_other_success_is_not_stored() {
        let h = harness().await;
        h.fetcher.respond("https://app.test/feed.xml", ok("<rss/>"));

        let request = InterceptedRequest::get(url("https://app.test/feed.xml"));
        h.engine.serve(&request, ResourceClass::Other).await.unwrap();

        h.tasks.wait_idle().await;
        assert_eq!(h.db.count_entries("waypost-dynamic-v2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_other_failure_without_cache_propagates() {
        let h = harness().await;
        let request = InterceptedRequest::get(url("https://app.test/feed.xml"));
        let err = h.engine.serve(&request, ResourceClass::Other).await.unwrap_err();
        assert!(matches!(err, Error::Network(_)));
    }
}

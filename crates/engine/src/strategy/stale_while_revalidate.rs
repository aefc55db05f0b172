use waypost_core::{Error, GenerationPurpose, InterceptedRequest};

use super::{ResponseSource, Served, StrategyEngine};

impl StrategyEngine {
    /// Serve the cached copy now and refresh it in the background. On a
    /// miss, wait for the network and fall back to an offline page.
    ///
    /// Never fails: a request with nothing cached and no network gets the
    /// offline fallback page or the built-in placeholder.
    pub(super) async fn stale_while_revalidate(&self, request: &InterceptedRequest) -> Result<Served, Error> {
        let key = request.cache_key();

        if let Some(response) = self.lookup(&self.names.current(), &key).await {
            self.revalidate(request);
            return Ok(Served::new(response, ResponseSource::Cache));
        }

        match self.fetch(request).await {
            Ok(response) => {
                let dynamic = self.names.dynamic_name().to_string();
                self.persist(&dynamic, GenerationPurpose::Dynamic, request, &response).await;
                Ok(Served::new(response, ResponseSource::Network))
            }
            Err(e) => {
                tracing::warn!(url = %request.url, error = %e, "document unavailable offline");
                Ok(self.offline_document().await)
            }
        }
    }

    fn revalidate(&self, request: &InterceptedRequest) {
        let engine = self.clone();
        let request = request.clone();

        self.tasks.spawn("revalidate", async move {
            match engine.fetch(&request).await {
                Ok(response) => {
                    let dynamic = engine.names.dynamic_name().to_string();
                    engine.persist(&dynamic, GenerationPurpose::Dynamic, &request, &response).await;
                }
                Err(e) => tracing::debug!(url = %request.url, error = %e, "revalidation failed"),
            }
        });
    }
}

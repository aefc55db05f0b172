use waypost_core::{Error, GenerationPurpose, InterceptedRequest};

use super::{ResponseSource, Served, StrategyEngine};

impl StrategyEngine {
    /// Static generation first; the network only on a miss.
    pub(super) async fn cache_first(&self, request: &InterceptedRequest) -> Result<Served, Error> {
        let key = request.cache_key();
        let static_name = self.names.static_name().to_string();

        if let Some(response) = self.lookup(std::slice::from_ref(&static_name), &key).await {
            return Ok(Served::new(response, ResponseSource::Cache));
        }

        tracing::debug!(url = %request.url, "static cache miss");

        match self.fetch(request).await {
            Ok(response) => {
                self.persist(&static_name, GenerationPurpose::Static, request, &response).await;
                Ok(Served::new(response, ResponseSource::Network))
            }
            Err(e) if request.is_navigation() => match self.offline_page().await {
                Some(page) => {
                    tracing::warn!(url = %request.url, error = %e, "serving offline fallback page");
                    Ok(Served::new(page, ResponseSource::Fallback))
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

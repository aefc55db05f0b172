//! Test doubles shared by the engine's unit tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;
use waypost_core::{AppConfig, Error, InterceptedRequest, ResponseSnapshot};

use crate::fetch::Fetcher;

#[derive(Clone)]
enum Route {
    Respond(ResponseSnapshot),
    Delay(Duration, ResponseSnapshot),
    Fail,
}

/// Fetcher answering from a fixed routing table and recording every call.
///
/// Unrouted URLs fail like an unreachable host.
#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(&self, url: &str, response: ResponseSnapshot) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Respond(response));
    }

    pub(crate) fn delay(&self, url: &str, latency: Duration, response: ResponseSnapshot) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Delay(latency, response));
    }

    pub(crate) fn fail(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
    }

    pub(crate) fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, u)| u == url).count()
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseSnapshot, Error> {
        let url = request.url.to_string();
        self.calls.lock().unwrap().push((request.method.clone(), url.clone()));
        let route = self.routes.lock().unwrap().get(&url).cloned();

        match route {
            Some(Route::Respond(response)) => Ok(response),
            Some(Route::Delay(latency, response)) => {
                tokio::time::sleep(latency).await;
                Ok(response)
            }
            Some(Route::Fail) | None => Err(Error::Network(format!("unreachable: {url}"))),
        }
    }
}

pub(crate) fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub(crate) fn ok(body: &str) -> ResponseSnapshot {
    ResponseSnapshot::new(200).with_header("content-type", "text/plain").with_body(body.as_bytes().to_vec())
}

/// Configuration rooted at `https://app.test` with version `v2`.
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        engine_version: "v2".into(),
        origin: "https://app.test".into(),
        timeout_ms: 3000,
        precache: vec!["/".into(), "/index.html".into(), "/app.js".into(), "/offline.html".into()],
        api_hosts: vec!["cloudfunctions.net".into()],
        ..Default::default()
    }
}

//! Request and response values that cross the interception boundary.
//!
//! These are deliberately plain data: the store persists them, the engine
//! decides on them, and the fetcher turns them into real network calls.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::cache::hash::compute_cache_key;

/// Methods whose failed requests are queued for replay.
pub const MUTATING_METHODS: &[&str] = &["POST", "PUT", "PATCH", "DELETE"];

/// Message carried by the synthesized offline API response.
pub const OFFLINE_ERROR_MESSAGE: &str = "Offline - please check your internet connection";

/// Header set on the offline response of a request that was queued.
pub const QUEUED_HEADER: &str = "x-waypost-queued";

const OFFLINE_PLACEHOLDER_HTML: &str = "<!DOCTYPE html>\
<html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
<body><h1>You are offline</h1><p>Please check your internet connection and try again.</p></body></html>";

/// Declared destination of a request, as reported by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Document,
    Iframe,
    Script,
    Style,
    Image,
    Font,
    Manifest,
    Worker,
    #[default]
    #[serde(other)]
    Empty,
}

impl Destination {
    /// Whether the destination is a page navigation.
    pub fn is_navigation(self) -> bool {
        matches!(self, Destination::Document | Destination::Iframe)
    }
}

/// An outgoing request issued by a page under the engine's scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub destination: Destination,
}

impl InterceptedRequest {
    /// Build a request with an upper-cased method and no headers or body.
    pub fn new(method: &str, url: Url) -> Self {
        Self { method: method.to_ascii_uppercase(), url, headers: Vec::new(), body: None, destination: Destination::Empty }
    }

    /// Shorthand for a plain `GET`.
    pub fn get(url: Url) -> Self {
        Self::new("GET", url)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn is_mutating(&self) -> bool {
        MUTATING_METHODS.contains(&self.method.as_str())
    }

    /// Whether the `Accept` header asks for HTML.
    pub fn accepts_html(&self) -> bool {
        self.header("accept").is_some_and(|accept| accept.contains("text/html"))
    }

    /// Whether this request loads a page rather than a subresource.
    pub fn is_navigation(&self) -> bool {
        self.destination.is_navigation() || self.accepts_html()
    }

    /// Cache identity: method plus URL without fragment. Headers never
    /// participate, so volatile headers cannot split entries.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        compute_cache_key(&self.method, url.as_str())
    }
}

/// A complete response: status, headers and the full body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl ResponseSnapshot {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Vec::new(), body: Vec::new() }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// A JSON response with the matching content type.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header("content-type", "application/json")
            .with_body(value.to_string())
    }

    /// The structured 503 returned for API calls that have neither network
    /// nor a cached copy.
    pub fn offline_api() -> Self {
        Self::json(
            503,
            &serde_json::json!({
                "success": false,
                "error": OFFLINE_ERROR_MESSAGE,
                "offline": true,
            }),
        )
    }

    /// The minimal page returned for documents that cannot be loaded.
    pub fn offline_placeholder() -> Self {
        Self::new(503)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(OFFLINE_PLACEHOLDER_HTML)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Only a plain 200 may be written to the cache.
    pub fn is_cacheable(&self) -> bool {
        self.status == 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

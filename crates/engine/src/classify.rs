//! Request classification.
//!
//! Maps every request to a [`ResourceClass`] from its URL shape and the
//! configured manifests. Rules are checked in priority order and the first
//! match wins, so a CDN URL that also looks like API traffic stays a static
//! asset.

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use url::Url;
use waypost_core::{AppConfig, Error, InterceptedRequest};

use crate::fetch::{host_matches, resolve};

const STATIC_EXTENSIONS: &str = r"(?i)\.(js|css|png|jpe?g|gif|svg|ico|woff2?|ttf|eot|webp)$";

/// What kind of resource a request is after.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    StaticAsset,
    Api,
    Document,
    Other,
}

impl ResourceClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::StaticAsset => "static-asset",
            ResourceClass::Api => "api",
            ResourceClass::Document => "document",
            ResourceClass::Other => "other",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compiled classification rules.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: Url,
    static_extensions: Regex,
    static_manifest: HashSet<String>,
    static_hosts: Vec<String>,
    api_path_prefix: String,
    api_hosts: Vec<String>,
    dynamic_patterns: Vec<Regex>,
    network_only: Vec<NetworkOnly>,
}

#[derive(Debug, Clone)]
enum NetworkOnly {
    /// Same-origin path prefix.
    Path(String),
    /// Absolute URL prefix.
    Url(String),
}

impl Classifier {
    /// Compile the rules from configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an unparsable origin, manifest entry, or
    /// dynamic URL pattern.
    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let origin = Url::parse(&config.origin).map_err(|e| Error::Config(format!("origin: {e}")))?;

        let static_manifest = config
            .precache
            .iter()
            .map(|entry| {
                resolve(&origin, entry)
                    .map(|url| url.to_string())
                    .map_err(|e| Error::Config(format!("precache entry {entry:?}: {e}")))
            })
            .collect::<Result<HashSet<_>, _>>()?;

        let dynamic_patterns = config
            .dynamic_patterns
            .iter()
            .map(|pattern| Regex::new(pattern).map_err(|e| Error::Config(format!("dynamic pattern {pattern:?}: {e}"))))
            .collect::<Result<Vec<_>, _>>()?;

        let network_only = config
            .network_only
            .iter()
            .map(|entry| {
                if entry.contains("://") { NetworkOnly::Url(entry.clone()) } else { NetworkOnly::Path(entry.clone()) }
            })
            .collect();

        Ok(Self {
            origin,
            static_extensions: Regex::new(STATIC_EXTENSIONS).map_err(|e| Error::Config(e.to_string()))?,
            static_manifest,
            static_hosts: config.static_hosts.clone(),
            api_path_prefix: config.api_path_prefix.clone(),
            api_hosts: config.api_hosts.clone(),
            dynamic_patterns,
            network_only,
        })
    }

    /// Classify a request. Pure and total.
    pub fn classify(&self, request: &InterceptedRequest) -> ResourceClass {
        let url = &request.url;

        if self.is_static_asset(url) {
            ResourceClass::StaticAsset
        } else if self.is_api(url) {
            ResourceClass::Api
        } else if request.is_navigation() {
            ResourceClass::Document
        } else {
            ResourceClass::Other
        }
    }

    /// Whether the request must always go to the network, bypassing every
    /// cache read and write.
    pub fn is_network_only(&self, request: &InterceptedRequest) -> bool {
        let url = request.url.as_str();
        self.network_only.iter().any(|rule| match rule {
            NetworkOnly::Path(prefix) => self.is_same_origin(&request.url) && request.url.path().starts_with(prefix),
            NetworkOnly::Url(prefix) => url.starts_with(prefix),
        })
    }

    /// Whether the URL is on the configured origin.
    pub fn is_same_origin(&self, url: &Url) -> bool {
        url.origin() == self.origin.origin()
    }

    fn is_static_asset(&self, url: &Url) -> bool {
        if self.static_extensions.is_match(url.path()) {
            return true;
        }

        let mut without_fragment = url.clone();
        without_fragment.set_fragment(None);
        if self.static_manifest.contains(without_fragment.as_str()) {
            return true;
        }

        url.host_str()
            .is_some_and(|host| self.static_hosts.iter().any(|h| host_matches(host, h)))
    }

    fn is_api(&self, url: &Url) -> bool {
        if self.is_same_origin(url) && url.path().starts_with(&self.api_path_prefix) {
            return true;
        }

        if url.host_str().is_some_and(|host| self.api_hosts.iter().any(|h| host_matches(host, h))) {
            return true;
        }

        self.dynamic_patterns.iter().any(|pattern| pattern.is_match(url.as_str()))
    }
}

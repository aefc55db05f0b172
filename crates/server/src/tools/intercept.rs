//! intercept tool implementation.
//!
//! Hands one outgoing page request to the engine and returns the single
//! response it produced. Bodies travel as UTF-8 text when possible and as
//! base64 otherwise.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use rmcp::{ErrorData as McpError, model::CallToolResult};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use waypost_core::{Destination, Error, InterceptedRequest};
use waypost_engine::fetch::canonicalize;
use waypost_engine::{Engine, Outcome, ResourceClass, ResponseSource};

use crate::error::ToolError;
use crate::tools::json_result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Input parameters for the intercept tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InterceptParams {
    /// HTTP method (default: GET).
    #[serde(default = "default_method")]
    pub method: String,

    /// Absolute request URL.
    pub url: String,

    #[serde(default)]
    pub headers: Vec<Header>,

    /// Request body as text.
    #[serde(default)]
    pub body: Option<String>,

    /// Request body as base64, for binary payloads.
    #[serde(default)]
    pub body_base64: Option<String>,

    /// Declared destination ("document", "script", "image", ...).
    #[serde(default)]
    pub destination: Destination,
}

fn default_method() -> String {
    "GET".into()
}

/// Output structure for the intercept tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InterceptOutput {
    pub status: u16,
    pub headers: Vec<Header>,
    /// Resource class the request was served as.
    pub class: ResourceClass,
    /// Where the response came from.
    pub source: ResponseSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_base64: Option<String>,
}

impl From<Outcome> for InterceptOutput {
    fn from(outcome: Outcome) -> Self {
        let response = outcome.response;
        let headers = response.headers.into_iter().map(|(name, value)| Header { name, value }).collect();
        let (body, body_base64) = match String::from_utf8(response.body) {
            Ok(text) => (Some(text), None),
            Err(e) => (None, Some(STANDARD.encode(e.into_bytes()))),
        };

        Self { status: response.status, headers, class: outcome.class, source: outcome.source, body, body_base64 }
    }
}

impl InterceptParams {
    fn into_request(self) -> Result<InterceptedRequest, McpError> {
        let url = canonicalize(&self.url).map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.url)))?;
        let mut request = InterceptedRequest::new(&self.method, url).with_destination(self.destination);

        for header in self.headers {
            request = request.with_header(header.name, header.value);
        }

        match (self.body, self.body_base64) {
            (Some(_), Some(_)) => {
                return Err(ToolError::InvalidParams("body and body_base64 are mutually exclusive".into()).into());
            }
            (Some(text), None) => request = request.with_body(text),
            (None, Some(encoded)) => {
                let bytes = STANDARD
                    .decode(encoded.as_bytes())
                    .map_err(|e| ToolError::InvalidParams(format!("body_base64: {e}")))?;
                request = request.with_body(bytes);
            }
            (None, None) => {}
        }

        Ok(request)
    }
}

/// Implementation of the intercept tool.
pub async fn intercept_impl(engine: &Engine, params: InterceptParams) -> Result<CallToolResult, McpError> {
    let request = params.into_request()?;
    let outcome = engine.handle(&request).await?;

    tracing::debug!(
        method = %request.method,
        url = %request.url,
        class = %outcome.class,
        source = outcome.source.as_str(),
        status = outcome.response.status,
        "intercepted"
    );

    json_result(&InterceptOutput::from(outcome))
}

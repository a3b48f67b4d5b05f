//! Dispatcher that forwards sub-requests to an upstream HTTP service.

use std::str::FromStr;
use std::time::Instant;

use anyhow::{Result, anyhow};
use indexmap::IndexMap;
use mergereq_api::MergeClient;
use mergereq_types::{ResponseEnvelope, SpecSection};
use mergereq_util::{BodyKind, block_on_future, build_path, build_query_pairs, decode_body, redact_sensitive};
use reqwest::{Method, RequestBuilder, StatusCode, header};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{DispatchOutcome, Dispatcher, SubRequest};

/// Forwards each resolved sub-request through a [`MergeClient`].
///
/// - `{param}` segments of the path are expanded from `routeParams`
/// - `query` becomes the query string
/// - `body` is sent as JSON for methods other than GET, HEAD, and DELETE
/// - ambient headers and cookies are forwarded
///
/// A 404 maps to [`DispatchOutcome::NotFound`]; every other status yields a
/// response envelope. Transport failures are hard errors.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: MergeClient,
}

impl HttpDispatcher {
    pub fn new(client: MergeClient) -> Self {
        Self { client }
    }

    /// Builds a dispatcher from `MERGEREQ_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(MergeClient::new_from_env()?))
    }

    pub fn client(&self) -> &MergeClient {
        &self.client
    }

    fn build_request(&self, request: &SubRequest<'_>) -> Result<RequestBuilder> {
        let method = Method::from_str(request.method()).map_err(|error| anyhow!("invalid method '{}': {error}", request.method()))?;
        let empty = Map::new();
        let path = build_path(request.path(), request.route_params().unwrap_or(&empty));

        let mut builder = self.client.request(method.clone(), &path);
        for (name, value) in &request.context.headers {
            debug!(field = request.field, header = %redact_sensitive(&format!("{name}: {value}")), "forwarding header");
            builder = builder.header(name, value);
        }
        if let Some(cookie) = request.context.cookie_header() {
            builder = builder.header(header::COOKIE, cookie);
        }

        if let Some(query) = request.section(SpecSection::Query) {
            let query_pairs = build_query_pairs(query);
            if !query_pairs.is_empty() {
                builder = builder.query(&query_pairs);
            }
        }

        if !matches!(method, Method::GET | Method::HEAD | Method::DELETE)
            && let Some(body) = request.section(SpecSection::Body)
        {
            builder = builder.json(&Value::Object(body.clone()));
        }

        if request.section(SpecSection::Files).is_some_and(|files| !files.is_empty()) {
            warn!(field = request.field, "file sections are not forwarded over HTTP");
        }

        Ok(builder)
    }
}

impl Dispatcher for HttpDispatcher {
    fn dispatch(&self, request: &SubRequest<'_>) -> Result<DispatchOutcome> {
        let builder = self.build_request(request)?;
        let field = request.field.to_string();
        let method = request.method().to_string();
        let path = request.path().to_string();
        block_on_future(async move { send_request(builder, field, method, path).await })
    }
}

async fn send_request(builder: RequestBuilder, field: String, method: String, path: String) -> Result<DispatchOutcome> {
    let start = Instant::now();
    debug!(field = %field, method = %method, path = %path, "sub-request started");

    let response = builder.send().await.map_err(|error| anyhow!("{method} {path}: {error}"))?;
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        debug!(
            field = %field,
            method = %method,
            path = %path,
            duration_ms = start.elapsed().as_millis(),
            "upstream has no such endpoint"
        );
        return Ok(DispatchOutcome::NotFound);
    }

    let headers: IndexMap<String, String> = response
        .headers()
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string())))
        .collect();
    let kind = BodyKind::from_content_type(headers.get(header::CONTENT_TYPE.as_str()).map(String::as_str));
    let text = response.text().await.map_err(|error| anyhow!("{method} {path}: {error}"))?;
    let content = decode_body(&text, kind, status).unwrap_or_else(|error| {
        warn!(field = %field, error = %error, "upstream sent malformed JSON; keeping raw body");
        Value::String(text.clone())
    });

    if !status.is_success() {
        warn!(field = %field, method = %method, path = %path, status = %status, "sub-request returned an error status");
    }
    debug!(
        field = %field,
        status = %status,
        duration_ms = start.elapsed().as_millis(),
        "sub-request completed"
    );

    Ok(DispatchOutcome::Response(ResponseEnvelope {
        status: status.as_u16(),
        headers,
        content,
    }))
}

//! # Forwarding Tunnel
//!
//! Generic reverse HTTP proxy for node management traffic:
//!
//! ```text
//! METHOD /proxy/<ip>/<port>/<rest>  →  METHOD http://<ip>:<port>/<rest>
//! ```
//!
//! Behavior, in order:
//! - `OPTIONS` requests short-circuit with a bare `200` + CORS headers.
//! - Paths with fewer than the required segments are rejected with `400`.
//! - Everything else is relayed verbatim: method, headers (minus `Host`),
//!   query string, and body. The upstream response streams back with its
//!   original status and headers.
//! - Every response, success or failure, carries permissive CORS headers.
//! - A downstream connection failure maps to `500` with a fixed diagnostic
//!   body rather than the raw transport error.
//!
//! No authentication, no retries, no protocol awareness.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::Response,
    Router,
};
use tracing::{debug, warn};

/// Fixed body returned when the node cannot be reached.
pub const DOWNSTREAM_ERROR_BODY: &str = "upstream request failed";

/// Body returned for paths that do not carry ip, port, and a remainder.
pub const PATH_TOO_SHORT_BODY: &str = "proxy path too short";

const ALLOWED_METHODS: &str = "OPTIONS, POST, GET, PUT, DELETE";

pub struct ProxyState {
    pub client: reqwest::Client,
}

impl ProxyState {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for ProxyState {
    fn default() -> Self {
        Self::new()
    }
}

/// Relay target extracted from a `/proxy/...` path.
#[derive(Debug, PartialEq, Eq)]
pub struct ProxyTarget {
    pub ip: String,
    pub port: String,
    pub rest: String,
}

/// Splits `/proxy/<ip>/<port>/<rest>` into its parts. `rest` may itself
/// contain slashes and must be non-empty.
pub fn parse_target(path: &str) -> Option<ProxyTarget> {
    let tail = path.strip_prefix("/proxy/")?;
    let mut parts = tail.splitn(3, '/');
    let ip = parts.next()?;
    let port = parts.next()?;
    let rest = parts.next()?;
    if ip.is_empty() || port.is_empty() || rest.is_empty() {
        return None;
    }
    Some(ProxyTarget {
        ip: ip.to_string(),
        port: port.to_string(),
        rest: rest.to_string(),
    })
}

/// Permissive CORS on every response: any origin, the fixed method list,
/// any request header.
fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

fn text_response(status: StatusCode, body: &'static str) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    apply_cors(response.headers_mut());
    response
}

/// The single tunnel handler; registered as the router fallback so every
/// method and path lands here.
pub async fn forward(
    State(state): State<Arc<ProxyState>>,
    req: Request,
) -> Response {
    // CORS preflight never reaches the node.
    if req.method() == axum::http::Method::OPTIONS {
        return text_response(StatusCode::OK, "");
    }

    let target = match parse_target(req.uri().path()) {
        Some(target) => target,
        None => return text_response(StatusCode::BAD_REQUEST, PATH_TOO_SHORT_BODY),
    };

    let mut url = format!("http://{}:{}/{}", target.ip, target.port, target.rest);
    if let Some(query) = req.uri().query() {
        url.push('?');
        url.push_str(query);
    }
    debug!("{} {}", req.method(), url);

    let method = req.method().clone();
    let mut headers = req.headers().clone();
    // The upstream connection gets its own Host; everything else relays.
    headers.remove(header::HOST);

    let body = match axum::body::to_bytes(req.into_body(), usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("request body read failed: {}", e);
            return text_response(StatusCode::BAD_REQUEST, "request body read failed");
        }
    };

    let upstream = match state
        .client
        .request(method, &url)
        .headers(headers)
        .body(body)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => {
            warn!("relay to {} failed: {}", url, e);
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, DOWNSTREAM_ERROR_BODY);
        }
    };

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    // Hop-by-hop headers describe the upstream connection, not this one.
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    headers.remove(header::CONTENT_LENGTH);
    apply_cors(&mut headers);

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

pub fn build_router(state: Arc<ProxyState>) -> Router {
    Router::new().fallback(forward).with_state(state)
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, uri: &str) -> Request {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8")
    }

    fn assert_cors(headers: &HeaderMap) {
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_METHODS).unwrap(),
            ALLOWED_METHODS
        );
        assert_eq!(
            headers.get(header::ACCESS_CONTROL_ALLOW_HEADERS).unwrap(),
            "*"
        );
    }

    // ──────────────────────────────────────────────────────────────────
    // PATH PARSING
    // ──────────────────────────────────────────────────────────────────

    #[test]
    fn test_parse_target_valid() {
        let target = parse_target("/proxy/10.0.0.1/4050/tequilapi/healthcheck")
            .expect("parse");
        assert_eq!(target.ip, "10.0.0.1");
        assert_eq!(target.port, "4050");
        assert_eq!(target.rest, "tequilapi/healthcheck");
    }

    #[test]
    fn test_parse_target_too_short() {
        assert!(parse_target("/proxy/10.0.0.1/4050").is_none());
        assert!(parse_target("/proxy/10.0.0.1/4050/").is_none());
        assert!(parse_target("/proxy/10.0.0.1").is_none());
        assert!(parse_target("/proxy/").is_none());
        assert!(parse_target("/other/10.0.0.1/4050/x").is_none());
    }

    #[test]
    fn test_parse_target_empty_segments() {
        assert!(parse_target("/proxy//4050/x").is_none());
        assert!(parse_target("/proxy/10.0.0.1//x").is_none());
    }

    // ──────────────────────────────────────────────────────────────────
    // HANDLER
    // ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_options_short_circuits() {
        let state = Arc::new(ProxyState::new());
        let response = forward(State(state), request("OPTIONS", "/anything")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(response.headers());
    }

    #[tokio::test]
    async fn test_short_path_rejected() {
        let state = Arc::new(ProxyState::new());
        let response = forward(State(state), request("GET", "/proxy/10.0.0.1/4050")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_cors(response.headers());
        assert_eq!(body_string(response).await, PATH_TOO_SHORT_BODY);
    }

    #[tokio::test]
    async fn test_downstream_failure_fixed_body() {
        let state = Arc::new(ProxyState::new());
        // Nothing listens on 127.0.0.1:1; the relay must map the transport
        // error to the fixed 500 body.
        let response = forward(
            State(state),
            request("GET", "/proxy/127.0.0.1/1/tequilapi/healthcheck"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_cors(response.headers());
        assert_eq!(body_string(response).await, DOWNSTREAM_ERROR_BODY);
    }
}

//! # Node Management API Client
//!
//! [`NodeApi`] is the transport seam for one remote gateway node. The
//! production implementation, [`HttpNodeClient`], talks to the node's
//! management API (base path `/tequilapi`), either directly or through the
//! forwarding tunnel. Tests and dev mode substitute the scripted
//! implementation in [`crate::mock_node`].
//!
//! Error classification is structural, by HTTP status:
//! - `401` on any authenticated call → [`FleetError::Unauthorized`]
//! - `409` on service start → [`ConflictKind::AlreadyRunning`]
//! - `404` on service stop → [`ConflictKind::ServiceNotFound`]
//! - network failure / unexpected status → [`FleetError::Transport`]
//!
//! A handle carries its bearer token internally; `attach_token` swaps the
//! token on a live handle without re-authenticating, which is how cached
//! credentials are reused after a process restart.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};

use mystfleet_common::{
    ConflictKind, FleetError, HealthSnapshot, IdentityRef, Result, ServiceInfo,
    StatsSnapshot,
};

/// Fixed username the management API authenticates with.
pub const AUTH_USERNAME: &str = "myst";

/// Service type started on a node's operator identity.
pub const SERVICE_TYPE: &str = "wireguard";

/// Base path of the management API on every node.
const API_BASE_PATH: &str = "tequilapi";

// ════════════════════════════════════════════════════════════════════════════
// TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// One node's management API.
#[async_trait]
pub trait NodeApi: Send + Sync + std::fmt::Debug {
    /// Exchanges credentials for a bearer token. The token is attached to
    /// the handle by the caller, not implicitly.
    async fn authenticate(&self, username: &str, password: &str) -> Result<String>;

    /// Attaches a bearer token to this handle for subsequent calls.
    fn attach_token(&self, token: &str);

    async fn health_check(&self) -> Result<HealthSnapshot>;

    async fn session_stats(&self) -> Result<StatsSnapshot>;

    async fn identities(&self) -> Result<Vec<IdentityRef>>;

    async fn services(&self) -> Result<Vec<ServiceInfo>>;

    async fn service_start(&self, provider_id: &str, service_type: &str) -> Result<()>;

    async fn service_stop(&self, service_id: &str) -> Result<()>;
}

/// Builds [`NodeApi`] handles for an `(ip, port)` pair.
pub trait NodeApiFactory: Send + Sync {
    fn build(&self, ip: &str, port: u16) -> Arc<dyn NodeApi>;
}

// ════════════════════════════════════════════════════════════════════════════
// WIRE TYPES
// ════════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Deserialize)]
struct StatsEnvelope {
    stats: StatsSnapshot,
}

#[derive(Deserialize)]
struct IdentityList {
    identities: Vec<IdentityRef>,
}

#[derive(Serialize)]
struct ServiceStartRequest<'a> {
    provider_id: &'a str,
    #[serde(rename = "type")]
    service_type: &'a str,
}

// ════════════════════════════════════════════════════════════════════════════
// HTTP CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// Live connection handle bound to one node's management API.
pub struct HttpNodeClient {
    /// `ip:port` identity, used in error messages.
    address: String,
    /// Fully resolved API base, e.g. `http://10.0.0.1:4050/tequilapi`.
    base: String,
    client: Client,
    token: RwLock<Option<String>>,
}

impl HttpNodeClient {
    fn new(address: String, base: String, client: Client) -> Self {
        Self {
            address,
            base,
            client,
            token: RwLock::new(None),
        }
    }

    fn transport(&self, e: reqwest::Error) -> FleetError {
        FleetError::Transport {
            address: self.address.clone(),
            reason: e.to_string(),
        }
    }

    fn unexpected(&self, what: &str, status: StatusCode, body: String) -> FleetError {
        FleetError::Transport {
            address: self.address.clone(),
            reason: format!("{} failed {} {}", what, status, body),
        }
    }

    /// Applies the bearer token, if one is attached.
    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.token.read().as_deref() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        what: &str,
    ) -> Result<T> {
        let url = format!("{}/{}", self.base, path);
        let resp = self
            .with_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(FleetError::Unauthorized {
                address: self.address.clone(),
            });
        }
        if !status.is_success() {
            let t = resp.text().await.unwrap_or_default();
            return Err(self.unexpected(what, status, t));
        }
        resp.json::<T>().await.map_err(|e| self.transport(e))
    }
}

impl std::fmt::Debug for HttpNodeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpNodeClient")
            .field("address", &self.address)
            .field("base", &self.base)
            .field("has_token", &self.token.read().is_some())
            .finish()
    }
}

#[async_trait]
impl NodeApi for HttpNodeClient {
    async fn authenticate(&self, username: &str, password: &str) -> Result<String> {
        let url = format!("{}/auth/authenticate", self.base);
        let body = AuthRequest { username, password };
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| FleetError::Authentication {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        let status = resp.status();
        if !status.is_success() {
            let t = resp.text().await.unwrap_or_default();
            return Err(FleetError::Authentication {
                address: self.address.clone(),
                reason: format!("{} {}", status, t),
            });
        }
        let token = resp
            .json::<TokenResponse>()
            .await
            .map_err(|e| FleetError::Authentication {
                address: self.address.clone(),
                reason: e.to_string(),
            })?;
        Ok(token.token)
    }

    fn attach_token(&self, token: &str) {
        *self.token.write() = Some(token.to_string());
    }

    async fn health_check(&self) -> Result<HealthSnapshot> {
        self.get_json("healthcheck", "health check").await
    }

    async fn session_stats(&self) -> Result<StatsSnapshot> {
        let envelope: StatsEnvelope = self
            .get_json("sessions/stats-aggregated", "session stats")
            .await?;
        Ok(envelope.stats)
    }

    async fn identities(&self) -> Result<Vec<IdentityRef>> {
        let list: IdentityList = self.get_json("identities", "identity list").await?;
        Ok(list.identities)
    }

    async fn services(&self) -> Result<Vec<ServiceInfo>> {
        self.get_json("services", "service list").await
    }

    async fn service_start(&self, provider_id: &str, service_type: &str) -> Result<()> {
        let url = format!("{}/services", self.base);
        let body = ServiceStartRequest {
            provider_id,
            service_type,
        };
        let resp = self
            .with_auth(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED => Err(FleetError::Unauthorized {
                address: self.address.clone(),
            }),
            StatusCode::CONFLICT => Err(FleetError::Conflict {
                address: self.address.clone(),
                kind: ConflictKind::AlreadyRunning,
            }),
            s if s.is_success() => Ok(()),
            s => {
                let t = resp.text().await.unwrap_or_default();
                Err(self.unexpected("service start", s, t))
            }
        }
    }

    async fn service_stop(&self, service_id: &str) -> Result<()> {
        let url = format!("{}/services/{}", self.base, service_id);
        let resp = self
            .with_auth(self.client.delete(&url))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        let status = resp.status();
        match status {
            StatusCode::UNAUTHORIZED => Err(FleetError::Unauthorized {
                address: self.address.clone(),
            }),
            StatusCode::NOT_FOUND => Err(FleetError::Conflict {
                address: self.address.clone(),
                kind: ConflictKind::ServiceNotFound,
            }),
            s if s.is_success() => Ok(()),
            s => {
                let t = resp.text().await.unwrap_or_default();
                Err(self.unexpected("service stop", s, t))
            }
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// FACTORY
// ════════════════════════════════════════════════════════════════════════════

/// Builds [`HttpNodeClient`] handles, sharing one pooled `reqwest::Client`.
#[derive(Clone)]
pub struct HttpApiFactory {
    client: Client,
    /// When set, node traffic routes through the forwarding tunnel.
    proxy_base: Option<String>,
}

impl HttpApiFactory {
    pub fn new(timeout: Duration, proxy_base: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client");
        Self { client, proxy_base }
    }

    fn base_url(&self, ip: &str, port: u16) -> String {
        match &self.proxy_base {
            Some(proxy) => format!(
                "{}/proxy/{}/{}/{}",
                proxy.trim_end_matches('/'),
                ip,
                port,
                API_BASE_PATH
            ),
            None => format!("http://{}:{}/{}", ip, port, API_BASE_PATH),
        }
    }
}

impl NodeApiFactory for HttpApiFactory {
    fn build(&self, ip: &str, port: u16) -> Arc<dyn NodeApi> {
        let address = format!("{}:{}", ip, port);
        let base = self.base_url(ip, port);
        Arc::new(HttpNodeClient::new(address, base, self.client.clone()))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMPILE-TIME ASSERTIONS
// ════════════════════════════════════════════════════════════════════════════

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<HttpNodeClient>();
        assert_send_sync::<HttpApiFactory>();
    }
    let _ = check;
};

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_direct() {
        let factory = HttpApiFactory::new(Duration::from_secs(10), None);
        assert_eq!(
            factory.base_url("10.0.0.1", 4050),
            "http://10.0.0.1:4050/tequilapi"
        );
    }

    #[test]
    fn test_base_url_via_proxy() {
        let factory = HttpApiFactory::new(
            Duration::from_secs(10),
            Some("http://localhost:8100/".to_string()),
        );
        assert_eq!(
            factory.base_url("10.0.0.1", 4050),
            "http://localhost:8100/proxy/10.0.0.1/4050/tequilapi"
        );
    }

    #[test]
    fn test_service_start_request_wire_shape() {
        let body = ServiceStartRequest {
            provider_id: "idA",
            service_type: SERVICE_TYPE,
        };
        let json = serde_json::to_string(&body).expect("encode");
        assert_eq!(json, r#"{"provider_id":"idA","type":"wireguard"}"#);
    }

    #[test]
    fn test_token_attach_visible_in_debug() {
        let factory = HttpApiFactory::new(Duration::from_secs(1), None);
        let handle = factory.build("1.2.3.4", 4449);
        handle.attach_token("abc");
        // Factory-built handles start without a token; attach is in-place.
        let client = HttpNodeClient::new(
            "1.2.3.4:4449".to_string(),
            "http://1.2.3.4:4449/tequilapi".to_string(),
            Client::new(),
        );
        assert!(format!("{:?}", client).contains("has_token: false"));
        client.attach_token("abc");
        assert!(format!("{:?}", client).contains("has_token: true"));
    }

    #[test]
    fn test_stats_envelope_decode() {
        let json = r#"{"stats":{"count":2,"sum_tokens":3000000000000000000}}"#;
        let env: StatsEnvelope = serde_json::from_str(json).expect("decode");
        assert_eq!(env.stats.count, 2);
        assert_eq!(env.stats.sum_tokens, 3_000_000_000_000_000_000);
    }
}

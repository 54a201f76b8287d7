//! Node state snapshots as observed through the management API, plus small
//! address helpers shared by the manager and its HTTP layer.

use serde::{Deserialize, Serialize};

use crate::error::FleetError;

/// Token amounts use 18 decimal places on the wire.
const TOKEN_DECIMALS: f64 = 1e18;

/// Last observed health of a node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Seconds the node process has been up.
    pub uptime: u64,
    /// Node software version string.
    pub version: String,
}

/// Last observed aggregated session statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Number of sessions served.
    pub count: u64,
    /// Cumulative earned tokens, raw 18-decimal amount.
    pub sum_tokens: u128,
}

impl StatsSnapshot {
    /// Earned tokens formatted for display with two decimals.
    ///
    /// `3 * 10^18` raw tokens renders as `"3.00"`.
    pub fn earnings_display(&self) -> String {
        format!("{:.2}", self.sum_tokens as f64 / TOKEN_DECIMALS)
    }
}

/// One node-local identity. Index 0 is the operator identity used for
/// service commands. Extra wire fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRef {
    pub id: String,
}

/// One running service on a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(
        rename = "type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub service_type: Option<String>,
    pub status: String,
}

/// Decomposes `ip:port` into its parts.
///
/// The port is the suffix after the last `:`, so bare IPv6 addresses
/// without a port are rejected rather than misread.
pub fn split_address(address: &str) -> Result<(String, u16), FleetError> {
    let (ip, port) = address
        .rsplit_once(':')
        .ok_or_else(|| FleetError::InvalidAddress(address.to_string()))?;
    if ip.is_empty() {
        return Err(FleetError::InvalidAddress(address.to_string()));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| FleetError::InvalidAddress(address.to_string()))?;
    Ok((ip.to_string(), port))
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_earnings_display_whole() {
        let stats = StatsSnapshot {
            count: 2,
            sum_tokens: 3_000_000_000_000_000_000,
        };
        assert_eq!(stats.earnings_display(), "3.00");
    }

    #[test]
    fn test_earnings_display_zero() {
        assert_eq!(StatsSnapshot::default().earnings_display(), "0.00");
    }

    #[test]
    fn test_earnings_display_fractional() {
        let stats = StatsSnapshot {
            count: 1,
            sum_tokens: 1_250_000_000_000_000_000,
        };
        assert_eq!(stats.earnings_display(), "1.25");
    }

    #[test]
    fn test_split_address_valid() {
        let (ip, port) = split_address("10.0.0.1:4050").expect("split");
        assert_eq!(ip, "10.0.0.1");
        assert_eq!(port, 4050);
    }

    #[test]
    fn test_split_address_no_port() {
        assert!(split_address("10.0.0.1").is_err());
        assert!(split_address(":4050").is_err());
        assert!(split_address("10.0.0.1:notaport").is_err());
    }

    #[test]
    fn test_service_info_type_field_name() {
        let json = r#"{"id":"svc1","provider_id":"idA","type":"wireguard","status":"Running"}"#;
        let svc: ServiceInfo = serde_json::from_str(json).expect("decode");
        assert_eq!(svc.service_type.as_deref(), Some("wireguard"));
        let back = serde_json::to_string(&svc).expect("encode");
        assert!(back.contains("\"type\":\"wireguard\""));
    }

    #[test]
    fn test_identity_ignores_extra_fields() {
        let json = r#"{"id":"0xabc","registration_status":"Registered"}"#;
        let id: IdentityRef = serde_json::from_str(json).expect("decode");
        assert_eq!(id.id, "0xabc");
    }
}

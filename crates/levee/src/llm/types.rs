//! Connector types.

use serde::{Deserialize, Serialize};

/// Response of `GET /sdk/v1/llm/config`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmConfig {
    pub available: bool,
    pub grpc_port: u16,
    #[serde(default)]
    pub default_provider: String,
    #[serde(default)]
    pub configured_providers: Vec<String>,
}

/// Resolved gRPC destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrpcTarget {
    /// `host:port`.
    pub address: String,
    /// Host name used for TLS server name verification.
    pub host: String,
    pub tls: bool,
}

impl GrpcTarget {
    pub fn new(address: impl Into<String>, tls: bool) -> Self {
        let address = address.into();
        let host = split_host(&address).to_string();
        Self { address, host, tls }
    }

    pub fn uri(&self) -> String {
        let scheme = if self.tls { "https" } else { "http" };
        format!("{scheme}://{}", self.address)
    }
}

/// Host part of `address`, without the brackets of an IPv6 literal.
fn split_host(address: &str) -> &str {
    let host = match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => address,
    };
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

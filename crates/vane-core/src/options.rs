//! Server options handed to the transport adapter on start.

use serde::{Deserialize, Serialize};

use crate::errors::OptionsError;

/// Options the server passes to its transport adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerOptions {
    /// Plain-text listening endpoint.
    pub default_endpoint: EndpointOptions,
    /// TLS listening endpoint.
    pub tls_endpoint: TlsEndpointOptions,
    /// Pending-connection queue length requested from the listener.
    pub connection_backlog: u32,
    /// Per-operation I/O timeout applied by session transports.
    pub communication_timeout_ms: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            default_endpoint: EndpointOptions::default(),
            tls_endpoint: TlsEndpointOptions::default(),
            connection_backlog: 10,
            communication_timeout_ms: 15_000,
        }
    }
}

impl ServerOptions {
    /// Check that the options describe something an adapter can start.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !self.default_endpoint.enabled && !self.tls_endpoint.enabled {
            return Err(OptionsError::NoEndpoint);
        }
        if self.tls_endpoint.enabled && self.tls_endpoint.certificate_path.is_none() {
            return Err(OptionsError::MissingCertificate);
        }
        if self.connection_backlog == 0 {
            return Err(OptionsError::ZeroBacklog);
        }
        if self.communication_timeout_ms == 0 {
            return Err(OptionsError::ZeroTimeout);
        }
        Ok(())
    }

    /// The communication timeout as a [`std::time::Duration`].
    pub fn communication_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.communication_timeout_ms)
    }
}

/// Plain-text endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EndpointOptions {
    /// Whether the endpoint accepts connections.
    pub enabled: bool,
    /// Bind address.
    pub host: String,
    /// Bind port (1883 is the registered MQTT port).
    pub port: u16,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".into(),
            port: 1883,
        }
    }
}

impl EndpointOptions {
    /// `host:port` form used for binding and logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TLS endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsEndpointOptions {
    /// Whether the endpoint accepts connections.
    pub enabled: bool,
    /// Bind address.
    pub host: String,
    /// Bind port (8883 is the registered MQTT-over-TLS port).
    pub port: u16,
    /// PEM certificate chain presented to clients.
    pub certificate_path: Option<String>,
}

impl Default for TlsEndpointOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "0.0.0.0".into(),
            port: 8883,
            certificate_path: None,
        }
    }
}

impl TlsEndpointOptions {
    /// `host:port` form used for binding and logging.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

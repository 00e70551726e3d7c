//! Client configuration.
//!
//! Loads connection parameters from a TOML file. Programs that assemble
//! their configuration in code can start from [`ClientConfig::local_defaults`]
//! and overwrite fields.

use crate::error::Result;
use crate::state;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub transports: TransportConfig,
    #[serde(default)]
    pub certificates: CertConfig,
}

/// Relay server endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Server IP address, e.g. `127.0.0.1`.
    pub address: String,
    /// Control channel TCP port.
    pub port: u16,
}

/// Credentials presented during the handshake. When `token` is set it is
/// used instead of the username/password pair.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Which data transports the session brings up. Disabled transports
/// reject stream creation locally without contacting the server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    pub send_udp: bool,
    pub recv_udp: bool,
    pub send_tcp: bool,
    pub recv_tcp: bool,
    pub send_ws: bool,
    pub recv_ws: bool,
}

impl TransportConfig {
    /// Enabled transports as a [`crate::state`] bitmask.
    pub fn bits(&self) -> u32 {
        let mut bits = state::NONE;
        if self.send_udp {
            bits |= state::SEND_UDP;
        }
        if self.recv_udp {
            bits |= state::RECV_UDP;
        }
        if self.send_tcp {
            bits |= state::SEND_TCP;
        }
        if self.recv_tcp {
            bits |= state::RECV_TCP;
        }
        if self.send_ws {
            bits |= state::SEND_WS;
        }
        if self.recv_ws {
            bits |= state::RECV_WS;
        }
        bits
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            send_udp: true,
            recv_udp: true,
            send_tcp: true,
            recv_tcp: true,
            send_ws: false,
            recv_ws: false,
        }
    }
}

/// Certificate paths for deployments that front the relay with TLS.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertConfig {
    pub client_cert: String,
    pub server_cert: String,
}

impl Default for CertConfig {
    fn default() -> Self {
        CertConfig {
            client_cert: "ca-crt.pem".to_string(),
            server_cert: "ca-crt-default.pem".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Configuration pointing at a relay on the local machine, suitable
    /// for tests and development.
    pub fn local_defaults() -> Self {
        ClientConfig {
            server: ServerConfig {
                address: "127.0.0.1".to_string(),
                port: 20012,
            },
            auth: AuthConfig {
                username: "Testuser".to_string(),
                password: "Testpassword".to_string(),
                token: None,
            },
            transports: TransportConfig::default(),
            certificates: CertConfig::default(),
        }
    }
}

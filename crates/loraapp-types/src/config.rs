//! Resolved server configuration.
//!
//! [`ServerConfig`] is constructed once by the binary (from flags,
//! environment and an optional config file), validated, and then passed by
//! reference into every component constructor. Nothing reads configuration
//! from ambient state after that point.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::{AppServerError, Result};

// ---------------------------------------------------------------------------
// TLS material
// ---------------------------------------------------------------------------

/// Paths to a PEM certificate chain and its private key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TlsPaths {
    /// PEM certificate chain, leaf first.
    pub cert_path: PathBuf,
    /// PEM private key (PKCS#8, PKCS#1 or SEC1).
    pub key_path: PathBuf,
}

/// Transport security of the internal RPC listener.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RpcTlsMode {
    /// No TLS. Only sensible when the bind address is not reachable from
    /// untrusted networks.
    Plaintext,
    /// Server-authenticated TLS.
    ServerOnly(TlsPaths),
    /// Mutual TLS: clients must present a certificate chained to `ca_path`.
    Mutual {
        /// Server identity.
        identity: TlsPaths,
        /// PEM bundle of trusted client CAs.
        ca_path: PathBuf,
    },
}

impl RpcTlsMode {
    /// Derives the mode from the optional certificate, key and CA paths.
    ///
    /// # Errors
    ///
    /// Returns [`AppServerError::ConfigError`] when only one of certificate
    /// and key is configured, or a CA is configured without a certificate.
    pub fn from_paths(
        cert: Option<PathBuf>,
        key: Option<PathBuf>,
        ca: Option<PathBuf>,
    ) -> Result<Self> {
        match (cert, key, ca) {
            (None, None, None) => Ok(Self::Plaintext),
            (Some(cert_path), Some(key_path), None) => {
                Ok(Self::ServerOnly(TlsPaths { cert_path, key_path }))
            }
            (Some(cert_path), Some(key_path), Some(ca_path)) => Ok(Self::Mutual {
                identity: TlsPaths { cert_path, key_path },
                ca_path,
            }),
            (None, None, Some(ca)) => Err(AppServerError::ConfigError {
                reason: format!(
                    "ca certificate '{}' configured without a tls certificate and key",
                    ca.display()
                ),
            }),
            _ => Err(AppServerError::ConfigError {
                reason: "tls certificate and tls key must be configured together".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Listener configs
// ---------------------------------------------------------------------------

/// Internal RPC listener (network-server facing ApplicationServer API).
#[derive(Clone, Debug)]
pub struct RpcListenerConfig {
    /// Bind address.
    pub bind: SocketAddr,
    /// Transport security.
    pub tls: RpcTlsMode,
}

/// Public listener serving gRPC, REST and static files.
#[derive(Clone, Debug)]
pub struct HttpListenerConfig {
    /// Bind address. Its port is also the loopback port dialled by the
    /// JSON gateway.
    pub bind: SocketAddr,
    /// Server identity. The certificate doubles as the trust anchor of the
    /// gateway's loopback connection.
    pub tls: TlsPaths,
    /// Directory served for paths outside `/api`. `None` answers 404.
    pub static_dir: Option<PathBuf>,
}

/// Authentication settings.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Shared JWT secret. `None` disables authentication.
    pub jwt_secret: Option<String>,
}

/// Timeouts applied to otherwise unbounded suspension points.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeoutConfig {
    /// Upper bound on a TLS handshake.
    pub handshake: Duration,
    /// Upper bound on a single RPC (server side and loopback client side).
    pub request: Duration,
    /// Upper bound on establishing the loopback connection.
    pub connect: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(10),
            request: Duration::from_secs(30),
            connect: Duration::from_secs(5),
        }
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Fully resolved, immutable server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Directory of the sled database.
    pub storage_path: PathBuf,
    /// Internal RPC listener.
    pub rpc: RpcListenerConfig,
    /// Public listener.
    pub http: HttpListenerConfig,
    /// Authentication.
    pub auth: AuthConfig,
    /// Timeouts.
    pub timeouts: TimeoutConfig,
}

impl ServerConfig {
    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// - Empty storage path.
    /// - Public bind address with port 0 (the loopback port must be known
    ///   before the listener is bound).
    /// - Identical internal and public bind addresses.
    /// - Zero timeouts.
    /// - Empty JWT secret.
    pub fn validate(&self) -> Result<()> {
        if self.storage_path.as_os_str().is_empty() {
            return Err(AppServerError::ConfigError {
                reason: "storage path must not be empty".into(),
            });
        }

        if self.http.bind.port() == 0 {
            return Err(AppServerError::ConfigError {
                reason: format!(
                    "http bind address {} must name an explicit port",
                    self.http.bind
                ),
            });
        }

        if self.rpc.bind == self.http.bind {
            return Err(AppServerError::ConfigError {
                reason: format!(
                    "rpc and http listeners cannot share bind address {}",
                    self.rpc.bind
                ),
            });
        }

        let timeouts = &self.timeouts;
        if timeouts.handshake.is_zero() || timeouts.request.is_zero() || timeouts.connect.is_zero()
        {
            return Err(AppServerError::ConfigError {
                reason: "timeouts must be greater than zero".into(),
            });
        }

        if let Some(ref secret) = self.auth.jwt_secret {
            if secret.is_empty() {
                return Err(AppServerError::ConfigError {
                    reason: "jwt secret must not be empty when set".into(),
                });
            }
        }

        Ok(())
    }

    /// Port of the public listener, dialled on `localhost` by the gateway.
    pub fn loopback_port(&self) -> u16 {
        self.http.bind.port()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! CLI argument parsing and config file support.
//!
//! The server can be configured via CLI flags (each with an environment
//! variable fallback), a JSON config file, or both. A flag or variable
//! overrides the same setting in the file; anything set nowhere takes its
//! default.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

use loraapp_types::config::{
    AuthConfig, HttpListenerConfig, RpcListenerConfig, RpcTlsMode, ServerConfig, TimeoutConfig,
    TlsPaths,
};
use loraapp_types::{AppServerError, Result};

const DEFAULT_STORAGE_PATH: &str = "data/loraapp";
const DEFAULT_BIND: &str = "0.0.0.0:8001";
const DEFAULT_HTTP_BIND: &str = "0.0.0.0:8080";
const DEFAULT_HTTP_TLS_CERT: &str = "certs/http.pem";
const DEFAULT_HTTP_TLS_KEY: &str = "certs/http-key.pem";

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// LoRa application server.
///
/// Serves the internal ApplicationServer API for the network server on
/// `--bind`, and gRPC plus the REST gateway on `--http-bind`.
#[derive(Debug, Default, Parser)]
#[command(name = "lora-app-server", version, about)]
pub struct CliArgs {
    /// Directory of the storage database [default: data/loraapp].
    #[arg(long, env = "STORAGE_PATH")]
    pub storage_path: Option<PathBuf>,

    /// Bind address of the internal api [default: 0.0.0.0:8001].
    #[arg(long, env = "BIND")]
    pub bind: Option<SocketAddr>,

    /// TLS certificate of the internal api (optional).
    #[arg(long, env = "TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// TLS key of the internal api (optional).
    #[arg(long, env = "TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// CA certificate for client certificates of the internal api
    /// (optional, enables mutual TLS).
    #[arg(long, env = "CA_CERT")]
    pub ca_cert: Option<PathBuf>,

    /// Bind address of the public gRPC / REST api [default: 0.0.0.0:8080].
    #[arg(long, env = "HTTP_BIND")]
    pub http_bind: Option<SocketAddr>,

    /// TLS certificate of the public api [default: certs/http.pem].
    #[arg(long, env = "HTTP_TLS_CERT")]
    pub http_tls_cert: Option<PathBuf>,

    /// TLS key of the public api [default: certs/http-key.pem].
    #[arg(long, env = "HTTP_TLS_KEY")]
    pub http_tls_key: Option<PathBuf>,

    /// Directory served for paths outside /api (optional).
    #[arg(long, env = "STATIC_DIR")]
    pub static_dir: Option<PathBuf>,

    /// JWT secret used for api authentication (unset disables auth).
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// TLS handshake timeout in seconds [default: 10].
    #[arg(long, env = "HANDSHAKE_TIMEOUT_SECS")]
    pub handshake_timeout_secs: Option<u64>,

    /// RPC request timeout in seconds [default: 30].
    #[arg(long, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Gateway loopback connect timeout in seconds [default: 5].
    #[arg(long, env = "CONNECT_TIMEOUT_SECS")]
    pub connect_timeout_secs: Option<u64>,

    /// JSON config file; flags and environment override its values.
    #[arg(long, env = "LORAAPP_CONFIG")]
    pub config: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Config file (JSON)
// ---------------------------------------------------------------------------

/// JSON config file format.
///
/// Example `lora-app-server.json`:
/// ```json
/// {
///   "storage_path": "/var/lib/lora-app-server",
///   "bind": "0.0.0.0:8001",
///   "tls_cert": "/etc/lora-app-server/internal.pem",
///   "tls_key": "/etc/lora-app-server/internal-key.pem",
///   "ca_cert": "/etc/lora-app-server/ca.pem",
///   "http_bind": "0.0.0.0:8080",
///   "static_dir": "/usr/share/lora-app-server/ui"
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub storage_path: Option<PathBuf>,
    pub bind: Option<SocketAddr>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub ca_cert: Option<PathBuf>,
    pub http_bind: Option<SocketAddr>,
    pub http_tls_cert: Option<PathBuf>,
    pub http_tls_key: Option<PathBuf>,
    pub static_dir: Option<PathBuf>,
    pub jwt_secret: Option<String>,
    pub handshake_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
}

impl ConfigFile {
    /// Loads a config file.
    ///
    /// # Errors
    ///
    /// [`AppServerError::ConfigError`] naming the file when it cannot be
    /// read or is not valid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AppServerError::ConfigError {
            reason: format!("failed to read config file '{}': {e}", path.display()),
        })?;
        serde_json::from_str(&text).map_err(|e| AppServerError::ConfigError {
            reason: format!("invalid config file '{}': {e}", path.display()),
        })
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolves flags, environment and the optional config file into a
/// validated [`ServerConfig`].
pub fn resolve(cli: CliArgs) -> Result<ServerConfig> {
    let file = match cli.config.as_deref() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading config file");
            ConfigFile::load(path)?
        }
        None => ConfigFile::default(),
    };
    merge(cli, file)
}

/// Applies CLI values over file values over defaults.
pub fn merge(cli: CliArgs, file: ConfigFile) -> Result<ServerConfig> {
    let defaults = TimeoutConfig::default();

    let rpc_tls = RpcTlsMode::from_paths(
        cli.tls_cert.or(file.tls_cert),
        cli.tls_key.or(file.tls_key),
        cli.ca_cert.or(file.ca_cert),
    )?;

    let config = ServerConfig {
        storage_path: cli
            .storage_path
            .or(file.storage_path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORAGE_PATH)),
        rpc: RpcListenerConfig {
            bind: cli.bind.or(file.bind).map_or_else(|| default_addr(DEFAULT_BIND), Ok)?,
            tls: rpc_tls,
        },
        http: HttpListenerConfig {
            bind: cli
                .http_bind
                .or(file.http_bind)
                .map_or_else(|| default_addr(DEFAULT_HTTP_BIND), Ok)?,
            tls: TlsPaths {
                cert_path: cli
                    .http_tls_cert
                    .or(file.http_tls_cert)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_HTTP_TLS_CERT)),
                key_path: cli
                    .http_tls_key
                    .or(file.http_tls_key)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_HTTP_TLS_KEY)),
            },
            static_dir: cli.static_dir.or(file.static_dir),
        },
        auth: AuthConfig {
            // A blank secret leaves authentication disabled.
            jwt_secret: cli
                .jwt_secret
                .or(file.jwt_secret)
                .filter(|secret| !secret.is_empty()),
        },
        timeouts: TimeoutConfig {
            handshake: seconds(cli.handshake_timeout_secs.or(file.handshake_timeout_secs))
                .unwrap_or(defaults.handshake),
            request: seconds(cli.request_timeout_secs.or(file.request_timeout_secs))
                .unwrap_or(defaults.request),
            connect: seconds(cli.connect_timeout_secs.or(file.connect_timeout_secs))
                .unwrap_or(defaults.connect),
        },
    };

    config.validate()?;
    Ok(config)
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.map(Duration::from_secs)
}

fn default_addr(text: &str) -> Result<SocketAddr> {
    text.parse().map_err(|e| AppServerError::ConfigError {
        reason: format!("invalid default address '{text}': {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

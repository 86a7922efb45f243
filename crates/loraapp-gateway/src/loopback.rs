//! Loopback gRPC channel used by the JSON gateway.
//!
//! The gateway reaches the client-facing services the same way an external
//! gRPC client would: over TLS to the public listener, dialled on
//! `localhost`. The channel is created lazily because the public listener
//! is bound after the gateway has been built; the first REST call opens
//! the connection.

use std::io;
use std::time::Duration;

use http::Uri;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tonic::transport::{Channel, Endpoint};
use tower::service_fn;

use loraapp_rpc::tls::LoopbackTrust;
use loraapp_types::config::TimeoutConfig;
use loraapp_types::{AppServerError, Result};

/// Host dialled by the gateway.
pub const LOOPBACK_HOST: &str = "localhost";

/// Builds a lazily connecting channel to `localhost:<port>`.
///
/// # Errors
///
/// - [`AppServerError::ConfigError`] when `port` is 0.
/// - [`AppServerError::TlsError`] when the client TLS configuration cannot
///   be built.
pub fn connect_lazy(port: u16, trust: &LoopbackTrust, timeouts: &TimeoutConfig) -> Result<Channel> {
    if port == 0 {
        return Err(AppServerError::ConfigError {
            reason: "loopback port must not be 0".into(),
        });
    }

    let endpoint = Endpoint::from_shared(format!("http://{LOOPBACK_HOST}:{port}"))
        .map_err(|e| AppServerError::ConfigError {
            reason: format!("invalid loopback endpoint for port {port}: {e}"),
        })?
        .connect_timeout(timeouts.connect)
        .timeout(timeouts.request);

    let connector = trust.connector()?;
    let connect_timeout = timeouts.connect;

    let channel = endpoint.connect_with_connector_lazy(service_fn(move |uri: Uri| {
        let connector = connector.clone();
        async move {
            let host = uri.host().unwrap_or(LOOPBACK_HOST).to_string();
            let port = uri.port_u16().unwrap_or(port);
            let tcp = dial(&host, port, connect_timeout).await?;
            let server_name = ServerName::try_from(host)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
            let tls = connector.connect(server_name, tcp).await?;
            Ok::<_, io::Error>(TokioIo::new(tls))
        }
    }));

    tracing::info!(port, "json gateway will dial the public listener on localhost");
    Ok(channel)
}

async fn dial(host: &str, port: u16, timeout: Duration) -> io::Result<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect((host, port)))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "loopback connect timed out"))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::RootCertStore;

    #[tokio::test]
    async fn port_zero_is_rejected() {
        let trust = LoopbackTrust::from_roots(RootCertStore::empty());
        let result = connect_lazy(0, &trust, &TimeoutConfig::default());
        assert!(matches!(result, Err(AppServerError::ConfigError { .. })));
    }

    #[tokio::test]
    async fn lazy_channel_does_not_dial() {
        // Nothing listens on this port; building the channel must still work.
        let trust = LoopbackTrust::from_roots(RootCertStore::empty());
        assert!(connect_lazy(1, &trust, &TimeoutConfig::default()).is_ok());
    }
}

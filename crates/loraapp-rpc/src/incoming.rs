//! TLS accept loop for tonic.
//!
//! tonic serves any stream of connections. [`tls_incoming`] turns a bound
//! `TcpListener` into such a stream: every accepted socket gets its own
//! handshake task (bounded by a timeout), and only completed handshakes
//! are forwarded. A slow or failing client therefore never blocks the
//! accept loop.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::ReceiverStream;

use crate::server::wait_for_shutdown;

/// Completed handshakes waiting to be picked up by the server.
const BACKLOG: usize = 64;
/// Pause after a failed `accept` (e.g. descriptor exhaustion).
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Performs a server-side TLS handshake bounded by `timeout`.
pub async fn accept_tls(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
    timeout: Duration,
) -> Option<TlsStream<TcpStream>> {
    match tokio::time::timeout(timeout, acceptor.accept(stream)).await {
        Ok(Ok(tls)) => Some(tls),
        Ok(Err(e)) => {
            tracing::debug!(%peer, error = %e, "tls handshake failed");
            None
        }
        Err(_) => {
            tracing::debug!(%peer, ?timeout, "tls handshake timed out");
            None
        }
    }
}

/// Accepts connections on `listener` until `shutdown_rx` fires and yields
/// the ones that complete a TLS handshake.
pub fn tls_incoming(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    handshake_timeout: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> ReceiverStream<std::io::Result<TlsStream<TcpStream>>> {
    let (tx, rx) = mpsc::channel(BACKLOG);

    tokio::spawn(async move {
        let shutdown = wait_for_shutdown(shutdown_rx);
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                },
            };

            let acceptor = acceptor.clone();
            let conn_tx = tx.clone();
            tokio::spawn(async move {
                if let Some(tls) = accept_tls(&acceptor, stream, peer, handshake_timeout).await {
                    // The receiver is gone once the server stopped.
                    let _ = conn_tx.send(Ok(tls)).await;
                }
            });

            if tx.is_closed() {
                break;
            }
        }

        tracing::debug!("tls accept loop stopped");
    });

    ReceiverStream::new(rx)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use rustls::pki_types::ServerName;
    use tokio_stream::StreamExt;

    use crate::tls::{LoopbackTrust, TransportCredentials};
    use loraapp_types::config::TlsPaths;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn identity(
        dir: &Path,
    ) -> std::result::Result<(TransportCredentials, LoopbackTrust), Box<dyn std::error::Error>> {
        let key = rcgen::KeyPair::generate()?;
        let cert = rcgen::CertificateParams::new(vec!["localhost".to_string()])?.self_signed(&key)?;
        let paths = TlsPaths {
            cert_path: dir.join("cert.pem"),
            key_path: dir.join("key.pem"),
        };
        std::fs::write(&paths.cert_path, cert.pem())?;
        std::fs::write(&paths.key_path, key.serialize_pem())?;
        Ok((
            TransportCredentials::for_public(&paths)?,
            LoopbackTrust::from_pem_file(&paths.cert_path)?,
        ))
    }

    #[tokio::test]
    async fn yields_every_handshake_until_shutdown() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (credentials, trust) = identity(dir.path())?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut incoming = tls_incoming(
            listener,
            credentials.acceptor(),
            Duration::from_secs(5),
            shutdown_rx,
        );

        // Each connection gets its own sender clone; the loop keeps going.
        let connector = trust.connector()?;
        for _ in 0..3 {
            let tcp = TcpStream::connect(addr).await?;
            let _client = connector
                .connect(ServerName::try_from("localhost")?, tcp)
                .await?;
            let accepted = tokio::time::timeout(Duration::from_secs(5), incoming.next()).await?;
            assert!(matches!(accepted, Some(Ok(_))));
        }

        shutdown_tx.send(true)?;
        let end = tokio::time::timeout(Duration::from_secs(5), incoming.next()).await?;
        assert!(end.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_handshakes_are_skipped() -> TestResult {
        let dir = tempfile::tempdir()?;
        let (credentials, trust) = identity(dir.path())?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut incoming = tls_incoming(
            listener,
            credentials.acceptor(),
            Duration::from_secs(5),
            shutdown_rx,
        );

        // Not TLS at all.
        let mut garbage = TcpStream::connect(addr).await?;
        tokio::io::AsyncWriteExt::write_all(&mut garbage, b"GET / HTTP/1.1\r\n\r\n").await?;

        let tcp = TcpStream::connect(addr).await?;
        let _client = trust
            .connector()?
            .connect(ServerName::try_from("localhost")?, tcp)
            .await?;
        let accepted = tokio::time::timeout(Duration::from_secs(5), incoming.next()).await?;
        assert!(matches!(accepted, Some(Ok(_))));
        Ok(())
    }
}

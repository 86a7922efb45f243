//! Public listener: TLS, HTTP/1.1 and HTTP/2 on one port.
//!
//! Each accepted socket is handled on its own task: TLS handshake (bounded
//! by the handshake timeout), then an auto-detecting hyper connection whose
//! every request goes through the [`ProtocolDispatcher`]. The request
//! timeout bounds both reading HTTP/1.1 request headers and answering each
//! request.
//!
//! On shutdown the accept loop stops. Connections already being served
//! are not drained.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::body::Incoming;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use loraapp_rpc::incoming::{accept_tls, ACCEPT_BACKOFF};
use loraapp_rpc::server::wait_for_shutdown;
use loraapp_rpc::TransportCredentials;
use loraapp_types::config::{HttpListenerConfig, TimeoutConfig};
use loraapp_types::{AppServerError, Result};

use crate::dispatcher::ProtocolDispatcher;

/// Lifecycle of the public listener.
pub struct PublicListener;

impl PublicListener {
    /// Binds the public listener.
    ///
    /// # Errors
    ///
    /// [`AppServerError::NetworkError`] when the address cannot be bound.
    pub async fn bind(config: &HttpListenerConfig) -> Result<TcpListener> {
        TcpListener::bind(config.bind)
            .await
            .map_err(|e| AppServerError::NetworkError {
                reason: format!("failed to bind http listener {}: {e}", config.bind),
            })
    }

    /// Serves `dispatcher` on `listener` until `shutdown_rx` fires and
    /// returns the accept task.
    pub fn spawn(
        listener: TcpListener,
        credentials: TransportCredentials,
        dispatcher: ProtocolDispatcher,
        timeouts: TimeoutConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let addr: SocketAddr = listener
            .local_addr()
            .map_err(|e| AppServerError::NetworkError {
                reason: format!("http listener has no local address: {e}"),
            })?;
        let acceptor = credentials.acceptor();
        let dispatcher = dispatcher.with_request_timeout(timeouts.request);

        tracing::info!(%addr, "public listener serving grpc and rest with tls");

        let handle = tokio::spawn(async move {
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
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let Some(tls) = accept_tls(&acceptor, stream, peer, timeouts.handshake).await
                    else {
                        return;
                    };

                    let service = hyper::service::service_fn(move |request: http::Request<Incoming>| {
                        let dispatcher = dispatcher.clone();
                        async move { Ok::<_, Infallible>(dispatcher.dispatch(request).await) }
                    });

                    let mut builder = auto::Builder::new(TokioExecutor::new());
                    builder
                        .http1()
                        .timer(TokioTimer::new())
                        .header_read_timeout(timeouts.request);
                    if let Err(e) = builder.serve_connection(TokioIo::new(tls), service).await {
                        tracing::debug!(%peer, error = %e, "connection closed with error");
                    }
                });
            }

            tracing::info!("public listener stopped");
        });

        Ok(handle)
    }
}

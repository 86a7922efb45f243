//! RPC server entry points.
//!
//! - [`RpcServer::bind`] + [`RpcServer::spawn`] run the internal
//!   `ApplicationServer` API on its own listener, in plaintext or behind
//!   [`TransportCredentials`].
//! - [`client_routes`] builds the client-facing services, each wrapped in
//!   the [`AuthInterceptor`]. The routes are not bound to a listener here;
//!   the protocol dispatcher on the public listener serves them.
//!
//! # Graceful shutdown
//!
//! Every server takes a `tokio::sync::watch::Receiver<bool>`. When the
//! value becomes `true` the accept loop stops and tonic finishes the
//! connections it is serving.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::service::Routes;
use tonic::transport::Server;

use loraapp_storage::StorageEngine;
use loraapp_types::config::{RpcListenerConfig, TimeoutConfig};
use loraapp_types::{AppServerError, Result};

use crate::api::channel_list_server::ChannelListServer;
use crate::api::channel_server::ChannelServer;
use crate::api::downlink_queue_server::DownlinkQueueServer;
use crate::api::node_server::NodeServer;
use crate::api::node_session_server::NodeSessionServer;
use crate::appserver::application_server_server::ApplicationServerServer;
use crate::appserver_service::ApplicationServerService;
use crate::auth::{AuthInterceptor, AuthValidator};
use crate::channel_list_service::ChannelListService;
use crate::channel_service::ChannelService;
use crate::downlink_queue_service::DownlinkQueueService;
use crate::incoming::tls_incoming;
use crate::node_service::NodeService;
use crate::node_session_service::NodeSessionService;
use crate::registry::ServiceName;
use crate::tls::TransportCredentials;

// ---------------------------------------------------------------------------
// Shutdown helper
// ---------------------------------------------------------------------------

/// Returns a future that resolves when the shutdown watch fires (or its
/// sender is dropped).
pub async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            break;
        }
        if rx.changed().await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Client-facing routes
// ---------------------------------------------------------------------------

/// Builds the client-facing services over `storage`, each guarded by
/// `validator`.
///
/// Returns the routes together with the services registered, in
/// [`ServiceName::ALL`] order.
pub fn client_routes(
    storage: Arc<StorageEngine>,
    validator: Arc<AuthValidator>,
) -> (Routes, Vec<ServiceName>) {
    let interceptor = AuthInterceptor::new(validator);
    let mut builder = Routes::builder();
    let mut registered = Vec::with_capacity(ServiceName::ALL.len());

    for service in ServiceName::ALL {
        let storage = Arc::clone(&storage);
        let interceptor = interceptor.clone();
        match service {
            ServiceName::Channel => builder.add_service(ChannelServer::with_interceptor(
                ChannelService::new(storage),
                interceptor,
            )),
            ServiceName::ChannelList => builder.add_service(ChannelListServer::with_interceptor(
                ChannelListService::new(storage),
                interceptor,
            )),
            ServiceName::DownlinkQueue => {
                builder.add_service(DownlinkQueueServer::with_interceptor(
                    DownlinkQueueService::new(storage),
                    interceptor,
                ))
            }
            ServiceName::Node => builder.add_service(NodeServer::with_interceptor(
                NodeService::new(storage),
                interceptor,
            )),
            ServiceName::NodeSession => builder.add_service(NodeSessionServer::with_interceptor(
                NodeSessionService::new(storage),
                interceptor,
            )),
        };
        tracing::debug!(service = %service, "registered rpc service");
        registered.push(service);
    }

    (builder.routes(), registered)
}

// ---------------------------------------------------------------------------
// Internal RPC server
// ---------------------------------------------------------------------------

/// Lifecycle of the internal RPC listener.
pub struct RpcServer;

impl RpcServer {
    /// Binds the internal listener.
    ///
    /// # Errors
    ///
    /// [`AppServerError::NetworkError`] when the address cannot be bound.
    pub async fn bind(config: &RpcListenerConfig) -> Result<TcpListener> {
        TcpListener::bind(config.bind)
            .await
            .map_err(|e| AppServerError::NetworkError {
                reason: format!("failed to bind rpc listener {}: {e}", config.bind),
            })
    }

    /// Serves the `ApplicationServer` API on `listener` and returns the
    /// server task.
    ///
    /// `credentials` of `None` serves plaintext.
    pub fn spawn(
        listener: TcpListener,
        credentials: Option<TransportCredentials>,
        storage: Arc<StorageEngine>,
        timeouts: TimeoutConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Result<JoinHandle<()>> {
        let addr: SocketAddr = listener
            .local_addr()
            .map_err(|e| AppServerError::NetworkError {
                reason: format!("rpc listener has no local address: {e}"),
            })?;

        let service = ApplicationServerServer::new(ApplicationServerService::new(storage));
        let router = Server::builder()
            .timeout(timeouts.request)
            .add_service(service);

        let handle = match credentials {
            Some(credentials) => {
                tracing::info!(
                    %addr,
                    mutual_tls = credentials.requires_client_cert(),
                    "internal rpc server listening with tls"
                );
                let incoming = tls_incoming(
                    listener,
                    credentials.acceptor(),
                    timeouts.handshake,
                    shutdown_rx.clone(),
                );
                tokio::spawn(async move {
                    let result = router
                        .serve_with_incoming_shutdown(incoming, wait_for_shutdown(shutdown_rx))
                        .await;
                    if let Err(e) = result {
                        tracing::error!(%e, "internal rpc server error");
                    }
                    tracing::info!("internal rpc server (tls) stopped");
                })
            }
            None => {
                tracing::warn!(%addr, "internal rpc server listening without tls");
                let incoming = TcpListenerStream::new(listener);
                tokio::spawn(async move {
                    let result = router
                        .serve_with_incoming_shutdown(incoming, wait_for_shutdown(shutdown_rx))
                        .await;
                    if let Err(e) = result {
                        tracing::error!(%e, "internal rpc server error");
                    }
                    tracing::info!("internal rpc server stopped");
                })
            }
        };

        Ok(handle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

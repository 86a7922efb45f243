//! Startup chain of the server.
//!
//! Every step either succeeds or aborts startup before anything serves:
//!
//! 1. storage
//! 2. internal RPC credentials, bind the internal listener
//! 3. auth validator, client-facing services guarded by it
//! 4. JSON gateway over a lazily dialled loopback channel
//! 5. check that RPC routes and gateway cover the same services
//! 6. protocol dispatcher, bind the public listener
//! 7. serve both listeners

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use loraapp_gateway::{loopback, rest_router, ProtocolDispatcher, PublicListener};
use loraapp_rpc::registry::ensure_same_services;
use loraapp_rpc::server::client_routes;
use loraapp_rpc::tls::LoopbackTrust;
use loraapp_rpc::{AuthValidator, RpcServer, TransportCredentials};
use loraapp_storage::StorageEngine;
use loraapp_types::config::ServerConfig;
use loraapp_types::{AppServerError, Result};

/// Both listeners, serving.
pub struct Running {
    pub rpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Running {
    /// The listener tasks, for teardown.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// Runs the startup chain and starts serving.
///
/// Listeners stop accepting when `shutdown_rx` flips to `true`.
pub async fn start(config: &ServerConfig, shutdown_rx: watch::Receiver<bool>) -> Result<Running> {
    // 1. Storage.
    let storage = Arc::new(StorageEngine::open(&config.storage_path)?);
    tracing::info!(path = %config.storage_path.display(), "storage opened");

    // 2. Internal RPC listener.
    let rpc_credentials = TransportCredentials::for_rpc(&config.rpc.tls)?;
    let rpc_listener = RpcServer::bind(&config.rpc).await?;
    let rpc_addr = local_addr(&rpc_listener, "rpc")?;

    // 3. Auth and client-facing services.
    let validator = Arc::new(AuthValidator::from_secret(config.auth.jwt_secret.as_deref())?);
    let (routes, rpc_services) = client_routes(Arc::clone(&storage), validator);

    // 4. JSON gateway.
    let public_credentials = TransportCredentials::for_public(&config.http.tls)?;
    let trust = LoopbackTrust::from_pem_file(&config.http.tls.cert_path)?;
    let channel = loopback::connect_lazy(config.loopback_port(), &trust, &config.timeouts)?;
    let (rest, gateway_services) = rest_router(channel, config.http.static_dir.clone());

    // 5. Both sides must expose the same services.
    ensure_same_services(&rpc_services, &gateway_services)?;

    // 6. Public listener.
    let dispatcher = ProtocolDispatcher::new(routes, rest);
    let http_listener = PublicListener::bind(&config.http).await?;
    let http_addr = local_addr(&http_listener, "http")?;

    // 7. Serve.
    let rpc_task = RpcServer::spawn(
        rpc_listener,
        rpc_credentials,
        Arc::clone(&storage),
        config.timeouts,
        shutdown_rx.clone(),
    )?;
    let http_task = PublicListener::spawn(
        http_listener,
        public_credentials,
        dispatcher,
        config.timeouts,
        shutdown_rx,
    )?;

    Ok(Running {
        rpc_addr,
        http_addr,
        tasks: vec![rpc_task, http_task],
    })
}

fn local_addr(listener: &tokio::net::TcpListener, name: &str) -> Result<SocketAddr> {
    listener.local_addr().map_err(|e| AppServerError::NetworkError {
        reason: format!("{name} listener has no local address: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

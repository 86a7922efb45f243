//! Public HTTP surface of the LoRa application server.
//!
//! One TLS port carries both protocols. The [`ProtocolDispatcher`] sends
//! gRPC requests (HTTP/2 with a gRPC content type) to the client-facing
//! routes of `loraapp-rpc`; everything else goes to the REST router:
//!
//! ```text
//! GET  /api        landing page
//! *    /api/...    JSON gateway -> loopback gRPC -> this port
//! *    other       static files (404 without a static directory)
//! ```

pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod listener;
pub mod loopback;
pub mod static_files;

use std::path::PathBuf;

use axum::Router;
use tonic::transport::Channel;

use loraapp_rpc::ServiceName;

pub use dispatcher::{classify, DispatchDecision, ProtocolDispatcher};
pub use error::GatewayError;
pub use listener::PublicListener;

/// Builds the REST side of the public listener: the JSON gateway over
/// `channel` plus the static responder.
///
/// Returns the router and the services the gateway registered.
pub fn rest_router(channel: Channel, static_dir: Option<PathBuf>) -> (Router, Vec<ServiceName>) {
    let (api, registered) = gateway::router(channel);
    (static_files::with_static_files(api, static_dir), registered)
}

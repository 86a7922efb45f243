//! gRPC layer of the LoRa application server.
//!
//! Hosts the client-facing services (Channel, ChannelList, DownlinkQueue,
//! Node, NodeSession) and the internal ApplicationServer service, and owns
//! the transport-security and authentication building blocks that the
//! gateway and the server binary reuse.
//!
//! # Security model
//!
//! - **Internal listener**: plaintext, server-only TLS, or mutual TLS with
//!   client certificates verified against a CA bundle ([`tls`]).
//! - **Client-facing services**: every request passes the [`auth`]
//!   interceptor, which validates a JWT (or, when no secret is configured,
//!   lets everything through and says so at startup).
//!
//! # Modules
//!
//! - [`auth`]: `AuthValidator`, `AuthInterceptor`.
//! - [`tls`]: `TransportCredentials`, `LoopbackTrust`.
//! - [`registry`]: the fixed set of client-facing services.
//! - [`incoming`]: TLS accept loop feeding a connection stream.
//! - [`server`]: `RpcServer` (spawns tonic on a bound listener).
//! - `*_service`: service implementations over `loraapp-storage`.

pub mod appserver_service;
pub mod auth;
pub mod channel_list_service;
pub mod channel_service;
pub mod downlink_queue_service;
pub mod incoming;
pub mod json;
pub mod node_service;
pub mod node_session_service;
pub mod registry;
pub mod server;
pub mod status;
pub mod tls;

/// Generated protobuf/gRPC code from `proto/api.proto`.
pub mod api {
    tonic::include_proto!("api");
}

/// Generated protobuf/gRPC code from `proto/appserver.proto`.
pub mod appserver {
    tonic::include_proto!("appserver");
}

// Re-exports for consumers.
pub use auth::{AuthInterceptor, AuthValidator, Principal};
pub use registry::ServiceName;
pub use server::RpcServer;
pub use tls::{AlpnProtocols, LoopbackTrust, TransportCredentials};

//! The fixed set of client-facing services.
//!
//! The RPC server and the JSON gateway both iterate [`ServiceName::ALL`]
//! when registering, and report the gRPC names they registered. The
//! server binary compares both lists at startup.

use std::fmt;

use tonic::server::NamedService;

use crate::api;
use loraapp_types::{AppServerError, Result};

/// A client-facing service.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub enum ServiceName {
    Channel,
    ChannelList,
    DownlinkQueue,
    Node,
    NodeSession,
}

impl ServiceName {
    /// Every client-facing service, in registration order.
    pub const ALL: [ServiceName; 5] = [
        ServiceName::Channel,
        ServiceName::ChannelList,
        ServiceName::DownlinkQueue,
        ServiceName::Node,
        ServiceName::NodeSession,
    ];

    /// Fully qualified gRPC service name (`package.Service`).
    pub fn grpc_name(self) -> &'static str {
        use api::channel_list_server::ChannelListServer;
        use api::channel_server::ChannelServer;
        use api::downlink_queue_server::DownlinkQueueServer;
        use api::node_server::NodeServer;
        use api::node_session_server::NodeSessionServer;

        use crate::channel_list_service::ChannelListService;
        use crate::channel_service::ChannelService;
        use crate::downlink_queue_service::DownlinkQueueService;
        use crate::node_service::NodeService;
        use crate::node_session_service::NodeSessionService;

        match self {
            Self::Channel => <ChannelServer<ChannelService> as NamedService>::NAME,
            Self::ChannelList => <ChannelListServer<ChannelListService> as NamedService>::NAME,
            Self::DownlinkQueue => {
                <DownlinkQueueServer<DownlinkQueueService> as NamedService>::NAME
            }
            Self::Node => <NodeServer<NodeService> as NamedService>::NAME,
            Self::NodeSession => <NodeSessionServer<NodeSessionService> as NamedService>::NAME,
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.grpc_name())
    }
}

/// Checks that the RPC routes and the gateway registered the same services.
///
/// # Errors
///
/// [`AppServerError::RegistrationError`] listing the services that only one
/// side registered.
pub fn ensure_same_services(rpc: &[ServiceName], gateway: &[ServiceName]) -> Result<()> {
    let mut rpc = rpc.to_vec();
    let mut gateway = gateway.to_vec();
    rpc.sort();
    rpc.dedup();
    gateway.sort();
    gateway.dedup();

    if rpc == gateway {
        return Ok(());
    }

    let only_rpc: Vec<String> = rpc
        .iter()
        .filter(|s| !gateway.contains(s))
        .map(|s| s.to_string())
        .collect();
    let only_gateway: Vec<String> = gateway
        .iter()
        .filter(|s| !rpc.contains(s))
        .map(|s| s.to_string())
        .collect();

    Err(AppServerError::RegistrationError {
        reason: format!(
            "service sets differ (rpc only: [{}], gateway only: [{}])",
            only_rpc.join(", "),
            only_gateway.join(", ")
        ),
    })
}

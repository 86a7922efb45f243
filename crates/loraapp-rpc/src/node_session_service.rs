//! `NodeSession` gRPC implementation.
//!
//! A session holds the activation state of a node (device address,
//! session keys, frame counters). `GetRandomDevAddr` proposes an address
//! that no stored session uses yet.

use std::sync::Arc;

use rand::RngCore;
use tonic::{Request, Response, Status};

use loraapp_storage::{NodeSessionRecord, StorageEngine};
use loraapp_types::{DevAddr, Eui64};

use crate::api;
use crate::node_service::{rx_window_from_proto, rx_window_to_proto};
use crate::status::{parse_field, to_status};

/// Attempts at drawing an unused device address before giving up.
const DEV_ADDR_ATTEMPTS: usize = 16;

/// Builds a [`NodeSessionRecord`] from a create or update request.
macro_rules! session_record {
    ($req:expr) => {{
        let req = $req;
        NodeSessionRecord {
            dev_eui: parse_field("devEUI", &req.dev_eui)?,
            app_eui: parse_field("appEUI", &req.app_eui)?,
            dev_addr: parse_field("devAddr", &req.dev_addr)?,
            app_s_key: parse_field("appSKey", &req.app_s_key)?,
            nwk_s_key: parse_field("nwkSKey", &req.nwk_s_key)?,
            f_cnt_up: req.f_cnt_up,
            f_cnt_down: req.f_cnt_down,
            rx_delay: req.rx_delay,
            rx1_dr_offset: req.rx1_dr_offset,
            rx_window: rx_window_from_proto(req.rx_window)?,
            rx2_dr: req.rx2_dr,
            relax_fcnt: req.relax_fcnt,
        }
    }};
}

fn to_proto(record: NodeSessionRecord) -> api::GetNodeSessionResponse {
    api::GetNodeSessionResponse {
        dev_addr: record.dev_addr.to_string(),
        app_eui: record.app_eui.to_string(),
        dev_eui: record.dev_eui.to_string(),
        app_s_key: record.app_s_key.to_string(),
        nwk_s_key: record.nwk_s_key.to_string(),
        f_cnt_up: record.f_cnt_up,
        f_cnt_down: record.f_cnt_down,
        rx_delay: record.rx_delay,
        rx1_dr_offset: record.rx1_dr_offset,
        rx_window: rx_window_to_proto(record.rx_window),
        rx2_dr: record.rx2_dr,
        relax_fcnt: record.relax_fcnt,
    }
}

/// gRPC implementation of `api.NodeSession`.
pub struct NodeSessionService {
    storage: Arc<StorageEngine>,
}

impl NodeSessionService {
    /// Creates the service over shared storage.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    fn random_dev_addr(&self) -> std::result::Result<DevAddr, Status> {
        let sessions = self.storage.node_sessions().map_err(to_status)?;
        let mut rng = rand::thread_rng();
        for _ in 0..DEV_ADDR_ATTEMPTS {
            let mut bytes = [0u8; 4];
            rng.fill_bytes(&mut bytes);
            let candidate = DevAddr::new(bytes);
            if !sessions.dev_addr_in_use(&candidate).map_err(to_status)? {
                return Ok(candidate);
            }
        }
        Err(Status::resource_exhausted("no free device address found"))
    }
}

#[tonic::async_trait]
impl api::node_session_server::NodeSession for NodeSessionService {
    async fn create(
        &self,
        request: Request<api::CreateNodeSessionRequest>,
    ) -> std::result::Result<Response<api::CreateNodeSessionResponse>, Status> {
        let record = session_record!(request.into_inner());
        self.storage
            .node_sessions()
            .and_then(|store| store.create(&record))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %record.dev_eui, dev_addr = %record.dev_addr, "node session created");
        Ok(Response::new(api::CreateNodeSessionResponse {}))
    }

    async fn get(
        &self,
        request: Request<api::GetNodeSessionRequest>,
    ) -> std::result::Result<Response<api::GetNodeSessionResponse>, Status> {
        let dev_eui: Eui64 = parse_field("devEUI", &request.into_inner().dev_eui)?;
        let record = self
            .storage
            .node_sessions()
            .and_then(|store| store.get(&dev_eui))
            .map_err(to_status)?;
        Ok(Response::new(to_proto(record)))
    }

    async fn update(
        &self,
        request: Request<api::UpdateNodeSessionRequest>,
    ) -> std::result::Result<Response<api::UpdateNodeSessionResponse>, Status> {
        let record = session_record!(request.into_inner());
        self.storage
            .node_sessions()
            .and_then(|store| store.update(&record))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %record.dev_eui, "node session updated");
        Ok(Response::new(api::UpdateNodeSessionResponse {}))
    }

    async fn delete(
        &self,
        request: Request<api::DeleteNodeSessionRequest>,
    ) -> std::result::Result<Response<api::DeleteNodeSessionResponse>, Status> {
        let dev_eui: Eui64 = parse_field("devEUI", &request.into_inner().dev_eui)?;
        self.storage
            .node_sessions()
            .and_then(|store| store.delete(&dev_eui))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %dev_eui, "node session deleted");
        Ok(Response::new(api::DeleteNodeSessionResponse {}))
    }

    async fn get_random_dev_addr(
        &self,
        request: Request<api::GetRandomDevAddrRequest>,
    ) -> std::result::Result<Response<api::GetRandomDevAddrResponse>, Status> {
        let dev_eui: Eui64 = parse_field("devEUI", &request.into_inner().dev_eui)?;
        let exists = self
            .storage
            .nodes()
            .and_then(|store| store.exists(&dev_eui))
            .map_err(to_status)?;
        if !exists {
            return Err(Status::not_found(format!("node {dev_eui} does not exist")));
        }

        let dev_addr = self.random_dev_addr()?;
        Ok(Response::new(api::GetRandomDevAddrResponse {
            dev_addr: dev_addr.to_string(),
        }))
    }
}

//! `Node` gRPC implementation.
//!
//! Nodes are keyed by DevEUI. Identifiers and keys travel as hex strings
//! and are validated here; a malformed value is `InvalidArgument`.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use loraapp_storage::{NodeRecord, Page, StorageEngine};
use loraapp_types::{Eui64, RxWindow};

use crate::api;
use crate::status::{parse_field, to_status};

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

pub(crate) fn rx_window_from_proto(value: i32) -> std::result::Result<RxWindow, Status> {
    match api::RxWindow::try_from(value) {
        Ok(api::RxWindow::Rx1) => Ok(RxWindow::Rx1),
        Ok(api::RxWindow::Rx2) => Ok(RxWindow::Rx2),
        Err(_) => Err(Status::invalid_argument(format!(
            "rxWindow: unknown value {value}"
        ))),
    }
}

pub(crate) fn rx_window_to_proto(value: RxWindow) -> i32 {
    match value {
        RxWindow::Rx1 => api::RxWindow::Rx1 as i32,
        RxWindow::Rx2 => api::RxWindow::Rx2 as i32,
    }
}

/// Builds a [`NodeRecord`] from any request message carrying the node
/// fields (create and update share the layout).
macro_rules! node_record {
    ($req:expr) => {{
        let req = $req;
        NodeRecord {
            dev_eui: parse_field("devEUI", &req.dev_eui)?,
            app_eui: parse_field("appEUI", &req.app_eui)?,
            app_key: parse_field("appKey", &req.app_key)?,
            name: req.name,
            rx_window: rx_window_from_proto(req.rx_window)?,
            rx_delay: req.rx_delay,
            rx1_dr_offset: req.rx1_dr_offset,
            rx2_dr: req.rx2_dr,
            channel_list_id: (req.channel_list_id > 0).then_some(req.channel_list_id),
            is_abp: req.is_abp,
            is_class_c: req.is_class_c,
            relax_fcnt: req.relax_fcnt,
        }
    }};
}

fn to_proto(record: NodeRecord) -> api::GetNodeResponse {
    api::GetNodeResponse {
        dev_eui: record.dev_eui.to_string(),
        app_eui: record.app_eui.to_string(),
        app_key: record.app_key.to_string(),
        name: record.name,
        rx_window: rx_window_to_proto(record.rx_window),
        rx_delay: record.rx_delay,
        rx1_dr_offset: record.rx1_dr_offset,
        rx2_dr: record.rx2_dr,
        channel_list_id: record.channel_list_id.unwrap_or(0),
        is_abp: record.is_abp,
        is_class_c: record.is_class_c,
        relax_fcnt: record.relax_fcnt,
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// gRPC implementation of `api.Node`.
pub struct NodeService {
    storage: Arc<StorageEngine>,
}

impl NodeService {
    /// Creates the service over shared storage.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }
}

#[tonic::async_trait]
impl api::node_server::Node for NodeService {
    async fn create(
        &self,
        request: Request<api::CreateNodeRequest>,
    ) -> std::result::Result<Response<api::CreateNodeResponse>, Status> {
        let record = node_record!(request.into_inner());
        self.storage
            .nodes()
            .and_then(|store| store.create(&record))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %record.dev_eui, name = %record.name, "node created");
        Ok(Response::new(api::CreateNodeResponse {}))
    }

    async fn get(
        &self,
        request: Request<api::GetNodeRequest>,
    ) -> std::result::Result<Response<api::GetNodeResponse>, Status> {
        let dev_eui: Eui64 = parse_field("devEUI", &request.into_inner().dev_eui)?;
        let record = self
            .storage
            .nodes()
            .and_then(|store| store.get(&dev_eui))
            .map_err(to_status)?;
        Ok(Response::new(to_proto(record)))
    }

    async fn update(
        &self,
        request: Request<api::UpdateNodeRequest>,
    ) -> std::result::Result<Response<api::UpdateNodeResponse>, Status> {
        let record = node_record!(request.into_inner());
        self.storage
            .nodes()
            .and_then(|store| store.update(&record))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %record.dev_eui, "node updated");
        Ok(Response::new(api::UpdateNodeResponse {}))
    }

    async fn delete(
        &self,
        request: Request<api::DeleteNodeRequest>,
    ) -> std::result::Result<Response<api::DeleteNodeResponse>, Status> {
        let dev_eui: Eui64 = parse_field("devEUI", &request.into_inner().dev_eui)?;
        self.storage
            .nodes()
            .and_then(|store| store.delete(&dev_eui))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %dev_eui, "node deleted");
        Ok(Response::new(api::DeleteNodeResponse {}))
    }

    async fn list(
        &self,
        request: Request<api::ListNodeRequest>,
    ) -> std::result::Result<Response<api::ListNodeResponse>, Status> {
        let req = request.into_inner();
        let page = Page::from_request(req.limit, req.offset);
        let (total, records) = self
            .storage
            .nodes()
            .and_then(|store| store.list(page))
            .map_err(to_status)?;
        Ok(Response::new(api::ListNodeResponse {
            total_count: total as i64,
            result: records.into_iter().map(to_proto).collect(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

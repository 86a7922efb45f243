//! `DownlinkQueue` gRPC implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use loraapp_storage::{DownlinkQueueItemRecord, StorageEngine};
use loraapp_types::Eui64;

use crate::api;
use crate::status::{parse_field, to_status};

/// gRPC implementation of `api.DownlinkQueue`.
pub struct DownlinkQueueService {
    storage: Arc<StorageEngine>,
}

impl DownlinkQueueService {
    /// Creates the service over shared storage.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }
}

fn to_proto(record: DownlinkQueueItemRecord) -> api::DownlinkQueueItem {
    api::DownlinkQueueItem {
        id: record.id,
        dev_eui: record.dev_eui.to_string(),
        confirmed: record.confirmed,
        pending: record.pending,
        f_port: record.f_port,
        data: record.data,
    }
}

#[tonic::async_trait]
impl api::downlink_queue_server::DownlinkQueue for DownlinkQueueService {
    async fn enqueue(
        &self,
        request: Request<api::EnqueueDownlinkQueueItemRequest>,
    ) -> std::result::Result<Response<api::EnqueueDownlinkQueueItemResponse>, Status> {
        let req = request.into_inner();
        let dev_eui: Eui64 = parse_field("devEUI", &req.dev_eui)?;
        let id = self
            .storage
            .downlink_queue()
            .and_then(|store| store.enqueue(&dev_eui, req.confirmed, req.f_port, req.data))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %dev_eui, id, confirmed = req.confirmed, "downlink queued");
        Ok(Response::new(api::EnqueueDownlinkQueueItemResponse { id }))
    }

    async fn delete(
        &self,
        request: Request<api::DeleteDownlinkQueueItemRequest>,
    ) -> std::result::Result<Response<api::DeleteDownlinkQueueItemResponse>, Status> {
        let req = request.into_inner();
        let dev_eui: Eui64 = parse_field("devEUI", &req.dev_eui)?;
        self.storage
            .downlink_queue()
            .and_then(|store| store.delete(&dev_eui, req.id))
            .map_err(to_status)?;
        tracing::info!(dev_eui = %dev_eui, id = req.id, "downlink removed from queue");
        Ok(Response::new(api::DeleteDownlinkQueueItemResponse {}))
    }

    async fn list(
        &self,
        request: Request<api::ListDownlinkQueueItemsRequest>,
    ) -> std::result::Result<Response<api::ListDownlinkQueueItemsResponse>, Status> {
        let dev_eui: Eui64 = parse_field("devEUI", &request.into_inner().dev_eui)?;
        let items = self
            .storage
            .downlink_queue()
            .and_then(|store| store.list(&dev_eui))
            .map_err(to_status)?;
        Ok(Response::new(api::ListDownlinkQueueItemsResponse {
            items: items.into_iter().map(to_proto).collect(),
        }))
    }
}

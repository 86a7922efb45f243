//! `Channel` gRPC implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use loraapp_storage::{ChannelRecord, StorageEngine};

use crate::api;
use crate::status::to_status;

/// gRPC implementation of `api.Channel`.
pub struct ChannelService {
    storage: Arc<StorageEngine>,
}

impl ChannelService {
    /// Creates the service over shared storage.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }
}

fn to_proto(record: ChannelRecord) -> api::GetChannelResponse {
    api::GetChannelResponse {
        id: record.id,
        channel_list_id: record.channel_list_id,
        channel: record.channel,
        frequency: record.frequency,
    }
}

#[tonic::async_trait]
impl api::channel_server::Channel for ChannelService {
    async fn create(
        &self,
        request: Request<api::CreateChannelRequest>,
    ) -> std::result::Result<Response<api::CreateChannelResponse>, Status> {
        let req = request.into_inner();
        let id = self
            .storage
            .channels()
            .and_then(|store| store.create(req.channel_list_id, req.channel, req.frequency))
            .map_err(to_status)?;
        tracing::info!(
            id,
            channel_list_id = req.channel_list_id,
            channel = req.channel,
            "channel created"
        );
        Ok(Response::new(api::CreateChannelResponse { id }))
    }

    async fn get(
        &self,
        request: Request<api::GetChannelRequest>,
    ) -> std::result::Result<Response<api::GetChannelResponse>, Status> {
        let id = request.into_inner().id;
        let record = self
            .storage
            .channels()
            .and_then(|store| store.get(id))
            .map_err(to_status)?;
        Ok(Response::new(to_proto(record)))
    }

    async fn update(
        &self,
        request: Request<api::UpdateChannelRequest>,
    ) -> std::result::Result<Response<api::UpdateChannelResponse>, Status> {
        let req = request.into_inner();
        let record = ChannelRecord {
            id: req.id,
            channel_list_id: req.channel_list_id,
            channel: req.channel,
            frequency: req.frequency,
        };
        self.storage
            .channels()
            .and_then(|store| store.update(&record))
            .map_err(to_status)?;
        tracing::info!(id = req.id, "channel updated");
        Ok(Response::new(api::UpdateChannelResponse {}))
    }

    async fn delete(
        &self,
        request: Request<api::DeleteChannelRequest>,
    ) -> std::result::Result<Response<api::DeleteChannelResponse>, Status> {
        let id = request.into_inner().id;
        self.storage
            .channels()
            .and_then(|store| store.delete(id))
            .map_err(to_status)?;
        tracing::info!(id, "channel deleted");
        Ok(Response::new(api::DeleteChannelResponse {}))
    }

    async fn list_by_channel_list(
        &self,
        request: Request<api::ListChannelsByChannelListRequest>,
    ) -> std::result::Result<Response<api::ListChannelsByChannelListResponse>, Status> {
        let channel_list_id = request.into_inner().id;
        let records = self
            .storage
            .channels()
            .and_then(|store| store.list_by_channel_list(channel_list_id))
            .map_err(to_status)?;
        Ok(Response::new(api::ListChannelsByChannelListResponse {
            result: records.into_iter().map(to_proto).collect(),
        }))
    }
}

//! `ChannelList` gRPC implementation.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use loraapp_storage::{ChannelListRecord, Page, StorageEngine};

use crate::api;
use crate::status::to_status;

/// gRPC implementation of `api.ChannelList`.
pub struct ChannelListService {
    storage: Arc<StorageEngine>,
}

impl ChannelListService {
    /// Creates the service over shared storage.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }
}

fn to_proto(record: ChannelListRecord) -> api::GetChannelListResponse {
    api::GetChannelListResponse {
        id: record.id,
        name: record.name,
    }
}

#[tonic::async_trait]
impl api::channel_list_server::ChannelList for ChannelListService {
    async fn create(
        &self,
        request: Request<api::CreateChannelListRequest>,
    ) -> std::result::Result<Response<api::CreateChannelListResponse>, Status> {
        let req = request.into_inner();
        let id = self
            .storage
            .channel_lists()
            .and_then(|store| store.create(&req.name))
            .map_err(to_status)?;
        tracing::info!(id, name = %req.name, "channel list created");
        Ok(Response::new(api::CreateChannelListResponse { id }))
    }

    async fn get(
        &self,
        request: Request<api::GetChannelListRequest>,
    ) -> std::result::Result<Response<api::GetChannelListResponse>, Status> {
        let id = request.into_inner().id;
        let record = self
            .storage
            .channel_lists()
            .and_then(|store| store.get(id))
            .map_err(to_status)?;
        Ok(Response::new(to_proto(record)))
    }

    async fn update(
        &self,
        request: Request<api::UpdateChannelListRequest>,
    ) -> std::result::Result<Response<api::UpdateChannelListResponse>, Status> {
        let req = request.into_inner();
        self.storage
            .channel_lists()
            .and_then(|store| store.update(req.id, &req.name))
            .map_err(to_status)?;
        tracing::info!(id = req.id, "channel list updated");
        Ok(Response::new(api::UpdateChannelListResponse {}))
    }

    async fn delete(
        &self,
        request: Request<api::DeleteChannelListRequest>,
    ) -> std::result::Result<Response<api::DeleteChannelListResponse>, Status> {
        let id = request.into_inner().id;
        self.storage
            .channel_lists()
            .and_then(|store| store.delete(id))
            .map_err(to_status)?;
        tracing::info!(id, "channel list deleted");
        Ok(Response::new(api::DeleteChannelListResponse {}))
    }

    async fn list(
        &self,
        request: Request<api::ListChannelListRequest>,
    ) -> std::result::Result<Response<api::ListChannelListResponse>, Status> {
        let req = request.into_inner();
        let page = Page::from_request(req.limit, req.offset);
        let (total, records) = self
            .storage
            .channel_lists()
            .and_then(|store| store.list(page))
            .map_err(to_status)?;
        Ok(Response::new(api::ListChannelListResponse {
            total_count: total as i64,
            result: records.into_iter().map(to_proto).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::channel_list_server::ChannelList;
    use tonic::Code;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    fn service() -> std::result::Result<ChannelListService, Box<dyn std::error::Error>> {
        Ok(ChannelListService::new(Arc::new(StorageEngine::open_temporary()?)))
    }

    #[tokio::test]
    async fn create_get_list_delete() -> TestResult {
        let svc = service()?;

        let empty = svc
            .list(Request::new(api::ListChannelListRequest::default()))
            .await?
            .into_inner();
        assert_eq!(empty.total_count, 0);
        assert!(empty.result.is_empty());

        let id = svc
            .create(Request::new(api::CreateChannelListRequest {
                name: "EU868".into(),
            }))
            .await?
            .into_inner()
            .id;

        let got = svc
            .get(Request::new(api::GetChannelListRequest { id }))
            .await?
            .into_inner();
        assert_eq!(got.name, "EU868");

        let listed = svc
            .list(Request::new(api::ListChannelListRequest { limit: 0, offset: 0 }))
            .await?
            .into_inner();
        assert_eq!(listed.total_count, 1);
        assert_eq!(listed.result[0].id, id);

        svc.delete(Request::new(api::DeleteChannelListRequest { id }))
            .await?;
        let missing = svc.get(Request::new(api::GetChannelListRequest { id })).await;
        assert_eq!(missing.err().map(|s| s.code()), Some(Code::NotFound));
        Ok(())
    }

    #[tokio::test]
    async fn empty_name_is_invalid() -> TestResult {
        let svc = service()?;
        let result = svc
            .create(Request::new(api::CreateChannelListRequest::default()))
            .await;
        assert_eq!(result.err().map(|s| s.code()), Some(Code::InvalidArgument));
        Ok(())
    }
}

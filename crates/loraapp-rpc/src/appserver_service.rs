//! `ApplicationServer` gRPC implementation (internal API).
//!
//! Called by the network server over the internal listener. Uplinks and
//! errors are logged; downlinks are served from the per-node queue.
//! There is no token authentication on this service: access control is
//! the listener's transport security.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use loraapp_storage::StorageEngine;
use loraapp_types::Eui64;

use crate::appserver;
use crate::status::{parse_field, to_status};

/// gRPC implementation of `appserver.ApplicationServer`.
pub struct ApplicationServerService {
    storage: Arc<StorageEngine>,
}

impl ApplicationServerService {
    /// Creates the service over shared storage.
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    fn require_node(&self, dev_eui: &Eui64) -> std::result::Result<(), Status> {
        let exists = self
            .storage
            .nodes()
            .and_then(|store| store.exists(dev_eui))
            .map_err(to_status)?;
        if exists {
            Ok(())
        } else {
            Err(Status::not_found(format!("node {dev_eui} does not exist")))
        }
    }
}

#[tonic::async_trait]
impl appserver::application_server_server::ApplicationServer for ApplicationServerService {
    async fn handle_data_up(
        &self,
        request: Request<appserver::HandleDataUpRequest>,
    ) -> std::result::Result<Response<appserver::HandleDataUpResponse>, Status> {
        let req = request.into_inner();
        let dev_eui: Eui64 = parse_field("devEUI", &req.dev_eui)?;
        self.require_node(&dev_eui)?;
        tracing::info!(
            dev_eui = %dev_eui,
            f_cnt = req.f_cnt,
            f_port = req.f_port,
            size = req.data.len(),
            "uplink received"
        );
        Ok(Response::new(appserver::HandleDataUpResponse {}))
    }

    async fn get_data_down(
        &self,
        request: Request<appserver::GetDataDownRequest>,
    ) -> std::result::Result<Response<appserver::GetDataDownResponse>, Status> {
        let req = request.into_inner();
        let dev_eui: Eui64 = parse_field("devEUI", &req.dev_eui)?;
        self.require_node(&dev_eui)?;

        let delivery = self
            .storage
            .downlink_queue()
            .and_then(|store| store.next_for_delivery(&dev_eui, req.max_payload_size as usize))
            .map_err(to_status)?;

        let Some(delivery) = delivery else {
            return Ok(Response::new(appserver::GetDataDownResponse::default()));
        };

        tracing::info!(
            dev_eui = %dev_eui,
            id = delivery.item.id,
            f_cnt = req.f_cnt,
            confirmed = delivery.item.confirmed,
            more_data = delivery.more_data,
            "downlink handed out"
        );
        Ok(Response::new(appserver::GetDataDownResponse {
            data: delivery.item.data,
            confirmed: delivery.item.confirmed,
            f_port: delivery.item.f_port,
            more_data: delivery.more_data,
        }))
    }

    async fn handle_data_down_ack(
        &self,
        request: Request<appserver::HandleDataDownAckRequest>,
    ) -> std::result::Result<Response<appserver::HandleDataDownAckResponse>, Status> {
        let req = request.into_inner();
        let dev_eui: Eui64 = parse_field("devEUI", &req.dev_eui)?;
        let acked = self
            .storage
            .downlink_queue()
            .and_then(|store| store.acknowledge(&dev_eui))
            .map_err(to_status)?;

        match acked {
            Some(item) => {
                tracing::info!(dev_eui = %dev_eui, id = item.id, f_cnt = req.f_cnt, "downlink acknowledged")
            }
            None => tracing::warn!(dev_eui = %dev_eui, f_cnt = req.f_cnt, "ack without pending downlink"),
        }
        Ok(Response::new(appserver::HandleDataDownAckResponse {}))
    }

    async fn handle_error(
        &self,
        request: Request<appserver::HandleErrorRequest>,
    ) -> std::result::Result<Response<appserver::HandleErrorResponse>, Status> {
        let req = request.into_inner();
        let error_type = appserver::ErrorType::try_from(req.error_type)
            .map(|t| t.as_str_name())
            .unwrap_or("UNKNOWN");
        tracing::error!(
            dev_eui = %req.dev_eui,
            error_type,
            error = %req.error,
            "network server reported an error"
        );
        Ok(Response::new(appserver::HandleErrorResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appserver::application_server_server::ApplicationServer;

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    const DEV_EUI: &str = "0102030405060708";

    fn storage_with_node() -> std::result::Result<Arc<StorageEngine>, Box<dyn std::error::Error>> {
        use loraapp_storage::NodeRecord;
        use loraapp_types::{AesKey, RxWindow};

        let storage = Arc::new(StorageEngine::open_temporary()?);
        storage.nodes()?.create(&NodeRecord {
            dev_eui: DEV_EUI.parse()?,
            app_eui: Eui64::new([1; 8]),
            app_key: AesKey::new([2; 16]),
            name: "sensor".into(),
            rx_window: RxWindow::Rx1,
            rx_delay: 0,
            rx1_dr_offset: 0,
            rx2_dr: 0,
            channel_list_id: None,
            is_abp: false,
            is_class_c: false,
            relax_fcnt: false,
        })?;
        Ok(storage)
    }

    fn data_down(max_payload_size: u32) -> Request<appserver::GetDataDownRequest> {
        Request::new(appserver::GetDataDownRequest {
            dev_eui: DEV_EUI.into(),
            max_payload_size,
            f_cnt: 1,
        })
    }

    #[tokio::test]
    async fn unconfirmed_downlinks_drain_in_order() -> TestResult {
        let storage = storage_with_node()?;
        let eui: Eui64 = DEV_EUI.parse()?;
        storage.downlink_queue()?.enqueue(&eui, false, 10, vec![1])?;
        storage.downlink_queue()?.enqueue(&eui, false, 11, vec![2])?;
        let svc = ApplicationServerService::new(Arc::clone(&storage));

        let first = svc.get_data_down(data_down(51)).await?.into_inner();
        assert_eq!(first.data, vec![1]);
        assert!(first.more_data);

        let second = svc.get_data_down(data_down(51)).await?.into_inner();
        assert_eq!(second.f_port, 11);
        assert!(!second.more_data);

        let empty = svc.get_data_down(data_down(51)).await?.into_inner();
        assert!(empty.data.is_empty());
        assert_eq!(empty.f_port, 0);
        Ok(())
    }

    #[tokio::test]
    async fn confirmed_downlink_waits_for_ack() -> TestResult {
        let storage = storage_with_node()?;
        let eui: Eui64 = DEV_EUI.parse()?;
        storage.downlink_queue()?.enqueue(&eui, true, 10, vec![9])?;
        let svc = ApplicationServerService::new(Arc::clone(&storage));

        let sent = svc.get_data_down(data_down(51)).await?.into_inner();
        assert!(sent.confirmed);
        assert_eq!(storage.downlink_queue()?.list(&eui)?.len(), 1);

        svc.handle_data_down_ack(Request::new(appserver::HandleDataDownAckRequest {
            dev_eui: DEV_EUI.into(),
            f_cnt: 1,
        }))
        .await?;
        assert!(storage.downlink_queue()?.list(&eui)?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn oversized_payload_is_held_back() -> TestResult {
        let storage = storage_with_node()?;
        let eui: Eui64 = DEV_EUI.parse()?;
        storage.downlink_queue()?.enqueue(&eui, false, 10, vec![0; 64])?;
        let svc = ApplicationServerService::new(Arc::clone(&storage));

        let response = svc.get_data_down(data_down(11)).await?.into_inner();
        assert!(response.data.is_empty());
        assert_eq!(storage.downlink_queue()?.list(&eui)?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn uplink_for_unknown_node_is_not_found() -> TestResult {
        let svc = ApplicationServerService::new(Arc::new(StorageEngine::open_temporary()?));
        let result = svc
            .handle_data_up(Request::new(appserver::HandleDataUpRequest {
                dev_eui: DEV_EUI.into(),
                f_cnt: 1,
                f_port: 1,
                data: vec![1, 2],
            }))
            .await;
        assert_eq!(result.err().map(|s| s.code()), Some(tonic::Code::NotFound));
        Ok(())
    }
}

//! JSON gateway: REST under `/api`, proxied to the client-facing gRPC
//! services over the loopback channel.
//!
//! Request bodies and responses use the JSON mapping of the generated
//! protobuf types (lowerCamelCase names, enums by name, every field
//! emitted). Identifiers in the path override the same field in the body.
//! The caller's `Authorization` header is forwarded as gRPC metadata, so
//! the services' authentication applies unchanged.

use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;

use loraapp_rpc::api;
use loraapp_rpc::api::channel_client::ChannelClient;
use loraapp_rpc::api::channel_list_client::ChannelListClient;
use loraapp_rpc::api::downlink_queue_client::DownlinkQueueClient;
use loraapp_rpc::api::node_client::NodeClient;
use loraapp_rpc::api::node_session_client::NodeSessionClient;
use loraapp_rpc::auth::AUTHORIZATION;
use loraapp_rpc::ServiceName;

use crate::error::GatewayError;

type ApiResult<T> = std::result::Result<Json<T>, GatewayError>;

/// Landing page served at `GET /api`.
const API_PAGE: &str = include_str!("../assets/api.html");

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// JSON body; decoding failures become a 400 JSON error.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(GatewayError))]
pub struct ApiJson<T>(pub T);

/// Query string; decoding failures become a 400 JSON error.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(GatewayError))]
pub struct ApiQuery<T>(pub T);

/// Path parameters; decoding failures become a 400 JSON error.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(GatewayError))]
pub struct ApiPath<T>(pub T);

/// `limit` / `offset` of list endpoints.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
}

/// Wraps `message` in a tonic request carrying the caller's credential.
fn rpc_request<T>(headers: &HeaderMap, message: T) -> tonic::Request<T> {
    let mut request = tonic::Request::new(message);
    if let Some(value) = headers.get(axum::http::header::AUTHORIZATION) {
        match MetadataValue::try_from(value.as_bytes()) {
            Ok(value) => {
                request.metadata_mut().insert(AUTHORIZATION, value);
            }
            Err(_) => tracing::debug!("authorization header is not valid metadata"),
        }
    }
    request
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// gRPC clients sharing one loopback channel.
#[derive(Clone)]
pub struct GatewayState {
    channel_lists: ChannelListClient<Channel>,
    channels: ChannelClient<Channel>,
    nodes: NodeClient<Channel>,
    node_sessions: NodeSessionClient<Channel>,
    downlink_queue: DownlinkQueueClient<Channel>,
}

impl GatewayState {
    /// Creates the clients over `channel`.
    pub fn new(channel: Channel) -> Self {
        Self {
            channel_lists: ChannelListClient::new(channel.clone()),
            channels: ChannelClient::new(channel.clone()),
            nodes: NodeClient::new(channel.clone()),
            node_sessions: NodeSessionClient::new(channel.clone()),
            downlink_queue: DownlinkQueueClient::new(channel),
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Builds the `/api` router over `channel`.
///
/// Returns the router together with the services for which REST routes
/// were registered, in [`ServiceName::ALL`] order.
pub fn router(channel: Channel) -> (Router, Vec<ServiceName>) {
    let mut api: Router<GatewayState> = Router::new()
        .route("/api", get(api_page).fallback(no_endpoint))
        .route("/api/{*rest}", axum::routing::any(no_endpoint));
    let mut registered = Vec::with_capacity(ServiceName::ALL.len());

    for service in ServiceName::ALL {
        api = api.merge(service_routes(service));
        tracing::debug!(service = %service, "registered rest routes");
        registered.push(service);
    }

    (api.with_state(GatewayState::new(channel)), registered)
}

fn service_routes(service: ServiceName) -> Router<GatewayState> {
    match service {
        ServiceName::ChannelList => Router::new()
            .route(
                "/api/channelLists",
                post(create_channel_list).get(list_channel_lists),
            )
            .route(
                "/api/channelLists/{id}",
                get(get_channel_list)
                    .put(update_channel_list)
                    .delete(delete_channel_list),
            ),
        ServiceName::Channel => Router::new()
            .route("/api/channelLists/{id}/channels", get(list_channels))
            .route("/api/channels", post(create_channel))
            .route(
                "/api/channels/{id}",
                get(get_channel).put(update_channel).delete(delete_channel),
            ),
        ServiceName::Node => Router::new()
            .route("/api/nodes", post(create_node).get(list_nodes))
            .route(
                "/api/nodes/{dev_eui}",
                get(get_node).put(update_node).delete(delete_node),
            ),
        ServiceName::NodeSession => Router::new()
            .route(
                "/api/nodes/{dev_eui}/session",
                post(create_node_session)
                    .get(get_node_session)
                    .put(update_node_session)
                    .delete(delete_node_session),
            )
            .route(
                "/api/nodes/{dev_eui}/getRandomDevAddr",
                post(get_random_dev_addr),
            ),
        ServiceName::DownlinkQueue => Router::new()
            .route(
                "/api/nodes/{dev_eui}/queue",
                post(enqueue_downlink).get(list_downlink_queue),
            )
            .route(
                "/api/nodes/{dev_eui}/queue/{id}",
                axum::routing::delete(delete_downlink),
            ),
    }
}

async fn api_page() -> Html<&'static str> {
    Html(API_PAGE)
}

async fn no_endpoint(uri: Uri) -> GatewayError {
    GatewayError::NoEndpoint(uri.path().to_string())
}

// ---------------------------------------------------------------------------
// ChannelList
// ---------------------------------------------------------------------------

async fn create_channel_list(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<api::CreateChannelListRequest>,
) -> ApiResult<api::CreateChannelListResponse> {
    let mut client = gw.channel_lists;
    let response = client.create(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn list_channel_lists(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<api::ListChannelListResponse> {
    let mut client = gw.channel_lists;
    let request = api::ListChannelListRequest {
        limit: params.limit,
        offset: params.offset,
    };
    let response = client.list(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn get_channel_list(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<api::GetChannelListResponse> {
    let mut client = gw.channel_lists;
    let request = api::GetChannelListRequest { id };
    let response = client.get(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn update_channel_list(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
    ApiJson(mut body): ApiJson<api::UpdateChannelListRequest>,
) -> ApiResult<api::UpdateChannelListResponse> {
    let mut client = gw.channel_lists;
    body.id = id;
    let response = client.update(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn delete_channel_list(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<api::DeleteChannelListResponse> {
    let mut client = gw.channel_lists;
    let request = api::DeleteChannelListRequest { id };
    let response = client.delete(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

async fn list_channels(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<api::ListChannelsByChannelListResponse> {
    let mut client = gw.channels;
    let request = api::ListChannelsByChannelListRequest { id };
    let response = client
        .list_by_channel_list(rpc_request(&headers, request))
        .await?;
    Ok(Json(response.into_inner()))
}

async fn create_channel(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<api::CreateChannelRequest>,
) -> ApiResult<api::CreateChannelResponse> {
    let mut client = gw.channels;
    let response = client.create(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn get_channel(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<api::GetChannelResponse> {
    let mut client = gw.channels;
    let request = api::GetChannelRequest { id };
    let response = client.get(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn update_channel(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
    ApiJson(mut body): ApiJson<api::UpdateChannelRequest>,
) -> ApiResult<api::UpdateChannelResponse> {
    let mut client = gw.channels;
    body.id = id;
    let response = client.update(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn delete_channel(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<api::DeleteChannelResponse> {
    let mut client = gw.channels;
    let request = api::DeleteChannelRequest { id };
    let response = client.delete(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

async fn create_node(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<api::CreateNodeRequest>,
) -> ApiResult<api::CreateNodeResponse> {
    let mut client = gw.nodes;
    let response = client.create(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn list_nodes(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiQuery(params): ApiQuery<ListParams>,
) -> ApiResult<api::ListNodeResponse> {
    let mut client = gw.nodes;
    let request = api::ListNodeRequest {
        limit: params.limit,
        offset: params.offset,
    };
    let response = client.list(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn get_node(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
) -> ApiResult<api::GetNodeResponse> {
    let mut client = gw.nodes;
    let request = api::GetNodeRequest { dev_eui };
    let response = client.get(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn update_node(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
    ApiJson(mut body): ApiJson<api::UpdateNodeRequest>,
) -> ApiResult<api::UpdateNodeResponse> {
    let mut client = gw.nodes;
    body.dev_eui = dev_eui;
    let response = client.update(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn delete_node(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
) -> ApiResult<api::DeleteNodeResponse> {
    let mut client = gw.nodes;
    let request = api::DeleteNodeRequest { dev_eui };
    let response = client.delete(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

// ---------------------------------------------------------------------------
// NodeSession
// ---------------------------------------------------------------------------

async fn create_node_session(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
    ApiJson(mut body): ApiJson<api::CreateNodeSessionRequest>,
) -> ApiResult<api::CreateNodeSessionResponse> {
    let mut client = gw.node_sessions;
    body.dev_eui = dev_eui;
    let response = client.create(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn get_node_session(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
) -> ApiResult<api::GetNodeSessionResponse> {
    let mut client = gw.node_sessions;
    let request = api::GetNodeSessionRequest { dev_eui };
    let response = client.get(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn update_node_session(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
    ApiJson(mut body): ApiJson<api::UpdateNodeSessionRequest>,
) -> ApiResult<api::UpdateNodeSessionResponse> {
    let mut client = gw.node_sessions;
    body.dev_eui = dev_eui;
    let response = client.update(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn delete_node_session(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
) -> ApiResult<api::DeleteNodeSessionResponse> {
    let mut client = gw.node_sessions;
    let request = api::DeleteNodeSessionRequest { dev_eui };
    let response = client.delete(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn get_random_dev_addr(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
) -> ApiResult<api::GetRandomDevAddrResponse> {
    let mut client = gw.node_sessions;
    let request = api::GetRandomDevAddrRequest { dev_eui };
    let response = client
        .get_random_dev_addr(rpc_request(&headers, request))
        .await?;
    Ok(Json(response.into_inner()))
}

// ---------------------------------------------------------------------------
// DownlinkQueue
// ---------------------------------------------------------------------------

async fn enqueue_downlink(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
    ApiJson(mut body): ApiJson<api::EnqueueDownlinkQueueItemRequest>,
) -> ApiResult<api::EnqueueDownlinkQueueItemResponse> {
    let mut client = gw.downlink_queue;
    body.dev_eui = dev_eui;
    let response = client.enqueue(rpc_request(&headers, body)).await?;
    Ok(Json(response.into_inner()))
}

async fn list_downlink_queue(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath(dev_eui): ApiPath<String>,
) -> ApiResult<api::ListDownlinkQueueItemsResponse> {
    let mut client = gw.downlink_queue;
    let request = api::ListDownlinkQueueItemsRequest { dev_eui };
    let response = client.list(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

async fn delete_downlink(
    State(gw): State<GatewayState>,
    headers: HeaderMap,
    ApiPath((dev_eui, id)): ApiPath<(String, i64)>,
) -> ApiResult<api::DeleteDownlinkQueueItemResponse> {
    let mut client = gw.downlink_queue;
    let request = api::DeleteDownlinkQueueItemRequest { id, dev_eui };
    let response = client.delete(rpc_request(&headers, request)).await?;
    Ok(Json(response.into_inner()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

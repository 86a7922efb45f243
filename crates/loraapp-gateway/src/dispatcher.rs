//! Per-request protocol dispatch.
//!
//! A request is handed to the gRPC routes when it arrives over HTTP/2 and
//! its `content-type` mentions `application/grpc`; everything else goes to
//! the REST router (gateway plus static files). Only the version and the
//! headers are inspected. The request itself is forwarded untouched.
//!
//! With a request timeout set, a request that is not answered in time gets
//! `DeadlineExceeded` (gRPC) or a 504 JSON error (REST).

use std::time::Duration;

use axum::body::Body;
use axum::response::IntoResponse;
use axum::Router;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Request, Response, Version};
use tonic::service::Routes;
use tonic::Status;
use tower::ServiceExt;

use crate::error::GatewayError;

/// Boxed error accepted from request bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Where a request is routed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchDecision {
    Rpc,
    Rest,
}

/// Classifies a request from its HTTP version and headers.
pub fn classify(version: Version, headers: &HeaderMap) -> DispatchDecision {
    if version != Version::HTTP_2 {
        return DispatchDecision::Rest;
    }

    let is_grpc = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains(GRPC_CONTENT_TYPE));

    if is_grpc {
        DispatchDecision::Rpc
    } else {
        DispatchDecision::Rest
    }
}

/// A trailers-only gRPC response carrying `status`.
pub fn grpc_error(status: &Status) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    if let Err(e) = status.add_header(response.headers_mut()) {
        tracing::warn!(error = %e, "failed to encode grpc status");
    }
    response
}

/// Routes each request to the gRPC services or the REST router.
#[derive(Clone)]
pub struct ProtocolDispatcher {
    rpc: Routes,
    rest: Router,
    request_timeout: Option<Duration>,
}

impl ProtocolDispatcher {
    pub fn new(rpc: Routes, rest: Router) -> Self {
        Self {
            rpc,
            rest,
            request_timeout: None,
        }
    }

    /// Bounds every request by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Serves one request. Failures are reported in the response (gRPC
    /// status or HTTP error body).
    pub async fn dispatch<B>(&self, request: Request<B>) -> Response<Body>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let decision = classify(request.version(), request.headers());
        let Some(timeout) = self.request_timeout else {
            return self.route(decision, request).await;
        };

        match tokio::time::timeout(timeout, self.route(decision, request)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::debug!(?timeout, "request timed out");
                let status = Status::deadline_exceeded("request timed out");
                match decision {
                    DispatchDecision::Rpc => grpc_error(&status),
                    DispatchDecision::Rest => GatewayError::Rpc(status).into_response(),
                }
            }
        }
    }

    async fn route<B>(&self, decision: DispatchDecision, request: Request<B>) -> Response<Body>
    where
        B: http_body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        match decision {
            DispatchDecision::Rpc => {
                tracing::trace!(path = %request.uri().path(), "dispatching grpc request");
                let request = request.map(tonic::body::boxed);
                match self.rpc.clone().oneshot(request).await {
                    Ok(response) => response.map(Body::new),
                    Err(e) => {
                        tracing::warn!(error = %e, "grpc routes failed");
                        grpc_error(&Status::internal(e.to_string()))
                    }
                }
            }
            DispatchDecision::Rest => {
                tracing::trace!(
                    method = %request.method(),
                    path = %request.uri().path(),
                    "dispatching http request"
                );
                match self.rest.clone().oneshot(request).await {
                    Ok(response) => response,
                    Err(never) => match never {},
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use axum::routing::get;
    use tonic::body::BoxBody;
    use tonic::server::NamedService;

    /// A gRPC service that never answers.
    #[derive(Clone)]
    struct Stalled;

    impl NamedService for Stalled {
        const NAME: &'static str = "test.Stalled";
    }

    impl tower::Service<Request<BoxBody>> for Stalled {
        type Response = Response<BoxBody>;
        type Error = Infallible;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _request: Request<BoxBody>) -> Self::Future {
            Box::pin(std::future::pending())
        }
    }

    fn headers(content_type: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        headers
    }

    #[test]
    fn http2_grpc_is_rpc() {
        let decision = classify(Version::HTTP_2, &headers(Some("application/grpc")));
        assert_eq!(decision, DispatchDecision::Rpc);
    }

    #[test]
    fn http2_grpc_with_suffix_is_rpc() {
        let decision = classify(Version::HTTP_2, &headers(Some("application/grpc+proto")));
        assert_eq!(decision, DispatchDecision::Rpc);
    }

    #[test]
    fn http2_json_is_rest() {
        let decision = classify(Version::HTTP_2, &headers(Some("application/json")));
        assert_eq!(decision, DispatchDecision::Rest);
    }

    #[test]
    fn http11_grpc_is_rest() {
        let decision = classify(Version::HTTP_11, &headers(Some("application/grpc")));
        assert_eq!(decision, DispatchDecision::Rest);
    }

    #[test]
    fn http11_json_is_rest() {
        let decision = classify(Version::HTTP_11, &headers(Some("application/json")));
        assert_eq!(decision, DispatchDecision::Rest);
    }

    #[test]
    fn missing_content_type_is_rest() {
        assert_eq!(classify(Version::HTTP_2, &headers(None)), DispatchDecision::Rest);
        assert_eq!(classify(Version::HTTP_11, &headers(None)), DispatchDecision::Rest);
    }

    #[tokio::test]
    async fn rest_requests_reach_the_router() -> Result<(), Box<dyn std::error::Error>> {
        let rest = Router::new().route("/ping", get(|| async { "pong" }));
        let dispatcher = ProtocolDispatcher::new(Routes::default(), rest);

        let request = Request::get("/ping")
            .version(Version::HTTP_2)
            .header(CONTENT_TYPE, "text/plain")
            .body(Body::empty())?;
        let response = dispatcher.dispatch(request).await;
        assert_eq!(response.status(), http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        assert_eq!(&body[..], b"pong");
        Ok(())
    }

    #[tokio::test]
    async fn grpc_requests_bypass_the_router() -> Result<(), Box<dyn std::error::Error>> {
        // The REST router would answer anything; the empty gRPC routes must
        // answer with a gRPC status instead.
        let rest = Router::new().fallback(|| async { "rest" });
        let dispatcher = ProtocolDispatcher::new(Routes::default(), rest);

        let request = Request::post("/api.Node/List")
            .version(Version::HTTP_2)
            .header(CONTENT_TYPE, "application/grpc")
            .body(Body::empty())?;
        let response = dispatcher.dispatch(request).await;
        assert_eq!(
            response.headers().get("grpc-status").map(HeaderValue::as_bytes),
            Some(&b"12"[..])
        );
        Ok(())
    }

    #[test]
    fn grpc_error_is_trailers_only() {
        let response = grpc_error(&Status::internal("unavailable"));
        assert_eq!(response.status(), http::StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(CONTENT_TYPE).map(HeaderValue::as_bytes),
            Some(&b"application/grpc"[..])
        );
        assert_eq!(
            headers.get("grpc-status").map(HeaderValue::as_bytes),
            Some(&b"13"[..])
        );
        assert_eq!(
            headers.get("grpc-message").map(HeaderValue::as_bytes),
            Some(&b"unavailable"[..])
        );
    }

    #[tokio::test]
    async fn slow_rest_request_times_out_with_504() -> Result<(), Box<dyn std::error::Error>> {
        let rest = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "late"
            }),
        );
        let dispatcher = ProtocolDispatcher::new(Routes::default(), rest)
            .with_request_timeout(Duration::from_millis(50));

        let request = Request::get("/slow").body(Body::empty())?;
        let response = dispatcher.dispatch(request).await;
        assert_eq!(response.status(), http::StatusCode::GATEWAY_TIMEOUT);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body: serde_json::Value = serde_json::from_slice(&body)?;
        assert_eq!(body["code"], serde_json::json!(4));
        Ok(())
    }

    #[tokio::test]
    async fn slow_grpc_request_is_deadline_exceeded() -> Result<(), Box<dyn std::error::Error>> {
        let dispatcher = ProtocolDispatcher::new(Routes::new(Stalled), Router::new())
            .with_request_timeout(Duration::from_millis(50));

        let request = Request::post("/test.Stalled/Call")
            .version(Version::HTTP_2)
            .header(CONTENT_TYPE, "application/grpc")
            .body(Body::empty())?;
        let response = dispatcher.dispatch(request).await;
        assert_eq!(
            response.headers().get("grpc-status").map(HeaderValue::as_bytes),
            Some(&b"4"[..])
        );
        Ok(())
    }
}

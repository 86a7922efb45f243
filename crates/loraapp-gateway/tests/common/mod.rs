//! Shared harness: a public listener on an ephemeral port with a
//! self-signed `localhost` certificate, backed by temporary storage.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::body::Body;
use bytes::Bytes;
use http::{HeaderMap, Request, StatusCode};
use hyper::client::conn::http2;
use hyper_util::rt::{TokioExecutor, TokioIo};
use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::ServerName;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tonic::transport::Channel;

use loraapp_gateway::{loopback, rest_router, ProtocolDispatcher, PublicListener};
use loraapp_rpc::auth::{AuthValidator, Claims};
use loraapp_rpc::server::client_routes;
use loraapp_rpc::tls::{load_root_store, LoopbackTrust};
use loraapp_rpc::TransportCredentials;
use loraapp_storage::StorageEngine;
use loraapp_types::config::{TimeoutConfig, TlsPaths};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub const SECRET: &str = "gateway-test-secret";

/// A running public listener.
pub struct Harness {
    pub addr: SocketAddr,
    pub storage: Arc<StorageEngine>,
    pub cert_path: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

impl Harness {
    /// Starts a listener; `secret` of `None` disables authentication.
    pub async fn start(secret: Option<&str>) -> TestResult<Self> {
        Self::start_with(secret, timeouts()).await
    }

    /// Starts a listener with the given timeouts.
    pub async fn start_with(secret: Option<&str>, timeouts: TimeoutConfig) -> TestResult<Self> {
        let dir = tempfile::tempdir()?;
        let key = KeyPair::generate()?;
        let cert = CertificateParams::new(vec!["localhost".to_string()])?.self_signed(&key)?;
        let identity = TlsPaths {
            cert_path: dir.path().join("http.pem"),
            key_path: dir.path().join("http-key.pem"),
        };
        std::fs::write(&identity.cert_path, cert.pem())?;
        std::fs::write(&identity.key_path, key.serialize_pem())?;

        let storage = Arc::new(StorageEngine::open_temporary()?);
        let validator = Arc::new(AuthValidator::from_secret(secret)?);
        let (routes, _) = client_routes(Arc::clone(&storage), validator);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let trust = LoopbackTrust::from_pem_file(&identity.cert_path)?;
        let channel = loopback::connect_lazy(addr.port(), &trust, &timeouts)?;
        let (rest, _) = rest_router(channel, None);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = PublicListener::spawn(
            listener,
            TransportCredentials::for_public(&identity)?,
            ProtocolDispatcher::new(routes, rest),
            timeouts,
            shutdown_rx,
        )?;

        Ok(Self {
            addr,
            storage,
            cert_path: identity.cert_path,
            shutdown_tx,
            task,
            _dir: dir,
        })
    }

    /// A gRPC channel to the listener, the same way the gateway dials it.
    pub fn grpc_channel(&self) -> TestResult<Channel> {
        let trust = LoopbackTrust::from_pem_file(&self.cert_path)?;
        Ok(loopback::connect_lazy(self.addr.port(), &trust, &timeouts())?)
    }

    /// Opens a TLS connection negotiating `alpn` (`h2` or `http/1.1`).
    pub async fn connect(&self, alpn: &[u8]) -> TestResult<TlsStream<TcpStream>> {
        let mut config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(load_root_store(&self.cert_path)?)
        .with_no_client_auth();
        config.alpn_protocols = vec![alpn.to_vec()];

        let tcp = TcpStream::connect(self.addr).await?;
        Ok(TlsConnector::from(Arc::new(config))
            .connect(ServerName::try_from("localhost")?, tcp)
            .await?)
    }

    /// An HTTP/2 connection whose sender can carry any number of requests.
    pub async fn http2(&self) -> TestResult<http2::SendRequest<Body>> {
        let io = TokioIo::new(self.connect(b"h2").await?);
        let (sender, conn) = http2::handshake(TokioExecutor::new(), io).await?;
        tokio::spawn(async move {
            let _ = conn.await;
        });
        Ok(sender)
    }

    /// Rewrites `request` for HTTP/2, where scheme and authority travel as
    /// pseudo headers.
    pub fn h2_request(&self, mut request: Request<Body>) -> TestResult<Request<Body>> {
        let path = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".into());
        *request.uri_mut() = format!("https://localhost:{}{path}", self.addr.port()).parse()?;
        request.headers_mut().remove("host");
        Ok(request)
    }

    /// Sends one request over a fresh TLS connection negotiating `alpn`
    /// (`h2` or `http/1.1`).
    pub async fn send(
        &self,
        alpn: &[u8],
        request: Request<Body>,
    ) -> TestResult<(StatusCode, HeaderMap, Bytes)> {
        let response = if alpn == b"h2" {
            let request = self.h2_request(request)?;
            self.http2().await?.send_request(request).await?
        } else {
            let io = TokioIo::new(self.connect(alpn).await?);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
            tokio::spawn(async move {
                let _ = conn.await;
            });
            sender.send_request(request).await?
        };

        read_response(response).await
    }

    /// Stops accepting and waits for the accept loop to exit.
    pub async fn stop(self) -> TestResult {
        self.shutdown_tx.send(true)?;
        self.task.await?;
        Ok(())
    }
}

/// Status, headers and collected body of `response`.
pub async fn read_response(
    response: http::Response<hyper::body::Incoming>,
) -> TestResult<(StatusCode, HeaderMap, Bytes)> {
    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(Body::new(body), usize::MAX).await?;
    Ok((parts.status, parts.headers, body))
}

pub fn timeouts() -> TimeoutConfig {
    TimeoutConfig {
        handshake: std::time::Duration::from_secs(5),
        request: std::time::Duration::from_secs(10),
        connect: std::time::Duration::from_secs(2),
    }
}

/// An HS256 token for `username`, valid for an hour.
pub fn token(secret: &str, username: &str) -> TestResult<String> {
    let exp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs()
        + 3600;
    let claims = Claims {
        username: username.into(),
        admin: true,
        exp: Some(exp),
    };
    Ok(jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// `token` with one signature character replaced.
pub fn tamper(token: &str) -> String {
    let mut chars: Vec<char> = token.chars().collect();
    let index = chars.len().saturating_sub(8);
    if let Some(c) = chars.get_mut(index) {
        *c = if *c == 'A' { 'B' } else { 'A' };
    }
    chars.into_iter().collect()
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> TestResult<Request<Body>> {
    Ok(Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "localhost")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body)?))?)
}

pub fn get_request(uri: &str) -> TestResult<Request<Body>> {
    Ok(Request::get(uri).header("host", "localhost").body(Body::empty())?)
}

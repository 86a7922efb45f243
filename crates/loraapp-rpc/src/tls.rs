//! Transport credentials.
//!
//! [`TransportCredentials`] wraps a rustls `ServerConfig` built from PEM
//! files. It is used twice: for the internal RPC listener (optionally
//! requiring client certificates) and for the public listener.
//!
//! [`LoopbackTrust`] is the client side of the gateway's loopback hop. It
//! trusts the public listener's own certificate and does not compare the
//! certificate's names with the dialled host. To keep that relaxation
//! from leaking into any other use, its verifier refuses every server
//! name that is not `localhost` or a loopback IP address.
//!
//! All configs use the ring provider explicitly so the process never
//! depends on a globally installed default provider.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::{ParsedCertificate, WebPkiClientVerifier};
use rustls::{DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use loraapp_types::config::{RpcTlsMode, TlsPaths};
use loraapp_types::{AppServerError, Result};

/// ALPN identifier of HTTP/2.
const ALPN_H2: &[u8] = b"h2";
/// ALPN identifier of HTTP/1.1.
const ALPN_HTTP11: &[u8] = b"http/1.1";

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

fn tls_err(reason: String) -> AppServerError {
    AppServerError::TlsError { reason }
}

// ---------------------------------------------------------------------------
// ALPN
// ---------------------------------------------------------------------------

/// Application protocols advertised by a listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlpnProtocols {
    /// HTTP/2 only (gRPC).
    Rpc,
    /// HTTP/2 and HTTP/1.1 (gRPC, REST and static files).
    Public,
}

impl AlpnProtocols {
    fn to_wire(self) -> Vec<Vec<u8>> {
        match self {
            Self::Rpc => vec![ALPN_H2.to_vec()],
            Self::Public => vec![ALPN_H2.to_vec(), ALPN_HTTP11.to_vec()],
        }
    }
}

// ---------------------------------------------------------------------------
// PEM loading
// ---------------------------------------------------------------------------

/// Reads every certificate in a PEM file. An empty file is an error.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| tls_err(format!("failed to read '{}': {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            tls_err(format!(
                "failed to parse PEM certificates from '{}': {e}",
                path.display()
            ))
        })?;
    if certs.is_empty() {
        return Err(tls_err(format!(
            "no certificates found in '{}'",
            path.display()
        )));
    }
    Ok(certs)
}

/// Reads the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| tls_err(format!("failed to read '{}': {e}", path.display())))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            tls_err(format!(
                "failed to parse private key '{}': {e}",
                path.display()
            ))
        })?
        .ok_or_else(|| tls_err(format!("no private key found in '{}'", path.display())))
}

/// Builds a root store from a PEM bundle. At least one certificate must be
/// usable as a trust anchor.
pub fn load_root_store(path: &Path) -> Result<RootCertStore> {
    let certs = load_certs(path)?;
    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(certs);
    if added == 0 {
        return Err(tls_err(format!(
            "no valid CA certificates found in '{}'",
            path.display()
        )));
    }
    if ignored > 0 {
        tracing::warn!(path = %path.display(), ignored, "ignored unparsable CA certificates");
    }
    Ok(roots)
}

// ---------------------------------------------------------------------------
// TransportCredentials
// ---------------------------------------------------------------------------

/// Server-side TLS configuration of one listener.
#[derive(Clone)]
pub struct TransportCredentials {
    config: Arc<rustls::ServerConfig>,
    requires_client_cert: bool,
}

impl fmt::Debug for TransportCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportCredentials")
            .field("requires_client_cert", &self.requires_client_cert)
            .field("alpn", &self.config.alpn_protocols)
            .finish()
    }
}

impl TransportCredentials {
    /// Loads a server identity and, optionally, a client CA bundle.
    ///
    /// With `require_client_cert` every handshake must present a
    /// certificate chained to the CA bundle. Without it, a configured CA
    /// bundle still verifies certificates that clients choose to present.
    ///
    /// # Errors
    ///
    /// [`AppServerError::TlsError`] when `require_client_cert` is set
    /// without a CA bundle, or when any file cannot be read or parsed (the
    /// message names the file).
    pub fn load(
        identity: &TlsPaths,
        ca_path: Option<&Path>,
        require_client_cert: bool,
        alpn: AlpnProtocols,
    ) -> Result<Self> {
        if require_client_cert && ca_path.is_none() {
            return Err(tls_err(
                "client certificate verification requires a CA certificate bundle".into(),
            ));
        }

        let chain = load_certs(&identity.cert_path)?;
        let key = load_private_key(&identity.key_path)?;
        let provider = provider();

        let builder = rustls::ServerConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| tls_err(format!("unsupported protocol versions: {e}")))?;

        let builder = match ca_path {
            Some(ca_path) => {
                let roots = Arc::new(load_root_store(ca_path)?);
                let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider);
                let verifier = if require_client_cert {
                    verifier
                } else {
                    verifier.allow_unauthenticated()
                };
                let verifier = verifier.build().map_err(|e| {
                    tls_err(format!(
                        "failed to build client verifier from '{}': {e}",
                        ca_path.display()
                    ))
                })?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let mut config = builder.with_single_cert(chain, key).map_err(|e| {
            tls_err(format!(
                "certificate '{}' does not match key '{}': {e}",
                identity.cert_path.display(),
                identity.key_path.display()
            ))
        })?;
        config.alpn_protocols = alpn.to_wire();

        Ok(Self {
            config: Arc::new(config),
            requires_client_cert: require_client_cert,
        })
    }

    /// Credentials of the internal RPC listener, or `None` for plaintext.
    pub fn for_rpc(mode: &RpcTlsMode) -> Result<Option<Self>> {
        match mode {
            RpcTlsMode::Plaintext => Ok(None),
            RpcTlsMode::ServerOnly(identity) => {
                Self::load(identity, None, false, AlpnProtocols::Rpc).map(Some)
            }
            RpcTlsMode::Mutual { identity, ca_path } => {
                Self::load(identity, Some(ca_path), true, AlpnProtocols::Rpc).map(Some)
            }
        }
    }

    /// Credentials of the public listener.
    pub fn for_public(identity: &TlsPaths) -> Result<Self> {
        Self::load(identity, None, false, AlpnProtocols::Public)
    }

    /// Whether handshakes without a client certificate are rejected.
    pub fn requires_client_cert(&self) -> bool {
        self.requires_client_cert
    }

    /// The underlying rustls configuration.
    pub fn server_config(&self) -> Arc<rustls::ServerConfig> {
        Arc::clone(&self.config)
    }

    /// A tokio acceptor sharing this configuration.
    pub fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(self.server_config())
    }
}

// ---------------------------------------------------------------------------
// LoopbackTrust
// ---------------------------------------------------------------------------

/// Client-side trust for the gateway's connection to its own listener.
#[derive(Clone, Debug)]
pub struct LoopbackTrust {
    verifier: Arc<LoopbackVerifier>,
}

impl LoopbackTrust {
    /// Trusts the certificates in `path` (normally the public listener's
    /// own certificate).
    ///
    /// # Errors
    ///
    /// [`AppServerError::TlsError`] naming the file when it cannot be read
    /// or contains no usable certificate.
    pub fn from_pem_file(path: &Path) -> Result<Self> {
        Ok(Self::from_roots(load_root_store(path)?))
    }

    /// Trusts the given root store.
    pub fn from_roots(roots: RootCertStore) -> Self {
        Self {
            verifier: Arc::new(LoopbackVerifier {
                roots: Arc::new(roots),
                provider: provider(),
            }),
        }
    }

    /// A client configuration that negotiates HTTP/2.
    pub fn client_config(&self) -> Result<Arc<rustls::ClientConfig>> {
        let mut config =
            rustls::ClientConfig::builder_with_provider(Arc::clone(&self.verifier.provider))
                .with_safe_default_protocol_versions()
                .map_err(|e| tls_err(format!("unsupported protocol versions: {e}")))?
                .dangerous()
                .with_custom_certificate_verifier(self.verifier.clone())
                .with_no_client_auth();
        config.alpn_protocols = vec![ALPN_H2.to_vec()];
        Ok(Arc::new(config))
    }

    /// A tokio connector using [`client_config`](Self::client_config).
    pub fn connector(&self) -> Result<TlsConnector> {
        Ok(TlsConnector::from(self.client_config()?))
    }
}

/// Chain verification against the trusted roots, without name matching,
/// restricted to loopback server names.
#[derive(Debug)]
struct LoopbackVerifier {
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
}

fn is_loopback(server_name: &ServerName<'_>) -> bool {
    match server_name {
        ServerName::DnsName(name) => name.as_ref().eq_ignore_ascii_case("localhost"),
        ServerName::IpAddress(ip) => IpAddr::from(*ip).is_loopback(),
        _ => false,
    }
}

impl ServerCertVerifier for LoopbackVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        if !is_loopback(server_name) {
            return Err(rustls::Error::General(format!(
                "loopback trust refuses non-loopback server name {server_name:?}"
            )));
        }

        let cert = ParsedCertificate::try_from(end_entity)?;
        rustls::client::verify_server_cert_signed_by_trust_anchor(
            &cert,
            &self.roots,
            intermediates,
            now,
            self.provider.signature_verification_algorithms.all,
        )?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use rcgen::{BasicConstraints, CertificateParams, IsCa, KeyPair};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

    struct Pki {
        _dir: tempfile::TempDir,
        ca: PathBuf,
        server: TlsPaths,
        client_chain: Vec<CertificateDer<'static>>,
        client_key: PrivateKeyDer<'static>,
    }

    fn write(dir: &Path, name: &str, contents: &str) -> std::io::Result<PathBuf> {
        let path = dir.join(name);
        std::fs::write(&path, contents)?;
        Ok(path)
    }

    /// A CA, a `localhost` server certificate and a client certificate,
    /// both signed by the CA.
    fn pki() -> std::result::Result<Pki, Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;

        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let ca_key = KeyPair::generate()?;
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let server_key = KeyPair::generate()?;
        let server_cert = CertificateParams::new(vec!["localhost".to_string()])?
            .signed_by(&server_key, &ca_cert, &ca_key)?;

        let client_key = KeyPair::generate()?;
        let client_cert = CertificateParams::new(vec!["network-server".to_string()])?
            .signed_by(&client_key, &ca_cert, &ca_key)?;

        let ca = write(dir.path(), "ca.pem", &ca_cert.pem())?;
        let server = TlsPaths {
            cert_path: write(dir.path(), "server.pem", &server_cert.pem())?,
            key_path: write(dir.path(), "server-key.pem", &server_key.serialize_pem())?,
        };

        Ok(Pki {
            _dir: dir,
            ca,
            server,
            client_chain: vec![client_cert.der().clone()],
            client_key: PrivateKeyDer::Pkcs8(rustls::pki_types::PrivatePkcs8KeyDer::from(
                client_key.serialize_der(),
            )),
        })
    }

    fn client_config(
        pki: &Pki,
        present_cert: bool,
    ) -> std::result::Result<Arc<rustls::ClientConfig>, Box<dyn std::error::Error>> {
        let builder = rustls::ClientConfig::builder_with_provider(provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(load_root_store(&pki.ca)?);
        let mut config = if present_cert {
            builder.with_client_auth_cert(pki.client_chain.clone(), pki.client_key.clone_key())?
        } else {
            builder.with_no_client_auth()
        };
        config.alpn_protocols = vec![ALPN_H2.to_vec()];
        Ok(Arc::new(config))
    }

    /// Runs a handshake over an in-memory duplex and echoes one byte.
    async fn handshake(
        creds: &TransportCredentials,
        client: Arc<rustls::ClientConfig>,
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let acceptor = creds.acceptor();
        let connector = TlsConnector::from(client);

        let server = async move {
            let mut stream = acceptor.accept(server_io).await?;
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await?;
            stream.write_all(&byte).await?;
            stream.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        let client = async move {
            let name = ServerName::try_from("localhost")?.to_owned();
            let mut stream = connector.connect(name, client_io).await?;
            stream.write_all(&[7]).await?;
            stream.flush().await?;
            let mut byte = [0u8; 1];
            stream.read_exact(&mut byte).await?;
            assert_eq!(byte[0], 7);
            Ok::<(), Box<dyn std::error::Error>>(())
        };

        let (server_result, client_result) = tokio::join!(server, client);
        server_result?;
        client_result
    }

    #[test]
    fn mutual_tls_without_ca_fails() -> TestResult {
        let pki = pki()?;
        let result = TransportCredentials::load(&pki.server, None, true, AlpnProtocols::Rpc);
        assert!(matches!(result, Err(AppServerError::TlsError { .. })));
        Ok(())
    }

    #[test]
    fn missing_file_is_named_in_error() -> TestResult {
        let pki = pki()?;
        let identity = TlsPaths {
            cert_path: PathBuf::from("/nonexistent/loraapp/http.pem"),
            key_path: pki.server.key_path.clone(),
        };
        let err = match TransportCredentials::for_public(&identity) {
            Err(err) => err,
            Ok(_) => return Err("expected a tls error".into()),
        };
        assert!(err.to_string().contains("/nonexistent/loraapp/http.pem"));
        Ok(())
    }

    #[test]
    fn garbage_ca_is_rejected() -> TestResult {
        let pki = pki()?;
        let dir = tempfile::tempdir()?;
        let bogus = write(dir.path(), "ca.pem", "not a certificate")?;
        let result = TransportCredentials::load(&pki.server, Some(&bogus), true, AlpnProtocols::Rpc);
        assert!(matches!(result, Err(AppServerError::TlsError { .. })));
        Ok(())
    }

    #[test]
    fn rpc_mode_maps_to_credentials() -> TestResult {
        let pki = pki()?;
        assert!(TransportCredentials::for_rpc(&RpcTlsMode::Plaintext)?.is_none());

        let server_only = TransportCredentials::for_rpc(&RpcTlsMode::ServerOnly(pki.server.clone()))?;
        assert!(matches!(server_only, Some(ref c) if !c.requires_client_cert()));

        let mutual = TransportCredentials::for_rpc(&RpcTlsMode::Mutual {
            identity: pki.server.clone(),
            ca_path: pki.ca.clone(),
        })?;
        assert!(matches!(mutual, Some(ref c) if c.requires_client_cert()));
        Ok(())
    }

    #[test]
    fn public_listener_offers_h2_and_http11() -> TestResult {
        let pki = pki()?;
        let creds = TransportCredentials::for_public(&pki.server)?;
        assert_eq!(
            creds.server_config().alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn mutual_tls_accepts_client_with_certificate() -> TestResult {
        let pki = pki()?;
        let creds = TransportCredentials::load(&pki.server, Some(&pki.ca), true, AlpnProtocols::Rpc)?;
        handshake(&creds, client_config(&pki, true)?).await
    }

    #[tokio::test]
    async fn optional_client_ca_allows_anonymous_clients() -> TestResult {
        let pki = pki()?;
        let creds = TransportCredentials::load(&pki.server, Some(&pki.ca), false, AlpnProtocols::Rpc)?;
        assert!(!creds.requires_client_cert());
        handshake(&creds, client_config(&pki, false)?).await?;
        handshake(&creds, client_config(&pki, true)?).await
    }

    #[tokio::test]
    async fn mutual_tls_rejects_client_without_certificate() -> TestResult {
        let pki = pki()?;
        let creds = TransportCredentials::load(&pki.server, Some(&pki.ca), true, AlpnProtocols::Rpc)?;
        assert!(handshake(&creds, client_config(&pki, false)?).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn loopback_trust_accepts_self_signed_listener_certificate() -> TestResult {
        let dir = tempfile::tempdir()?;
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
        let identity = TlsPaths {
            cert_path: write(dir.path(), "http.pem", &certified.cert.pem())?,
            key_path: write(dir.path(), "http-key.pem", &certified.key_pair.serialize_pem())?,
        };

        let creds = TransportCredentials::for_public(&identity)?;
        let trust = LoopbackTrust::from_pem_file(&identity.cert_path)?;
        handshake(&creds, trust.client_config()?).await
    }

    #[tokio::test]
    async fn loopback_trust_accepts_ca_issued_certificate() -> TestResult {
        let pki = pki()?;
        let creds = TransportCredentials::for_public(&pki.server)?;
        let trust = LoopbackTrust::from_pem_file(&pki.ca)?;
        handshake(&creds, trust.client_config()?).await
    }

    #[test]
    fn loopback_names_only() -> TestResult {
        assert!(is_loopback(&ServerName::try_from("localhost")?));
        assert!(is_loopback(&ServerName::try_from("LOCALHOST")?));
        assert!(is_loopback(&ServerName::try_from("127.0.0.1")?));
        assert!(is_loopback(&ServerName::try_from("::1")?));
        assert!(!is_loopback(&ServerName::try_from("example.com")?));
        assert!(!is_loopback(&ServerName::try_from("10.0.0.1")?));
        Ok(())
    }

    #[tokio::test]
    async fn loopback_trust_refuses_remote_names() -> TestResult {
        let pki = pki()?;
        let creds = TransportCredentials::for_public(&pki.server)?;
        let trust = LoopbackTrust::from_pem_file(&pki.ca)?;

        let (client_io, server_io) = tokio::io::duplex(16 * 1024);
        let acceptor = creds.acceptor();
        let connector = trust.connector()?;
        let server = async move { acceptor.accept(server_io).await.map(|_| ()) };
        let client = async move {
            let name = ServerName::try_from("example.com")?.to_owned();
            connector.connect(name, client_io).await.map(|_| ())?;
            Ok::<(), Box<dyn std::error::Error>>(())
        };
        let (_, client_result) = tokio::join!(server, client);
        assert!(client_result.is_err());
        Ok(())
    }
}

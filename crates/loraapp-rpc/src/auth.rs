//! Request authentication for the client-facing services.
//!
//! # Validators
//!
//! - **SecretKey**: the `authorization` metadata must carry a JWT signed
//!   with the shared secret (HMAC). The signature, the algorithm and, when
//!   present, the `exp` claim are checked.
//! - **Nop**: every request is accepted as [`Principal::Anonymous`]. It is
//!   selected when no secret is configured, and a warning is logged when
//!   that happens.
//!
//! # Security notes
//!
//! - Every rejection yields the same `Unauthenticated` status with the
//!   same message. The concrete reason is only logged at `debug`.
//! - The interceptor runs before the service sees the request; the
//!   accepted [`Principal`] is stored in the request extensions.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tonic::{Request, Status};

use loraapp_types::{AppServerError, Result};

/// Metadata key carrying the credential.
pub const AUTHORIZATION: &str = "authorization";

/// Message of every authentication failure.
const UNAUTHENTICATED_MESSAGE: &str = "authentication failed";

// ---------------------------------------------------------------------------
// Claims / Principal
// ---------------------------------------------------------------------------

/// Claims carried by an accepted token.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Claims {
    /// Name of the authenticated user.
    pub username: String,
    /// Whether the user has administrative rights.
    pub admin: bool,
    /// Expiry as seconds since the Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

/// Identity attached to an accepted request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Principal {
    /// A verified token.
    Token(Claims),
    /// Authentication is disabled.
    Anonymous,
}

/// Uniform rejection. The concrete reason is only logged.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Unauthorized;

impl From<Unauthorized> for Status {
    fn from(_: Unauthorized) -> Self {
        Status::unauthenticated(UNAUTHENTICATED_MESSAGE)
    }
}

// ---------------------------------------------------------------------------
// SecretKeyValidator
// ---------------------------------------------------------------------------

/// Verifies HMAC-signed JWTs against a shared secret.
#[derive(Clone)]
pub struct SecretKeyValidator {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for SecretKeyValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretKeyValidator")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl SecretKeyValidator {
    /// Creates a validator for `algorithm`, which must be HS256, HS384 or
    /// HS512.
    ///
    /// # Errors
    ///
    /// [`AppServerError::ConfigError`] for an empty secret or a non-HMAC
    /// algorithm.
    pub fn new(secret: &str, algorithm: Algorithm) -> Result<Self> {
        if secret.is_empty() {
            return Err(AppServerError::ConfigError {
                reason: "jwt secret must not be empty".into(),
            });
        }
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AppServerError::ConfigError {
                reason: format!("jwt algorithm {algorithm:?} is not an HMAC algorithm"),
            });
        }

        let mut validation = Validation::new(algorithm);
        // `exp` is checked when present but not required.
        validation.required_spec_claims.clear();
        validation.validate_exp = true;

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Verifies `token` and returns its claims.
    pub fn validate(&self, token: &str) -> std::result::Result<Claims, Unauthorized> {
        match jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => {
                tracing::debug!(error = %e, "rejected token");
                Err(Unauthorized)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuthValidator
// ---------------------------------------------------------------------------

/// Authentication strategy, selected once at startup.
#[derive(Clone, Debug)]
pub enum AuthValidator {
    /// JWT verification with a shared secret.
    SecretKey(SecretKeyValidator),
    /// Authentication disabled.
    Nop,
}

impl AuthValidator {
    /// Selects the strategy from the configured secret. `None` selects
    /// [`AuthValidator::Nop`] and logs a warning.
    pub fn from_secret(secret: Option<&str>) -> Result<Self> {
        match secret {
            Some(secret) => {
                tracing::info!("client api authentication enabled (HS256)");
                Ok(Self::SecretKey(SecretKeyValidator::new(secret, Algorithm::HS256)?))
            }
            None => {
                tracing::warn!(
                    "client api authentication and authorization is disabled (set jwt-secret to enable)"
                );
                Ok(Self::Nop)
            }
        }
    }

    /// Validates the raw `authorization` value, if any.
    ///
    /// An optional, case-insensitive `Bearer ` prefix is stripped.
    pub fn validate(&self, credential: Option<&str>) -> std::result::Result<Principal, Unauthorized> {
        match self {
            Self::Nop => Ok(Principal::Anonymous),
            Self::SecretKey(validator) => {
                let raw = credential.ok_or_else(|| {
                    tracing::debug!("missing authorization metadata");
                    Unauthorized
                })?;
                validator.validate(strip_bearer(raw)).map(Principal::Token)
            }
        }
    }
}

fn strip_bearer(raw: &str) -> &str {
    let raw = raw.trim();
    match raw.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("Bearer ") => raw[7..].trim_start(),
        _ => raw,
    }
}

// ---------------------------------------------------------------------------
// AuthInterceptor
// ---------------------------------------------------------------------------

/// gRPC interceptor applying an [`AuthValidator`].
///
/// Implements `tonic::service::Interceptor` and is cloneable so it can be
/// shared across every client-facing service.
#[derive(Clone, Debug)]
pub struct AuthInterceptor {
    validator: Arc<AuthValidator>,
}

impl AuthInterceptor {
    /// Wraps a shared validator.
    pub fn new(validator: Arc<AuthValidator>) -> Self {
        Self { validator }
    }
}

impl tonic::service::Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> std::result::Result<Request<()>, Status> {
        let credential = match request.metadata().get(AUTHORIZATION) {
            Some(value) => match value.to_str() {
                Ok(text) => Some(text),
                Err(_) => {
                    tracing::debug!("authorization metadata is not ascii");
                    if matches!(*self.validator, AuthValidator::Nop) {
                        None
                    } else {
                        return Err(Unauthorized.into());
                    }
                }
            },
            None => None,
        };

        let principal = self.validator.validate(credential)?;
        request.extensions_mut().insert(principal);
        Ok(request)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

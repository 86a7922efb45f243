//! Core shared types for the LoRa application server.
//!
//! Every crate in the workspace shares the identifiers, the error enum and
//! the server configuration defined here. No other crate defines types that
//! cross a crate boundary.

pub mod config;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Fixed-width hex identifiers
// ---------------------------------------------------------------------------

/// Declares a fixed-width byte identifier that is written and parsed as
/// lowercase hex (`Display` / `FromStr`).
macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident, $len:expr, $label:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name([u8; $len]);

        impl $name {
            /// The fixed byte length.
            pub const LEN: usize = $len;

            /// Creates a new value from raw bytes.
            pub fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Returns the underlying bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = AppServerError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                let bytes = hex::decode(s).map_err(|_| AppServerError::InvalidArgument {
                    reason: format!("{} must be hex encoded, got '{s}'", $label),
                })?;
                if bytes.len() != $len {
                    return Err(AppServerError::InvalidArgument {
                        reason: format!(
                            "{} must be {} bytes, got {}",
                            $label,
                            $len,
                            bytes.len()
                        ),
                    });
                }
                let mut arr = [0u8; $len];
                arr.copy_from_slice(&bytes);
                Ok(Self(arr))
            }
        }
    };
}

hex_identifier!(
    /// 64-bit extended unique identifier (DevEUI / AppEUI).
    Eui64,
    8,
    "EUI"
);

hex_identifier!(
    /// 32-bit device address assigned to an activated node.
    DevAddr,
    4,
    "device address"
);

hex_identifier!(
    /// 128-bit AES key (AppKey, AppSKey, NwkSKey).
    AesKey,
    16,
    "AES key"
);

// ---------------------------------------------------------------------------
// RxWindow
// ---------------------------------------------------------------------------

/// Receive window used for downlink transmissions.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum RxWindow {
    /// First receive window.
    #[default]
    Rx1,
    /// Second receive window.
    Rx2,
}

// ---------------------------------------------------------------------------
// AppServerError
// ---------------------------------------------------------------------------

/// Unified error type for the application server.
///
/// Startup failures (`ConfigError`, `TlsError`, `NetworkError`,
/// `RegistrationError`, `StorageError` while opening) are fatal and reach
/// `main`. Request-time failures are mapped to a `tonic::Status` at the RPC
/// boundary.
#[derive(Debug, Error)]
pub enum AppServerError {
    /// A request field failed validation.
    #[error("invalid argument: {reason}")]
    InvalidArgument {
        /// Human-readable reason.
        reason: String,
    },

    /// The addressed object does not exist.
    #[error("not found: {reason}")]
    NotFound {
        /// Human-readable reason.
        reason: String,
    },

    /// An object with the same key already exists.
    #[error("already exists: {reason}")]
    AlreadyExists {
        /// Human-readable reason.
        reason: String,
    },

    /// Storage engine failure.
    #[error("storage error: {reason}")]
    StorageError {
        /// Human-readable reason.
        reason: String,
    },

    /// Invalid or inconsistent configuration.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable reason.
        reason: String,
    },

    /// TLS material could not be read or parsed.
    #[error("tls error: {reason}")]
    TlsError {
        /// Human-readable reason, naming the file involved.
        reason: String,
    },

    /// Binding or dialling a socket failed.
    #[error("network error: {reason}")]
    NetworkError {
        /// Human-readable reason.
        reason: String,
    },

    /// A service could not be registered on the RPC server or gateway.
    #[error("registration error: {reason}")]
    RegistrationError {
        /// Human-readable reason.
        reason: String,
    },
}

/// Convenience result type using [`AppServerError`].
pub type Result<T> = std::result::Result<T, AppServerError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

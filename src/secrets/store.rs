use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

use super::{
    request::{CreateRequest, UpdateRequest},
    types::{RecordMetadata, SecretKey},
};

/// Raw keychain result code, OSStatus style: zero is success, failures are negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);
    pub const PARAM: StatusCode = StatusCode(-50);
    pub const USER_CANCELED: StatusCode = StatusCode(-128);
    pub const NOT_AVAILABLE: StatusCode = StatusCode(-25291);
    pub const AUTH_FAILED: StatusCode = StatusCode(-25293);
    pub const DUPLICATE_ITEM: StatusCode = StatusCode(-25299);
    pub const ITEM_NOT_FOUND: StatusCode = StatusCode(-25300);
    pub const INTERACTION_NOT_ALLOWED: StatusCode = StatusCode(-25308);
    pub const DECODE: StatusCode = StatusCode(-26275);
    pub const MISSING_ENTITLEMENT: StatusCode = StatusCode(-34018);

    pub fn is_success(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.0, self.0 as u32)
    }
}

impl From<Result<(), StoreError>> for StatusCode {
    fn from(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => StatusCode::SUCCESS,
            Err(err) => err.status(),
        }
    }
}

/// Errors produced by secret record stores and the layers on top of them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("invalid access policy: {0}")]
    InvalidPolicy(String),
    #[error("secret not found: {0}")]
    NotFound(String),
    #[error("secret already exists: {0}")]
    AlreadyExists(String),
    #[error("user authentication unavailable: {0}")]
    AuthenticationUnavailable(String),
    #[error("user authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("access denied ({status}): {message}")]
    Denied { status: StatusCode, message: String },
    #[error("secret store unavailable ({status}): {message}")]
    Unavailable { status: StatusCode, message: String },
    #[error("secret store error: {0}")]
    Store(String),
}

impl StoreError {
    pub fn denied(message: impl Into<String>) -> Self {
        StoreError::Denied {
            status: StatusCode::INTERACTION_NOT_ALLOWED,
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        StoreError::Unavailable {
            status: StatusCode::NOT_AVAILABLE,
            message: message.into(),
        }
    }

    /// Classifies a non-success keychain status for the record `key`.
    ///
    /// Codes outside the known set stay attached to `Unavailable` verbatim.
    pub fn from_status(status: StatusCode, key: &SecretKey) -> Self {
        match status {
            StatusCode::ITEM_NOT_FOUND => StoreError::NotFound(key.to_string()),
            StatusCode::DUPLICATE_ITEM => StoreError::AlreadyExists(key.to_string()),
            StatusCode::PARAM => StoreError::InvalidOptions(format!(
                "keychain rejected the attributes for {key}"
            )),
            StatusCode::AUTH_FAILED | StatusCode::USER_CANCELED => {
                StoreError::AuthenticationFailed(key.to_string())
            }
            StatusCode::INTERACTION_NOT_ALLOWED | StatusCode::MISSING_ENTITLEMENT => {
                StoreError::Denied {
                    status,
                    message: format!("keychain refused access to {key}"),
                }
            }
            StatusCode::DECODE => StoreError::Store(format!("keychain could not decode {key}")),
            other => StoreError::Unavailable {
                status: other,
                message: format!("keychain operation on {key} failed"),
            },
        }
    }

    /// The raw status code handed back across the bridge for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            StoreError::InvalidOptions(_) | StoreError::InvalidPolicy(_) => StatusCode::PARAM,
            StoreError::NotFound(_) => StatusCode::ITEM_NOT_FOUND,
            StoreError::AlreadyExists(_) => StatusCode::DUPLICATE_ITEM,
            StoreError::AuthenticationUnavailable(_) => StatusCode::NOT_AVAILABLE,
            StoreError::AuthenticationFailed(_) => StatusCode::AUTH_FAILED,
            StoreError::Denied { status, .. } | StoreError::Unavailable { status, .. } => *status,
            StoreError::Store(_) => StatusCode::DECODE,
        }
    }
}

/// Persistence for presence-protected secret records.
///
/// At most one live record exists per [`SecretKey`]. `create_protected` must be
/// atomic with respect to other creates on the same key: of two racing creates
/// exactly one wins and the other gets [`StoreError::AlreadyExists`].
pub trait RecordStore: Send + Sync {
    fn exists(&self, key: &SecretKey) -> Result<bool, StoreError>;

    /// Overwrites value and sync flag of an existing record. Never touches the
    /// access policy and never prompts.
    fn update(&self, request: &UpdateRequest) -> Result<(), StoreError>;

    /// Creates a new record bound to the request's access token.
    fn create_protected(&self, request: &CreateRequest) -> Result<(), StoreError>;

    /// Reads the plaintext value. Presence-protected records show `prompt`.
    fn read(&self, key: &SecretKey, prompt: &str) -> Result<Zeroizing<Vec<u8>>, StoreError>;

    fn metadata(&self, key: &SecretKey) -> Result<RecordMetadata, StoreError>;

    fn delete(&self, key: &SecretKey) -> Result<(), StoreError>;

    /// Keys of every record stored under `service`.
    fn list(&self, service: &str) -> Result<Vec<SecretKey>, StoreError>;
}

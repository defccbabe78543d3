use std::fmt;

use zeroize::Zeroizing;

use super::{access_control::PlatformAccessToken, types::SecretKey};

/// Attribute set for overwriting an existing record.
#[derive(Clone)]
pub struct UpdateRequest {
    key: SecretKey,
    value: Zeroizing<Vec<u8>>,
    synchronizable: Option<bool>,
}

impl UpdateRequest {
    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn synchronizable(&self) -> Option<bool> {
        self.synchronizable
    }
}

/// Attribute set for adding a new record with its access control attached.
#[derive(Clone)]
pub struct CreateRequest {
    key: SecretKey,
    value: Zeroizing<Vec<u8>>,
    synchronizable: Option<bool>,
    access: PlatformAccessToken,
}

impl CreateRequest {
    pub fn key(&self) -> &SecretKey {
        &self.key
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn synchronizable(&self) -> Option<bool> {
        self.synchronizable
    }

    pub fn access(&self) -> &PlatformAccessToken {
        &self.access
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .field("synchronizable", &self.synchronizable)
            .finish()
    }
}

impl fmt::Debug for CreateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateRequest")
            .field("key", &self.key)
            .field("value", &"<redacted>")
            .field("synchronizable", &self.synchronizable)
            .field("access", &self.access)
            .finish()
    }
}

/// Value bytes plus sync flag; the access policy of the record is left alone.
pub fn build_update_request(
    key: &SecretKey,
    value: &str,
    synchronizable: Option<bool>,
) -> UpdateRequest {
    UpdateRequest {
        key: key.clone(),
        value: Zeroizing::new(value.as_bytes().to_vec()),
        synchronizable,
    }
}

pub fn build_create_request(
    key: &SecretKey,
    value: &str,
    synchronizable: Option<bool>,
    access: PlatformAccessToken,
) -> CreateRequest {
    CreateRequest {
        key: key.clone(),
        value: Zeroizing::new(value.as_bytes().to_vec()),
        synchronizable,
        access,
    }
}

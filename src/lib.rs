//! Presence-gated secret storage on top of the platform keychain.
//!
//! [`WriteOrchestrator`] decides between updating an existing record and
//! creating a new one bound to an access policy that demands user presence.
//! [`SecretStorage`] is the key/value surface a host application binds to.

pub mod secrets;

pub use secrets::{
    access_control::{AccessControlProvider, PlatformAccessToken, SoftwareAccessControl},
    auth::AuthenticationContext,
    create_access_control, create_record_store,
    keyring_store::KeyringRecordStore,
    manager::SecretStorage,
    memory_store::{InMemoryRecordStore, PresenceAuthenticator},
    options::StorageOptions,
    request::{build_create_request, build_update_request, CreateRequest, UpdateRequest},
    store::{RecordStore, StatusCode, StoreError},
    types::{AccessPolicy, Accessibility, RecordMetadata, SecretKey},
    writer::WriteOrchestrator,
};

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use secrets::biometric_store::{KeychainAccessControl, KeychainRecordStore};

pub mod access_control;
pub mod auth;
pub mod keyring_store;
pub mod manager;
pub mod memory_store;
pub mod options;
pub mod request;
pub mod store;
pub mod types;
pub mod writer;

#[cfg(any(target_os = "macos", target_os = "ios"))]
pub mod biometric_store;

use std::sync::Arc;

use access_control::AccessControlProvider;
use store::RecordStore;

/// Create a record store appropriate for the current platform.
///
/// On Apple targets, this uses the Security framework keychain so records can
/// carry user-presence access control. Elsewhere it uses the OS keyring, which
/// cannot gate records on user presence.
pub fn create_record_store(service: &str) -> Arc<dyn RecordStore> {
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        log::info!("Using keychain record store for {service} (framework: Security)");
        Arc::new(biometric_store::KeychainRecordStore::new())
    }

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    {
        log::info!("Using keyring record store for {service} (framework: keyring crate)");
        Arc::new(keyring_store::KeyringRecordStore::new())
    }
}

/// Access-control provider matching [`create_record_store`].
pub fn create_access_control() -> Arc<dyn AccessControlProvider> {
    #[cfg(any(target_os = "macos", target_os = "ios"))]
    {
        if !biometric_store::KeychainAccessControl::check_presence_available() {
            log::info!("User presence not available, protected creates will fail");
        }
        Arc::new(biometric_store::KeychainAccessControl)
    }

    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    {
        Arc::new(access_control::SoftwareAccessControl)
    }
}

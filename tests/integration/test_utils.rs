use std::sync::Arc;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use secure_storage::{
    AuthenticationContext, InMemoryRecordStore, PresenceAuthenticator, SecretStorage,
    SoftwareAccessControl, StorageOptions, WriteOrchestrator,
};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A service name no other test run will collide with.
#[cfg_attr(not(feature = "integration-tests"), allow(dead_code))]
pub fn unique_service(label: &str) -> String {
    format!("secure_storage_test_{label}_{}", Uuid::new_v4().as_simple())
}

pub fn auth_options(reason: &str, timeout: Option<&str>) -> Map<String, Value> {
    let mut options = Map::new();
    options.insert("localizedReason".into(), json!(reason));
    if let Some(timeout) = timeout {
        options.insert("userAuthenticationTimeout".into(), json!(timeout));
    }
    options
}

pub fn memory_orchestrator() -> (Arc<InMemoryRecordStore>, WriteOrchestrator) {
    let store = Arc::new(InMemoryRecordStore::new(PresenceAuthenticator::Enrolled));
    let writer = WriteOrchestrator::new(store.clone(), Arc::new(SoftwareAccessControl));
    (store, writer)
}

pub fn memory_storage(
    store: Arc<InMemoryRecordStore>,
    prefix: &str,
    reason: Option<&str>,
) -> SecretStorage {
    let options = StorageOptions {
        key_prefix: prefix.to_string(),
        authentication: reason
            .map(|reason| AuthenticationContext::new(reason, None))
            .transpose()
            .expect("valid reason"),
        ..StorageOptions::default()
    };
    SecretStorage::new(store, Arc::new(SoftwareAccessControl), options)
}

use std::sync::Arc;

use log::debug;
use serde_json::{Map, Value};

use super::{
    access_control::AccessControlProvider,
    auth::AuthenticationContext,
    request::{build_create_request, build_update_request},
    store::{RecordStore, StatusCode, StoreError},
    types::{AccessPolicy, Accessibility, SecretKey},
};

/// Decides between updating an existing record and creating a new protected one.
///
/// Stateless between calls. `key_exists` comes from a lookup the caller made
/// beforehand; another writer can create or delete the key in between, in
/// which case the store reports `NotFound` or `AlreadyExists`. Callers that
/// need the check and the write to be atomic must hold a per-key lock across
/// both (see [`SecretStorage`](super::manager::SecretStorage)).
#[derive(Clone)]
pub struct WriteOrchestrator {
    store: Arc<dyn RecordStore>,
    access_control: Arc<dyn AccessControlProvider>,
}

impl WriteOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, access_control: Arc<dyn AccessControlProvider>) -> Self {
        Self {
            store,
            access_control,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Writes `value` under `key`, gating creation on user presence.
    ///
    /// Existing records are updated in place without prompting. New records
    /// are bound to `accessibility` plus a user-presence requirement, with the
    /// authentication context decoded from `auth_options`.
    pub fn write(
        &self,
        key: &SecretKey,
        accessibility: Accessibility,
        key_exists: bool,
        synchronizable: Option<bool>,
        value: &str,
        auth_options: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        if key_exists {
            return self.update(key, synchronizable, value);
        }
        let context = AuthenticationContext::from_options(auth_options)?;
        self.create(
            key,
            AccessPolicy::new(accessibility, true),
            synchronizable,
            value,
            Some(context),
        )
    }

    /// Same as [`write`](Self::write) but reports the raw status code.
    pub fn write_status(
        &self,
        key: &SecretKey,
        accessibility: Accessibility,
        key_exists: bool,
        synchronizable: Option<bool>,
        value: &str,
        auth_options: &Map<String, Value>,
    ) -> StatusCode {
        let status = StatusCode::from(self.write(
            key,
            accessibility,
            key_exists,
            synchronizable,
            value,
            auth_options,
        ));
        debug!("[secrets] write {key} returned status {status}");
        status
    }

    /// Branches on `key_exists` with an explicit policy. A policy without a
    /// presence requirement creates a plain record and needs no context.
    pub fn write_with_policy(
        &self,
        key: &SecretKey,
        policy: AccessPolicy,
        key_exists: bool,
        synchronizable: Option<bool>,
        value: &str,
        context: Option<AuthenticationContext>,
    ) -> Result<(), StoreError> {
        if key_exists {
            self.update(key, synchronizable, value)
        } else {
            self.create(key, policy, synchronizable, value, context)
        }
    }

    fn update(
        &self,
        key: &SecretKey,
        synchronizable: Option<bool>,
        value: &str,
    ) -> Result<(), StoreError> {
        debug!("[secrets] update path for {key}");
        let request = build_update_request(key, value, synchronizable);
        self.store.update(&request)
    }

    fn create(
        &self,
        key: &SecretKey,
        policy: AccessPolicy,
        synchronizable: Option<bool>,
        value: &str,
        context: Option<AuthenticationContext>,
    ) -> Result<(), StoreError> {
        debug!(
            "[secrets] create path for {key} accessibility={} presence={}",
            policy.accessibility(),
            policy.requires_user_presence()
        );
        let access = self.access_control.access_token(policy, context)?;
        let request = build_create_request(key, value, synchronizable, access);
        self.store.create_protected(&request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{
        access_control::SoftwareAccessControl,
        memory_store::{InMemoryRecordStore, PresenceAuthenticator},
    };
    use serde_json::json;

    fn options(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test options must be an object"),
        }
    }

    fn orchestrator() -> (Arc<InMemoryRecordStore>, WriteOrchestrator) {
        let store = Arc::new(InMemoryRecordStore::new(PresenceAuthenticator::Enrolled));
        let writer = WriteOrchestrator::new(store.clone(), Arc::new(SoftwareAccessControl));
        (store, writer)
    }

    #[test]
    fn create_path_binds_presence_policy() {
        let (store, writer) = orchestrator();
        let key = SecretKey::new("svc", "pin");
        let auth = options(json!({ "localizedReason": "Unlock", "userAuthenticationTimeout": "30" }));

        writer
            .write(&key, Accessibility::WhenUnlockedThisDeviceOnly, false, None, "1234", &auth)
            .unwrap();

        let meta = store.metadata(&key).unwrap();
        assert!(meta.policy.requires_user_presence());
        assert_eq!(
            meta.policy.accessibility(),
            Accessibility::WhenUnlockedThisDeviceOnly
        );
        assert_eq!(&*store.read(&key, "Unlock").unwrap(), b"1234");
        assert_eq!(store.reuse_window(&key), Some(30.0));
    }

    #[test]
    fn update_path_ignores_auth_options() {
        let (store, writer) = orchestrator();
        let key = SecretKey::new("svc", "pin");
        let auth = options(json!({ "localizedReason": "Unlock" }));
        writer
            .write(&key, Accessibility::AfterFirstUnlock, false, Some(false), "old", &auth)
            .unwrap();
        let before = store.metadata(&key).unwrap();

        // Empty options would fail decoding; the update path never looks at them.
        let status = writer.write_status(
            &key,
            Accessibility::Always,
            true,
            Some(true),
            "new",
            &Map::new(),
        );
        assert_eq!(status, StatusCode::SUCCESS);

        let after = store.metadata(&key).unwrap();
        assert_eq!(after.policy, before.policy);
        assert_eq!(after.synchronizable, Some(true));
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(&*store.read(&key, "Unlock").unwrap(), b"new");
    }

    #[test]
    fn missing_reason_fails_before_touching_store() {
        let (store, writer) = orchestrator();
        let key = SecretKey::new("svc", "pin");
        let auth = options(json!({ "userAuthenticationTimeout": "30" }));

        let err = writer
            .write(&key, Accessibility::WhenUnlocked, false, None, "1234", &auth)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOptions(_)));
        assert!(!store.exists(&key).unwrap());
    }

    #[test]
    fn stale_existence_flags_surface_store_errors() {
        let (_store, writer) = orchestrator();
        let key = SecretKey::new("svc", "pin");
        let auth = options(json!({ "localizedReason": "Unlock" }));

        let status =
            writer.write_status(&key, Accessibility::WhenUnlocked, true, None, "x", &auth);
        assert_eq!(status, StatusCode::ITEM_NOT_FOUND);

        writer
            .write(&key, Accessibility::WhenUnlocked, false, None, "x", &auth)
            .unwrap();
        let status =
            writer.write_status(&key, Accessibility::WhenUnlocked, false, None, "y", &auth);
        assert_eq!(status, StatusCode::DUPLICATE_ITEM);
    }

    #[test]
    fn unenrolled_device_reports_authentication_unavailable() {
        let store = Arc::new(InMemoryRecordStore::new(PresenceAuthenticator::NotEnrolled));
        let writer = WriteOrchestrator::new(store.clone(), Arc::new(SoftwareAccessControl));
        let key = SecretKey::new("svc", "pin");
        let auth = options(json!({ "localizedReason": "Unlock" }));

        let err = writer
            .write(&key, Accessibility::WhenUnlocked, false, None, "1234", &auth)
            .unwrap_err();
        assert!(matches!(err, StoreError::AuthenticationUnavailable(_)));
        assert!(!store.exists(&key).unwrap());
    }
}

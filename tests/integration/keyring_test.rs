//! Round-trips against the real OS keyring. Run with `--features integration-tests`.
#![cfg(feature = "integration-tests")]

use std::sync::Arc;

use anyhow::{anyhow, Result};

use secure_storage::{
    AccessPolicy, Accessibility, KeyringRecordStore, RecordStore, SecretKey,
    SoftwareAccessControl, StoreError, WriteOrchestrator,
};

use super::test_utils::{auth_options, init_logging, unique_service};

struct CleanupRecord {
    store: Arc<KeyringRecordStore>,
    key: SecretKey,
}

impl Drop for CleanupRecord {
    fn drop(&mut self) {
        let _ = self.store.delete(&self.key);
    }
}

#[test]
fn keyring_plain_record_round_trip() -> Result<()> {
    init_logging();
    let store = Arc::new(KeyringRecordStore::new());
    let writer = WriteOrchestrator::new(store.clone(), Arc::new(SoftwareAccessControl));
    let key = SecretKey::new(unique_service("plain"), "token");
    let _cleanup = CleanupRecord {
        store: store.clone(),
        key: key.clone(),
    };

    writer.write_with_policy(
        &key,
        AccessPolicy::new(Accessibility::AfterFirstUnlock, false),
        false,
        Some(false),
        "first",
        None,
    )?;
    writer.write_with_policy(
        &key,
        AccessPolicy::new(Accessibility::Always, false),
        true,
        Some(true),
        "second",
        None,
    )?;

    let meta = store.metadata(&key)?;
    if meta.policy.accessibility() != Accessibility::AfterFirstUnlock {
        return Err(anyhow!("update changed the policy: {:?}", meta.policy));
    }
    assert_eq!(meta.synchronizable, Some(true));
    assert_eq!(&*store.read(&key, "")?, b"second");
    assert_eq!(store.list(&key.service)?, vec![key.clone()]);
    Ok(())
}

#[test]
fn keyring_refuses_presence_records() -> Result<()> {
    init_logging();
    let store = Arc::new(KeyringRecordStore::new());
    let writer = WriteOrchestrator::new(store.clone(), Arc::new(SoftwareAccessControl));
    let key = SecretKey::new(unique_service("presence"), "pin");

    match writer.write(
        &key,
        Accessibility::WhenUnlocked,
        false,
        None,
        "1234",
        &auth_options("Unlock", None),
    ) {
        Err(StoreError::AuthenticationUnavailable(_)) => {}
        other => return Err(anyhow!("expected AuthenticationUnavailable, got {other:?}")),
    }
    assert!(!store.exists(&key)?);
    Ok(())
}

use std::sync::Arc;

use anyhow::{anyhow, Result};

use secure_storage::{
    InMemoryRecordStore, PresenceAuthenticator, RecordStore, SecretStorage, StoreError,
};

use super::test_utils::{init_logging, memory_storage};

#[test]
fn read_all_strips_prefix_and_ignores_other_prefixes() -> Result<()> {
    init_logging();
    let store = Arc::new(InMemoryRecordStore::default());
    let app = memory_storage(store.clone(), "app", None);
    let other = memory_storage(store.clone(), "other", None);

    app.write("token", "abc")?;
    app.write("refresh", "def")?;
    other.write("token", "zzz")?;

    let all = app.read_all()?;
    if all.len() != 2 {
        return Err(anyhow!("expected 2 values, got {:?}", all.keys()));
    }
    assert_eq!(all.get("token").map(String::as_str), Some("abc"));
    assert_eq!(all.get("refresh").map(String::as_str), Some("def"));
    Ok(())
}

#[test]
fn delete_all_leaves_other_prefixes_alone() -> Result<()> {
    init_logging();
    let store = Arc::new(InMemoryRecordStore::default());
    let app = memory_storage(store.clone(), "app", None);
    let other = memory_storage(store.clone(), "other", None);

    app.write("a", "1")?;
    app.write("b", "2")?;
    other.write("a", "3")?;

    app.delete_all()?;
    assert!(app.read_all()?.is_empty());
    assert_eq!(other.read("a")?.as_deref(), Some("3"));
    Ok(())
}

#[test]
fn update_keeps_creation_policy() -> Result<()> {
    init_logging();
    let store = Arc::new(InMemoryRecordStore::default());
    let protected = memory_storage(store.clone(), "app", Some("Unlock"));
    protected.write("pin", "1111")?;
    let before = store.metadata(&protected.key("pin"))?;

    // A second handle without presence options updates the same record.
    let plain = memory_storage(store.clone(), "app", None);
    plain.write("pin", "2222")?;
    let after = store.metadata(&plain.key("pin"))?;

    assert_eq!(before.policy, after.policy);
    assert!(after.policy.requires_user_presence());
    assert_eq!(protected.read("pin")?.as_deref(), Some("2222"));
    Ok(())
}

#[test]
fn protected_write_without_enrolment_fails() -> Result<()> {
    init_logging();
    let store = Arc::new(InMemoryRecordStore::new(PresenceAuthenticator::NotEnrolled));
    let storage: SecretStorage = memory_storage(store, "app", Some("Unlock"));

    match storage.write("pin", "1234") {
        Err(StoreError::AuthenticationUnavailable(_)) => {}
        other => return Err(anyhow!("expected AuthenticationUnavailable, got {other:?}")),
    }
    assert!(!storage.contains_key("pin")?);
    Ok(())
}

#[test]
fn concurrent_writers_through_storage_never_collide() -> Result<()> {
    init_logging();
    let store = Arc::new(InMemoryRecordStore::default());
    let storage = memory_storage(store, "app", Some("Unlock"));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let storage = storage.clone();
            std::thread::spawn(move || storage.write("shared", &format!("value-{i}")))
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow!("writer thread panicked"))??;
    }

    let value = storage
        .read("shared")?
        .ok_or_else(|| anyhow!("expected a value after concurrent writes"))?;
    assert!(value.starts_with("value-"));
    Ok(())
}

use std::sync::{Arc, Barrier};

use anyhow::{anyhow, Result};

use secure_storage::{
    AccessPolicy, Accessibility, RecordStore, SecretKey, StatusCode, StoreError,
};

use super::test_utils::{auth_options, init_logging, memory_orchestrator};

#[test]
fn racing_creates_on_same_key_have_one_winner() -> Result<()> {
    init_logging();
    let (store, writer) = memory_orchestrator();
    let key = SecretKey::new("svc", "raced");
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["first", "second"]
        .into_iter()
        .map(|value| {
            let writer = writer.clone();
            let key = key.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let auth = auth_options("Unlock", None);
                barrier.wait();
                writer.write(&key, Accessibility::WhenUnlocked, false, None, value, &auth)
            })
        })
        .collect();

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.join().map_err(|_| anyhow!("writer thread panicked"))?);
    }

    let wins = results.iter().filter(|result| result.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|result| matches!(result, Err(StoreError::AlreadyExists(_))))
        .count();
    assert_eq!((wins, duplicates), (1, 1));

    let stored = store.read(&key, "Unlock")?;
    assert!(&*stored == b"first" || &*stored == b"second");
    Ok(())
}

#[test]
fn created_value_reads_back() -> Result<()> {
    init_logging();
    let (store, writer) = memory_orchestrator();
    let auth = auth_options("Unlock", Some("30"));

    for (i, accessibility) in Accessibility::ALL.into_iter().enumerate() {
        let key = SecretKey::new("svc", format!("k{i}"));
        let status = writer.write_status(&key, accessibility, false, Some(false), "päss wörd", &auth);
        assert_eq!(status, StatusCode::SUCCESS);

        let meta = store.metadata(&key)?;
        assert_eq!(meta.policy, AccessPolicy::new(accessibility, true));
        assert_eq!(&*store.read(&key, "Unlock")?, "päss wörd".as_bytes());
    }
    Ok(())
}

#[test]
fn bad_timeout_still_writes() -> Result<()> {
    init_logging();
    let (store, writer) = memory_orchestrator();
    let key = SecretKey::new("svc", "lenient");
    let auth = auth_options("Unlock", Some("abc"));

    writer.write(&key, Accessibility::AfterFirstUnlock, false, None, "v", &auth)?;
    assert_eq!(store.reuse_window(&key), None);
    Ok(())
}

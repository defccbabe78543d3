use std::{
    collections::{hash_map::DefaultHasher, BTreeMap},
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde_json::{Map, Value};

use super::{
    access_control::AccessControlProvider,
    options::StorageOptions,
    store::{RecordStore, StoreError},
    types::{AccessPolicy, SecretKey},
    writer::WriteOrchestrator,
};

/// Number of key locks shared by all names; keys hashing to the same stripe
/// serialise against each other.
const KEY_LOCK_STRIPES: usize = 64;

/// Key/value façade over a record store, scoped to one service and key prefix.
///
/// Writes and deletes hold a per-key lock, and a write keeps it across the
/// existence check and the write. Nothing else in this process can then slip
/// between `exists` and `update`/`create_protected`. Writers in other
/// processes still can, and surface as `NotFound` or `AlreadyExists`.
#[derive(Clone)]
pub struct SecretStorage {
    writer: WriteOrchestrator,
    options: StorageOptions,
    locks: Arc<[Mutex<()>]>,
}

impl SecretStorage {
    pub fn new(
        store: Arc<dyn RecordStore>,
        access_control: Arc<dyn AccessControlProvider>,
        options: StorageOptions,
    ) -> Self {
        Self {
            writer: WriteOrchestrator::new(store, access_control),
            options,
            locks: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Builds storage on the platform's default backend from the host's option map.
    pub fn initialize(options: &Map<String, Value>) -> Result<Self> {
        let options =
            StorageOptions::from_map(options).context("failed to decode storage options")?;
        let store = super::create_record_store(&options.service);
        let access_control = super::create_access_control();
        info!(
            "[secrets] storage ready service={} presence={}",
            options.service,
            options.authentication.is_some()
        );
        Ok(Self::new(store, access_control, options))
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Record key for a caller-visible name: `<prefix>_<name>` under the service.
    pub fn key(&self, name: &str) -> SecretKey {
        SecretKey::new(
            self.options.service.clone(),
            format!("{}_{}", self.options.key_prefix, name),
        )
    }

    pub fn write(&self, name: &str, value: &str) -> Result<(), StoreError> {
        let key = self.key(name);
        let _held = self.lock_key(&key)?;

        let key_exists = self.writer.store().exists(&key)?;
        let presence = self.options.authentication.is_some();
        debug!("[secrets] write {key} exists={key_exists} presence={presence}");
        self.writer.write_with_policy(
            &key,
            AccessPolicy::new(self.options.accessibility, presence),
            key_exists,
            self.options.synchronizable,
            value,
            self.options.authentication.clone(),
        )
    }

    /// Reads a value; `None` when nothing is stored under `name`.
    ///
    /// With `reset_on_error`, an undecodable record wipes every record under
    /// this prefix and reads as `None`. Only reads reset; failed writes,
    /// deletes and authentication errors are returned unchanged.
    pub fn read(&self, name: &str) -> Result<Option<String>, StoreError> {
        let key = self.key(name);
        match self.read_key(&key) {
            Err(StoreError::Store(msg)) if self.options.reset_on_error => {
                warn!("[secrets] resetting storage after unreadable record {key}: {msg}");
                self.delete_all()?;
                Ok(None)
            }
            other => other,
        }
    }

    pub fn contains_key(&self, name: &str) -> Result<bool, StoreError> {
        self.writer.store().exists(&self.key(name))
    }

    /// Every readable value under this prefix, keyed by unprefixed name.
    pub fn read_all(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let mut values = BTreeMap::new();
        for (name, key) in self.prefixed_keys()? {
            match self.read_key(&key) {
                Ok(Some(value)) => {
                    values.insert(name, value);
                }
                Ok(None) => {}
                Err(StoreError::Store(msg)) if self.options.reset_on_error => {
                    warn!("[secrets] resetting storage after unreadable record {key}: {msg}");
                    self.delete_all()?;
                    return Ok(BTreeMap::new());
                }
                Err(err) => return Err(err),
            }
        }
        Ok(values)
    }

    /// Removes `name`; a missing record is not an error.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        self.delete_key(&self.key(name))
    }

    /// Removes every record under this prefix, leaving other prefixes alone.
    pub fn delete_all(&self) -> Result<(), StoreError> {
        for (_, key) in self.prefixed_keys()? {
            self.delete_key(&key)?;
        }
        Ok(())
    }

    fn delete_key(&self, key: &SecretKey) -> Result<(), StoreError> {
        let _held = self.lock_key(key)?;
        match self.writer.store().delete(key) {
            Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn read_key(&self, key: &SecretKey) -> Result<Option<String>, StoreError> {
        let bytes = match self.writer.store().read(key, self.options.prompt()) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        String::from_utf8(bytes.to_vec())
            .map(Some)
            .map_err(|_| StoreError::Store(format!("value of {key} is not valid UTF-8")))
    }

    fn prefixed_keys(&self) -> Result<Vec<(String, SecretKey)>, StoreError> {
        let prefix = format!("{}_", self.options.key_prefix);
        Ok(self
            .writer
            .store()
            .list(&self.options.service)?
            .into_iter()
            .filter_map(|key| {
                key.account
                    .strip_prefix(&prefix)
                    .map(str::to_owned)
                    .map(|name| (name, key))
            })
            .collect())
    }

    fn lock_key(&self, key: &SecretKey) -> Result<MutexGuard<'_, ()>, StoreError> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let stripe = (hasher.finish() as usize) % self.locks.len();
        self.locks[stripe]
            .lock()
            .map_err(|err| StoreError::Store(format!("lock for {key} poisoned: {err}")))
    }
}

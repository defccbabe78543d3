use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use keyring::{Entry, Error as KeyringError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{
    request::{CreateRequest, UpdateRequest},
    store::{RecordStore, StoreError},
    types::{AccessPolicy, RecordMetadata, SecretKey},
};

/// Account holding the list of accounts stored under a service. The keyring
/// crate cannot enumerate entries on its own.
const INDEX_ACCOUNT: &str = "__secure_storage_index__";

/// What actually lands in the OS keyring for one record.
#[derive(Serialize, Deserialize)]
struct Envelope {
    value: String,
    policy: AccessPolicy,
    synchronizable: Option<bool>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Envelope {
    fn metadata(&self) -> RecordMetadata {
        RecordMetadata {
            policy: self.policy,
            synchronizable: self.synchronizable,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// OS-backed record storage using the `keyring` crate (Keychain/Credential Manager/Secret Service).
///
/// The keyring API has no access-control objects, so presence-protected
/// records are refused with `AuthenticationUnavailable`. Check-then-write
/// sequences are serialised inside this process only.
///
/// A record is only ever visible in the index while its envelope is stored:
/// creates roll the envelope back when the index cannot be written, and
/// deletes prune the index even when the envelope is already gone.
pub struct KeyringRecordStore {
    guard: Mutex<()>,
    // Some credential builders keep the password in the entry itself.
    entries: Mutex<HashMap<SecretKey, Arc<Entry>>>,
}

impl KeyringRecordStore {
    pub fn new() -> Self {
        Self {
            guard: Mutex::new(()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &SecretKey) -> Result<Arc<Entry>, StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|err| StoreError::Store(format!("keyring entry cache poisoned: {err}")))?;
        if let Some(entry) = entries.get(key) {
            return Ok(entry.clone());
        }
        let entry = Arc::new(Entry::new(&key.service, &key.account).map_err(|err| map_error(key, err))?);
        entries.insert(key.clone(), entry.clone());
        Ok(entry)
    }

    fn forget(&self, key: &SecretKey) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(key);
        }
    }

    fn add_to_index(&self, key: &SecretKey) -> Result<(), StoreError> {
        let mut accounts = self.index(&key.service)?;
        if accounts.insert(key.account.clone()) {
            self.save_index(&key.service, &accounts)?;
        }
        Ok(())
    }

    fn remove_from_index(&self, key: &SecretKey) -> Result<(), StoreError> {
        let mut accounts = self.index(&key.service)?;
        if accounts.remove(&key.account) {
            self.save_index(&key.service, &accounts)?;
        }
        Ok(())
    }

    fn load(&self, key: &SecretKey) -> Result<Option<Envelope>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(raw) => {
                let raw = Zeroizing::new(raw);
                serde_json::from_str(&raw).map(Some).map_err(|err| {
                    StoreError::Store(format!("failed to decode keyring record {key}: {err}"))
                })
            }
            Err(KeyringError::NoEntry) => Ok(None),
            Err(err) => Err(map_error(key, err)),
        }
    }

    fn save(&self, key: &SecretKey, envelope: &Envelope) -> Result<(), StoreError> {
        let encoded = Zeroizing::new(serde_json::to_string(envelope).map_err(|err| {
            StoreError::Store(format!("failed to encode keyring record {key}: {err}"))
        })?);
        self.entry(key)?
            .set_password(&encoded)
            .map_err(|err| map_error(key, err))
    }

    fn index(&self, service: &str) -> Result<BTreeSet<String>, StoreError> {
        let key = SecretKey::new(service, INDEX_ACCOUNT);
        match self.entry(&key)?.get_password() {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                StoreError::Store(format!("failed to decode keyring index for {service}: {err}"))
            }),
            Err(KeyringError::NoEntry) => Ok(BTreeSet::new()),
            Err(err) => Err(map_error(&key, err)),
        }
    }

    fn save_index(&self, service: &str, accounts: &BTreeSet<String>) -> Result<(), StoreError> {
        let key = SecretKey::new(service, INDEX_ACCOUNT);
        let entry = self.entry(&key)?;
        if accounts.is_empty() {
            return match entry.delete_password() {
                Ok(()) | Err(KeyringError::NoEntry) => Ok(()),
                Err(err) => Err(map_error(&key, err)),
            };
        }
        let encoded = serde_json::to_string(accounts).map_err(|err| {
            StoreError::Store(format!("failed to encode keyring index for {service}: {err}"))
        })?;
        entry.set_password(&encoded).map_err(|err| map_error(&key, err))
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.guard
            .lock()
            .map_err(|err| StoreError::Store(format!("keyring store mutex poisoned: {err}")))
    }
}

impl Default for KeyringRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for KeyringRecordStore {
    fn exists(&self, key: &SecretKey) -> Result<bool, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(_) => Ok(true),
            Err(KeyringError::NoEntry) => Ok(false),
            Err(err) => Err(map_error(key, err)),
        }
    }

    fn update(&self, request: &UpdateRequest) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let key = request.key();
        let mut envelope = self
            .load(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        envelope.value = general_purpose::STANDARD.encode(request.value());
        envelope.synchronizable = request.synchronizable();
        envelope.updated_at = Utc::now();
        self.save(key, &envelope)?;
        debug!("[keyring] updated {key}");
        Ok(())
    }

    fn create_protected(&self, request: &CreateRequest) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let key = request.key();
        if key.account == INDEX_ACCOUNT {
            return Err(StoreError::InvalidOptions(format!(
                "account name {INDEX_ACCOUNT} is reserved"
            )));
        }
        if self.exists(key)? {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }

        let policy = request.access().policy();
        if policy.requires_user_presence() {
            return Err(StoreError::AuthenticationUnavailable(
                "the OS keyring backend cannot enforce user presence".into(),
            ));
        }

        let now = Utc::now();
        let envelope = Envelope {
            value: general_purpose::STANDARD.encode(request.value()),
            policy,
            synchronizable: request.synchronizable(),
            created_at: now,
            updated_at: now,
        };
        self.save(key, &envelope)?;

        if let Err(err) = self.add_to_index(key) {
            warn!("[keyring] rolling back {key}, index update failed: {err}");
            match self.entry(key)?.delete_password() {
                Ok(()) | Err(KeyringError::NoEntry) => self.forget(key),
                Err(cleanup) => warn!("[keyring] rollback of {key} failed: {cleanup}"),
            }
            return Err(err);
        }
        debug!("[keyring] created {key}");
        Ok(())
    }

    fn read(&self, key: &SecretKey, _prompt: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let envelope = self
            .load(key)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let decoded = general_purpose::STANDARD
            .decode(envelope.value.as_bytes())
            .map_err(|err| StoreError::Store(format!("failed to decode stored value: {err}")))?;
        Ok(Zeroizing::new(decoded))
    }

    fn metadata(&self, key: &SecretKey) -> Result<RecordMetadata, StoreError> {
        self.load(key)?
            .map(|envelope| envelope.metadata())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &SecretKey) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let deleted = match self.entry(key)?.delete_password() {
            Ok(()) => true,
            Err(KeyringError::NoEntry) => false,
            Err(err) => return Err(map_error(key, err)),
        };
        self.forget(key);
        self.remove_from_index(key)?;

        if !deleted {
            return Err(StoreError::NotFound(key.to_string()));
        }
        debug!("[keyring] deleted {key}");
        Ok(())
    }

    fn list(&self, service: &str) -> Result<Vec<SecretKey>, StoreError> {
        Ok(self
            .index(service)?
            .into_iter()
            .map(|account| SecretKey::new(service, account))
            .collect())
    }
}

fn map_error(key: &SecretKey, err: KeyringError) -> StoreError {
    match err {
        KeyringError::NoEntry => StoreError::NotFound(key.to_string()),
        KeyringError::NoStorageAccess(inner) => {
            StoreError::denied(format!("keyring refused access to {key}: {inner}"))
        }
        KeyringError::PlatformFailure(inner) => {
            StoreError::unavailable(format!("keyring platform failure for {key}: {inner}"))
        }
        KeyringError::BadEncoding(_) => {
            StoreError::Store(format!("keyring entry {key} is not valid UTF-8"))
        }
        other => StoreError::Store(other.to_string()),
    }
}

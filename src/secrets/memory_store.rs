//! Process-local record store.
//!
//! Holds every record behind a single mutex, so creates are atomic per key.
//! User presence is simulated by a [`PresenceAuthenticator`] and the reuse
//! window is honoured with a monotonic clock.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use chrono::Utc;
use log::debug;
use zeroize::Zeroizing;

use super::{
    request::{CreateRequest, UpdateRequest},
    store::{RecordStore, StoreError},
    types::{RecordMetadata, SecretKey},
};

/// How the simulated device answers presence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceAuthenticator {
    /// Biometric or passcode enrolled; every prompt succeeds.
    Enrolled,
    /// Nothing enrolled; presence-protected records cannot be created.
    NotEnrolled,
    /// Enrolled, but the user fails or cancels every prompt.
    Deny,
}

struct Record {
    value: Zeroizing<Vec<u8>>,
    metadata: RecordMetadata,
    reason: Option<String>,
    reuse_window: Option<f64>,
    last_authenticated: Option<Instant>,
}

struct State {
    authenticator: PresenceAuthenticator,
    records: HashMap<SecretKey, Record>,
    prompts: usize,
}

pub struct InMemoryRecordStore {
    state: Mutex<State>,
}

impl InMemoryRecordStore {
    pub fn new(authenticator: PresenceAuthenticator) -> Self {
        Self {
            state: Mutex::new(State {
                authenticator,
                records: HashMap::new(),
                prompts: 0,
            }),
        }
    }

    pub fn set_authenticator(&self, authenticator: PresenceAuthenticator) {
        if let Ok(mut state) = self.state.lock() {
            state.authenticator = authenticator;
        }
    }

    /// Number of presence prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.state.lock().map(|state| state.prompts).unwrap_or(0)
    }

    /// Reuse window bound to `key` at creation, if any.
    pub fn reuse_window(&self, key: &SecretKey) -> Option<f64> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.records.get(key).and_then(|record| record.reuse_window))
    }

    /// Reason bound to `key` at creation, if any.
    pub fn reason(&self, key: &SecretKey) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.records.get(key).and_then(|record| record.reason.clone()))
    }

    /// Replaces stored bytes without any checks, to simulate corrupted records.
    #[cfg(test)]
    pub(crate) fn overwrite_raw(&self, key: &SecretKey, bytes: &[u8]) {
        if let Ok(mut state) = self.state.lock() {
            if let Some(record) = state.records.get_mut(key) {
                record.value = Zeroizing::new(bytes.to_vec());
            }
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(map_poison)
    }
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::new(PresenceAuthenticator::Enrolled)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn exists(&self, key: &SecretKey) -> Result<bool, StoreError> {
        Ok(self.lock_state()?.records.contains_key(key))
    }

    fn update(&self, request: &UpdateRequest) -> Result<(), StoreError> {
        let mut state = self.lock_state()?;
        let record = state
            .records
            .get_mut(request.key())
            .ok_or_else(|| StoreError::NotFound(request.key().to_string()))?;

        record.value = Zeroizing::new(request.value().to_vec());
        record.metadata.synchronizable = request.synchronizable();
        record.metadata.updated_at = Utc::now();
        debug!("[memory] updated {}", request.key());
        Ok(())
    }

    fn create_protected(&self, request: &CreateRequest) -> Result<(), StoreError> {
        let mut state = self.lock_state()?;
        if state.records.contains_key(request.key()) {
            return Err(StoreError::AlreadyExists(request.key().to_string()));
        }

        let access = request.access();
        let policy = access.policy();
        if policy.requires_user_presence()
            && state.authenticator == PresenceAuthenticator::NotEnrolled
        {
            return Err(StoreError::AuthenticationUnavailable(
                "no biometric or passcode enrolled".into(),
            ));
        }

        let now = Utc::now();
        state.records.insert(
            request.key().clone(),
            Record {
                value: Zeroizing::new(request.value().to_vec()),
                metadata: RecordMetadata {
                    policy,
                    synchronizable: request.synchronizable(),
                    created_at: now,
                    updated_at: now,
                },
                reason: access.reason().map(str::to_owned),
                reuse_window: access.reuse_window(),
                last_authenticated: None,
            },
        );
        debug!(
            "[memory] created {} (presence={})",
            request.key(),
            policy.requires_user_presence()
        );
        Ok(())
    }

    fn read(&self, key: &SecretKey, prompt: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let mut guard = self.lock_state()?;
        let state = &mut *guard;
        let record = state
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        if record.metadata.policy.requires_user_presence() {
            let now = Instant::now();
            let reusable = match (record.last_authenticated, record.reuse_window) {
                (Some(at), Some(window)) => now.duration_since(at) <= Duration::from_secs_f64(window),
                _ => false,
            };

            if !reusable {
                match state.authenticator {
                    PresenceAuthenticator::NotEnrolled => {
                        return Err(StoreError::AuthenticationUnavailable(
                            "no biometric or passcode enrolled".into(),
                        ))
                    }
                    PresenceAuthenticator::Deny => {
                        state.prompts += 1;
                        return Err(StoreError::AuthenticationFailed(key.to_string()));
                    }
                    PresenceAuthenticator::Enrolled => {
                        state.prompts += 1;
                        debug!("[memory] presence prompt for {key}: {prompt}");
                        record.last_authenticated = Some(now);
                    }
                }
            }
        }

        Ok(record.value.clone())
    }

    fn metadata(&self, key: &SecretKey) -> Result<RecordMetadata, StoreError> {
        self.lock_state()?
            .records
            .get(key)
            .map(|record| record.metadata.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn delete(&self, key: &SecretKey) -> Result<(), StoreError> {
        self.lock_state()?
            .records
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn list(&self, service: &str) -> Result<Vec<SecretKey>, StoreError> {
        let state = self.lock_state()?;
        let mut keys: Vec<SecretKey> = state
            .records
            .keys()
            .filter(|key| key.service == service)
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

fn map_poison<T>(err: PoisonError<T>) -> StoreError {
    StoreError::Store(format!("record store state poisoned: {err}"))
}

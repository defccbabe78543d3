//! Apple keychain storage adapter.
//!
//! Records are generic-password items. Protected creates attach a
//! `SecAccessControl` built from the accessibility class plus
//! `kSecAccessControlUserPresence`, so Touch ID/Face ID or the device passcode
//! is demanded by the OS whenever the value is read. Updates only touch the
//! value and the sync attribute; the access control stays as created.

#![cfg(any(target_os = "macos", target_os = "ios"))]

use chrono::{DateTime, Utc};
use core_foundation::base::{CFType, CFTypeRef, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::data::CFData;
use core_foundation::date::CFDate;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef, CFMutableDictionary};
use core_foundation::array::{CFArray, CFArrayRef};
use core_foundation::string::CFString;
use core_foundation_sys::base::OSStatus;
use core_foundation_sys::data::CFDataRef;
use log::debug;
use security_framework::access_control::{ProtectionMode, SecAccessControl};
use security_framework_sys::access_control::kSecAccessControlUserPresence;
use security_framework_sys::base::errSecSuccess;
use security_framework_sys::item::{kSecClass, kSecClassGenericPassword};
use security_framework_sys::keychain_item::{
    SecItemAdd, SecItemCopyMatching, SecItemDelete, SecItemUpdate,
};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{
    access_control::{AccessControlProvider, PlatformAccessToken},
    auth::AuthenticationContext,
    request::{CreateRequest, UpdateRequest},
    store::{RecordStore, StatusCode, StoreError},
    types::{AccessPolicy, Accessibility, RecordMetadata, SecretKey},
};

const ATTR_SERVICE: &str = "svce";
const ATTR_ACCOUNT: &str = "acct";
const ATTR_GENERIC: &str = "gena";
const ATTR_ACCESS_CONTROL: &str = "accc";
const ATTR_SYNCHRONIZABLE: &str = "sync";
const ATTR_SYNCHRONIZABLE_ANY: &str = "syna";
const ATTR_CREATION_DATE: &str = "cdat";
const ATTR_MODIFICATION_DATE: &str = "mdat";
const VALUE_DATA: &str = "v_Data";
const RETURN_DATA: &str = "r_Data";
const RETURN_ATTRIBUTES: &str = "r_Attributes";
const MATCH_LIMIT: &str = "m_Limit";
const MATCH_LIMIT_ONE: &str = "m_LimitOne";
const MATCH_LIMIT_ALL: &str = "m_LimitAll";
const USE_OPERATION_PROMPT: &str = "u_OpPrompt";
const USE_AUTHENTICATION_UI: &str = "u_AuthUI";
const USE_AUTHENTICATION_UI_SKIP: &str = "u_AuthUIS";
const USE_DATA_PROTECTION_KEYCHAIN: &str = "nleg";

/// Seconds between the Unix epoch and the CoreFoundation reference date (2001-01-01).
const CF_ABSOLUTE_TIME_OFFSET: f64 = 978_307_200.0;

/// Policy bookkeeping kept in the item's generic attribute, since the OS does
/// not hand an access-control object's flags back.
#[derive(Serialize, Deserialize)]
struct StoredPolicy {
    policy: AccessPolicy,
}

#[allow(deprecated)]
fn protection_mode(accessibility: Accessibility) -> ProtectionMode {
    match accessibility {
        Accessibility::WhenPasscodeSetThisDeviceOnly => {
            ProtectionMode::AccessibleWhenPasscodeSetThisDeviceOnly
        }
        Accessibility::WhenUnlockedThisDeviceOnly => {
            ProtectionMode::AccessibleWhenUnlockedThisDeviceOnly
        }
        Accessibility::WhenUnlocked => ProtectionMode::AccessibleWhenUnlocked,
        Accessibility::AfterFirstUnlockThisDeviceOnly => {
            ProtectionMode::AccessibleAfterFirstUnlockThisDeviceOnly
        }
        Accessibility::AfterFirstUnlock => ProtectionMode::AccessibleAfterFirstUnlock,
        Accessibility::AlwaysThisDeviceOnly => ProtectionMode::AccessibleAlwaysThisDeviceOnly,
        Accessibility::Always => ProtectionMode::AccessibleAlways,
    }
}

fn key_of(name: &str) -> CFType {
    CFString::new(name).as_CFType()
}

fn class_generic_password() -> (CFType, CFType) {
    unsafe {
        (
            CFType::wrap_under_get_rule(kSecClass as *const _),
            CFType::wrap_under_get_rule(kSecClassGenericPassword as *const _),
        )
    }
}

/// Builds the `SecAccessControl` for an item, demanding user presence when asked.
fn create_access_control(policy: AccessPolicy) -> Result<SecAccessControl, StoreError> {
    let flags = if policy.requires_user_presence() {
        kSecAccessControlUserPresence
    } else {
        0
    };
    let accessibility = policy.accessibility();
    SecAccessControl::create_with_protection(Some(protection_mode(accessibility)), flags).map_err(
        |err| {
            StoreError::AuthenticationUnavailable(format!(
                "failed to create access control for {accessibility}: {err}"
            ))
        },
    )
}

/// Validates that the OS can build a presence access control before a create.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeychainAccessControl;

impl KeychainAccessControl {
    /// Whether user-presence access control can be created on this device.
    pub fn check_presence_available() -> bool {
        match create_access_control(AccessPolicy::new(Accessibility::WhenUnlocked, true)) {
            Ok(_) => true,
            Err(err) => {
                debug!("[keychain] presence access control unavailable: {err}");
                false
            }
        }
    }
}

impl AccessControlProvider for KeychainAccessControl {
    fn access_token(
        &self,
        policy: AccessPolicy,
        context: Option<AuthenticationContext>,
    ) -> Result<PlatformAccessToken, StoreError> {
        if policy.requires_user_presence() {
            if context.is_none() {
                return Err(StoreError::InvalidOptions(
                    "user presence requires an authentication context".into(),
                ));
            }
            create_access_control(policy)?;
        }
        Ok(PlatformAccessToken::new(policy, context))
    }
}

/// Generic-password records in the Apple keychain.
///
/// The reuse window of an authentication context is not bound to the item:
/// that needs an `LAContext`, which this crate does not link against. The
/// OS prompt falls back to its own default reuse behaviour.
pub struct KeychainRecordStore;

impl KeychainRecordStore {
    pub fn new() -> Self {
        Self
    }

    /// Class + service + account, matching items regardless of sync state.
    fn base_query(key: &SecretKey) -> CFMutableDictionary<CFType, CFType> {
        let mut query = CFMutableDictionary::new();
        let (class, generic_password) = class_generic_password();
        query.set(class, generic_password);
        query.set(key_of(ATTR_SERVICE), key_of(&key.service));
        query.set(key_of(ATTR_ACCOUNT), key_of(&key.account));
        query.set(key_of(ATTR_SYNCHRONIZABLE), key_of(ATTR_SYNCHRONIZABLE_ANY));
        #[cfg(target_os = "macos")]
        query.set(
            key_of(USE_DATA_PROTECTION_KEYCHAIN),
            CFBoolean::true_value().as_CFType(),
        );
        query
    }

    fn check(status: OSStatus, key: &SecretKey) -> Result<(), StoreError> {
        if status == errSecSuccess {
            Ok(())
        } else {
            Err(StoreError::from_status(StatusCode(status), key))
        }
    }

    fn copy_attributes(
        &self,
        key: &SecretKey,
    ) -> Result<CFDictionary<CFString, CFType>, StoreError> {
        let mut query = Self::base_query(key);
        query.set(key_of(RETURN_ATTRIBUTES), CFBoolean::true_value().as_CFType());
        query.set(key_of(MATCH_LIMIT), key_of(MATCH_LIMIT_ONE));
        query.set(key_of(USE_AUTHENTICATION_UI), key_of(USE_AUTHENTICATION_UI_SKIP));

        let mut result: CFTypeRef = std::ptr::null();
        let status = unsafe { SecItemCopyMatching(query.as_concrete_TypeRef(), &mut result) };
        Self::check(status, key)?;
        if result.is_null() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        Ok(unsafe { CFDictionary::wrap_under_create_rule(result as CFDictionaryRef) })
    }
}

impl Default for KeychainRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for KeychainRecordStore {
    fn exists(&self, key: &SecretKey) -> Result<bool, StoreError> {
        match self.copy_attributes(key) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn update(&self, request: &UpdateRequest) -> Result<(), StoreError> {
        let key = request.key();
        let query = Self::base_query(key);

        let mut update: CFMutableDictionary<CFType, CFType> = CFMutableDictionary::new();
        update.set(
            key_of(VALUE_DATA),
            CFData::from_buffer(request.value()).as_CFType(),
        );
        if let Some(sync) = request.synchronizable() {
            update.set(
                key_of(ATTR_SYNCHRONIZABLE),
                CFBoolean::from(sync).as_CFType(),
            );
        }

        let status = unsafe {
            SecItemUpdate(query.as_concrete_TypeRef(), update.as_concrete_TypeRef())
        };
        debug!("[keychain] SecItemUpdate {key} returned status: {}", StatusCode(status));
        Self::check(status, key)
    }

    fn create_protected(&self, request: &CreateRequest) -> Result<(), StoreError> {
        let key = request.key();
        let access = request.access();
        let policy = access.policy();

        let mut item: CFMutableDictionary<CFType, CFType> = CFMutableDictionary::new();
        let (class, generic_password) = class_generic_password();
        item.set(class, generic_password);
        item.set(key_of(ATTR_SERVICE), key_of(&key.service));
        item.set(key_of(ATTR_ACCOUNT), key_of(&key.account));
        item.set(
            key_of(VALUE_DATA),
            CFData::from_buffer(request.value()).as_CFType(),
        );
        if let Some(sync) = request.synchronizable() {
            item.set(
                key_of(ATTR_SYNCHRONIZABLE),
                CFBoolean::from(sync).as_CFType(),
            );
        }
        #[cfg(target_os = "macos")]
        item.set(
            key_of(USE_DATA_PROTECTION_KEYCHAIN),
            CFBoolean::true_value().as_CFType(),
        );

        let stored = serde_json::to_vec(&StoredPolicy { policy })
            .map_err(|err| StoreError::Store(format!("failed to encode policy: {err}")))?;
        item.set(key_of(ATTR_GENERIC), CFData::from_buffer(&stored).as_CFType());

        let control = create_access_control(policy)?;
        item.set(key_of(ATTR_ACCESS_CONTROL), control.as_CFType());

        let status = unsafe { SecItemAdd(item.as_concrete_TypeRef(), std::ptr::null_mut()) };
        debug!("[keychain] SecItemAdd {key} returned status: {}", StatusCode(status));
        Self::check(status, key)
    }

    fn read(&self, key: &SecretKey, prompt: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        let mut query = Self::base_query(key);
        query.set(key_of(RETURN_DATA), CFBoolean::true_value().as_CFType());
        query.set(key_of(MATCH_LIMIT), key_of(MATCH_LIMIT_ONE));
        if !prompt.is_empty() {
            query.set(key_of(USE_OPERATION_PROMPT), key_of(prompt));
        }

        let mut result: CFTypeRef = std::ptr::null();
        let status = unsafe { SecItemCopyMatching(query.as_concrete_TypeRef(), &mut result) };
        debug!("[keychain] SecItemCopyMatching {key} returned status: {}", StatusCode(status));
        Self::check(status, key)?;
        if result.is_null() {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let data = unsafe { CFData::wrap_under_create_rule(result as CFDataRef) };
        Ok(Zeroizing::new(data.bytes().to_vec()))
    }

    fn metadata(&self, key: &SecretKey) -> Result<RecordMetadata, StoreError> {
        let attributes = self.copy_attributes(key)?;

        let policy = attributes
            .find(&CFString::new(ATTR_GENERIC))
            .and_then(|value| value.downcast::<CFData>())
            .ok_or_else(|| StoreError::Store(format!("keychain item {key} has no policy")))
            .and_then(|data| {
                serde_json::from_slice::<StoredPolicy>(data.bytes()).map_err(|err| {
                    StoreError::Store(format!("failed to decode policy of {key}: {err}"))
                })
            })?
            .policy;

        let synchronizable = attributes
            .find(&CFString::new(ATTR_SYNCHRONIZABLE))
            .and_then(|value| value.downcast::<CFBoolean>())
            .map(bool::from);

        let created_at = date_attribute(&attributes, ATTR_CREATION_DATE).unwrap_or_else(Utc::now);
        let updated_at = date_attribute(&attributes, ATTR_MODIFICATION_DATE).unwrap_or(created_at);

        Ok(RecordMetadata {
            policy,
            synchronizable,
            created_at,
            updated_at,
        })
    }

    fn delete(&self, key: &SecretKey) -> Result<(), StoreError> {
        let query = Self::base_query(key);
        let status = unsafe { SecItemDelete(query.as_concrete_TypeRef()) };
        debug!("[keychain] SecItemDelete {key} returned status: {}", StatusCode(status));
        Self::check(status, key)
    }

    fn list(&self, service: &str) -> Result<Vec<SecretKey>, StoreError> {
        let mut query: CFMutableDictionary<CFType, CFType> = CFMutableDictionary::new();
        let (class, generic_password) = class_generic_password();
        query.set(class, generic_password);
        query.set(key_of(ATTR_SERVICE), key_of(service));
        query.set(key_of(ATTR_SYNCHRONIZABLE), key_of(ATTR_SYNCHRONIZABLE_ANY));
        query.set(key_of(RETURN_ATTRIBUTES), CFBoolean::true_value().as_CFType());
        query.set(key_of(MATCH_LIMIT), key_of(MATCH_LIMIT_ALL));
        query.set(key_of(USE_AUTHENTICATION_UI), key_of(USE_AUTHENTICATION_UI_SKIP));
        #[cfg(target_os = "macos")]
        query.set(
            key_of(USE_DATA_PROTECTION_KEYCHAIN),
            CFBoolean::true_value().as_CFType(),
        );

        let scope = SecretKey::new(service, "*");
        let mut result: CFTypeRef = std::ptr::null();
        let status = unsafe { SecItemCopyMatching(query.as_concrete_TypeRef(), &mut result) };
        match Self::check(status, &scope) {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        }
        if result.is_null() {
            return Ok(Vec::new());
        }

        let items: CFArray<CFType> = unsafe { CFArray::wrap_under_create_rule(result as CFArrayRef) };
        let mut keys = Vec::with_capacity(items.len() as usize);
        for item in items.iter() {
            let attributes: CFDictionary<CFString, CFType> = unsafe {
                CFDictionary::wrap_under_get_rule(item.as_CFTypeRef() as CFDictionaryRef)
            };
            if let Some(account) = attributes
                .find(&CFString::new(ATTR_ACCOUNT))
                .and_then(|value| value.downcast::<CFString>())
            {
                keys.push(SecretKey::new(service, account.to_string()));
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn date_attribute(attributes: &CFDictionary<CFString, CFType>, name: &str) -> Option<DateTime<Utc>> {
    let date = attributes
        .find(&CFString::new(name))
        .and_then(|value| value.downcast::<CFDate>())?;
    let unix = date.abs_time() + CF_ABSOLUTE_TIME_OFFSET;
    DateTime::from_timestamp(unix.trunc() as i64, (unix.fract() * 1e9) as u32)
}

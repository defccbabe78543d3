use log::warn;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{auth::AuthenticationContext, store::StoreError, types::Accessibility};

pub const DEFAULT_SERVICE: &str = "secure_storage";
pub const DEFAULT_KEY_PREFIX: &str = "ELEMENT_PREFERENCES_KEY_PREFIX";

/// Storage settings decoded from the host's option map.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageOptions {
    pub service: String,
    pub key_prefix: String,
    pub accessibility: Accessibility,
    pub synchronizable: Option<bool>,
    pub reset_on_error: bool,
    /// Present when new records must be gated on user presence.
    pub authentication: Option<AuthenticationContext>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            service: DEFAULT_SERVICE.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            accessibility: Accessibility::default(),
            synchronizable: None,
            reset_on_error: false,
            authentication: None,
        }
    }
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct RawOptions {
    #[serde(alias = "sharedPreferencesName", alias = "accountName")]
    service: Option<String>,
    #[serde(alias = "preferencesKeyPrefix")]
    key_prefix: Option<String>,
    accessibility: Option<String>,
    synchronizable: Option<Value>,
    reset_on_error: Option<Value>,
    user_authentication_required: Option<Value>,
}

impl StorageOptions {
    /// Decodes options the way the host sends them: flags may be real booleans
    /// or the strings `"true"`/`"false"`, and nested authentication options may
    /// be an object, a JSON string, or the string `"null"`.
    pub fn from_map(options: &Map<String, Value>) -> Result<Self, StoreError> {
        let raw: RawOptions = serde_json::from_value(Value::Object(options.clone()))
            .map_err(|err| StoreError::InvalidOptions(err.to_string()))?;

        let mut decoded = StorageOptions::default();
        if let Some(service) = raw.service.filter(|service| !service.is_empty()) {
            decoded.service = service;
        }
        if let Some(prefix) = raw.key_prefix.filter(|prefix| !prefix.is_empty()) {
            decoded.key_prefix = prefix;
        }
        if let Some(accessibility) = raw.accessibility {
            decoded.accessibility = accessibility.parse()?;
        }
        decoded.synchronizable = raw
            .synchronizable
            .as_ref()
            .map(|value| parse_flag("synchronizable", value))
            .transpose()?;
        decoded.reset_on_error = raw
            .reset_on_error
            .as_ref()
            .map(parse_reset_flag)
            .unwrap_or(false);
        decoded.authentication = raw
            .user_authentication_required
            .as_ref()
            .map(parse_authentication)
            .transpose()?
            .flatten();

        Ok(decoded)
    }

    /// Prompt shown when reading protected records.
    pub fn prompt(&self) -> &str {
        self.authentication
            .as_ref()
            .map(AuthenticationContext::reason)
            .unwrap_or("")
    }
}

fn parse_flag(name: &str, value: &Value) -> Result<bool, StoreError> {
    match value {
        Value::Bool(flag) => Ok(*flag),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Ok(false),
        other => Err(StoreError::InvalidOptions(format!(
            "{name} must be a boolean, got {other}"
        ))),
    }
}

/// Anything but a true boolean or the string `"true"` leaves resets off.
fn parse_reset_flag(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text.eq_ignore_ascii_case("true"),
        other => {
            warn!("[secrets] treating resetOnError={other} as false");
            false
        }
    }
}

fn parse_authentication(value: &Value) -> Result<Option<AuthenticationContext>, StoreError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) if text == "null" || text.is_empty() => Ok(None),
        Value::String(text) => {
            let nested: Value = serde_json::from_str(text).map_err(|err| {
                warn!("[secrets] userAuthenticationRequired is not valid JSON: {err}");
                StoreError::InvalidOptions(format!("userAuthenticationRequired: {err}"))
            })?;
            AuthenticationContext::from_value(&nested).map(Some)
        }
        other => AuthenticationContext::from_value(other).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: Value) -> Result<StorageOptions, StoreError> {
        match value {
            Value::Object(map) => StorageOptions::from_map(&map),
            _ => unreachable!("test options must be an object"),
        }
    }

    #[test]
    fn empty_map_uses_defaults() {
        assert_eq!(decode(json!({})).unwrap(), StorageOptions::default());
    }

    #[test]
    fn string_flags_and_aliases_decode() {
        let options = decode(json!({
            "sharedPreferencesName": "vault",
            "preferencesKeyPrefix": "app",
            "accessibility": "first_unlock_this_device",
            "synchronizable": "true",
            "resetOnError": "true"
        }))
        .unwrap();
        assert_eq!(options.service, "vault");
        assert_eq!(options.key_prefix, "app");
        assert_eq!(
            options.accessibility,
            Accessibility::AfterFirstUnlockThisDeviceOnly
        );
        assert_eq!(options.synchronizable, Some(true));
        assert!(options.reset_on_error);
        assert!(options.authentication.is_none());
    }

    #[test]
    fn unrecognised_reset_flag_is_off() {
        for flag in [json!("yes"), json!("1"), json!(1), json!("false")] {
            let options = decode(json!({ "resetOnError": flag })).unwrap();
            assert!(!options.reset_on_error);
        }
        assert!(decode(json!({ "resetOnError": "TRUE" })).unwrap().reset_on_error);
    }

    #[test]
    fn nested_authentication_accepts_json_string() {
        let options = decode(json!({
            "userAuthenticationRequired": "{\"localizedReason\":\"Unlock\",\"userAuthenticationTimeout\":\"abc\"}"
        }))
        .unwrap();
        let auth = options.authentication.unwrap();
        assert_eq!(auth.reason(), "Unlock");
        assert_eq!(auth.reuse_window(), None);

        let options = decode(json!({ "userAuthenticationRequired": "null" })).unwrap();
        assert!(options.authentication.is_none());
    }

    #[test]
    fn nested_authentication_without_reason_fails() {
        let err = decode(json!({
            "userAuthenticationRequired": { "userAuthenticationTimeout": "30" }
        }))
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidOptions(_)));
    }

    #[test]
    fn bad_accessibility_is_invalid_policy() {
        let err = decode(json!({ "accessibility": "sometimes" })).unwrap_err();
        assert!(matches!(err, StoreError::InvalidPolicy(_)));
    }
}

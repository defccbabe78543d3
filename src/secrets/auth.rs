//! Authentication context decoding.
//!
//! Options arrive as a loosely-typed map from the host bridge. The reason is
//! mandatory; the reuse window is best-effort and silently dropped when it
//! cannot be parsed.

use log::warn;
use serde_json::{Map, Value};

use super::store::StoreError;

pub const LOCALIZED_REASON: &str = "localizedReason";
pub const USER_AUTHENTICATION_TIMEOUT: &str = "userAuthenticationTimeout";

/// One authentication ceremony: the prompt text and how long a successful
/// authentication may be reused without prompting again.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticationContext {
    reason: String,
    reuse_window: Option<f64>,
}

impl AuthenticationContext {
    pub fn new(reason: impl Into<String>, reuse_window: Option<f64>) -> Result<Self, StoreError> {
        let reason = reason.into();
        if reason.is_empty() {
            return Err(StoreError::InvalidOptions(format!(
                "{LOCALIZED_REASON} must not be empty"
            )));
        }
        Ok(Self {
            reason,
            reuse_window: reuse_window.filter(|secs| secs.is_finite() && *secs > 0.0),
        })
    }

    /// Decodes a context from the host's option map.
    pub fn from_options(options: &Map<String, Value>) -> Result<Self, StoreError> {
        let reason = match options.get(LOCALIZED_REASON) {
            Some(Value::String(reason)) if !reason.is_empty() => reason.clone(),
            Some(Value::String(_)) => {
                return Err(StoreError::InvalidOptions(format!(
                    "{LOCALIZED_REASON} must not be empty"
                )))
            }
            Some(_) => {
                return Err(StoreError::InvalidOptions(format!(
                    "{LOCALIZED_REASON} must be a string"
                )))
            }
            None => {
                return Err(StoreError::InvalidOptions(format!(
                    "missing {LOCALIZED_REASON}"
                )))
            }
        };

        let reuse_window = options
            .get(USER_AUTHENTICATION_TIMEOUT)
            .and_then(parse_reuse_window);

        Self::new(reason, reuse_window)
    }

    /// Decodes from a JSON object; anything else is `InvalidOptions`.
    pub fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Object(options) => Self::from_options(options),
            other => Err(StoreError::InvalidOptions(format!(
                "authentication options must be an object, got {other}"
            ))),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn reuse_window(&self) -> Option<f64> {
        self.reuse_window
    }
}

fn parse_reuse_window(raw: &Value) -> Option<f64> {
    let parsed = match raw {
        Value::Null => return None,
        Value::String(text) => text.parse::<f64>().ok(),
        Value::Number(number) => number.as_f64(),
        _ => None,
    };

    match parsed {
        Some(secs) if secs.is_finite() && secs > 0.0 => Some(secs),
        _ => {
            warn!("[secrets] ignoring unusable {USER_AUTHENTICATION_TIMEOUT}: {raw}");
            None
        }
    }
}

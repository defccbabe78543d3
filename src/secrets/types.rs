use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::StoreError;

/// Addresses exactly one record: the keychain service plus the account inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SecretKey {
    pub service: String,
    pub account: String,
}

impl SecretKey {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.service, self.account)
    }
}

/// When a record may be read relative to the device lock state.
///
/// Variants are declared from most to least restrictive, so `Ord` compares
/// restrictiveness (`a < b` means `a` is stricter).
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Accessibility {
    WhenPasscodeSetThisDeviceOnly,
    WhenUnlockedThisDeviceOnly,
    #[default]
    WhenUnlocked,
    AfterFirstUnlockThisDeviceOnly,
    AfterFirstUnlock,
    AlwaysThisDeviceOnly,
    Always,
}

impl Accessibility {
    pub const ALL: [Accessibility; 7] = [
        Accessibility::WhenPasscodeSetThisDeviceOnly,
        Accessibility::WhenUnlockedThisDeviceOnly,
        Accessibility::WhenUnlocked,
        Accessibility::AfterFirstUnlockThisDeviceOnly,
        Accessibility::AfterFirstUnlock,
        Accessibility::AlwaysThisDeviceOnly,
        Accessibility::Always,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Accessibility::WhenPasscodeSetThisDeviceOnly => "passcode",
            Accessibility::WhenUnlockedThisDeviceOnly => "unlocked_this_device",
            Accessibility::WhenUnlocked => "unlocked",
            Accessibility::AfterFirstUnlockThisDeviceOnly => "first_unlock_this_device",
            Accessibility::AfterFirstUnlock => "first_unlock",
            Accessibility::AlwaysThisDeviceOnly => "always_this_device",
            Accessibility::Always => "always",
        }
    }

    /// Whether records with this class stay on the device and never sync.
    pub fn is_this_device_only(&self) -> bool {
        matches!(
            self,
            Accessibility::WhenPasscodeSetThisDeviceOnly
                | Accessibility::WhenUnlockedThisDeviceOnly
                | Accessibility::AfterFirstUnlockThisDeviceOnly
                | Accessibility::AlwaysThisDeviceOnly
        )
    }
}

impl fmt::Display for Accessibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Accessibility {
    type Err = StoreError;

    /// Accepts the snake_case names, the kebab-case spellings and the
    /// camelCase names the bridge sends (`first_unlock`, `first-unlock`,
    /// `firstUnlock` all parse).
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();

        let accessibility = match normalized.as_str() {
            "passcode" | "whenpasscodesetthisdeviceonly" => {
                Accessibility::WhenPasscodeSetThisDeviceOnly
            }
            "unlockedthisdevice" | "whenunlockedthisdeviceonly" => {
                Accessibility::WhenUnlockedThisDeviceOnly
            }
            "unlocked" | "whenunlocked" => Accessibility::WhenUnlocked,
            "firstunlockthisdevice" | "afterfirstunlockthisdeviceonly" => {
                Accessibility::AfterFirstUnlockThisDeviceOnly
            }
            "firstunlock" | "afterfirstunlock" => Accessibility::AfterFirstUnlock,
            "alwaysthisdevice" | "alwaysthisdeviceonly" => Accessibility::AlwaysThisDeviceOnly,
            "always" => Accessibility::Always,
            _ => {
                return Err(StoreError::InvalidPolicy(format!(
                    "unknown accessibility class: {raw:?}"
                )))
            }
        };
        Ok(accessibility)
    }
}

/// Accessibility class plus whether live user presence is needed to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessPolicy {
    accessibility: Accessibility,
    requires_user_presence: bool,
}

impl AccessPolicy {
    pub fn new(accessibility: Accessibility, requires_user_presence: bool) -> Self {
        Self {
            accessibility,
            requires_user_presence,
        }
    }

    /// Builds a policy from an untyped accessibility identifier.
    pub fn parse(accessibility: &str, requires_user_presence: bool) -> Result<Self, StoreError> {
        Ok(Self::new(accessibility.parse()?, requires_user_presence))
    }

    pub fn accessibility(&self) -> Accessibility {
        self.accessibility
    }

    pub fn requires_user_presence(&self) -> bool {
        self.requires_user_presence
    }
}

/// Non-secret attributes of a stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub policy: AccessPolicy,
    pub synchronizable: Option<bool>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

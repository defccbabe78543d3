use super::{auth::AuthenticationContext, store::StoreError, types::AccessPolicy};

/// OS access-control object bound to a record at creation time.
///
/// Backends only read the pieces they can enforce. The Apple keychain turns the
/// policy into a `SecAccessControl`; other backends keep it as record metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PlatformAccessToken {
    policy: AccessPolicy,
    context: Option<AuthenticationContext>,
}

impl PlatformAccessToken {
    pub(crate) fn new(policy: AccessPolicy, context: Option<AuthenticationContext>) -> Self {
        Self { policy, context }
    }

    pub fn policy(&self) -> AccessPolicy {
        self.policy
    }

    pub fn context(&self) -> Option<&AuthenticationContext> {
        self.context.as_ref()
    }

    /// Reason shown when the record is first accessed, if any.
    pub fn reason(&self) -> Option<&str> {
        self.context.as_ref().map(AuthenticationContext::reason)
    }

    pub fn reuse_window(&self) -> Option<f64> {
        self.context.as_ref().and_then(AuthenticationContext::reuse_window)
    }
}

/// Builds the access-control object for a protected create.
pub trait AccessControlProvider: Send + Sync {
    fn access_token(
        &self,
        policy: AccessPolicy,
        context: Option<AuthenticationContext>,
    ) -> Result<PlatformAccessToken, StoreError>;
}

/// Platform-agnostic provider used by the keyring and in-memory stores.
///
/// A presence requirement is only accepted together with an authentication
/// context, since the prompt needs a reason.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareAccessControl;

impl AccessControlProvider for SoftwareAccessControl {
    fn access_token(
        &self,
        policy: AccessPolicy,
        context: Option<AuthenticationContext>,
    ) -> Result<PlatformAccessToken, StoreError> {
        if policy.requires_user_presence() && context.is_none() {
            return Err(StoreError::InvalidOptions(
                "user presence requires an authentication context".into(),
            ));
        }
        Ok(PlatformAccessToken::new(policy, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::types::Accessibility;

    #[test]
    fn presence_without_context_is_rejected() {
        let policy = AccessPolicy::new(Accessibility::WhenUnlocked, true);
        let err = SoftwareAccessControl.access_token(policy, None).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOptions(_)));
    }

    #[test]
    fn token_carries_policy_and_context() {
        let policy = AccessPolicy::new(Accessibility::AfterFirstUnlock, true);
        let context = AuthenticationContext::new("Unlock", Some(10.0)).unwrap();
        let token = SoftwareAccessControl
            .access_token(policy, Some(context))
            .unwrap();
        assert_eq!(token.policy(), policy);
        assert_eq!(token.reason(), Some("Unlock"));
        assert_eq!(token.reuse_window(), Some(10.0));
    }
}

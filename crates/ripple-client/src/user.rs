//! Current-user lookup.

/// Supplies the id of the signed-in user, if any.
///
/// Consulted at handshake time and for every typing or interaction send, so
/// a sign-in between reconnects is picked up automatically.
pub trait UserIdProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

impl<F> UserIdProvider for F
where
    F: Fn() -> Option<String> + Send + Sync,
{
    fn current_user_id(&self) -> Option<String> {
        self()
    }
}

/// A fixed user.
#[derive(Debug, Clone, Default)]
pub struct StaticUser(Option<String>);

impl StaticUser {
    #[must_use]
    pub fn new(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    /// No signed-in user.
    #[must_use]
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl UserIdProvider for StaticUser {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_providers() {
        assert_eq!(StaticUser::new("u1").current_user_id().as_deref(), Some("u1"));
        assert_eq!(StaticUser::anonymous().current_user_id(), None);

        let closure = || Some("u2".to_string());
        assert_eq!(closure.current_user_id().as_deref(), Some("u2"));
    }
}

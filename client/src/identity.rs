//! Identity of the user mutations are attributed to.

use matchsync_engine::UserId;

/// Supplies the currently authenticated user.
pub trait IdentityProvider: Send + Sync {
    /// The current user, or `None` when nobody is signed in.
    fn current_user(&self) -> Option<UserId>;
}

/// A fixed identity.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<UserId>);

impl StaticIdentity {
    pub fn new(user: impl Into<UserId>) -> Self {
        Self(Some(user.into()))
    }

    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.0.clone()
    }
}

impl<F> IdentityProvider for F
where
    F: Fn() -> Option<UserId> + Send + Sync,
{
    fn current_user(&self) -> Option<UserId> {
        self()
    }
}

//! Who is signed in on this device.
//!
//! Authentication itself belongs to the host platform; the client core only
//! needs a stable user id to act on behalf of.

use std::sync::RwLock;

use tracing::warn;

use ginmai_shared::types::UserId;

pub trait IdentityProvider: Send + Sync {
    /// `None` while signed out.
    fn current_user_id(&self) -> Option<UserId>;
}

/// Identity the shell updates on sign-in and sign-out.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    user: RwLock<Option<UserId>>,
}

impl StaticIdentity {
    pub fn signed_in(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set(&self, user: Option<UserId>) {
        match self.user.write() {
            Ok(mut guard) => *guard = user,
            Err(_) => warn!("identity lock poisoned, sign-in state unchanged"),
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<UserId> {
        self.user.read().ok().and_then(|guard| *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_and_out() {
        let identity = StaticIdentity::signed_out();
        assert_eq!(identity.current_user_id(), None);

        let user = UserId::new();
        identity.set(Some(user));
        assert_eq!(identity.current_user_id(), Some(user));

        identity.set(None);
        assert_eq!(identity.current_user_id(), None);
    }
}

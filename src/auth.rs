//! Pluggable authentication and authorization seams.
//!
//! The built-in behavior is permissive (no password configured means every
//! connection starts authenticated, and every authenticated connection may
//! run every command), matching a default Redis install. A deployment that
//! wants ACL-style rules wires in its own `AuthzHook`.

use async_trait::async_trait;

use crate::error::RedisResult;

/// Identity established for a connection, either at connect time (no auth
/// configured) or via `AUTH`/`HELLO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub username: String,
}

impl Identity {
    pub fn default_user() -> Self {
        Identity { username: "default".to_string() }
    }
}

/// Verifies credentials presented via `AUTH`/`HELLO ... AUTH`.
#[async_trait]
pub trait AuthHook: Send + Sync {
    /// `username` is `None` for the legacy single-argument `AUTH <password>`
    /// form, which always authenticates as `default`.
    async fn authenticate(&self, username: Option<&str>, password: &str) -> RedisResult<Identity>;

    /// Whether unauthenticated connections may run anything at all (`PING`,
    /// `HELLO`, `AUTH`, `QUIT` are always allowed regardless).
    fn requires_auth(&self) -> bool;
}

/// Gates a given identity's access to a command.
#[async_trait]
pub trait AuthzHook: Send + Sync {
    async fn authorize(&self, identity: &Identity, command: &str) -> RedisResult<()>;
}

/// No password configured: every connection is implicitly `default` and
/// nothing requires authentication.
pub struct NoAuth;

#[async_trait]
impl AuthHook for NoAuth {
    async fn authenticate(&self, _username: Option<&str>, _password: &str) -> RedisResult<Identity> {
        Ok(Identity::default_user())
    }

    fn requires_auth(&self) -> bool {
        false
    }
}

/// A single shared password, the `requirepass`-style default once a password
/// is configured.
pub struct SharedPassword {
    password: String,
}

impl SharedPassword {
    pub fn new(password: String) -> Self {
        SharedPassword { password }
    }
}

#[async_trait]
impl AuthHook for SharedPassword {
    async fn authenticate(&self, username: Option<&str>, password: &str) -> RedisResult<Identity> {
        if let Some(u) = username {
            if u != "default" {
                return Err(crate::error::RedisError::WrongPass);
            }
        }
        if password == self.password {
            Ok(Identity::default_user())
        } else {
            Err(crate::error::RedisError::WrongPass)
        }
    }

    fn requires_auth(&self) -> bool {
        true
    }
}

/// Every authenticated identity may run every command.
pub struct AllowAll;

#[async_trait]
impl AuthzHook for AllowAll {
    async fn authorize(&self, _identity: &Identity, _command: &str) -> RedisResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_auth_accepts_anything() {
        let hook = NoAuth;
        assert!(!hook.requires_auth());
        let id = hook.authenticate(None, "whatever").await.unwrap();
        assert_eq!(id.username, "default");
    }

    #[tokio::test]
    async fn shared_password_rejects_mismatch() {
        let hook = SharedPassword::new("s3cret".to_string());
        assert!(hook.requires_auth());
        assert!(hook.authenticate(None, "s3cret").await.is_ok());
        assert!(hook.authenticate(None, "wrong").await.is_err());
        assert!(hook.authenticate(Some("other"), "s3cret").await.is_err());
    }

    #[tokio::test]
    async fn allow_all_authorizes_everything() {
        let authz = AllowAll;
        let id = Identity::default_user();
        assert!(authz.authorize(&id, "FLUSHALL").await.is_ok());
    }
}

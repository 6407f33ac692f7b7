//! Signed-in user context, passed explicitly to everything that needs it.

use crate::error::{Error, Result};
use crate::roles::{Capability, Role};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub role: Role,
    #[serde(default)]
    pub permissions: Vec<Capability>,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            permissions: Vec::new(),
            is_verified: false,
            token: None,
        }
    }

    pub fn can(&self, cap: Capability) -> bool {
        self.role.grants(cap) || self.permissions.contains(&cap)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    inner: Arc<RwLock<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Some(session))),
        }
    }

    pub fn current(&self) -> Option<Session> {
        self.inner.read().clone()
    }

    pub fn sign_in(&self, session: Session) {
        tracing::info!("Signed in: user={}, role={}", session.user_id, session.role);
        *self.inner.write() = Some(session);
    }

    pub fn sign_out(&self) {
        if let Some(session) = self.inner.write().take() {
            tracing::info!("Signed out: user={}", session.user_id);
        }
    }

    pub fn user_id(&self) -> Result<String> {
        self.inner
            .read()
            .as_ref()
            .map(|s| s.user_id.clone())
            .ok_or(Error::NotLoggedIn)
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().as_ref().and_then(|s| s.token.clone())
    }

    /// Fails with `Forbidden` unless the current session holds `cap`.
    pub fn require(&self, cap: Capability) -> Result<()> {
        match self.inner.read().as_ref() {
            Some(session) if session.can(cap) => Ok(()),
            Some(_) => Err(Error::Forbidden(cap)),
            None => Err(Error::NotLoggedIn),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)?;
        let session: Session = serde_json::from_str(&content)?;
        Ok(Self::with_session(session))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        match self.current() {
            Some(session) => {
                let content = serde_json::to_string_pretty(&session)?;
                std::fs::write(path, content)?;
            }
            None => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_require_uses_role_and_explicit_permissions() {
        let mut session = Session::new("u1", Role::Communication);
        let ctx = SessionContext::with_session(session.clone());
        assert!(ctx.require(Capability::UseChat).is_ok());
        assert!(matches!(
            ctx.require(Capability::ResolveTickets),
            Err(Error::Forbidden(Capability::ResolveTickets))
        ));

        session.permissions.push(Capability::ResolveTickets);
        ctx.sign_in(session);
        assert!(ctx.require(Capability::ResolveTickets).is_ok());
    }

    #[test]
    fn test_signed_out_context() {
        let ctx = SessionContext::new();
        assert!(matches!(ctx.user_id(), Err(Error::NotLoggedIn)));
        assert!(matches!(ctx.require(Capability::UseChat), Err(Error::NotLoggedIn)));

        ctx.sign_in(Session::new("u2", Role::Intern));
        assert_eq!(ctx.user_id().unwrap(), "u2");
        ctx.sign_out();
        assert!(ctx.current().is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let ctx = SessionContext::new();
        let other = ctx.clone();
        ctx.sign_in(Session::new("u3", Role::Hr));
        assert_eq!(other.user_id().unwrap(), "u3");
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("iisppr-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("session.json");

        let mut session = Session::new("u4", Role::HrHead);
        session.is_verified = true;
        session.token = Some("tok".into());
        SessionContext::with_session(session.clone()).save(&path).unwrap();

        let loaded = SessionContext::load(&path).unwrap();
        assert_eq!(loaded.current(), Some(session));

        loaded.sign_out();
        loaded.save(&path).unwrap();
        assert!(!path.exists());

        std::fs::remove_dir_all(&dir).ok();
    }
}

//! Sign up, sign in, sign out
//!
//! `AuthService` owns the current `Session`. Signing in persists it through
//! the `SessionStore` and installs the token on the backend so later
//! requests carry the `access_token` cookie.

use std::sync::{Arc, RwLock};

use crate::api::backend::AuthBackend;
use crate::api::types::{Credentials, NewUser, UserProfile};
use crate::error::{ClientError, Result};
use crate::session::{Session, SessionStore};

pub struct AuthService {
    backend: Arc<dyn AuthBackend>,
    store: SessionStore,
    session: RwLock<Option<Session>>,
}

impl AuthService {
    pub fn new(backend: Arc<dyn AuthBackend>, store: SessionStore) -> Self {
        Self {
            backend,
            store,
            session: RwLock::new(None),
        }
    }

    /// Current session, if signed in
    pub fn current(&self) -> Option<Session> {
        self.session.read().ok().and_then(|s| s.clone())
    }

    pub fn is_signed_in(&self) -> bool {
        self.current().is_some()
    }

    /// Profile of the signed-in user, or `NotAuthenticated`
    pub fn require_user(&self) -> Result<UserProfile> {
        self.current()
            .map(|s| s.user)
            .ok_or(ClientError::NotAuthenticated)
    }

    /// Create an account. Does not sign in.
    pub async fn sign_up(&self, email: &str, password: &str, full_name: Option<&str>) -> Result<UserProfile> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(ClientError::InvalidRequest("Email and password are required".into()));
        }
        let user = NewUser {
            email: email.trim().to_string(),
            password: password.to_string(),
            full_name: full_name.map(str::to_string),
        };
        let profile = self.backend.register(&user).await?;
        log::info!("Registered {}", profile.email);
        Ok(profile)
    }

    /// Exchange credentials for a token, fetch the profile, persist the session
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let credentials = Credentials {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let token = self.backend.login(&credentials).await?;
        let user = self.backend.current_user(&token.access_token).await?;

        let session = Session::new(user, token.access_token);
        self.store.save(&session)?;
        self.install(Some(session.clone()));
        log::info!("Signed in as {}", session.user.email);
        Ok(session)
    }

    /// Log out on the backend if possible, then forget the session locally
    pub async fn sign_out(&self) -> Result<()> {
        if self.is_signed_in() {
            if let Err(e) = self.backend.logout().await {
                log::warn!("Backend logout failed, clearing local session anyway: {}", e);
            }
        }
        self.install(None);
        self.store.clear()?;
        log::info!("Signed out");
        Ok(())
    }

    /// Load the persisted session, if any, and install it
    pub fn restore(&self) -> Result<Option<Session>> {
        let session = self.store.load()?;
        match &session {
            Some(s) => log::debug!("Restored session for {}", s.user.email),
            None => log::debug!("No saved session at {}", self.store.path().display()),
        }
        self.install(session.clone());
        Ok(session)
    }

    fn install(&self, session: Option<Session>) {
        self.backend
            .set_credential(session.as_ref().map(|s| s.access_token.clone()));
        match self.session.write() {
            Ok(mut guard) => *guard = session,
            Err(e) => log::error!("Session lock poisoned: {}", e),
        }
    }
}

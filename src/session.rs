use parking_lot::RwLock;

use crate::error::ApiError;

/// Supplies the bearer credential attached to every store request.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Result<String, ApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub name: String,
    pub email: String,
    pub access_token: String,
}

/// The signed-in user, if any, shared by the store and the controllers.
#[derive(Debug, Default)]
pub struct Identity {
    session: RwLock<Option<Session>>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: RwLock::new(Some(session)),
        }
    }

    pub fn current_user(&self) -> Option<String> {
        self.session
            .read()
            .as_ref()
            .filter(|s| !s.access_token.is_empty())
            .map(|s| s.name.clone())
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.session
            .read()
            .as_ref()
            .is_some_and(|s| !s.access_token.is_empty())
    }

    pub fn sign_in(&self, session: Session) {
        tracing::info!(user = %session.name, "signed in");
        *self.session.write() = Some(session);
    }

    pub fn sign_out(&self) {
        if let Some(session) = self.session.write().take() {
            tracing::info!(user = %session.name, "signed out");
        }
    }
}

impl TokenProvider for Identity {
    fn token(&self) -> Result<String, ApiError> {
        match self.session.read().as_ref() {
            Some(session) if !session.access_token.is_empty() => Ok(session.access_token.clone()),
            _ => Err(ApiError::not_logged_in()),
        }
    }
}

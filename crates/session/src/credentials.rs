use std::fmt;

use crate::SessionError;

/// Storefront account credentials.
#[derive(Clone)]
pub struct Credentials {
    identity: String,
    secret: String,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>) -> Result<Self, SessionError> {
        let identity = identity.into();
        let secret = secret.into();
        if identity.trim().is_empty() {
            return Err(SessionError::MissingCredentials("username"));
        }
        if secret.is_empty() {
            return Err(SessionError::MissingCredentials("password"));
        }
        Ok(Self { identity, secret })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

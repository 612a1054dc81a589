//! Request authentication

use crate::error::{ApiError, Result};
use bbs_core::{Credential, CredentialProvider, Endpoint};
use reqwest::RequestBuilder;
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use tracing::debug;

/// Decorates outgoing requests with credentials.
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    fn decorate(&self, request: RequestBuilder) -> RequestBuilder;

    /// Identifier of the credential in use, `None` when anonymous.
    fn credentials_id(&self) -> Option<&str>;

    fn is_anonymous(&self) -> bool {
        self.credentials_id().is_none()
    }
}

#[derive(Debug, Default)]
pub struct AnonymousAuthenticator;

impl Authenticator for AnonymousAuthenticator {
    fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        request
    }

    fn credentials_id(&self) -> Option<&str> {
        None
    }
}

/// HTTP basic authentication with a username and password (or app password).
pub struct BasicAuthenticator {
    credentials_id: String,
    username: String,
    password: Secret<String>,
}

impl BasicAuthenticator {
    pub fn new(credentials_id: &str, username: &str, password: Secret<String>) -> Self {
        Self {
            credentials_id: credentials_id.to_string(),
            username: username.to_string(),
            password,
        }
    }
}

impl std::fmt::Debug for BasicAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthenticator")
            .field("credentials_id", &self.credentials_id)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Authenticator for BasicAuthenticator {
    fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    fn credentials_id(&self) -> Option<&str> {
        Some(&self.credentials_id)
    }
}

/// Bearer token authentication (access tokens, HTTP access tokens).
pub struct BearerAuthenticator {
    credentials_id: String,
    token: Secret<String>,
}

impl BearerAuthenticator {
    pub fn new(credentials_id: &str, token: Secret<String>) -> Self {
        Self {
            credentials_id: credentials_id.to_string(),
            token,
        }
    }
}

impl std::fmt::Debug for BearerAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthenticator")
            .field("credentials_id", &self.credentials_id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Authenticator for BearerAuthenticator {
    fn decorate(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(self.token.expose_secret())
    }

    fn credentials_id(&self) -> Option<&str> {
        Some(&self.credentials_id)
    }
}

/// Pick the authenticator for an endpoint from its configured credential.
///
/// No credential id means anonymous access. An id that does not resolve is a
/// configuration error.
pub fn authenticator_for(
    endpoint: &Endpoint,
    credentials: &dyn CredentialProvider,
) -> Result<Arc<dyn Authenticator>> {
    let Some(id) = endpoint.credentials_id.as_deref() else {
        debug!(server_url = %endpoint.server_url(), "Using anonymous access");
        return Ok(Arc::new(AnonymousAuthenticator));
    };

    let credential = credentials.lookup(id, endpoint.server_url()).ok_or_else(|| {
        ApiError::Configuration(format!(
            "credentials '{}' not found for {}",
            id,
            endpoint.server_url()
        ))
    })?;

    let authenticator: Arc<dyn Authenticator> = match credential {
        Credential::UsernamePassword { username, password } => {
            Arc::new(BasicAuthenticator::new(id, &username, password))
        }
        Credential::Token(token) | Credential::Secret(token) => {
            Arc::new(BearerAuthenticator::new(id, token))
        }
    };
    Ok(authenticator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbs_core::{CredentialEntry, InMemoryCredentials};

    #[test]
    fn test_anonymous_without_credentials() {
        let auth = authenticator_for(&Endpoint::cloud(), &InMemoryCredentials::new()).unwrap();
        assert!(auth.is_anonymous());
    }

    #[test]
    fn test_credential_kinds() {
        let store = InMemoryCredentials::from_entries([
            CredentialEntry::username_password("basic", "alice", "pw"),
            CredentialEntry::token("pat", "tok"),
        ]);

        let basic =
            authenticator_for(&Endpoint::cloud().with_credentials("basic"), &store).unwrap();
        assert_eq!(basic.credentials_id(), Some("basic"));
        assert!(format!("{:?}", basic).contains("REDACTED"));
        assert!(!format!("{:?}", basic).contains("pw"));

        let bearer = authenticator_for(&Endpoint::cloud().with_credentials("pat"), &store).unwrap();
        assert!(!bearer.is_anonymous());
    }

    #[test]
    fn test_missing_credential_is_configuration_error() {
        let result = authenticator_for(
            &Endpoint::cloud().with_credentials("gone"),
            &InMemoryCredentials::new(),
        );

        match result {
            Err(ApiError::Configuration(message)) => assert!(message.contains("gone")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}

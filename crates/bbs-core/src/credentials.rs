//! Credential lookup.
//!
//! Storage is owned elsewhere; the connector only asks for a credential by id,
//! scoped to the URL it is about to talk to.

use dashmap::DashMap;
use secrecy::Secret;
use serde::Deserialize;

/// A resolved credential.
#[derive(Debug)]
pub enum Credential {
    /// Opaque secret text, e.g. a webhook signing secret.
    Secret(Secret<String>),
    UsernamePassword {
        username: String,
        password: Secret<String>,
    },
    /// Bearer token (access token, HTTP access token or app password token).
    Token(Secret<String>),
}

impl Credential {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Secret(_) => "secret",
            Self::UsernamePassword { .. } => "username_password",
            Self::Token(_) => "token",
        }
    }
}

/// Resolves credentials by id for a target URL.
pub trait CredentialProvider: Send + Sync {
    /// Returns `None` when the id is unknown or not usable for `scope_url`.
    fn lookup(&self, id: &str, scope_url: &str) -> Option<Credential>;
}

/// Credential record as written in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialEntry {
    pub id: String,
    /// Restricts the credential to URLs starting with this prefix.
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

impl CredentialEntry {
    pub fn secret(id: &str, secret: &str) -> Self {
        Self {
            id: id.to_string(),
            scope: None,
            secret: Some(secret.to_string()),
            username: None,
            password: None,
            token: None,
        }
    }

    pub fn username_password(id: &str, username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            secret: None,
            ..Self::secret(id, "")
        }
    }

    pub fn token(id: &str, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            secret: None,
            ..Self::secret(id, "")
        }
    }

    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    fn applies_to(&self, scope_url: &str) -> bool {
        match &self.scope {
            Some(prefix) => scope_url.starts_with(prefix.as_str()),
            None => true,
        }
    }

    fn to_credential(&self) -> Option<Credential> {
        if let (Some(username), Some(password)) = (&self.username, &self.password) {
            return Some(Credential::UsernamePassword {
                username: username.clone(),
                password: Secret::new(password.clone()),
            });
        }
        if let Some(token) = &self.token {
            return Some(Credential::Token(Secret::new(token.clone())));
        }
        self.secret
            .as_ref()
            .map(|secret| Credential::Secret(Secret::new(secret.clone())))
    }
}

/// Credential store backed by configuration entries.
#[derive(Default)]
pub struct InMemoryCredentials {
    entries: DashMap<String, CredentialEntry>,
}

impl InMemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: impl IntoIterator<Item = CredentialEntry>) -> Self {
        let store = Self::new();
        for entry in entries {
            store.insert(entry);
        }
        store
    }

    pub fn insert(&self, entry: CredentialEntry) {
        self.entries.insert(entry.id.clone(), entry);
    }

    pub fn remove(&self, id: &str) {
        self.entries.remove(id);
    }
}

impl CredentialProvider for InMemoryCredentials {
    fn lookup(&self, id: &str, scope_url: &str) -> Option<Credential> {
        let entry = self.entries.get(id)?;
        if !entry.applies_to(scope_url) {
            return None;
        }
        entry.to_credential()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_lookup_kinds() {
        let store = InMemoryCredentials::from_entries([
            CredentialEntry::secret("hook", "s3cret"),
            CredentialEntry::username_password("basic", "alice", "pw"),
            CredentialEntry::token("pat", "tok"),
        ]);

        match store.lookup("hook", "https://bitbucket.org") {
            Some(Credential::Secret(secret)) => assert_eq!(secret.expose_secret(), "s3cret"),
            other => panic!("unexpected credential: {:?}", other),
        }
        assert_eq!(
            store.lookup("basic", "https://x").map(|c| c.kind()),
            Some("username_password")
        );
        assert_eq!(store.lookup("pat", "https://x").map(|c| c.kind()), Some("token"));
        assert!(store.lookup("missing", "https://x").is_none());
    }

    #[test]
    fn test_scope_restricts_lookup() {
        let store = InMemoryCredentials::from_entries([
            CredentialEntry::token("pat", "tok").with_scope("https://git.example.com")
        ]);

        assert!(store.lookup("pat", "https://git.example.com/rest").is_some());
        assert!(store.lookup("pat", "https://bitbucket.org").is_none());

        store.remove("pat");
        assert!(store.lookup("pat", "https://git.example.com").is_none());
    }
}

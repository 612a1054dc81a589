//! Webhook signature handling
//!
//! Bitbucket signs deliveries with `X-Hub-Signature: sha256=<hex>`, the
//! HMAC-SHA256 of the raw body keyed with the hook secret.

use crate::{Result, WebhookError};
use bbs_core::{Credential, CredentialProvider, Endpoint};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

const ALGORITHM: &str = "sha256";

/// Secret behind the endpoint's hook signature credentials.
///
/// `None` when signing is disabled. A configured id that resolves to nothing,
/// or to a username/password pair, is a configuration error.
pub fn hook_secret(credentials: &dyn CredentialProvider, endpoint: &Endpoint) -> Result<Option<String>> {
    let Some(id) = endpoint.hook_signature_credentials_id.as_deref() else {
        return Ok(None);
    };
    match credentials.lookup(id, endpoint.server_url()) {
        Some(Credential::Secret(secret)) | Some(Credential::Token(secret)) => {
            Ok(Some(secret.expose_secret().clone()))
        }
        Some(other) => Err(WebhookError::Configuration(format!(
            "hook signature credentials '{}' must be a secret, found {}",
            id,
            other.kind()
        ))),
        None => Err(WebhookError::Configuration(format!(
            "hook signature credentials '{}' not found for {}",
            id,
            endpoint.server_url()
        ))),
    }
}

/// Produces signature header values; used by replay tooling and tests.
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl WebhookSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Header value for `payload`.
    pub fn sign(&self, payload: &[u8]) -> Result<String> {
        Ok(format!("{}={}", ALGORITHM, compute_signature(&self.secret, payload)?))
    }
}

/// Checks inbound signatures against one secret.
pub struct WebhookVerifier {
    secret: Vec<u8>,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Verify `signature_header` against `payload`. A missing header fails.
    pub fn verify(&self, payload: &[u8], signature_header: Option<&str>) -> Result<()> {
        let header = signature_header.ok_or_else(|| {
            WebhookError::Verification(format!("missing {} header", SIGNATURE_HEADER))
        })?;
        let (algorithm, signature) = header.trim().split_once('=').ok_or_else(|| {
            WebhookError::Verification("Invalid signature format".to_string())
        })?;
        if !algorithm.eq_ignore_ascii_case(ALGORITHM) {
            return Err(WebhookError::Verification(format!(
                "unsupported signature algorithm '{}'",
                algorithm
            )));
        }

        let expected = compute_signature(&self.secret, payload)?;
        if constant_time_compare(&signature.to_ascii_lowercase(), &expected) {
            Ok(())
        } else {
            Err(WebhookError::Verification(
                "No matching signature found".to_string(),
            ))
        }
    }
}

fn compute_signature(secret: &[u8], data: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| WebhookError::Verification(format!("invalid signing key: {}", e)))?;
    mac.update(data);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let signer = WebhookSigner::new("test-secret-key");
        let verifier = WebhookVerifier::new("test-secret-key");

        let payload = br#"{"push":{"changes":[]}}"#;
        let signature = signer.sign(payload).unwrap();

        assert!(signature.starts_with("sha256="));
        assert!(verifier.verify(payload, Some(&signature)).is_ok());
    }

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let signature = WebhookSigner::new("key")
            .sign(b"The quick brown fox jumps over the lazy dog")
            .unwrap();
        assert_eq!(
            signature,
            "sha256=f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_wrong_secret() {
        let signature = WebhookSigner::new("secret-1").sign(b"payload").unwrap();
        let result = WebhookVerifier::new("secret-2").verify(b"payload", Some(&signature));

        assert!(matches!(result, Err(WebhookError::Verification(_))));
    }

    #[test]
    fn test_modified_payload() {
        let signer = WebhookSigner::new("test-secret");
        let verifier = WebhookVerifier::new("test-secret");
        let signature = signer.sign(b"original payload").unwrap();

        assert!(verifier.verify(b"modified payload", Some(&signature)).is_err());
    }

    #[test]
    fn test_missing_or_malformed_header() {
        let verifier = WebhookVerifier::new("s");

        assert!(verifier.verify(b"x", None).is_err());
        assert!(verifier.verify(b"x", Some("deadbeef")).is_err());
        assert!(verifier.verify(b"x", Some("sha1=deadbeef")).is_err());
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "ab"));
    }
}

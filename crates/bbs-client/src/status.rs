//! Build status key and name bounds.

use sha2::{Digest, Sha256};

/// Longest key or name the backends accept.
pub const MAX_LENGTH: usize = 255;

const DIGEST_CHARS: usize = 32;

/// Keep a status key within [`MAX_LENGTH`] while staying unique.
///
/// Over-long keys keep a prefix, then `/`, then a digest of the full key.
pub fn bounded_key(key: &str) -> String {
    if key.chars().count() <= MAX_LENGTH {
        return key.to_string();
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    let prefix: String = key.chars().take(MAX_LENGTH - DIGEST_CHARS - 1).collect();
    format!("{}/{}", prefix, &digest[..DIGEST_CHARS])
}

/// Truncate a display name to [`MAX_LENGTH`] characters.
pub fn bounded_name(name: &str) -> String {
    name.chars().take(MAX_LENGTH).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_values_untouched() {
        assert_eq!(bounded_key("jenkins-build"), "jenkins-build");
        assert_eq!(bounded_name("Build #1"), "Build #1");
    }

    #[test]
    fn test_long_key_truncated_with_digest() {
        let key = "k".repeat(300);
        let bounded = bounded_key(&key);

        assert_eq!(bounded.chars().count(), MAX_LENGTH);
        assert!(bounded.starts_with(&"k".repeat(222)));
        assert_eq!(&bounded[222..223], "/");
        assert_eq!(bounded, bounded_key(&key));
    }

    #[test]
    fn test_distinct_long_keys_stay_distinct() {
        let a = format!("{}a", "x".repeat(300));
        let b = format!("{}b", "x".repeat(300));
        assert_ne!(bounded_key(&a), bounded_key(&b));
    }

    #[test]
    fn test_name_truncated_on_char_boundary() {
        let name = "é".repeat(300);
        let bounded = bounded_name(&name);
        assert_eq!(bounded.chars().count(), MAX_LENGTH);
    }
}

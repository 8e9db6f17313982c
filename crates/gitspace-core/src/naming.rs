//! Naming rules for gitspace identifiers.
//!
//! User-facing identifiers are short slugs. Instance identifiers derive from the
//! config identifier plus a random suffix, and the routing key is a stable hash of
//! the space path and config identifier.

/// Maximum length of a user supplied identifier.
pub const MAX_IDENTIFIER_LEN: usize = 100;

/// Length of the random suffix appended to instance identifiers.
const INSTANCE_SUFFIX_LEN: usize = 6;

/// Length of the hex encoded routing key.
const ROUTING_KEY_LEN: usize = 32;

/// Reasons an identifier can be rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentifierError {
    /// The identifier was empty.
    #[error("identifier must not be empty")]
    Empty,

    /// The identifier exceeds [`MAX_IDENTIFIER_LEN`].
    #[error("identifier exceeds {max} characters (got {len})")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
        /// Actual length.
        len: usize,
    },

    /// The identifier contains a character outside `[A-Za-z0-9._-]`.
    #[error("identifier contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// Identifiers may not start with a dot.
    #[error("identifier must not start with '.'")]
    LeadingDot,
}

/// Validate a user supplied identifier.
///
/// # Errors
///
/// Returns an [`IdentifierError`] describing the first rule the identifier breaks.
pub fn validate_identifier(identifier: &str) -> Result<(), IdentifierError> {
    if identifier.is_empty() {
        return Err(IdentifierError::Empty);
    }
    let len = identifier.chars().count();
    if len > MAX_IDENTIFIER_LEN {
        return Err(IdentifierError::TooLong {
            max: MAX_IDENTIFIER_LEN,
            len,
        });
    }
    if identifier.starts_with('.') {
        return Err(IdentifierError::LeadingDot);
    }
    if let Some(c) = identifier
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(IdentifierError::InvalidCharacter(c));
    }
    Ok(())
}

/// Generate a fresh instance identifier for a config.
///
/// The result is the lowercased config identifier followed by a short random suffix.
#[must_use]
pub fn instance_identifier(config_identifier: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}-{}",
        config_identifier.to_lowercase(),
        &suffix[..INSTANCE_SUFFIX_LEN]
    )
}

/// Derive the routing key for a gitspace.
///
/// The key is stable for a given space path and config identifier so that an SSH
/// piper can route connections to the same backend across instances.
#[must_use]
pub fn routing_key(space_path: &str, config_identifier: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(space_path.as_bytes());
    hasher.update(b"/");
    hasher.update(config_identifier.as_bytes());
    let digest = hex::encode(hasher.finalize().as_bytes());
    digest[..ROUTING_KEY_LEN].to_string()
}

//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// Separator between the two halves of a composite key.
const KEY_SEPARATOR: char = '_';

/// ID generator for entities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs are:
    /// - Lexicographically sortable
    /// - Monotonically increasing within the same millisecond
    /// - Shorter than UUIDs when represented as strings
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a cryptographically secure random token.
    #[must_use]
    pub fn generate_token(&self) -> String {
        // Use UUID v4 for tokens (no time component for security)
        Uuid::new_v4().simple().to_string()
    }
}

/// Composite key of a directed document owned by `owner_id` about `other_id`.
///
/// Used for both relationship documents and block records.
#[must_use]
pub fn relationship_id(owner_id: &str, other_id: &str) -> String {
    format!("{owner_id}{KEY_SEPARATOR}{other_id}")
}

/// Split a composite key back into `(owner_id, other_id)`.
///
/// Returns `None` for keys that do not have exactly two non-empty halves.
#[must_use]
pub fn parse_relationship_id(id: &str) -> Option<(&str, &str)> {
    let (owner, other) = id.split_once(KEY_SEPARATOR)?;
    if owner.is_empty() || other.is_empty() || other.contains(KEY_SEPARATOR) {
        return None;
    }
    Some((owner, other))
}

//! The three record kinds the sync engine reconciles, and the reserved
//! labels/book names the conflict-resolution rules depend on.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved book labels that a user-chosen label may never collide with.
pub const RESERVED_LABELS: &[&str] = &["trash", "conflicts"];

/// The auto-created book that divergent note-move conflicts land in.
pub const CONFLICTS_BOOK_LABEL: &str = "conflicts";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Book {
    pub uuid: Uuid,
    pub label: String,
    pub usn: i64,
    pub deleted: bool,
    pub dirty: bool,
}

impl Book {
    /// Creates a fresh, dirty, unsynced book for `label`, rejecting labels
    /// that violate the rules in [`validate_label`].
    pub fn new_local(label: String) -> Result<Self, String> {
        validate_label(&label)?;
        Ok(Book {
            uuid: Uuid::new_v4(),
            label,
            usn: 0,
            deleted: false,
            dirty: true,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub uuid: Uuid,
    pub book_uuid: Uuid,
    pub body: String,
    pub added_on: i64,
    pub edited_on: i64,
    pub usn: i64,
    pub deleted: bool,
    pub dirty: bool,
    pub public: bool,
}

/// Returns `Err` naming the rule that was violated, per spec: a label must
/// be non-empty, no longer than 255 bytes, contain no whitespace, not be
/// purely numeric, and not collide with a reserved name.
pub fn validate_label(label: &str) -> Result<(), String> {
    if label.is_empty() {
        return Err("book label must not be empty".into());
    }
    if label.len() > 255 {
        return Err("book label must not exceed 255 characters".into());
    }
    if label.chars().any(char::is_whitespace) {
        return Err("book label must not contain whitespace".into());
    }
    if label.chars().all(|c| c.is_ascii_digit()) {
        return Err("book label must not be purely numeric".into());
    }
    if RESERVED_LABELS.contains(&label) {
        return Err(format!("{label:?} is a reserved book label"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_whitespace_numeric_and_reserved_labels() {
        assert!(validate_label("js").is_ok());
        assert!(validate_label("").is_err());
        assert!(validate_label("has space").is_err());
        assert!(validate_label("1234").is_err());
        assert!(validate_label("trash").is_err());
        assert!(validate_label("conflicts").is_err());
    }
}

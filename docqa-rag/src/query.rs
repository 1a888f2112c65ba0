//! Caller-side validation of user questions.
//!
//! The retrieval engine only requires a non-empty query. Front ends use
//! [`validate_query`] to turn away near-empty or garbled input before it
//! costs an embedding call.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Minimum number of characters in a trimmed query.
pub const MIN_QUERY_CHARS: usize = 3;

static ALLOWED_QUERY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9\s?.,!@#$%^&*()_+=-]*$").expect("query pattern is a valid regex")
});

/// Why a query was turned away before reaching the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryRejection {
    /// Fewer than [`MIN_QUERY_CHARS`] characters after trimming.
    #[error("query is shorter than {} characters", MIN_QUERY_CHARS)]
    TooShort,
    /// The query contains characters outside the accepted set.
    #[error("query contains unsupported characters")]
    DisallowedCharacters,
}

impl QueryRejection {
    /// The message shown to the user in place of an answer.
    pub fn user_message(&self) -> &'static str {
        "I couldn't understand that. Please ask a clear question."
    }
}

/// Validate a raw user question, returning it trimmed.
///
/// # Errors
///
/// Returns a [`QueryRejection`] describing the first failed rule.
pub fn validate_query(input: &str) -> Result<&str, QueryRejection> {
    if !ALLOWED_QUERY.is_match(input) {
        return Err(QueryRejection::DisallowedCharacters);
    }
    let trimmed = input.trim();
    if trimmed.chars().count() < MIN_QUERY_CHARS {
        return Err(QueryRejection::TooShort);
    }
    Ok(trimmed)
}

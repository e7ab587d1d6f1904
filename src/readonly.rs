//! Read-only SQL gate.
//!
//! [`validate_read_only`] is the only way to obtain a [`ValidatedSql`], and
//! executors only accept [`ValidatedSql`]. A statement that has not passed
//! the gate therefore cannot be handed to a database, whatever produced it.
//!
//! Rules:
//! 1. After trimming and uppercasing, the statement starts with `SELECT`
//!    or `WITH`.
//! 2. None of [`FORBIDDEN_KEYWORDS`] appears as a whole word anywhere in
//!    the statement, including after a `;` separator.
//!
//! The check is textual, so a string literal or identifier spelled like a
//! keyword is refused too.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Keywords that make a statement non-read-only.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
];

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"\b(?:{})\b", FORBIDDEN_KEYWORDS.join("|"))).unwrap()
});

/// A statement that passed the read-only gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Bypass the gate. Only for exercising backend-level protections in tests.
    #[cfg(test)]
    pub(crate) fn unchecked(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedSql {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why a statement was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("statement does not start with SELECT or WITH")]
    NotAQuery,
    #[error("statement contains forbidden keyword {0}")]
    ForbiddenKeyword(String),
}

/// Check a statement and report the first rule it breaks.
pub fn check_read_only(sql: &str) -> Result<ValidatedSql, Rejection> {
    let normalized = sql.trim().to_uppercase();
    if !(normalized.starts_with("SELECT") || normalized.starts_with("WITH")) {
        return Err(Rejection::NotAQuery);
    }
    if let Some(m) = FORBIDDEN.find(&normalized) {
        return Err(Rejection::ForbiddenKeyword(m.as_str().to_string()));
    }
    Ok(ValidatedSql(sql.trim().to_string()))
}

/// Accept a read-only statement or return `None`.
pub fn validate_read_only(sql: &str) -> Option<ValidatedSql> {
    check_read_only(sql).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_is_valid() {
        let v = validate_read_only("SELECT * FROM users").unwrap();
        assert_eq!(v.as_str(), "SELECT * FROM users");
    }

    #[test]
    fn test_with_cte_is_valid() {
        assert!(validate_read_only("WITH a AS (SELECT 1) SELECT * FROM a").is_some());
        assert!(validate_read_only(
            "WITH active AS (SELECT * FROM users WHERE active) SELECT * FROM active"
        )
        .is_some());
    }

    #[test]
    fn test_case_and_whitespace_insensitive_prefix() {
        let v = validate_read_only("\n  select id from users  \n").unwrap();
        assert_eq!(v.as_str(), "select id from users");
    }

    #[test]
    fn test_mutations_are_invalid() {
        for sql in [
            "INSERT INTO users VALUES (1)",
            "DELETE FROM users",
            "DROP TABLE users",
            "UPDATE users SET name = 'x'",
            "TRUNCATE users",
            "GRANT ALL ON users TO public",
        ] {
            assert!(validate_read_only(sql).is_none(), "accepted: {}", sql);
        }
    }

    #[test]
    fn test_multi_statement_injection_is_invalid() {
        assert_eq!(
            check_read_only("SELECT * FROM users; DELETE FROM users"),
            Err(Rejection::ForbiddenKeyword("DELETE".to_string()))
        );
        assert!(validate_read_only("select 1;drop table users").is_none());
        assert!(validate_read_only("WITH x AS (SELECT 1) SELECT * FROM x; exec sp_who").is_none());
    }

    #[test]
    fn test_keywords_inside_cte_are_invalid() {
        assert!(validate_read_only(
            "WITH gone AS (DELETE FROM users RETURNING *) SELECT * FROM gone"
        )
        .is_none());
    }

    #[test]
    fn test_whole_word_matching_only() {
        // Identifiers that merely contain a keyword are fine
        assert!(validate_read_only("SELECT updated_at, created_by FROM orders").is_some());
        assert!(validate_read_only("SELECT deleted FROM accounts").is_some());
        assert!(validate_read_only("SELECT executor_id FROM jobs").is_some());
    }

    #[test]
    fn test_non_query_prefix_rejected() {
        assert_eq!(check_read_only("EXPLAIN SELECT 1"), Err(Rejection::NotAQuery));
        assert_eq!(check_read_only(""), Err(Rejection::NotAQuery));
        assert_eq!(check_read_only("-- SELECT\nDROP TABLE x"), Err(Rejection::NotAQuery));
    }

    #[test]
    fn test_every_forbidden_keyword_rejected_anywhere() {
        for kw in FORBIDDEN_KEYWORDS {
            let lower = kw.to_lowercase();
            let sql = format!("SELECT 1 FROM t; {} something", lower);
            assert!(validate_read_only(&sql).is_none(), "accepted: {}", sql);
        }
    }
}

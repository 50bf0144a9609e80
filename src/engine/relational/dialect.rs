//! SQL Dialect
//!
//! Placeholder style, case-insensitive matching and id-set membership for
//! SQLite (executed) and PostgreSQL (rendered for explain).

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Sqlite,
    Postgres,
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlDialect::Sqlite => write!(f, "sqlite"),
            SqlDialect::Postgres => write!(f, "postgres"),
        }
    }
}

impl SqlDialect {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Some(SqlDialect::Sqlite),
            "postgres" | "postgresql" | "pg" => Some(SqlDialect::Postgres),
            _ => None,
        }
    }

    /// Positional parameter `n` (1-based)
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!("?{}", n),
            SqlDialect::Postgres => format!("${}", n),
        }
    }

    /// Case-insensitive substring match against an already-escaped `%...%` pattern
    pub fn contains_ci(&self, expr: &str, n: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!(
                "LOWER({}) LIKE LOWER({}) ESCAPE '\\'",
                expr,
                self.placeholder(n)
            ),
            SqlDialect::Postgres => format!("{} ILIKE {} ESCAPE '\\'", expr, self.placeholder(n)),
        }
    }

    /// Membership of `expr` in a bound id list
    pub fn in_set(&self, expr: &str, n: usize) -> String {
        match self {
            SqlDialect::Sqlite => format!(
                "{} IN (SELECT value FROM json_each({}))",
                expr,
                self.placeholder(n)
            ),
            SqlDialect::Postgres => format!("{} = ANY({})", expr, self.placeholder(n)),
        }
    }
}

/// Escape LIKE wildcards so the value matches literally, then wrap as a substring pattern
pub fn substring_pattern(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('%');
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(SqlDialect::Sqlite.placeholder(3), "?3");
        assert_eq!(SqlDialect::Postgres.placeholder(3), "$3");
    }

    #[test]
    fn test_membership() {
        assert_eq!(
            SqlDialect::Sqlite.in_set("u.id", 1),
            "u.id IN (SELECT value FROM json_each(?1))"
        );
        assert_eq!(SqlDialect::Postgres.in_set("u.id", 2), "u.id = ANY($2)");
    }

    #[test]
    fn test_substring_pattern_escapes_wildcards() {
        assert_eq!(substring_pattern("ab"), "%ab%");
        assert_eq!(substring_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
    }

    #[test]
    fn test_from_str() {
        assert_eq!(SqlDialect::from_str("PostgreSQL"), Some(SqlDialect::Postgres));
        assert_eq!(SqlDialect::from_str("oracle"), None);
    }
}

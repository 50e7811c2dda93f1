//! SQL dialect selection for the two supported database families.
//!
//! SQLite and MySQL agree on `?` placeholders and `CURRENT_TIMESTAMP`, but
//! disagree on timestamp arithmetic. Every query that reads or compares a
//! datetime column goes through one of the fragment builders here instead of
//! interpolating dialect-specific SQL at the call site.

use super::{DbError, DbResult};

/// The database family behind the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    /// Derive the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> DbResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        match scheme {
            "sqlite" => Ok(Self::Sqlite),
            "mysql" | "mariadb" => Ok(Self::MySql),
            _ => Err(DbError::UnsupportedUrl(url.to_string())),
        }
    }

    /// Seconds since the Unix epoch of a datetime expression.
    /// NULL propagates, so nullable columns decode as `Option<i64>`.
    pub fn epoch(&self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!("CAST(strftime('%s', {expr}) AS INTEGER)"),
            Self::MySql => format!("CAST(UNIX_TIMESTAMP({expr}) AS SIGNED)"),
        }
    }

    /// Seconds elapsed between a datetime expression and now.
    pub fn seconds_since(&self, expr: &str) -> String {
        match self {
            Self::Sqlite => format!(
                "(CAST(strftime('%s', CURRENT_TIMESTAMP) AS INTEGER) - CAST(strftime('%s', {expr}) AS INTEGER))"
            ),
            Self::MySql => format!("TIMESTAMPDIFF(SECOND, {expr}, CURRENT_TIMESTAMP)"),
        }
    }
}

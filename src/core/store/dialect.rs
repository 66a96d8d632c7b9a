//! Dialect seam between the embedded (SQLite) and server (PostgreSQL)
//! engines.
//!
//! Queries are written once with `?` placeholders. The two points where the
//! engines genuinely diverge, insert-id strategy and time-range cutoff
//! expressions, are isolated here so repositories stay single-sourced.

use crate::error::{Error, Result};

/// Time window filters accepted by result listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    /// Last 24 hours.
    Day,
    /// Last 3 days.
    ThreeDays,
    /// Last 7 days.
    Week,
    /// Last 30 days.
    Month,
}

impl TimeRange {
    pub fn parse(value: &str) -> Option<TimeRange> {
        match value {
            "1d" | "24h" => Some(TimeRange::Day),
            "3d" => Some(TimeRange::ThreeDays),
            "1w" | "week" => Some(TimeRange::Week),
            "1m" | "month" => Some(TimeRange::Month),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Infer the dialect from a connection URL.
    pub fn from_url(url: &str) -> Result<Dialect> {
        if url.starts_with("sqlite:") {
            Ok(Dialect::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Ok(Dialect::Postgres)
        } else {
            Err(Error::InvalidInput(format!(
                "unsupported database url scheme: {url}"
            )))
        }
    }

    /// Rewrite `?` placeholders into the engine's native style.
    ///
    /// Queries in this crate never contain `?` inside string literals, so a
    /// plain scan is sufficient.
    pub fn sql(&self, query: &str) -> String {
        match self {
            Dialect::Sqlite => query.to_string(),
            Dialect::Postgres => {
                let mut out = String::with_capacity(query.len() + 8);
                let mut n = 0usize;
                for ch in query.chars() {
                    if ch == '?' {
                        n += 1;
                        out.push('$');
                        out.push_str(&n.to_string());
                    } else {
                        out.push(ch);
                    }
                }
                out
            }
        }
    }

    /// Insert statement variant that yields the new row id.
    ///
    /// PostgreSQL returns the id inline (`RETURNING id`); SQLite reports it
    /// through the driver's last-insert-rowid.
    pub fn insert_sql(&self, base: &str) -> String {
        match self {
            Dialect::Sqlite => self.sql(base),
            Dialect::Postgres => self.sql(&format!("{base} RETURNING id")),
        }
    }

    /// SQL expression producing the RFC 3339 UTC cutoff for a time range.
    ///
    /// Timestamps are stored as RFC 3339 UTC text with millisecond precision
    /// (`2024-01-01T02:00:00.000Z`), so the cutoff is rendered in the same
    /// shape and compared lexicographically.
    pub fn cutoff_expr(&self, range: TimeRange) -> &'static str {
        match (self, range) {
            (Dialect::Sqlite, TimeRange::Day) => {
                "strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-1 day')"
            }
            (Dialect::Sqlite, TimeRange::ThreeDays) => {
                "strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-3 days')"
            }
            (Dialect::Sqlite, TimeRange::Week) => {
                "strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-7 days')"
            }
            (Dialect::Sqlite, TimeRange::Month) => {
                "strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-30 days')"
            }
            (Dialect::Postgres, TimeRange::Day) => {
                "to_char(now() at time zone 'utc' - interval '1 day', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')"
            }
            (Dialect::Postgres, TimeRange::ThreeDays) => {
                "to_char(now() at time zone 'utc' - interval '3 days', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')"
            }
            (Dialect::Postgres, TimeRange::Week) => {
                "to_char(now() at time zone 'utc' - interval '7 days', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')"
            }
            (Dialect::Postgres, TimeRange::Month) => {
                "to_char(now() at time zone 'utc' - interval '30 days', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')"
            }
        }
    }

    /// Cutoff expression for the resource-stats retention window (2 hours).
    pub fn resource_retention_expr(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-2 hours')",
            Dialect::Postgres => {
                "to_char(now() at time zone 'utc' - interval '2 hours', 'YYYY-MM-DD\"T\"HH24:MI:SS.MS\"Z\"')"
            }
        }
    }

    /// Migration file suffix for this dialect.
    pub fn migration_suffix(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "",
            Dialect::Postgres => "_postgres",
        }
    }
}

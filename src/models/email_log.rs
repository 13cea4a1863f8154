use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Row};
use serde::Serialize;

use crate::db::DbPool;

/// Maximum length of a stored body preview, truncation marker included.
pub const PREVIEW_MAX_CHARS: usize = 200;
pub const PREVIEW_ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SendStatus {
    Success,
    Failed,
}

impl SendStatus {
    pub const ALL: [SendStatus; 2] = [SendStatus::Success, SendStatus::Failed];

    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Success => "Success",
            SendStatus::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Success" => Some(SendStatus::Success),
            "Failed" => Some(SendStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for SendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ToSql for SendStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SendStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        SendStatus::parse(text).ok_or_else(|| FromSqlError::Other(format!("unknown status '{}'", text).into()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmailLogEntry {
    pub id: i64,
    pub sent_to: String,
    pub subject: String,
    pub body_preview: String,
    pub status: SendStatus,
    pub recipient_count: i64,
    pub sent_at: DateTime<Utc>,
}

/// A row about to be written. The id is assigned by storage.
#[derive(Debug, Clone)]
pub struct NewEmailLog {
    pub sent_to: String,
    pub subject: String,
    pub body_preview: String,
    pub status: SendStatus,
    pub recipient_count: i64,
    pub sent_at: DateTime<Utc>,
}

/// Fixed-width UTC text, so lexical order in SQLite matches time order.
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"))
}

/// Plain-text preview of an HTML body: tags removed, whitespace collapsed, capped at
/// `PREVIEW_MAX_CHARS` characters with a trailing `...` when cut.
pub fn body_preview(body: &str) -> String {
    let stripped = tag_regex().replace_all(body, "");
    let plain = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if plain.chars().count() <= PREVIEW_MAX_CHARS {
        return plain;
    }

    let keep = PREVIEW_MAX_CHARS - PREVIEW_ELLIPSIS.len();
    let mut preview: String = plain.chars().take(keep).collect();
    preview.push_str(PREVIEW_ELLIPSIS);
    preview
}

impl EmailLogEntry {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let raw: String = row.get("sent_at")?;
        let sent_at = parse_timestamp(&raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("bad sent_at '{}'", raw).into(),
            )
        })?;
        Ok(EmailLogEntry {
            id: row.get("id")?,
            sent_to: row.get("sent_to")?,
            subject: row.get("subject")?,
            body_preview: row.get("body_preview")?,
            status: row.get("status")?,
            recipient_count: row.get("recipient_count")?,
            sent_at,
        })
    }

    pub fn create(pool: &DbPool, entry: &NewEmailLog) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.execute(
            "INSERT INTO email_logs (sent_to, subject, body_preview, status, recipient_count, sent_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.sent_to,
                entry.subject,
                entry.body_preview,
                entry.status,
                entry.recipient_count,
                format_timestamp(entry.sent_at),
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(conn.last_insert_rowid())
    }

    /// Rows with `from <= sent_at < to`, newest first.
    pub fn list_between(
        pool: &DbPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Self>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT id, sent_to, subject, body_preview, status, recipient_count, sent_at
                 FROM email_logs
                 WHERE sent_at >= ?1 AND sent_at < ?2
                 ORDER BY sent_at DESC, id DESC
                 LIMIT ?3",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(
                params![format_timestamp(from), format_timestamp(to), limit],
                Self::from_row,
            )
            .map_err(|e| e.to_string())?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| e.to_string())
    }

    pub fn recipient_total(
        pool: &DbPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        conn.query_row(
            "SELECT COALESCE(SUM(recipient_count), 0) FROM email_logs
             WHERE sent_at >= ?1 AND sent_at < ?2",
            params![format_timestamp(from), format_timestamp(to)],
            |row| row.get(0),
        )
        .map_err(|e| e.to_string())
    }

    /// Summed recipient counts per status. Statuses with no rows are absent.
    pub fn recipient_totals_by_status(
        pool: &DbPool,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(SendStatus, i64)>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare(
                "SELECT status, COALESCE(SUM(recipient_count), 0) FROM email_logs
                 WHERE sent_at >= ?1 AND sent_at < ?2
                 GROUP BY status",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(
                params![format_timestamp(from), format_timestamp(to)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| e.to_string())?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| e.to_string())
    }

    /// Summed recipient counts for each consecutive `[start, end)` window, in order.
    pub fn recipient_totals_for_windows(
        pool: &DbPool,
        windows: &[(DateTime<Utc>, DateTime<Utc>)],
    ) -> Result<Vec<i64>, String> {
        let conn = pool.get().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare_cached(
                "SELECT COALESCE(SUM(recipient_count), 0) FROM email_logs
                 WHERE sent_at >= ?1 AND sent_at < ?2",
            )
            .map_err(|e| e.to_string())?;
        windows
            .iter()
            .map(|(from, to)| {
                stmt.query_row(
                    params![format_timestamp(*from), format_timestamp(*to)],
                    |row| row.get(0),
                )
                .map_err(|e| e.to_string())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_strips_markup() {
        assert_eq!(body_preview("<b>hello</b>"), "hello");
        assert_eq!(
            body_preview("<p>Hi <a href=\"x\">there</a></p>\n<p>again</p>"),
            "Hi there again"
        );
    }

    #[test]
    fn test_preview_inline_tags_do_not_split_words() {
        assert_eq!(body_preview("hel<b>lo</b> H<sub>2</sub>O"), "hello H2O");
        assert_eq!(body_preview("<p>one</p>\n<p>two</p>"), "one two");
    }

    #[test]
    fn test_preview_short_body_untouched() {
        assert_eq!(body_preview("plain text"), "plain text");
        assert_eq!(body_preview(""), "");
    }

    #[test]
    fn test_preview_truncates_with_marker() {
        let body = format!("<div>{}</div>", "a".repeat(500));
        let preview = body_preview(&body);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
        assert!(preview.ends_with(PREVIEW_ELLIPSIS));
        assert!(!preview.contains('<'));
    }

    #[test]
    fn test_preview_exactly_at_budget_is_kept() {
        let body = "b".repeat(PREVIEW_MAX_CHARS);
        assert_eq!(body_preview(&body), body);
    }

    #[test]
    fn test_preview_counts_chars_not_bytes() {
        let body = "é".repeat(300);
        let preview = body_preview(&body);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
        assert!(preview.starts_with("ééé"));
    }

    #[test]
    fn test_status_round_trip_text() {
        for status in SendStatus::ALL {
            assert_eq!(SendStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SendStatus::parse("success"), None);
    }

    #[test]
    fn test_timestamp_text_is_fixed_width() {
        let a = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let b = parse_timestamp("2024-05-01T10:00:00.5Z").unwrap();
        let (fa, fb) = (format_timestamp(a), format_timestamp(b));
        assert_eq!(fa, "2024-05-01T10:00:00.000000Z");
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
    }
}

use chrono::{DateTime, Utc};

use crate::models::email_log::{EmailLogEntry, NewEmailLog, SendStatus};

pub mod sqlite;

/// Data-access seam for the send log. Every database operation goes through here.
pub trait Store: Send + Sync {
    // ── Lifecycle ───────────────────────────────────────────────────
    fn run_migrations(&self) -> Result<(), String>;

    // ── Email log ───────────────────────────────────────────────────
    fn email_log_insert(&self, entry: &NewEmailLog) -> Result<i64, String>;
    fn email_log_list(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EmailLogEntry>, String>;
    fn email_log_recipient_total(&self, from: DateTime<Utc>, to: DateTime<Utc>)
        -> Result<i64, String>;
    fn email_log_totals_by_status(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(SendStatus, i64)>, String>;
    fn email_log_totals_for_windows(
        &self,
        windows: &[(DateTime<Utc>, DateTime<Utc>)],
    ) -> Result<Vec<i64>, String>;
}

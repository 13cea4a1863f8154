use chrono::{DateTime, Utc};

use crate::db::DbPool;
use crate::models::email_log::{EmailLogEntry, NewEmailLog, SendStatus};

use super::Store;

/// SQLite-backed implementation of the Store trait.
/// Wraps the r2d2 connection pool and delegates to model methods.
pub struct SqliteStore {
    pub pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn open(path: &str) -> Result<Self, String> {
        let pool = crate::db::init_pool(path).map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }
}

impl Store for SqliteStore {
    fn run_migrations(&self) -> Result<(), String> {
        crate::db::run_migrations(&self.pool).map_err(|e| e.to_string())
    }

    fn email_log_insert(&self, entry: &NewEmailLog) -> Result<i64, String> {
        EmailLogEntry::create(&self.pool, entry)
    }

    fn email_log_list(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<EmailLogEntry>, String> {
        EmailLogEntry::list_between(&self.pool, from, to, limit)
    }

    fn email_log_recipient_total(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, String> {
        EmailLogEntry::recipient_total(&self.pool, from, to)
    }

    fn email_log_totals_by_status(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<(SendStatus, i64)>, String> {
        EmailLogEntry::recipient_totals_by_status(&self.pool, from, to)
    }

    fn email_log_totals_for_windows(
        &self,
        windows: &[(DateTime<Utc>, DateTime<Utc>)],
    ) -> Result<Vec<i64>, String> {
        EmailLogEntry::recipient_totals_for_windows(&self.pool, windows)
    }
}

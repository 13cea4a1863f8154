use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_pool(path: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let manager = SqliteConnectionManager::file(path)
        .with_init(|conn| conn.execute_batch("PRAGMA busy_timeout=5000;"));
    let pool = Pool::builder().max_size(10).build(manager)?;

    // WAL keeps dashboard reads from blocking the attempt writer
    let conn = pool.get()?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;

    Ok(pool)
}

pub fn run_migrations(pool: &DbPool) -> Result<(), Box<dyn std::error::Error>> {
    let conn = pool.get()?;

    conn.execute_batch(
        "
        -- One row per send attempt. Append-only.
        CREATE TABLE IF NOT EXISTS email_logs (
            id INTEGER PRIMARY KEY,
            sent_to TEXT NOT NULL,
            subject TEXT NOT NULL,
            body_preview TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL CHECK (status IN ('Success', 'Failed')),
            recipient_count INTEGER NOT NULL DEFAULT 1,
            sent_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_email_logs_sent_at ON email_logs(sent_at);
        ",
    )?;

    Ok(())
}

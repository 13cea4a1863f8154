use log::{error, info, warn};
use std::fs;
use std::path::Path;
use std::process;

use crate::config::Config;

/// Run all boot checks. Call this before Rocket launches.
/// Creates the database directory, checks it is writable, and warns
/// about a missing dashboard or Rocket.toml.
pub fn run(config: &Config) {
    info!("mailrelay boot check starting...");

    let mut warnings = 0u32;
    let mut errors = 0u32;

    // ── 1. Database directory ───────────────────────────
    let db_dir = Path::new(&config.database_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !db_dir.exists() {
        match fs::create_dir_all(db_dir) {
            Ok(_) => info!("  Created directory: {}", db_dir.display()),
            Err(e) => {
                error!("  FAILED to create directory {}: {}", db_dir.display(), e);
                errors += 1;
            }
        }
    }

    // ── 2. Database directory writable ──────────────────
    if db_dir.exists() {
        let test_file = db_dir.join(".write_test");
        match fs::write(&test_file, "test") {
            Ok(_) => {
                let _ = fs::remove_file(&test_file);
            }
            Err(e) => {
                error!("  Database directory not writable: {}", e);
                errors += 1;
            }
        }
    }

    // ── 3. Relay settings ───────────────────────────────
    if config.mail_hub.is_empty() {
        warn!("  MAILHUB is not set (every send will fail and be logged as Failed)");
        warnings += 1;
    }
    if config.sender().is_none() {
        warn!("  Neither FROM_EMAIL nor AUTHUSER is set (messages have no sender)");
        warnings += 1;
    }

    // ── 4. Dashboard ────────────────────────────────────
    let static_dir = Path::new(&config.static_dir);
    if !static_dir.is_dir() {
        warn!(
            "  Static directory {} not found (dashboard will not be served)",
            static_dir.display()
        );
        warnings += 1;
    } else if !static_dir.join("index.html").exists() {
        warn!("  Missing {}/index.html", static_dir.display());
        warnings += 1;
    }

    // ── 5. Rocket.toml exists ───────────────────────────
    if !Path::new("Rocket.toml").exists() {
        warn!("  Rocket.toml not found, using default limits");
        warnings += 1;
    }

    // ── Summary ─────────────────────────────────────────
    if errors > 0 {
        error!(
            "Boot check FAILED: {} error(s), {} warning(s). Aborting.",
            errors, warnings
        );
        process::exit(1);
    }

    if warnings > 0 {
        warn!(
            "Boot check passed with {} warning(s). Some features may not work correctly.",
            warnings
        );
    } else {
        info!("Boot check passed. All systems go.");
    }
}

#[macro_use]
extern crate rocket;

use std::path::Path;
use std::sync::Arc;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::fs::FileServer;
use rocket::http::Header;
use rocket::{Build, Rocket};

mod boot;
mod clock;
mod config;
mod db;
mod email;
mod models;
mod quota;
mod relay;
mod routes;
mod stats;
mod store;


use clock::BusinessClock;
use config::Config;
use email::{Mailer, SmtpMailer};
use quota::QuotaGate;
use store::sqlite::SqliteStore;
use store::Store;

/// Log and quota figures change with every send; keep them out of caches.
pub struct NoCacheApi;

#[rocket::async_trait]
impl Fairing for NoCacheApi {
    fn info(&self) -> Info {
        Info { name: "No-Cache API Responses", kind: Kind::Response }
    }

    async fn on_response<'r>(&self, req: &'r rocket::Request<'_>, res: &mut rocket::Response<'r>) {
        if req.uri().path().starts_with("/api") {
            res.set_header(Header::new("Cache-Control", "no-store, no-cache, must-revalidate, max-age=0"));
        }
    }
}

/// Assemble the server around an already-opened store and dispatcher.
pub fn build(config: Config, store: Arc<dyn Store>, mailer: Arc<dyn Mailer>) -> Rocket<Build> {
    let mut figment = rocket::Config::figment();
    if let Some(port) = config.port {
        figment = figment.merge(("port", port));
    }

    let gate = Arc::new(QuotaGate::new(
        config.daily_limit,
        BusinessClock::new(config.timezone),
    ));

    let mut rocket = rocket::custom(figment)
        .manage(store)
        .manage(mailer)
        .manage(gate)
        .attach(NoCacheApi)
        .mount("/api", routes::api::routes())
        .register("/", routes::catchers());

    if Path::new(&config.static_dir).is_dir() {
        rocket = rocket.mount("/", FileServer::from(&config.static_dir));
    } else {
        log::warn!("Static directory {} missing, dashboard not mounted", config.static_dir);
    }

    rocket
}

#[launch]
fn rocket() -> _ {
    env_logger::init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Boot check: create the database directory, validate the environment
    boot::run(&config);

    let store = SqliteStore::open(&config.database_path).expect("Failed to open the email log database");
    store.run_migrations().expect("Failed to run database migrations");

    log::info!(
        "Relaying through {} with a daily limit of {} recipients ({} business day)",
        if config.mail_hub.is_empty() { "<unset>" } else { config.mail_hub.as_str() },
        config.daily_limit,
        config.timezone
    );

    let mailer = SmtpMailer::new(config.clone());
    build(config, Arc::new(store), Arc::new(mailer))
}

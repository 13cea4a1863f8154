use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use lettre::message::Mailbox;
use log::{error, warn};
use rocket::form::{Errors, Form};
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::serde::json::{self, Json};
use rocket::tokio::io::AsyncReadExt;
use rocket::State;
use serde::Deserialize;

use super::{error, success, ApiResult};
use crate::email::{
    parse_recipients, Attachment, AttachmentSource, DeliveryOutcome, Mailer, SendRequest,
};
use crate::quota::{QuotaError, QuotaGate};
use crate::relay;
use crate::stats::{self, DEFAULT_DAILY_SENDS_DAYS};
use crate::store::Store;

pub const DEFAULT_LOG_LIMIT: i64 = 50;
pub const DEFAULT_TODAY_LOG_LIMIT: i64 = 5;
pub const MAX_LOG_LIMIT: i64 = 1000;

const REQUIRED_FIELDS: &str = "Fields 'to', 'subject', and 'body' are required.";

// ── Send ────────────────────────────────────────────────

/// A recipient field: either one comma-separated string or a list of them.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AddressList {
    One(String),
    Many(Vec<String>),
}

impl AddressList {
    fn into_recipients(self) -> Vec<String> {
        match self {
            AddressList::One(raw) => parse_recipients(&raw),
            AddressList::Many(list) => list.iter().flat_map(|raw| parse_recipients(raw)).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SendPayload {
    pub to: Option<AddressList>,
    pub cc: Option<AddressList>,
    pub bcc: Option<AddressList>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

impl SendPayload {
    /// Check required fields and address syntax, producing a request with no attachments yet.
    pub fn validate(self) -> Result<SendRequest, String> {
        let recipients =
            |list: Option<AddressList>| list.map(AddressList::into_recipients).unwrap_or_default();
        let to = recipients(self.to);
        let cc = recipients(self.cc);
        let bcc = recipients(self.bcc);
        let subject = self.subject.trim().to_string();

        if to.is_empty() || subject.is_empty() || self.body.trim().is_empty() {
            return Err(REQUIRED_FIELDS.to_string());
        }

        if let Some(bad) = to
            .iter()
            .chain(&cc)
            .chain(&bcc)
            .find(|addr| addr.parse::<Mailbox>().is_err())
        {
            return Err(format!("Invalid email address: {}", bad));
        }

        Ok(SendRequest {
            to,
            cc,
            bcc,
            subject,
            body: self.body,
            attachments: Vec::new(),
        })
    }
}

#[derive(FromForm)]
pub struct SendForm<'r> {
    pub data: String,
    #[field(default = Vec::new())]
    pub attachments: Vec<TempFile<'r>>,
}

/// Display name for an uploaded file: the client's name with any path stripped.
fn upload_name(file: &TempFile<'_>) -> Option<String> {
    let raw = file.raw_name()?.dangerous_unsafe_unsanitized_raw().as_str();
    raw.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn attachment_from(file: &TempFile<'_>) -> std::io::Result<Option<Attachment>> {
    let filename = upload_name(file);
    if filename.is_none() && file.len() == 0 {
        // empty file input
        return Ok(None);
    }

    let source = match file.path() {
        Some(path) => AttachmentSource::File(path.to_path_buf()),
        None => {
            let mut reader = Box::pin(file.open().await?);
            let mut content = Vec::new();
            reader.read_to_end(&mut content).await?;
            AttachmentSource::Bytes(content)
        }
    };

    Ok(Some(Attachment {
        filename: filename.unwrap_or_else(|| "attachment".to_string()),
        content_type: file.content_type().map(|ct| ct.to_string()),
        source,
    }))
}

/// Quota gate, dispatch and logging, off the async workers.
async fn dispatch(
    store: Arc<dyn Store>,
    mailer: Arc<dyn Mailer>,
    gate: Arc<QuotaGate>,
    request: SendRequest,
) -> ApiResult {
    let requested = request.recipient_count();
    let attachments = request.attachments.len();

    let joined = rocket::tokio::task::spawn_blocking(move || {
        let reservation = gate.admit(&*store, Utc::now(), requested)?;
        let outcome = relay::send_and_log(&*store, &*mailer, &request);
        drop(reservation);
        Ok::<_, QuotaError>(outcome)
    })
    .await;

    match joined {
        Ok(Ok(DeliveryOutcome::Sent)) => success(
            "Email sent successfully",
            serde_json::json!({ "recipient_count": requested, "attachments": attachments }),
        ),
        Ok(Ok(DeliveryOutcome::Failed(_))) => {
            error(Status::InternalServerError, "Failed to send email")
        }
        Ok(Err(QuotaError::Exceeded { current, requested, limit })) => {
            warn!(
                "Daily mail limit reached: {} counted, {} requested, limit {}",
                current, requested, limit
            );
            error(Status::Forbidden, "Daily mail limit exceeded.")
        }
        Ok(Err(QuotaError::Unavailable(e))) => {
            error!("Error getting daily mail count: {}", e);
            error(
                Status::InternalServerError,
                "Internal server error checking mail limit",
            )
        }
        Err(e) => {
            error!("Send task failed: {}", e);
            error(Status::InternalServerError, "Internal server error")
        }
    }
}

#[post("/send", format = "json", data = "<payload>")]
pub async fn send_json(
    store: &State<Arc<dyn Store>>,
    mailer: &State<Arc<dyn Mailer>>,
    gate: &State<Arc<QuotaGate>>,
    payload: Result<Json<SendPayload>, json::Error<'_>>,
) -> ApiResult {
    let payload = match payload {
        Ok(p) => p.into_inner(),
        Err(e) => return error(Status::BadRequest, &format!("Invalid JSON body: {}", e)),
    };
    let request = match payload.validate() {
        Ok(r) => r,
        Err(msg) => return error(Status::BadRequest, &msg),
    };

    dispatch(
        store.inner().clone(),
        mailer.inner().clone(),
        gate.inner().clone(),
        request,
    )
    .await
}

#[post("/send", format = "multipart/form-data", data = "<form>", rank = 2)]
pub async fn send_multipart(
    store: &State<Arc<dyn Store>>,
    mailer: &State<Arc<dyn Mailer>>,
    gate: &State<Arc<QuotaGate>>,
    form: Result<Form<SendForm<'_>>, Errors<'_>>,
) -> ApiResult {
    let form = match form {
        Ok(f) => f,
        Err(e) => {
            return error(
                Status::BadRequest,
                &format!("Unable to parse form data, file might be too large: {}", e),
            )
        }
    };

    let payload: SendPayload = match serde_json::from_str(&form.data) {
        Ok(p) => p,
        Err(e) => return error(Status::BadRequest, &format!("Invalid JSON in 'data' field: {}", e)),
    };
    let mut request = match payload.validate() {
        Ok(r) => r,
        Err(msg) => return error(Status::BadRequest, &msg),
    };

    for file in &form.attachments {
        match attachment_from(file).await {
            Ok(Some(attachment)) => request.attachments.push(attachment),
            Ok(None) => {}
            Err(e) => {
                error!("Could not buffer uploaded attachment: {}", e);
                return error(Status::BadRequest, "Could not read uploaded attachment.");
            }
        }
    }

    // `form` owns the uploaded temp files and outlives the dispatch
    dispatch(
        store.inner().clone(),
        mailer.inner().clone(),
        gate.inner().clone(),
        request,
    )
    .await
}

#[post("/send", rank = 3)]
pub fn send_unsupported() -> ApiResult {
    error(
        Status::BadRequest,
        "Content-Type must be application/json or multipart/form-data.",
    )
}

fn method_not_allowed() -> ApiResult {
    error(Status::MethodNotAllowed, "Method not allowed. Use POST.")
}

#[get("/send")]
pub fn send_get() -> ApiResult {
    method_not_allowed()
}

#[put("/send")]
pub fn send_put() -> ApiResult {
    method_not_allowed()
}

#[patch("/send")]
pub fn send_patch() -> ApiResult {
    method_not_allowed()
}

#[delete("/send")]
pub fn send_delete() -> ApiResult {
    method_not_allowed()
}

#[options("/send")]
pub fn send_options() -> ApiResult {
    method_not_allowed()
}

// ── Read endpoints ──────────────────────────────────────

fn positive<T: std::str::FromStr + PartialOrd + Default>(raw: Option<&str>) -> Option<T> {
    raw.and_then(|s| s.trim().parse::<T>().ok())
        .filter(|n| *n > T::default())
}

/// Strict `YYYY-MM-DD`: zero-padded, unsigned, and nothing chrono would quietly accept.
fn parse_day(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 10 {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .filter(|day| day.format("%Y-%m-%d").to_string() == raw)
}

#[get("/logs?<date>&<limit>")]
pub fn logs(
    store: &State<Arc<dyn Store>>,
    gate: &State<Arc<QuotaGate>>,
    date: Option<&str>,
    limit: Option<&str>,
) -> ApiResult {
    let clock = gate.clock();
    let date = date.map(str::trim).filter(|d| !d.is_empty());

    let (day, default_limit) = match date {
        Some(raw) => match parse_day(raw) {
            Some(day) => (day, DEFAULT_LOG_LIMIT),
            None => return error(Status::BadRequest, "Invalid date format. Use YYYY-MM-DD."),
        },
        None => (clock.today(), DEFAULT_TODAY_LOG_LIMIT),
    };
    let limit = positive::<i64>(limit)
        .unwrap_or(default_limit)
        .min(MAX_LOG_LIMIT);

    let (start, end) = clock.day_bounds(day);
    match store.email_log_list(start, end, limit) {
        Ok(entries) => success("Email logs retrieved successfully", entries),
        Err(e) => {
            error!("Error querying email logs: {}", e);
            error(Status::InternalServerError, "Internal server error fetching logs")
        }
    }
}

#[get("/limit")]
pub fn limit_status(store: &State<Arc<dyn Store>>, gate: &State<Arc<QuotaGate>>) -> ApiResult {
    match gate.status(&**store.inner(), Utc::now()) {
        Ok(status) => success("Daily mail limit status retrieved", status),
        Err(e) => {
            error!("Error getting daily mail count: {}", e);
            error(
                Status::InternalServerError,
                "Internal server error getting daily limit",
            )
        }
    }
}

#[get("/stats")]
pub fn email_stats(store: &State<Arc<dyn Store>>, gate: &State<Arc<QuotaGate>>) -> ApiResult {
    match stats::status_distribution(&**store.inner(), gate.clock(), Utc::now()) {
        Ok(counts) => success("Email status distribution retrieved", counts),
        Err(e) => {
            error!("Error fetching email stats: {}", e);
            error(
                Status::InternalServerError,
                "Internal server error fetching email stats",
            )
        }
    }
}

#[get("/daily-sends?<days>")]
pub fn daily_sends(
    store: &State<Arc<dyn Store>>,
    gate: &State<Arc<QuotaGate>>,
    days: Option<&str>,
) -> ApiResult {
    let days = positive::<u32>(days).unwrap_or(DEFAULT_DAILY_SENDS_DAYS);
    match stats::daily_sends(&**store.inner(), gate.clock(), Utc::now(), days) {
        Ok(series) => success("Daily sends over period retrieved", series),
        Err(e) => {
            error!("Error fetching daily sends: {}", e);
            error(
                Status::InternalServerError,
                "Internal server error fetching daily sends",
            )
        }
    }
}

pub fn routes() -> Vec<rocket::Route> {
    routes![
        send_json,
        send_multipart,
        send_unsupported,
        send_get,
        send_put,
        send_patch,
        send_delete,
        send_options,
        logs,
        limit_status,
        email_stats,
        daily_sends
    ]
}

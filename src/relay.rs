use std::panic::{self, AssertUnwindSafe};

use chrono::Utc;
use log::error;

use crate::email::{DeliveryOutcome, MailError, Mailer, SendRequest};
use crate::models::email_log::{body_preview, NewEmailLog, SendStatus};
use crate::store::Store;

/// Pending attempt row. Starts out Failed and is written when dropped, so every way out of a
/// send, panics included, leaves exactly one row behind.
struct AttemptLog<'a> {
    store: &'a dyn Store,
    entry: NewEmailLog,
}

impl<'a> AttemptLog<'a> {
    fn begin(store: &'a dyn Store, request: &SendRequest) -> Self {
        Self {
            store,
            entry: NewEmailLog {
                sent_to: request.to.join(", "),
                subject: request.subject.clone(),
                body_preview: body_preview(&request.body),
                status: SendStatus::Failed,
                recipient_count: request.recipient_count(),
                sent_at: Utc::now(),
            },
        }
    }

    fn finish(&mut self, outcome: &DeliveryOutcome) {
        self.entry.status = outcome.status();
        self.entry.sent_at = Utc::now();
    }
}

impl Drop for AttemptLog<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.store.email_log_insert(&self.entry) {
            error!(
                "CRITICAL: failed to log email attempt to {} ({}): {}",
                self.entry.sent_to, self.entry.status, e
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Dispatch `request` and record the attempt. The returned outcome is the dispatcher's; a failure
/// to write the log row is reported in the server log only.
pub fn send_and_log(store: &dyn Store, mailer: &dyn Mailer, request: &SendRequest) -> DeliveryOutcome {
    let mut attempt = AttemptLog::begin(store, request);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| mailer.send(request)))
        .unwrap_or_else(|payload| {
            DeliveryOutcome::Failed(MailError::Panicked(panic_message(payload.as_ref())))
        });

    match outcome.error() {
        Some(e) if e.is_configuration() => {
            error!("Relay misconfigured, email to {} not sent: {}", attempt.entry.sent_to, e)
        }
        Some(e) => error!("Error sending email to {}: {}", attempt.entry.sent_to, e),
        None => {}
    }

    attempt.finish(&outcome);
    outcome
}

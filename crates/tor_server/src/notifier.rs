//! Notifier implementations: an HTTP mail relay and a log-only fallback.
//!
//! Both are fire-and-forget. Delivery failures are logged and dropped; they
//! never reach the transition that triggered them.

use reqwest::Client;
use serde::Serialize;
use tokio::runtime::Handle;
use tor_core::ports::{Notification, Notifier};
use tracing::{info, warn};

/// Subject and plain-text body for a notification.
pub fn render(n: &Notification) -> (String, String) {
    match n {
        Notification::AwaitingApproval {
            number,
            title,
            step_label,
            submitted_by,
            link,
            ..
        } => (
            format!("[ToR] Awaiting your approval: {number}"),
            format!(
                "{submitted_by} moved \"{title}\" ({number}) to {step_label}.\n\
                 It is waiting for your decision.\n\n{link}\n"
            ),
        ),
        Notification::Approved {
            number,
            title,
            step_label,
            is_final,
            approved_by,
            link,
            ..
        } => {
            if *is_final {
                (
                    format!("[ToR] Final approval: {number}"),
                    format!(
                        "\"{title}\" ({number}) received final approval from \
                         {approved_by} at {step_label}.\n\n{link}\n"
                    ),
                )
            } else {
                (
                    format!("[ToR] Approved at {step_label}: {number}"),
                    format!(
                        "{approved_by} approved \"{title}\" ({number}) at {step_label}.\n\
                         It has moved on to the next step.\n\n{link}\n"
                    ),
                )
            }
        }
        Notification::RevisionRequested {
            number,
            title,
            note,
            requested_by,
            link,
            ..
        } => (
            format!("[ToR] Revision requested: {number}"),
            format!(
                "{requested_by} sent \"{title}\" ({number}) back for revision.\n\n\
                 Note:\n{note}\n\n{link}\n"
            ),
        ),
        Notification::Rejected {
            number,
            title,
            note,
            rejected_by,
            link,
            ..
        } => (
            format!("[ToR] Rejected: {number}"),
            format!(
                "{rejected_by} rejected \"{title}\" ({number}).\n\n\
                 Note:\n{note}\n\n{link}\n"
            ),
        ),
    }
}

// ── LogNotifier ───────────────────────────────────────────────

/// Writes notifications to the log instead of sending them.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn dispatch(&self, notification: Notification) {
        let (subject, _) = render(&notification);
        info!(
            kind = notification.kind(),
            to = notification.recipient(),
            tor_id = notification.tor_id().0,
            subject = %subject,
            "notification (log only)"
        );
    }
}

// ── MailRelayNotifier ─────────────────────────────────────────

#[derive(Debug, Serialize)]
struct RelayMessage<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    text: String,
}

/// POSTs each message as JSON to a mail relay endpoint on a background task.
pub struct MailRelayNotifier {
    client: Client,
    relay_url: String,
    from: String,
}

impl MailRelayNotifier {
    pub fn new(client: Client, relay_url: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            client,
            relay_url: relay_url.into(),
            from: from.into(),
        }
    }
}

impl Notifier for MailRelayNotifier {
    fn dispatch(&self, notification: Notification) {
        let Ok(handle) = Handle::try_current() else {
            warn!(
                kind = notification.kind(),
                "no async runtime, notification dropped"
            );
            return;
        };

        let client = self.client.clone();
        let url = self.relay_url.clone();
        let from = self.from.clone();
        handle.spawn(async move {
            let (subject, text) = render(&notification);
            let message = RelayMessage {
                from: &from,
                to: notification.recipient(),
                subject,
                text,
            };
            let kind = notification.kind();
            let tor_id = notification.tor_id().0;
            match client.post(&url).json(&message).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(kind, tor_id, to = message.to, "notification sent");
                }
                Ok(resp) => {
                    warn!(kind, tor_id, status = %resp.status(), "mail relay refused notification");
                }
                Err(e) => {
                    warn!(kind, tor_id, error = %e, "mail relay unreachable");
                }
            }
        });
    }
}

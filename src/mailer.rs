//! Settlement notifications via a webhook-style mail dispatcher.
//!
//! When `MAILER_URL` is unset the mailer is a no-op. Delivery is
//! best-effort: a failed send is logged and swallowed, never surfaced to
//! the settlement path that triggered it.

use crate::config::Config;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct Mailer {
    client: reqwest::Client,
    url: Option<String>,
    from: String,
}

impl Mailer {
    pub fn from_config(config: &Config) -> Self {
        Mailer {
            client: reqwest::Client::new(),
            url: config.mailer_url.clone(),
            from: config.mailer_from.clone(),
        }
    }

    /// POST one plain-text notification to the dispatcher.
    pub async fn send(&self, to: &str, subject: &str, body: &str) {
        let Some(url) = &self.url else {
            debug!(to, subject, "mailer not configured, skipping notification");
            return;
        };
        let payload = serde_json::json!({
            "from": self.from,
            "to": to,
            "subject": subject,
            "text": body,
        });
        match self.client.post(url).json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(to, subject, "notification dispatched");
            }
            Ok(resp) => {
                warn!(to, status = %resp.status(), "mail dispatcher rejected notification");
            }
            Err(e) => {
                warn!(to, error = %e, "failed to reach mail dispatcher");
            }
        }
    }
}

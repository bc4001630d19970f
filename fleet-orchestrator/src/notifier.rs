use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use lettre::{
    message::{header::ContentType, Mailbox, Message, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};

use fleet_common::Instance;

use crate::config::Config;
use crate::recovery::RecoveryTarget;

const LOG_RING_CAPACITY: usize = 500;
const EMAIL_SEND_RETRY: usize = 2;

struct QueuedEmail {
    subject: String,
    html_body: String,
}

/// Operator-facing output: structured log plus an in-memory ring of recent
/// lines, an optional chat webhook, and queued HTML report emails.
pub struct Notifier {
    client: reqwest::Client,
    webhook_url: Option<String>,
    mailer: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: Option<Mailbox>,
    recipients: Vec<Mailbox>,
    ring: Mutex<VecDeque<String>>,
    email_queue: Mutex<VecDeque<QueuedEmail>>,
}

impl Notifier {
    pub fn new(config: &Config) -> Self {
        let (mailer, from) = match &config.smtp {
            Some(smtp) => match build_mailer(smtp) {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!("email notifications disabled: {:#}", e);
                    (None, None)
                }
            },
            None => (None, None),
        };
        let recipients = config
            .email_recipients
            .iter()
            .filter_map(|addr| match addr.parse() {
                Ok(mailbox) => Some(mailbox),
                Err(e) => {
                    tracing::warn!("skipping invalid email recipient {}: {}", addr, e);
                    None
                }
            })
            .collect();
        Self {
            client: http_client(),
            webhook_url: config.chat_webhook_url.clone(),
            mailer,
            from,
            recipients,
            ring: Mutex::new(VecDeque::with_capacity(LOG_RING_CAPACITY)),
            email_queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Log a line to tracing, the ring buffer and the chat webhook.
    pub async fn log(&self, message: &str) {
        tracing::info!("{}", message);
        {
            let mut ring = self.ring.lock().unwrap();
            if ring.len() == LOG_RING_CAPACITY {
                ring.pop_front();
            }
            ring.push_back(format!(
                "{} {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                message
            ));
        }
        if let Some(url) = &self.webhook_url {
            let payload = serde_json::json!({ "text": message });
            if let Err(e) = self.client.post(url).json(&payload).send().await {
                tracing::warn!("chat webhook delivery failed: {}", e);
            }
        }
    }

    /// Most recent `count` ring lines, oldest first.
    pub fn recent_logs(&self, count: usize) -> Vec<String> {
        let ring = self.ring.lock().unwrap();
        let skip = ring.len().saturating_sub(count);
        ring.iter().skip(skip).cloned().collect()
    }

    /// Queue an HTML report for delivery; actual sending happens off the
    /// engine tick in `flush_email_queue`.
    pub fn queue_report(&self, subject: &str, html_body: &str) {
        if self.mailer.is_none() || self.recipients.is_empty() {
            return;
        }
        self.email_queue.lock().unwrap().push_back(QueuedEmail {
            subject: subject.to_string(),
            html_body: html_body.to_string(),
        });
    }

    pub async fn flush_email_queue(&self) {
        loop {
            let queued = match self.email_queue.lock().unwrap().pop_front() {
                Some(q) => q,
                None => return,
            };
            if let Err(e) = self.send_report(&queued).await {
                tracing::warn!("report email '{}' not delivered: {:#}", queued.subject, e);
            }
        }
    }

    async fn send_report(&self, queued: &QueuedEmail) -> Result<()> {
        let (mailer, from) = match (&self.mailer, &self.from) {
            (Some(m), Some(f)) => (m, f),
            _ => return Ok(()),
        };
        for recipient in &self.recipients {
            let email = Message::builder()
                .from(from.clone())
                .to(recipient.clone())
                .subject(&queued.subject)
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_HTML)
                        .body(queued.html_body.clone()),
                )
                .context("building report email")?;
            let mut last_error = None;
            for _ in 0..=EMAIL_SEND_RETRY {
                match mailer.send(email.clone()).await {
                    Ok(_) => {
                        last_error = None;
                        break;
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            if let Some(e) = last_error {
                return Err(e).context(format!("sending to {}", recipient));
            }
        }
        Ok(())
    }

    // Lifecycle announcements, phrased for the chat channel.

    pub async fn announce_created(&self, instance: &Instance) {
        self.log(&format!(
            "{}:{}@{} is created",
            instance.kind_label(),
            instance.name,
            instance.zone
        ))
        .await;
    }

    pub async fn announce_deleted(&self, instance: &Instance) {
        self.log(&format!(
            "{}:{}@{} is deleted after {} hour(s)",
            instance.kind_label(),
            instance.name,
            instance.zone,
            rounded_uptime(instance)
        ))
        .await;
    }

    pub async fn announce_started(&self, instance: &Instance, report: Option<&str>) {
        let message = format!(
            "{}:{}@{} is online",
            instance.kind_label(),
            instance.name,
            instance.zone
        );
        self.log(&message).await;
        if let Some(html) = report {
            self.queue_report(&message, html);
        }
    }

    /// Announce a termination and the recovery strategy chosen for it.
    pub async fn announce_termination(
        &self,
        instance: &Instance,
        target: &RecoveryTarget,
        report: &str,
    ) {
        let who = format!(
            "{}:{}@{} ",
            instance.kind_label(),
            instance.name,
            instance.zone
        );
        let uptime = rounded_uptime(instance);
        let message = format!("{}is terminated after {} hour(s)", who, uptime);
        self.log(&message).await;
        self.queue_report(&message, report);

        let strategy = if !instance.preemptible {
            format!("Converting {}to preemptible instance after {} hour(s)", who, uptime)
        } else if instance.flag != fleet_common::InstanceFlag::Recycled {
            format!("Recycling {}after {} hour(s)", who, uptime)
        } else if target.preemptible && target.zone != instance.zone {
            format!(
                "Relocating {}to a different zone after {} hour(s)",
                who, uptime
            )
        } else {
            self.log("Exceeded threshold of total zone(s) with high demand in preemptible instance")
                .await;
            format!(
                "Converting {}to non-preemptible instance after {} hour(s)",
                who, uptime
            )
        };
        self.log(&strategy).await;
        self.queue_report(&strategy, report);
    }
}

// The default reqwest client has no overall timeout; a stalled webhook
// endpoint would hang the engine tick that awaits the delivery.
fn http_client() -> reqwest::Client {
    match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(Duration::from_secs(20))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        }
    }
}

fn rounded_uptime(instance: &Instance) -> f64 {
    (instance.uptime_hour * 1e5).round() / 1e5
}

fn build_mailer(
    smtp: &crate::config::SmtpSettings,
) -> Result<(Option<AsyncSmtpTransport<Tokio1Executor>>, Option<Mailbox>)> {
    let from: Mailbox = match &smtp.from_name {
        Some(name) => format!("{} <{}>", name, smtp.from_email)
            .parse()
            .context("invalid sender address")?,
        None => smtp.from_email.parse().context("invalid sender address")?,
    };
    let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.server)
        .context("building SMTP relay")?
        .port(smtp.port)
        .timeout(Some(Duration::from_secs(30)))
        .credentials(Credentials::new(
            smtp.username.clone(),
            smtp.password.clone(),
        ))
        .build();
    Ok((Some(mailer), Some(from)))
}

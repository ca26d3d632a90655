//! Remote storage quota check and email alert.

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{error, info, warn};

use crate::remote::StorageUsage;
use crate::Result;

/// Hard quota of the remote repository, in kilobytes (1 GiB).
pub const HARD_QUOTA_KB: u64 = 1024 * 1024;
/// Alert once usage passes this fraction of the hard quota.
pub const ALERT_FRACTION: f64 = 0.9;

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, subject: &str, body: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub username: String,
    pub password: String,
    pub recipients: Vec<String>,
}

/// Plain-text mail over an authenticated TLS relay.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Vec<Mailbox>,
}

impl SmtpMailer {
    pub fn new(settings: SmtpSettings) -> Result<Self> {
        let from: Mailbox = settings.username.parse()?;
        let to = settings
            .recipients
            .iter()
            .map(|r| r.parse())
            .collect::<std::result::Result<Vec<Mailbox>, _>>()?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
            .credentials(Credentials::new(settings.username, settings.password))
            .build();
        Ok(Self {
            transport,
            from,
            to,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for to in &self.to {
            builder = builder.to(to.clone());
        }
        let message = builder.body(body.to_string())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuotaStatus {
    pub used_kb: u64,
    pub quota_kb: u64,
}

impl QuotaStatus {
    pub fn fraction(&self) -> f64 {
        if self.quota_kb == 0 {
            return 1.0;
        }
        self.used_kb as f64 / self.quota_kb as f64
    }

    pub fn exceeds(&self, threshold: f64) -> bool {
        self.fraction() > threshold
    }
}

pub fn alert_message(repo: &str, stage: &str, status: &QuotaStatus) -> (String, String) {
    let subject = format!("[daypics] {repo} storage at {:.1}%", status.fraction() * 100.0);
    let body = format!(
        "Repository {repo} is using {:.2} MB of its {:.2} MB quota ({:.1}%), checked {stage}.\n\
         Move or prune old images before uploads start failing.\n",
        status.used_kb as f64 / 1024.0,
        status.quota_kb as f64 / 1024.0,
        status.fraction() * 100.0,
    );
    (subject, body)
}

/// Checks storage usage and mails an alert over the threshold.
pub struct QuotaMonitor<U, M> {
    usage: U,
    mailer: M,
    repo: String,
    quota_kb: u64,
    threshold: f64,
}

impl<U: StorageUsage, M: Mailer> QuotaMonitor<U, M> {
    pub fn new(usage: U, mailer: M, repo: impl Into<String>) -> Self {
        Self {
            usage,
            mailer,
            repo: repo.into(),
            quota_kb: HARD_QUOTA_KB,
            threshold: ALERT_FRACTION,
        }
    }

    /// Returns whether an alert was sent. Lookup and send failures are only logged.
    pub async fn check(&self, stage: &str) -> bool {
        let used_kb = match self.usage.repository_size_kb().await {
            Ok(kb) => kb,
            Err(e) => {
                warn!(stage, error = %e, "couldn't read repository size");
                return false;
            }
        };
        let status = QuotaStatus {
            used_kb,
            quota_kb: self.quota_kb,
        };
        info!(stage, used_kb, fraction = status.fraction(), "repository size");
        if !status.exceeds(self.threshold) {
            return false;
        }

        let (subject, body) = alert_message(&self.repo, stage, &status);
        match self.mailer.send(&subject, &body).await {
            Ok(()) => {
                info!(stage, "quota alert sent");
                true
            }
            Err(e) => {
                error!(stage, error = %e, "couldn't send quota alert");
                false
            }
        }
    }
}

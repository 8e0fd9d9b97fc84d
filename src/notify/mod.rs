//! Mail notification
//!
//! A single background worker drains a queue of outbound messages and
//! delivers each over a fresh SMTP connection; the relay drops idle
//! connections, so none is reused across messages. In mock mode every
//! message is redirected to the configured admin addresses instead of
//! its real recipients.
//!
//! Shutdown uses a sentinel: [`Mailer::terminate`] enqueues it behind
//! any pending messages and waits for the worker, so the queue drains
//! before the daemon exits.

mod events;

pub use events::event_mail;

use crate::config::{ConfigError, MailerConfig};
use lettre::message::Mailbox;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One outbound mail. The From header comes from the mailer config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

enum QueueItem {
    Mail(MailMessage),
    /// Sentinel: no more mail, the worker may exit.
    Shutdown,
}

/// Cloneable enqueue-only handle, safe to hand to service callbacks.
#[derive(Clone)]
pub struct MailerHandle {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl MailerHandle {
    pub fn enqueue(&self, mail: MailMessage) {
        if self.tx.send(QueueItem::Mail(mail)).is_err() {
            warn!("mailer worker is gone, dropping message");
        }
    }
}

/// Owns the mailer worker task.
pub struct Mailer {
    handle: MailerHandle,
    worker: Option<JoinHandle<()>>,
}

impl Mailer {
    /// Validate the sender address and spawn the worker.
    pub fn start(config: MailerConfig) -> Result<Self, ConfigError> {
        let from: Mailbox = format!("{} <{}>", config.from_name, config.from_addr)
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("mailer from address: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(config, from, rx));
        Ok(Self {
            handle: MailerHandle { tx },
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> MailerHandle {
        self.handle.clone()
    }

    pub fn enqueue(&self, mail: MailMessage) {
        self.handle.enqueue(mail);
    }

    /// Queue the shutdown sentinel and wait for the queue to drain.
    pub async fn terminate(mut self) {
        let _ = self.handle.tx.send(QueueItem::Shutdown);
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!(error = %e, "mailer worker did not shut down cleanly");
            }
        }
        info!("mailer terminated");
    }
}

async fn run_worker(config: MailerConfig, from: Mailbox, mut rx: mpsc::UnboundedReceiver<QueueItem>) {
    info!(host = %config.smtp_host, port = config.smtp_port, "mailer started");
    while let Some(item) = rx.recv().await {
        match item {
            QueueItem::Shutdown => break,
            QueueItem::Mail(mail) => send_mail(&config, &from, &mail).await,
        }
    }
}

/// Effective recipients for one message: the admin list in mock mode,
/// the message's own recipients otherwise.
fn resolve_recipients(config: &MailerConfig, mail: &MailMessage) -> Vec<String> {
    if config.mock {
        config.admin_addrs.clone()
    } else {
        mail.to.clone()
    }
}

async fn send_mail(config: &MailerConfig, from: &Mailbox, mail: &MailMessage) {
    if !config.send_mails {
        debug!(subject = %mail.subject, "mail sending disabled, message dropped");
        return;
    }

    let recipients = resolve_recipients(config, mail);
    if recipients.is_empty() {
        warn!(subject = %mail.subject, "no recipients for message, dropped");
        return;
    }

    let mut builder = Message::builder()
        .from(from.clone())
        .subject(mail.subject.clone());
    let mut addressed = false;
    for addr in &recipients {
        match addr.parse::<Mailbox>() {
            Ok(mailbox) => {
                builder = builder.to(mailbox);
                addressed = true;
            }
            Err(e) => warn!(addr = %addr, error = %e, "unusable recipient address, skipped"),
        }
    }
    if !addressed {
        warn!(subject = %mail.subject, "every recipient address was unusable, dropped");
        return;
    }

    let message = match builder.body(mail.body.clone()) {
        Ok(message) => message,
        Err(e) => {
            warn!(subject = %mail.subject, error = %e, "could not assemble message");
            return;
        }
    };

    // Fresh connection per message.
    let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(config.smtp_host.as_str())
        .port(config.smtp_port)
        .timeout(config.connection_timeout())
        .build();

    match transport.send(message).await {
        Ok(_) => info!(to = ?recipients, subject = %mail.subject, "mail sent"),
        Err(e) => warn!(to = ?recipients, error = %e, "error while sending mail"),
    }
}

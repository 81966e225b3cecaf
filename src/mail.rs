//! Outbound mail.
//!
//! Messages are rendered from a text template and an HTML template, then
//! handed to a [`Mailer`] on a detached thread. The request that triggered
//! the mail never waits for, or learns about, delivery.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use askama::Template;
use lettre::message::header::ContentType;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::{MailConfig, SmtpConfig, SmtpSecurity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// HTML alternative
    pub html: Option<String>,
}

impl Email {
    pub fn render<T: MailTemplate>(
        settings: &MailConfig,
        to: &str,
        subject: &str,
        template: &T,
    ) -> Result<Self, askama::Error> {
        Ok(Self {
            from: settings.sender.clone(),
            to: to.to_string(),
            subject: format!("{} {}", settings.subject_prefix, subject),
            body: template.text()?,
            html: Some(template.html()?),
        })
    }
}

/// A message body in both formats.
pub trait MailTemplate {
    fn text(&self) -> askama::Result<String>;
    fn html(&self) -> askama::Result<String>;
}

/// Mail transport.
pub trait Mailer: Send + Sync {
    fn deliver(&self, email: &Email) -> anyhow::Result<()>;
}

/// Fire-and-forget delivery on its own thread. Failures are logged.
pub fn send_email(mailer: Arc<dyn Mailer>, email: Email) -> JoinHandle<()> {
    let span = tracing::Span::current();
    std::thread::spawn(move || {
        span.in_scope(|| {
            if let Err(e) = mailer.deliver(&email) {
                tracing::warn!(to = %email.to, subject = %email.subject, "Mail delivery failed: {e:#}");
            }
        })
    })
}

/// Writes each message to the log instead of a network transport.
#[derive(Debug, Default)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn deliver(&self, email: &Email) -> anyhow::Result<()> {
        tracing::info!(
            from = %email.from,
            to = %email.to,
            subject = %email.subject,
            "Outgoing mail:\n{}",
            email.body
        );
        Ok(())
    }
}

/// Delivers through an SMTP relay. One connection per message.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let builder = match config.security {
            SmtpSecurity::Starttls => SmtpTransport::starttls_relay(&config.host)?,
            SmtpSecurity::Tls => SmtpTransport::relay(&config.host)?,
            SmtpSecurity::Plain => SmtpTransport::builder_dangerous(config.host.as_str()),
        };
        let mut builder = builder.port(config.port);
        if let Some(username) = &config.username {
            let password = config.password.clone().unwrap_or_default();
            builder = builder.credentials(Credentials::new(username.clone(), password));
        }
        Ok(Self {
            transport: builder.build(),
        })
    }
}

impl Mailer for SmtpMailer {
    fn deliver(&self, email: &Email) -> anyhow::Result<()> {
        let message = to_message(email)?;
        self.transport.send(&message)?;
        tracing::info!(to = %email.to, subject = %email.subject, "Mail delivered");
        Ok(())
    }
}

fn to_message(email: &Email) -> anyhow::Result<Message> {
    let builder = Message::builder()
        .from(email.from.parse()?)
        .to(email.to.parse()?)
        .subject(email.subject.as_str());
    let message = match &email.html {
        Some(html) => builder.multipart(MultiPart::alternative_plain_html(
            email.body.clone(),
            html.clone(),
        ))?,
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?,
    };
    Ok(message)
}

/// Keeps delivered messages in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<Email>>,
    delivered: Condvar,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    /// Block until at least `count` messages arrived or `timeout` passed.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Email> {
        let deadline = Instant::now() + timeout;
        let Ok(mut sent) = self.sent.lock() else {
            return Vec::new();
        };
        while sent.len() < count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sent = match self.delivered.wait_timeout(sent, remaining) {
                Ok((guard, _)) => guard,
                Err(_) => return Vec::new(),
            };
        }
        sent.clone()
    }
}

impl Mailer for MemoryMailer {
    fn deliver(&self, email: &Email) -> anyhow::Result<()> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| anyhow::anyhow!("outbox lock poisoned"))?;
        sent.push(email.clone());
        self.delivered.notify_all();
        Ok(())
    }
}

// -- Templates --

pub struct ConfirmMail<'a> {
    pub username: &'a str,
    pub link: &'a str,
}

pub struct ResetPasswordMail<'a> {
    pub username: &'a str,
    pub link: &'a str,
}

pub struct ChangeEmailMail<'a> {
    pub username: &'a str,
    pub link: &'a str,
}

pub struct NewUserMail<'a> {
    pub username: &'a str,
    pub email: &'a str,
}

#[derive(Template)]
#[template(path = "mail/confirm.txt")]
struct ConfirmText<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "mail/confirm.html")]
struct ConfirmHtml<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "mail/reset_password.txt")]
struct ResetPasswordText<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "mail/reset_password.html")]
struct ResetPasswordHtml<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "mail/change_email.txt")]
struct ChangeEmailText<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "mail/change_email.html")]
struct ChangeEmailHtml<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "mail/new_user.txt")]
struct NewUserText<'a> {
    username: &'a str,
    email: &'a str,
}

#[derive(Template)]
#[template(path = "mail/new_user.html")]
struct NewUserHtml<'a> {
    username: &'a str,
    email: &'a str,
}

impl MailTemplate for ConfirmMail<'_> {
    fn text(&self) -> askama::Result<String> {
        ConfirmText {
            username: self.username,
            link: self.link,
        }
        .render()
    }

    fn html(&self) -> askama::Result<String> {
        ConfirmHtml {
            username: self.username,
            link: self.link,
        }
        .render()
    }
}

impl MailTemplate for ResetPasswordMail<'_> {
    fn text(&self) -> askama::Result<String> {
        ResetPasswordText {
            username: self.username,
            link: self.link,
        }
        .render()
    }

    fn html(&self) -> askama::Result<String> {
        ResetPasswordHtml {
            username: self.username,
            link: self.link,
        }
        .render()
    }
}

impl MailTemplate for ChangeEmailMail<'_> {
    fn text(&self) -> askama::Result<String> {
        ChangeEmailText {
            username: self.username,
            link: self.link,
        }
        .render()
    }

    fn html(&self) -> askama::Result<String> {
        ChangeEmailHtml {
            username: self.username,
            link: self.link,
        }
        .render()
    }
}

impl MailTemplate for NewUserMail<'_> {
    fn text(&self) -> askama::Result<String> {
        NewUserText {
            username: self.username,
            email: self.email,
        }
        .render()
    }

    fn html(&self) -> askama::Result<String> {
        NewUserHtml {
            username: self.username,
            email: self.email,
        }
        .render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn deliver(&self, _email: &Email) -> anyhow::Result<()> {
            anyhow::bail!("smtp unreachable")
        }
    }

    fn email() -> Email {
        Email::render(
            &MailConfig::default(),
            "john@example.com",
            "Confirm Your Account",
            &ConfirmMail {
                username: "john",
                link: "http://localhost:3000/auth/confirm/abc",
            },
        )
        .unwrap()
    }

    #[test]
    fn render_prefixes_subject_and_fills_body() {
        let email = email();
        assert_eq!(email.subject, "[Scribe] Confirm Your Account");
        assert_eq!(email.to, "john@example.com");
        assert!(email.body.contains("Dear john"));
        assert!(email.body.contains("http://localhost:3000/auth/confirm/abc"));
    }

    #[test]
    fn render_fills_the_html_alternative() {
        let html = email().html.unwrap();
        assert!(html.contains("<p>Dear john,</p>"), "{html}");
        assert!(html.contains("<a href="), "{html}");
    }

    #[test]
    fn smtp_message_carries_both_bodies() {
        let mut email = email();
        email.from = "Scribe <noreply@example.com>".to_string();
        let raw = String::from_utf8(to_message(&email).unwrap().formatted()).unwrap();
        assert!(raw.contains("Subject: [Scribe] Confirm Your Account"), "{raw}");
        assert!(raw.contains("multipart/alternative"), "{raw}");
        assert!(raw.contains("text/plain"), "{raw}");
        assert!(raw.contains("text/html"), "{raw}");
    }

    #[test]
    fn smtp_message_rejects_bad_recipient() {
        let mut email = email();
        email.from = "Scribe <noreply@example.com>".to_string();
        email.to = "not an address".to_string();
        assert!(to_message(&email).is_err());
    }

    #[test]
    fn smtp_mailer_builds_without_connecting() {
        let config = SmtpConfig {
            host: "localhost".to_string(),
            port: 2525,
            username: Some("scribe".to_string()),
            password: None,
            security: SmtpSecurity::Plain,
        };
        assert!(SmtpMailer::new(&config).is_ok());
    }

    #[test]
    fn send_email_delivers_on_background_thread() {
        let outbox = Arc::new(MemoryMailer::new());
        send_email(outbox.clone(), email()).join().unwrap();
        assert_eq!(outbox.sent().len(), 1);
    }

    #[test]
    fn delivery_failure_does_not_panic() {
        let handle = send_email(Arc::new(FailingMailer), email());
        assert!(handle.join().is_ok());
    }

    #[test]
    fn wait_for_times_out_when_nothing_arrives() {
        let outbox = MemoryMailer::new();
        let sent = outbox.wait_for(1, Duration::from_millis(20));
        assert!(sent.is_empty());
    }
}

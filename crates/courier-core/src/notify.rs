use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("email '{subject}' has no recipients")]
    NoRecipients { subject: String },
    #[error("invalid address {address}: {message}")]
    Address { address: String, message: String },
    #[error("notifier I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build message: {0}")]
    Build(String),
    #[cfg(feature = "runtime")]
    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub contents: Vec<u8>,
}

impl Attachment {
    pub fn from_path(path: &Path) -> Result<Self, NotifyError> {
        let contents = std::fs::read(path).map_err(|source| NotifyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let content_type = match path.extension().and_then(|ext| ext.to_str()) {
            Some("pdf") => "application/pdf",
            Some("csv") => "text/csv",
            Some("html") => "text/html",
            _ => "application/octet-stream",
        };
        Ok(Self {
            file_name,
            content_type: content_type.to_string(),
            contents,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
    pub text: String,
    pub attachment: Option<Attachment>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, email: &Email) -> Result<(), NotifyError>;
}

/// Writes each message as an HTML file instead of sending it.
pub struct FileNotifier {
    dir: PathBuf,
    sent: AtomicUsize,
}

impl FileNotifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sent: AtomicUsize::new(0),
        }
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

fn slug(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len());
    for ch in subject.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[async_trait]
impl Notifier for FileNotifier {
    async fn send(&self, email: &Email) -> Result<(), NotifyError> {
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self.dir.join(format!("{n:02}_{}.html", slug(&email.subject)));
        let header = format!("<!-- to: {} -->\n", email.to.join(", "));
        std::fs::write(&path, format!("{header}{}", email.html)).map_err(|source| {
            NotifyError::Io {
                path: path.clone(),
                source,
            }
        })?;
        if let Some(attachment) = &email.attachment {
            let target = self.dir.join(format!("{n:02}_{}", attachment.file_name));
            std::fs::write(&target, &attachment.contents).map_err(|source| NotifyError::Io {
                path: target.clone(),
                source,
            })?;
        }
        info!(path = %path.display(), subject = %email.subject, "wrote digest");
        Ok(())
    }
}

#[cfg(feature = "runtime")]
pub use smtp::SmtpNotifier;

#[cfg(feature = "runtime")]
mod smtp {
    use async_trait::async_trait;
    use lettre::message::{header::ContentType, Attachment as MailAttachment, Mailbox, MultiPart};
    use lettre::transport::smtp::authentication::Credentials;
    use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
    use tracing::info;

    use super::{Email, NotifyError, Notifier};
    use crate::config::EmailConfig;

    fn mailbox(address: &str) -> Result<Mailbox, NotifyError> {
        address.trim().parse::<Mailbox>().map_err(|err| NotifyError::Address {
            address: address.to_string(),
            message: err.to_string(),
        })
    }

    /// Port 587 upgrades with STARTTLS; any other port is implicit TLS.
    pub(crate) fn uses_starttls(port: u16) -> bool {
        port == 587
    }

    /// SMTP relay; every message blind-copies the operator.
    pub struct SmtpNotifier {
        transport: AsyncSmtpTransport<Tokio1Executor>,
        from: Mailbox,
        operator: Mailbox,
    }

    impl SmtpNotifier {
        pub fn new(config: &EmailConfig) -> Result<Self, NotifyError> {
            let relay = if uses_starttls(config.port) {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
            };
            let transport = relay
                .port(config.port)
                .credentials(Credentials::new(
                    config.username.clone(),
                    config.password.clone(),
                ))
                .build();
            Ok(Self {
                transport,
                from: mailbox(&config.from)?,
                operator: mailbox(&config.operator_copy)?,
            })
        }

        fn message(&self, email: &Email) -> Result<Message, NotifyError> {
            if email.to.is_empty() {
                return Err(NotifyError::NoRecipients {
                    subject: email.subject.clone(),
                });
            }
            let mut builder = Message::builder()
                .from(self.from.clone())
                .subject(email.subject.clone());
            for address in &email.to {
                builder = builder.to(mailbox(address)?);
            }
            builder = builder.bcc(self.operator.clone());

            let body = MultiPart::alternative_plain_html(email.text.clone(), email.html.clone());
            let built = match &email.attachment {
                Some(attachment) => {
                    let content_type = ContentType::parse(&attachment.content_type)
                        .map_err(|err| NotifyError::Build(err.to_string()))?;
                    let part = MailAttachment::new(attachment.file_name.clone())
                        .body(attachment.contents.clone(), content_type);
                    builder.multipart(MultiPart::mixed().multipart(body).singlepart(part))
                }
                None => builder.multipart(body),
            };
            built.map_err(|err| NotifyError::Build(err.to_string()))
        }
    }

    #[async_trait]
    impl Notifier for SmtpNotifier {
        async fn send(&self, email: &Email) -> Result<(), NotifyError> {
            let message = self.message(email)?;
            self.transport.send(message).await?;
            info!(subject = %email.subject, recipients = email.to.len(), "sent email");
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use lettre::Address;

        use super::*;
        use crate::config::EmailConfig;
        use crate::notify::Attachment;

        fn notifier() -> SmtpNotifier {
            SmtpNotifier::new(&EmailConfig {
                username: "digests@example.org".to_string(),
                password: "secret".to_string(),
                from: "Digests <digests@example.org>".to_string(),
                operator_copy: "archive@example.org".to_string(),
                ..EmailConfig::default()
            })
            .unwrap()
        }

        fn email(to: &[&str]) -> Email {
            Email {
                to: to.iter().map(|a| a.to_string()).collect(),
                subject: "Pending Signature Report 2026-03-02".to_string(),
                html: "<p>1 Items Pending</p>".to_string(),
                text: "1 Items Pending".to_string(),
                attachment: None,
            }
        }

        #[test]
        fn operator_is_blind_copied_on_every_message() {
            let message = notifier().message(&email(&["one@example.org"])).unwrap();
            let operator: Address = "archive@example.org".parse().unwrap();
            let reader: Address = "one@example.org".parse().unwrap();
            let envelope = message.envelope();
            assert!(envelope.to().contains(&operator));
            assert!(envelope.to().contains(&reader));

            let raw = String::from_utf8(message.formatted()).unwrap();
            assert!(raw.contains("multipart/alternative"));
            assert!(!raw.contains("multipart/mixed"));
            assert!(!raw.contains("archive@example.org"));
        }

        #[test]
        fn attachment_makes_a_mixed_message() {
            let mut with_pdf = email(&["coord@example.org"]);
            with_pdf.attachment = Some(Attachment {
                file_name: "progress_summary.pdf".to_string(),
                content_type: "application/pdf".to_string(),
                contents: b"%PDF-1.3".to_vec(),
            });
            let message = notifier().message(&with_pdf).unwrap();
            let raw = String::from_utf8(message.formatted()).unwrap();
            assert!(raw.contains("multipart/mixed"));
            assert!(raw.contains("multipart/alternative"));
            assert!(raw.contains("progress_summary.pdf"));
        }

        #[test]
        fn empty_recipient_list_is_rejected() {
            assert!(matches!(
                notifier().message(&email(&[])),
                Err(NotifyError::NoRecipients { .. })
            ));
        }

        #[test]
        fn submission_port_uses_starttls() {
            assert!(uses_starttls(587));
            assert!(!uses_starttls(465));
            let notifier = SmtpNotifier::new(&EmailConfig {
                port: 587,
                from: "digests@example.org".to_string(),
                operator_copy: "archive@example.org".to_string(),
                ..EmailConfig::default()
            });
            assert!(notifier.is_ok());
        }
    }
}

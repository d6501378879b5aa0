use std::path::{Path, PathBuf};

use chrono::Utc;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, Message, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials as SmtpCredentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use thiserror::Error;
use tracing::info;

use crate::config::{Credentials, MailSection};

pub type NotifyResult<T> = Result<T, NotifyError>;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("report artifact missing: {0}")]
    MissingArtifact(PathBuf),
    #[error("no recipients configured")]
    NoRecipients,
    #[error("invalid mail address {address:?}: {source}")]
    Address {
        address: String,
        source: lettre::address::AddressError,
    },
    #[error("message composition failed: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("smtp transport failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Split a comma/semicolon separated recipient string, dropping blanks.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}

/// Composes the report mail and delivers it over authenticated STARTTLS.
/// Composition and transport are independent: `compose` touches no network
/// and fails fast when an artifact file is absent.
pub struct Notifier {
    mail: MailSection,
    credentials: Credentials,
}

impl Notifier {
    pub fn new(mail: MailSection, credentials: Credentials) -> Self {
        Self { mail, credentials }
    }

    pub fn compose(
        &self,
        page_url: Option<&str>,
        attachments: &[&Path],
    ) -> NotifyResult<Message> {
        for path in attachments {
            if !path.exists() {
                return Err(NotifyError::MissingArtifact(path.to_path_buf()));
            }
        }
        let recipients = parse_recipients(&self.mail.to);
        if recipients.is_empty() {
            return Err(NotifyError::NoRecipients);
        }

        let generated = Utc::now().format("%Y-%m-%d %H:%M:%S");
        let mut builder = Message::builder()
            .from(parse_mailbox(&self.mail.from)?)
            .subject(format!("RTM Test Execution Report - {generated}"));
        for recipient in &recipients {
            builder = builder.to(parse_mailbox(recipient)?);
        }

        let link_block = match page_url {
            Some(url) => format!(
                "<p>You can also view it on the wiki:<br><a href=\"{url}\">{url}</a></p>"
            ),
            None => String::new(),
        };
        let body = format!(
            "<html><body style=\"font-family:Arial; font-size:14px; color:#333;\">\
             <p>Dear Team,</p>\
             <p>Please find attached the latest <b>RTM Test Execution Report</b>.</p>\
             {link_block}\
             <p>Generated on: {generated}</p>\
             <p>Regards,<br><b>RTM Report Automation</b></p>\
             </body></html>"
        );

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::html(body));
        for path in attachments {
            multipart = multipart.singlepart(attachment_part(path)?);
        }
        let message = builder.multipart(multipart)?;
        info!(recipients = recipients.len(), "report mail composed");
        Ok(message)
    }

    pub async fn send(&self, message: Message) -> NotifyResult<()> {
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.mail.smtp_host)?
            .port(self.mail.smtp_port)
            .credentials(SmtpCredentials::new(
                self.credentials.user.clone(),
                self.credentials.secret.clone(),
            ))
            .build();
        info!(
            host = %self.mail.smtp_host,
            port = self.mail.smtp_port,
            "sending report mail"
        );
        mailer.send(message).await?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> NotifyResult<Mailbox> {
    address.parse().map_err(|source| NotifyError::Address {
        address: address.to_string(),
        source,
    })
}

fn attachment_part(path: &Path) -> NotifyResult<SinglePart> {
    let bytes = std::fs::read(path).map_err(|source| NotifyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "report".to_string());
    let mime = match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") | Some("htm") => "text/html",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    };
    let content_type = ContentType::parse(mime).unwrap_or(ContentType::TEXT_PLAIN);
    Ok(Attachment::new(filename).body(bytes, content_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mail_section() -> MailSection {
        MailSection {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 587,
            from: "ci-bot@example.com".to_string(),
            to: "qa-lead@example.com; release@example.com".to_string(),
            user: None,
            password: None,
        }
    }

    fn notifier() -> Notifier {
        Notifier::new(
            mail_section(),
            Credentials {
                user: "ci-bot@example.com".to_string(),
                secret: "secret".to_string(),
            },
        )
    }

    #[test]
    fn recipients_split_on_both_separators() {
        let recipients = parse_recipients("a@x.com, b@y.com; c@z.com ,");
        assert_eq!(recipients, ["a@x.com", "b@y.com", "c@z.com"]);
    }

    #[test]
    fn compose_fails_before_transport_when_artifact_missing() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("rtm_report.html");
        std::fs::write(&html, "<html></html>").unwrap();
        let missing_pdf = dir.path().join("rtm_report.pdf");
        let err = notifier()
            .compose(None, &[html.as_path(), missing_pdf.as_path()])
            .unwrap_err();
        match err {
            NotifyError::MissingArtifact(path) => assert_eq!(path, missing_pdf),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn compose_builds_multipart_with_page_link() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("rtm_report.html");
        let pdf = dir.path().join("rtm_report.pdf");
        std::fs::write(&html, "<html></html>").unwrap();
        std::fs::write(&pdf, b"%PDF-1.4").unwrap();
        let message = notifier()
            .compose(
                Some("https://example.atlassian.net/wiki/display/DEMO/RTM"),
                &[html.as_path(), pdf.as_path()],
            )
            .unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("RTM Test Execution Report"));
        assert!(raw.contains("rtm_report.pdf"));
        assert!(raw.contains("display/DEMO/RTM"));
    }
}

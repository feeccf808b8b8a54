use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, Message,
    SmtpTransport, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::SmtpConfig;
use crate::services::ServiceError;

#[async_trait]
pub trait EmailProvider: Send + Sync {
    async fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
    ) -> Result<(), ServiceError>;

    async fn send_activation_email(
        &self,
        to_email: &str,
        activation_link: &str,
    ) -> Result<(), ServiceError> {
        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Welcome! Please activate your account</h2>
        <p>Thank you for registering. Click the link below to confirm your email address:</p>
        <p>
            <a href="{link}" style="background-color: #4CAF50; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                Activate account
            </a>
        </p>
        <p style="color: #666; font-size: 12px;">{link}</p>
    </body>
</html>"###,
            link = activation_link
        );

        self.send_email(&[to_email.to_string()], "Activate your account", &html_body)
            .await
    }

    async fn send_password_reset_email(
        &self,
        to_email: &str,
        reset_link: &str,
    ) -> Result<(), ServiceError> {
        let html_body = format!(
            r###"<html>
    <body style="font-family: Arial, sans-serif;">
        <h2>Password Reset Request</h2>
        <p>We received a request to reset your password. Click the link below to set a new password:</p>
        <p>
            <a href="{link}" style="background-color: #2196F3; color: white; padding: 14px 20px; text-decoration: none; border-radius: 4px;">
                Reset Password
            </a>
        </p>
        <p style="color: #666; font-size: 12px;">
            If you didn't request this, please ignore this email.
        </p>
    </body>
</html>"###,
            link = reset_link
        );

        self.send_email(&[to_email.to_string()], "Reset your password", &html_body)
            .await
    }
}

#[derive(Clone)]
pub struct EmailService {
    mailer: SmtpTransport,
    from_email: String,
}

impl EmailService {
    pub fn new(config: &SmtpConfig) -> Result<Self, ServiceError> {
        let creds = Credentials::new(config.user.clone(), config.password.clone());

        let mailer = SmtpTransport::relay(&config.host)
            .map_err(|e| ServiceError::Email(e.to_string()))?
            .credentials(creds)
            .port(config.port)
            .timeout(Some(Duration::from_secs(10)))
            .build();

        tracing::info!(host = %config.host, port = config.port, "Email service initialized");

        Ok(Self {
            mailer,
            from_email: config.from.clone(),
        })
    }
}

#[async_trait]
impl EmailProvider for EmailService {
    async fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
    ) -> Result<(), ServiceError> {
        let mut builder = Message::builder()
            .from(
                self.from_email
                    .parse()
                    .map_err(|e: lettre::address::AddressError| ServiceError::Email(e.to_string()))?,
            )
            .subject(subject)
            .header(ContentType::TEXT_HTML);
        for recipient in recipients {
            builder = builder.to(recipient
                .parse()
                .map_err(|e: lettre::address::AddressError| ServiceError::Email(e.to_string()))?);
        }
        let email = builder
            .body(html_body.to_string())
            .map_err(|e| ServiceError::Email(e.to_string()))?;

        // SmtpTransport is blocking
        let mailer = self.mailer.clone();
        let result = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| ServiceError::Internal(e.into()))?;

        match result {
            Ok(_) => {
                tracing::info!(recipients = recipients.len(), subject = %subject, "Email sent successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, subject = %subject, "Failed to send email");
                Err(ServiceError::Email(e.to_string()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// Records outgoing mail instead of sending it; can be told to fail.
#[derive(Clone, Default)]
pub struct MockEmailService {
    sent: Arc<Mutex<Vec<SentMail>>>,
    fail: Arc<AtomicBool>,
}

impl MockEmailService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EmailProvider for MockEmailService {
    async fn send_email(
        &self,
        recipients: &[String],
        subject: &str,
        html_body: &str,
    ) -> Result<(), ServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ServiceError::Email("mail server unavailable".to_string()));
        }
        let mut sent = self
            .sent
            .lock()
            .map_err(|_| ServiceError::Internal(anyhow::anyhow!("mock mailbox poisoned")))?;
        sent.push(SentMail {
            recipients: recipients.to_vec(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email_service_creation() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "mailer".to_string(),
            password: "secret".to_string(),
            from: "noreply@example.com".to_string(),
        };

        assert!(EmailService::new(&config).is_ok());
    }

    #[tokio::test]
    async fn test_mock_records_activation_mail() {
        let mailer = MockEmailService::new();
        mailer
            .send_activation_email("a@x.com", "http://api/auth/activate/abc")
            .await
            .unwrap();

        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipients, vec!["a@x.com".to_string()]);
        assert!(sent[0].body.contains("http://api/auth/activate/abc"));
    }

    #[tokio::test]
    async fn test_mock_failure_sends_nothing() {
        let mailer = MockEmailService::new();
        mailer.set_fail(true);

        let err = mailer
            .send_password_reset_email("a@x.com", "http://client/reset")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Email(_)));
        assert!(mailer.sent().is_empty());
    }
}

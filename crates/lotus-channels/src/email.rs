//! Email delivery: Resend HTTP API by default, or an SMTP relay (async
//! lettre with STARTTLS) when `provider = "smtp"`.

use async_trait::async_trait;
use lotus_core::config::{EmailConfig, EmailProvider};
use lotus_core::error::{LotusError, Result};
use lotus_core::template;
use lotus_core::traits::MessageSender;
use lotus_core::types::{Channel, OutboundMessage, SendReceipt};

const RESEND_API: &str = "https://api.resend.com";

/// Email sender for either provider.
pub struct EmailSender {
    config: EmailConfig,
    client: reqwest::Client,
}

/// Subject and body after variable substitution.
struct Rendered {
    subject: String,
    text: String,
}

impl Rendered {
    fn html(&self) -> String {
        self.text.replace('\n', "<br>")
    }
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn render(&self, message: &OutboundMessage) -> Rendered {
        let subject = message.subject.as_deref().unwrap_or_default();
        Rendered {
            subject: template::render(subject, &[("name", message.name.as_str())]),
            text: template::render(
                &message.content,
                &[("name", message.name.as_str()), ("email", message.to.as_str())],
            ),
        }
    }

    async fn send_resend(&self, to: &str, mail: &Rendered) -> Result<SendReceipt> {
        if self.config.api_key.is_empty() {
            return Err(LotusError::Channel("RESEND_API_KEY not configured".into()));
        }
        let base = self.config.api_base.as_deref().unwrap_or(RESEND_API);
        let url = format!("{}/emails", base.trim_end_matches('/'));

        let body = serde_json::json!({
            "from": self.config.from_address,
            "to": [to],
            "subject": mail.subject,
            "html": mail.html(),
            "text": mail.text,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LotusError::Channel(format!("Resend request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LotusError::Channel(format!(
                "Resend API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LotusError::Channel(format!("Invalid Resend response: {e}")))?;
        let id = result["id"].as_str().unwrap_or("unknown").to_string();
        tracing::info!("📤 Email sent to: {to}");
        Ok(SendReceipt { provider_id: id })
    }

    async fn send_smtp(&self, to: &str, mail: &Rendered) -> Result<SendReceipt> {
        use lettre::{
            AsyncSmtpTransport, AsyncTransport, Message as LettreMessage, message::Mailbox,
            message::MultiPart, transport::smtp::authentication::Credentials,
        };

        if self.config.smtp_host.is_empty() {
            return Err(LotusError::Channel("SMTP host not configured".into()));
        }

        let from_mailbox: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| LotusError::Channel(format!("Invalid from: {e}")))?;
        let to_mailbox: Mailbox = to
            .parse()
            .map_err(|e| LotusError::Channel(format!("Invalid to: {e}")))?;

        let email = LettreMessage::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(mail.subject.clone())
            .multipart(MultiPart::alternative_plain_html(mail.text.clone(), mail.html()))
            .map_err(|e| LotusError::Channel(format!("Build email: {e}")))?;

        let mut transport =
            AsyncSmtpTransport::<lettre::Tokio1Executor>::starttls_relay(&self.config.smtp_host)
                .map_err(|e| LotusError::Channel(format!("SMTP relay: {e}")))?
                .port(self.config.smtp_port);
        if !self.config.smtp_username.is_empty() {
            transport = transport.credentials(Credentials::new(
                self.config.smtp_username.clone(),
                self.config.smtp_password.clone(),
            ));
        }
        let mailer = transport.build();

        let response = mailer
            .send(email)
            .await
            .map_err(|e| LotusError::Channel(format!("SMTP send: {e}")))?;

        tracing::info!("📤 Email sent to: {to} (smtp)");
        Ok(SendReceipt {
            provider_id: response
                .message()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(" "),
        })
    }
}

#[async_trait]
impl MessageSender for EmailSender {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    fn is_configured(&self) -> bool {
        match self.config.provider {
            EmailProvider::Resend => !self.config.api_key.is_empty(),
            EmailProvider::Smtp => !self.config.smtp_host.is_empty(),
        }
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        let to = message.to.trim();
        let mail = self.render(message);
        match self.config.provider {
            EmailProvider::Resend => self.send_resend(to, &mail).await,
            EmailProvider::Smtp => self.send_smtp(to, &mail).await,
        }
    }
}

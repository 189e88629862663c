//! WhatsApp delivery through the Twilio Messages API.
//!
//! One form-encoded POST per message, authenticated with the account SID and
//! auth token. Requires: Account SID + Auth Token + a WhatsApp-enabled sender.

use async_trait::async_trait;
use lotus_core::config::WhatsAppConfig;
use lotus_core::error::{LotusError, Result};
use lotus_core::template;
use lotus_core::traits::MessageSender;
use lotus_core::types::{Channel, OutboundMessage, SendReceipt};

const TWILIO_API: &str = "https://api.twilio.com";

/// Twilio-backed WhatsApp sender.
pub struct WhatsAppSender {
    config: WhatsAppConfig,
    client: reqwest::Client,
}

impl WhatsAppSender {
    pub fn new(config: WhatsAppConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn messages_url(&self) -> String {
        let base = self.config.api_base.as_deref().unwrap_or(TWILIO_API);
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            base.trim_end_matches('/'),
            self.config.account_sid
        )
    }
}

/// Twilio addresses WhatsApp numbers as `whatsapp:+E164`.
pub fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    fn channel(&self) -> Channel {
        Channel::WhatsApp
    }

    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt> {
        if !self.is_configured() {
            return Err(LotusError::Channel("Twilio credentials not configured".into()));
        }

        let body = template::render(
            &message.content,
            &[("name", message.name.as_str()), ("phone", message.to.as_str())],
        );
        let to = whatsapp_address(&message.to);
        let from = whatsapp_address(&self.config.from_number);

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[("From", from.as_str()), ("To", to.as_str()), ("Body", body.as_str())])
            .send()
            .await
            .map_err(|e| LotusError::Channel(format!("Twilio request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LotusError::Channel(format!(
                "Twilio API error {status}: {error_text}"
            )));
        }

        let result: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LotusError::Channel(format!("Invalid Twilio response: {e}")))?;

        let sid = result["sid"].as_str().unwrap_or("unknown").to_string();
        tracing::debug!("WhatsApp message sent: {} → {}", sid, to);
        Ok(SendReceipt { provider_id: sid })
    }
}

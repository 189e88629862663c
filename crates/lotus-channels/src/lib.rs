//! # Lotus Channels
//!
//! Outbound delivery for queued messages. Each sender implements
//! [`MessageSender`]: substitute template variables, make one delivery
//! attempt, return the provider's message id.

pub mod email;
pub mod whatsapp;

pub use email::EmailSender;
pub use whatsapp::WhatsAppSender;

use lotus_core::LotusConfig;
use lotus_core::traits::MessageSender;
use lotus_core::types::Channel;
use std::sync::Arc;

/// Senders keyed by channel. A channel without a sender makes its queued
/// messages fail with a clear reason instead of sitting pending forever.
#[derive(Clone, Default)]
pub struct SenderSet {
    senders: Vec<Arc<dyn MessageSender>>,
}

impl SenderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sender, replacing any existing one for the same channel.
    pub fn with(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.senders.retain(|s| s.channel() != sender.channel());
        self.senders.push(sender);
        self
    }

    pub fn get(&self, channel: Channel) -> Option<Arc<dyn MessageSender>> {
        self.senders.iter().find(|s| s.channel() == channel).cloned()
    }

    /// `(channel, configured)` for every registered sender.
    pub fn status(&self) -> Vec<(Channel, bool)> {
        self.senders
            .iter()
            .map(|s| (s.channel(), s.is_configured()))
            .collect()
    }
}

/// Build the WhatsApp and email senders from config.
pub fn build_senders(config: &LotusConfig) -> SenderSet {
    let whatsapp = WhatsAppSender::new(config.whatsapp.clone());
    let email = EmailSender::new(config.email.clone());
    if !whatsapp.is_configured() {
        tracing::warn!("⚠️ WhatsApp not configured; queued WhatsApp messages will fail");
    }
    if !email.is_configured() {
        tracing::warn!("⚠️ Email not configured; queued emails will fail");
    }
    SenderSet::new().with(Arc::new(whatsapp)).with(Arc::new(email))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_senders_covers_both_channels() {
        let mut config = LotusConfig::default();
        config.email.api_key = "re_key".into();
        let set = build_senders(&config);

        assert_eq!(set.get(Channel::WhatsApp).unwrap().channel(), Channel::WhatsApp);
        assert_eq!(set.get(Channel::Email).unwrap().channel(), Channel::Email);
        let status = set.status();
        assert!(status.contains(&(Channel::WhatsApp, false)));
        assert!(status.contains(&(Channel::Email, true)));
    }

    #[test]
    fn test_with_replaces_same_channel() {
        let set = SenderSet::new()
            .with(Arc::new(EmailSender::new(Default::default())))
            .with(Arc::new(EmailSender::new(Default::default())));
        assert_eq!(set.status().len(), 1);
        assert!(set.get(Channel::WhatsApp).is_none());
    }
}

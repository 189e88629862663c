//! Seams between the queue processor and the outbound channels.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Channel, OutboundMessage, SendReceipt};

/// One outbound delivery channel (WhatsApp, email).
///
/// `send` performs template substitution and exactly one delivery attempt.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Whether credentials are present. An unconfigured sender still fails
    /// each message individually so the queue records why.
    fn is_configured(&self) -> bool;

    async fn send(&self, message: &OutboundMessage) -> Result<SendReceipt>;
}

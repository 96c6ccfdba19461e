//! Communication channels (WhatsApp via a messaging gateway).
//!
//! A channel connector exposes a [`ChannelHandle`] so agent replies can be delivered to a
//! conversation once the channel is usable.

pub mod whatsapp;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not connected (state: {0})")]
    NotConnected(whatsapp::LifecycleState),
    #[error(transparent)]
    Gateway(#[from] whatsapp::GatewayError),
}

/// Handle to a running channel (stop, send message).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "whatsapp").
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Send a text message to a conversation (e.g. a WhatsApp number).
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), ChannelError>;
}

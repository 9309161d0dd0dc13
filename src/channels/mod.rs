//! Channel layer: webhook normalization in, provider send APIs out.

pub mod instagram;
pub mod normalize;
pub mod whatsapp;

use async_trait::async_trait;

use crate::business::ChannelCredentials;
use crate::error::DispatchError;
use crate::pipeline::types::Channel;

pub use instagram::InstagramClient;
pub use normalize::normalize;
pub use whatsapp::WhatsAppClient;

/// Channel-routed outbound transport, the seam the dispatcher tests mock.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    /// Send `text` to `recipient` on `channel` using the given per-business
    /// credentials. Returns the provider-assigned message id.
    async fn send_text(
        &self,
        channel: Channel,
        creds: &ChannelCredentials,
        recipient: &str,
        text: &str,
    ) -> Result<String, DispatchError>;
}

/// Production transport: routes to the real provider REST APIs.
pub struct HttpTransport {
    whatsapp: WhatsAppClient,
    instagram: InstagramClient,
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::new();
        Self {
            whatsapp: WhatsAppClient::new(client.clone()),
            instagram: InstagramClient::new(client),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OutboundTransport for HttpTransport {
    async fn send_text(
        &self,
        channel: Channel,
        creds: &ChannelCredentials,
        recipient: &str,
        text: &str,
    ) -> Result<String, DispatchError> {
        match channel {
            Channel::Whatsapp => self.whatsapp.send_text(creds, recipient, text).await,
            Channel::Instagram => self.instagram.send_text(creds, recipient, text).await,
        }
    }
}

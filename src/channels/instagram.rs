//! Instagram Messaging send client.

use secrecy::ExposeSecret;
use serde::Deserialize;

use crate::business::ChannelCredentials;
use crate::error::DispatchError;

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v21.0";

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    message_id: Option<String>,
}

/// Instagram Messaging API client. Credentials arrive per call.
pub struct InstagramClient {
    client: reqwest::Client,
    base_url: String,
}

impl InstagramClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: GRAPH_API_BASE.to_string(),
        }
    }

    /// Point the client at a different API base (tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Send a text message to an IG-scoped user id. Returns the
    /// provider-assigned message id.
    pub async fn send_text(
        &self,
        creds: &ChannelCredentials,
        recipient_id: &str,
        body: &str,
    ) -> Result<String, DispatchError> {
        let url = format!("{}/{}/messages", self.base_url, creds.sender_id);
        let payload = serde_json::json!({
            "recipient": {"id": recipient_id},
            "message": {"text": body},
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(creds.access_token.expose_secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Provider {
                channel: "instagram".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DispatchError::Provider {
                channel: "instagram".into(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let sent: SendResponse = resp.json().await.map_err(|e| DispatchError::Provider {
            channel: "instagram".into(),
            reason: format!("invalid send response: {e}"),
        })?;

        sent.message_id.ok_or_else(|| DispatchError::Provider {
            channel: "instagram".into(),
            reason: "send response carried no message id".into(),
        })
    }
}

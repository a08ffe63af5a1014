//! WhatsApp Business Cloud API transport.
//!
//! Outbound text and media go through the Graph API. Inbound messages arrive
//! as webhook POSTs; whatever serves the webhook hands each payload to
//! [`WhatsAppTransport::push_webhook`], which feeds the stream returned by
//! [`Transport::listen`].

use async_trait::async_trait;
use parking_lot::Mutex;
use plughost_core::config::WhatsAppTransportConfig;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::traits::{EventStream, Transport};
use plughost_core::types::{
    GroupMetadata, IncomingMessage, MediaKind, OutgoingMedia, ParticipantAction, QuotedMessage,
    TransportEvent,
};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

fn unavailable(msg: String) -> PlugHostError {
    PlugHostError::TransportUnavailable(msg)
}

/// WhatsApp Business transport implementation.
pub struct WhatsAppTransport {
    config: WhatsAppTransportConfig,
    client: reqwest::Client,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
}

impl WhatsAppTransport {
    pub fn new(config: WhatsAppTransportConfig) -> Result<Self> {
        if config.access_token.is_empty() {
            return Err(PlugHostError::Config("WhatsApp access_token not configured".into()));
        }
        if config.phone_number_id.is_empty() {
            return Err(PlugHostError::Config("WhatsApp phone_number_id not configured".into()));
        }
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            config,
            client: reqwest::Client::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.phone_number_id,
            path
        )
    }

    /// Answer the webhook subscription handshake.
    pub fn verify_webhook(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        let expected = &self.config.webhook_verify_token;
        (mode == "subscribe" && !expected.is_empty() && token == expected).then(|| challenge.to_string())
    }

    /// Parse a webhook payload and queue its events. Returns how many were queued.
    pub fn push_webhook(&self, payload: &Value) -> usize {
        let mut queued = 0;
        for event in parse_webhook(payload) {
            if self.events_tx.send(event).is_ok() {
                queued += 1;
            }
        }
        queued
    }

    /// POST a message body and return the new message id.
    async fn post_message(&self, body: &Value) -> Result<String> {
        let response = self
            .client
            .post(self.api_url("messages"))
            .bearer_auth(&self.config.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| unavailable(format!("WhatsApp API request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("WhatsApp API error {status}: {error_text}")));
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| unavailable(format!("Invalid WhatsApp response: {e}")))?;
        Ok(result["messages"][0]["id"].as_str().unwrap_or("unknown").to_string())
    }

    /// Upload media bytes and return the media id.
    async fn upload_media(&self, media: &OutgoingMedia) -> Result<String> {
        let file_name = media
            .file_name
            .clone()
            .unwrap_or_else(|| format!("upload.{}", media.kind.as_str()));
        let part = reqwest::multipart::Part::bytes(media.bytes.clone())
            .file_name(file_name)
            .mime_str(media.mime())
            .map_err(|e| unavailable(format!("Invalid media type '{}': {e}", media.mime())))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", media.mime().to_string())
            .part("file", part);

        let response = self
            .client
            .post(self.api_url("media"))
            .bearer_auth(&self.config.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| unavailable(format!("WhatsApp media upload failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("WhatsApp media upload error {status}: {error_text}")));
        }
        let result: Value = response
            .json()
            .await
            .map_err(|e| unavailable(format!("Invalid WhatsApp upload response: {e}")))?;
        result["id"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| unavailable("WhatsApp upload response has no media id".into()))
    }
}

/// Request body for a text message.
pub fn text_payload(to: &str, text: &str, reply_to: Option<&str>) -> Value {
    let mut body = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": { "preview_url": false, "body": text }
    });
    if let Some(id) = reply_to {
        body["context"] = json!({ "message_id": id });
    }
    body
}

/// Request body for an uploaded media message.
pub fn media_payload(to: &str, media_id: &str, media: &OutgoingMedia) -> Value {
    let kind = media.kind.as_str();
    let mut object = json!({ "id": media_id });
    // Audio messages carry no caption.
    if media.kind != MediaKind::Audio
        && let Some(caption) = &media.caption
    {
        object["caption"] = json!(caption);
    }
    if media.kind == MediaKind::Document
        && let Some(name) = &media.file_name
    {
        object["filename"] = json!(name);
    }
    let mut body = json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": kind,
    });
    body[kind] = object;
    body
}

/// Convert a Cloud API webhook payload into transport events.
///
/// Only user messages are converted; delivery statuses are ignored.
pub fn parse_webhook(payload: &Value) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    let changes = payload["entry"]
        .as_array()
        .into_iter()
        .flatten()
        .flat_map(|entry| entry["changes"].as_array().into_iter().flatten());

    for change in changes {
        let value = &change["value"];
        let contacts = value["contacts"].as_array();
        for msg in value["messages"].as_array().into_iter().flatten() {
            let Some(from) = msg["from"].as_str() else { continue };
            let Some(body) = message_body(msg) else {
                tracing::debug!("WhatsApp: skipping unsupported message type {}", msg["type"]);
                continue;
            };

            let sender_name = contacts
                .and_then(|cs| cs.iter().find(|c| c["wa_id"].as_str() == Some(from)))
                .and_then(|c| c["profile"]["name"].as_str())
                .map(str::to_string);
            let timestamp_ms = msg["timestamp"]
                .as_str()
                .and_then(|t| t.parse::<i64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            let quoted = msg["context"]["id"].as_str().map(|id| QuotedMessage {
                id: id.to_string(),
                sender_id: msg["context"]["from"].as_str().unwrap_or_default().to_string(),
                body: String::new(),
            });

            events.push(TransportEvent::Message(IncomingMessage {
                id: msg["id"]
                    .as_str()
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                chat_id: from.to_string(),
                sender_id: from.to_string(),
                sender_name,
                is_group: false,
                body,
                quoted,
                mentions: Vec::new(),
                timestamp_ms,
            }));
        }
    }
    events
}

fn message_body(msg: &Value) -> Option<String> {
    let kind = msg["type"].as_str()?;
    match kind {
        "text" => msg["text"]["body"].as_str().map(str::to_string),
        "image" | "video" | "document" => {
            Some(msg[kind]["caption"].as_str().unwrap_or_default().to_string())
        }
        "button" => msg["button"]["text"].as_str().map(str::to_string),
        "interactive" => msg["interactive"]["button_reply"]["title"]
            .as_str()
            .or_else(|| msg["interactive"]["list_reply"]["title"].as_str())
            .map(str::to_string),
        _ => None,
    }
}

#[async_trait]
impl Transport for WhatsAppTransport {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn send_text(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()> {
        let msg_id = self.post_message(&text_payload(chat_id, text, reply_to)).await?;
        tracing::debug!("WhatsApp message sent: {msg_id} → {chat_id}");
        Ok(())
    }

    async fn send_media(&self, chat_id: &str, media: OutgoingMedia) -> Result<()> {
        let media_id = self.upload_media(&media).await?;
        let msg_id = self
            .post_message(&media_payload(chat_id, &media_id, &media))
            .await?;
        tracing::debug!("WhatsApp {} sent: {msg_id} → {chat_id}", media.kind.as_str());
        Ok(())
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        Err(unavailable(format!(
            "WhatsApp Cloud API has no group metadata (requested {group_id})"
        )))
    }

    async fn group_participants_update(
        &self,
        group_id: &str,
        _participant_ids: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        Err(unavailable(format!(
            "WhatsApp Cloud API cannot {} participants in {group_id}",
            action.as_str()
        )))
    }

    async fn listen(&self) -> Result<EventStream> {
        let rx = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| unavailable("WhatsApp webhook stream already taken".into()))?;
        tracing::info!("WhatsApp: listening via webhook (phone_id={})", self.config.phone_number_id);
        Ok(Box::new(UnboundedReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn config() -> WhatsAppTransportConfig {
        WhatsAppTransportConfig {
            access_token: "tok".into(),
            phone_number_id: "123".into(),
            webhook_verify_token: "verify-me".into(),
            api_base: "https://graph.example/v21.0/".into(),
        }
    }

    fn webhook() -> Value {
        json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "id": "biz",
                "changes": [{
                    "field": "messages",
                    "value": {
                        "contacts": [{ "wa_id": "6281", "profile": { "name": "Ani" } }],
                        "messages": [
                            {
                                "from": "6281", "id": "wamid.1", "timestamp": "1767225600",
                                "type": "text", "text": { "body": ".ping" },
                                "context": { "id": "wamid.0", "from": "6282" }
                            },
                            {
                                "from": "6282", "id": "wamid.2", "timestamp": "1767225601",
                                "type": "image", "image": { "id": "m1", "caption": "look" }
                            },
                            { "from": "6283", "id": "wamid.3", "type": "sticker", "sticker": {} }
                        ],
                        "statuses": [{ "id": "wamid.9", "status": "read" }]
                    }
                }]
            }]
        })
    }

    #[test]
    fn test_requires_credentials() {
        let mut missing = config();
        missing.access_token.clear();
        assert!(matches!(WhatsAppTransport::new(missing), Err(PlugHostError::Config(_))));
    }

    #[test]
    fn test_parse_webhook() {
        let events = parse_webhook(&webhook());
        assert_eq!(events.len(), 2);
        let TransportEvent::Message(first) = &events[0] else { panic!("expected message") };
        assert_eq!(first.body, ".ping");
        assert_eq!(first.chat_id, "6281");
        assert_eq!(first.sender_name.as_deref(), Some("Ani"));
        assert_eq!(first.timestamp_ms, 1_767_225_600_000);
        assert_eq!(first.quoted.as_ref().unwrap().id, "wamid.0");

        let TransportEvent::Message(second) = &events[1] else { panic!("expected message") };
        assert_eq!(second.body, "look");
        assert!(second.sender_name.is_none());

        assert!(parse_webhook(&json!({"object": "x"})).is_empty());
    }

    #[test]
    fn test_payloads() {
        let text = text_payload("6281", "hi", Some("wamid.1"));
        assert_eq!(text["text"]["body"], "hi");
        assert_eq!(text["context"]["message_id"], "wamid.1");
        assert!(text_payload("6281", "hi", None).get("context").is_none());

        let image = OutgoingMedia::new(MediaKind::Image, vec![1]).with_caption("cap");
        let body = media_payload("6281", "m1", &image);
        assert_eq!(body["type"], "image");
        assert_eq!(body["image"]["id"], "m1");
        assert_eq!(body["image"]["caption"], "cap");

        let audio = OutgoingMedia::new(MediaKind::Audio, vec![1]).with_caption("ignored");
        assert!(media_payload("6281", "m2", &audio)["audio"].get("caption").is_none());
    }

    #[test]
    fn test_verify_webhook() {
        let wa = WhatsAppTransport::new(config()).unwrap();
        assert_eq!(wa.verify_webhook("subscribe", "verify-me", "42").as_deref(), Some("42"));
        assert!(wa.verify_webhook("subscribe", "wrong", "42").is_none());
        assert!(wa.verify_webhook("unsubscribe", "verify-me", "42").is_none());
        assert_eq!(wa.api_url("messages"), "https://graph.example/v21.0/123/messages");
    }

    #[tokio::test]
    async fn test_webhook_feeds_listen_stream() {
        let wa = WhatsAppTransport::new(config()).unwrap();
        let mut stream = wa.listen().await.unwrap();
        assert_eq!(wa.push_webhook(&webhook()), 2);

        let Some(TransportEvent::Message(m)) = stream.next().await else { panic!("expected message") };
        assert_eq!(m.id, "wamid.1");
        assert!(wa.listen().await.is_err());
    }

    #[tokio::test]
    async fn test_group_operations_unsupported() {
        let wa = WhatsAppTransport::new(config()).unwrap();
        assert!(matches!(
            wa.group_metadata("g").await,
            Err(PlugHostError::TransportUnavailable(_))
        ));
        assert!(matches!(
            wa.group_participants_update("g", &["u".into()], ParticipantAction::Remove).await,
            Err(PlugHostError::TransportUnavailable(_))
        ));
    }
}

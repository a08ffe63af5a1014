//! Message and event types exchanged between transports, the host and plugins.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A chat message delivered by the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub is_group: bool,
    pub body: String,
    #[serde(default)]
    pub quoted: Option<QuotedMessage>,
    #[serde(default)]
    pub mentions: Vec<String>,
    pub timestamp_ms: i64,
}

/// The message an incoming message replies to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotedMessage {
    pub id: String,
    pub sender_id: String,
    pub body: String,
}

impl IncomingMessage {
    /// Build a plain text message stamped with the current time.
    pub fn text(id: &str, chat_id: &str, sender_id: &str, body: &str) -> Self {
        Self {
            id: id.to_string(),
            chat_id: chat_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_name: None,
            is_group: false,
            body: body.to_string(),
            quoted: None,
            mentions: Vec::new(),
            timestamp_ms: Utc::now().timestamp_millis(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Split a prefixed body into a lowercase command token and its arguments.
    ///
    /// `".Menu fun"` with prefix `"."` yields `("menu", ["fun"])`.
    pub fn command(&self, prefix: &str) -> Option<(String, Vec<&str>)> {
        let rest = self.body.trim_start().strip_prefix(prefix)?;
        let mut parts = rest.split_whitespace();
        let token = parts.next()?.to_lowercase();
        Some((token, parts.collect()))
    }
}

/// Outgoing media kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Document => "document",
        }
    }

    /// Fallback MIME type when the sender does not provide one.
    pub fn default_mime(&self) -> &'static str {
        match self {
            MediaKind::Image => "image/jpeg",
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/ogg",
            MediaKind::Document => "application/octet-stream",
        }
    }
}

/// A media payload to send.
#[derive(Debug, Clone)]
pub struct OutgoingMedia {
    pub kind: MediaKind,
    pub bytes: Vec<u8>,
    pub caption: Option<String>,
    pub mentions: Vec<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl OutgoingMedia {
    pub fn new(kind: MediaKind, bytes: Vec<u8>) -> Self {
        Self {
            kind,
            bytes,
            caption: None,
            mentions: Vec::new(),
            file_name: None,
            mime_type: None,
        }
    }

    pub fn with_caption(mut self, caption: &str) -> Self {
        self.caption = Some(caption.to_string());
        self
    }

    pub fn mime(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(self.kind.default_mime())
    }
}

/// Group subject and membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMetadata {
    pub id: String,
    pub subject: String,
    pub participants: Vec<GroupParticipant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupParticipant {
    pub id: String,
    #[serde(default)]
    pub admin: bool,
}

/// Membership changes a bot can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantAction {
    Add,
    Remove,
    Promote,
    Demote,
}

impl ParticipantAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantAction::Add => "add",
            ParticipantAction::Remove => "remove",
            ParticipantAction::Promote => "promote",
            ParticipantAction::Demote => "demote",
        }
    }
}

/// Kind tag of a transport-reported group event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupEventKind {
    #[serde(rename = "participants.add")]
    ParticipantsAdd,
    #[serde(rename = "participants.remove")]
    ParticipantsRemove,
    #[serde(rename = "participants.promote")]
    ParticipantsPromote,
    #[serde(rename = "participants.demote")]
    ParticipantsDemote,
}

impl GroupEventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            GroupEventKind::ParticipantsAdd => "participants.add",
            GroupEventKind::ParticipantsRemove => "participants.remove",
            GroupEventKind::ParticipantsPromote => "participants.promote",
            GroupEventKind::ParticipantsDemote => "participants.demote",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "participants.add" => Some(GroupEventKind::ParticipantsAdd),
            "participants.remove" => Some(GroupEventKind::ParticipantsRemove),
            "participants.promote" => Some(GroupEventKind::ParticipantsPromote),
            "participants.demote" => Some(GroupEventKind::ParticipantsDemote),
            _ => None,
        }
    }
}

impl From<ParticipantAction> for GroupEventKind {
    fn from(action: ParticipantAction) -> Self {
        match action {
            ParticipantAction::Add => GroupEventKind::ParticipantsAdd,
            ParticipantAction::Remove => GroupEventKind::ParticipantsRemove,
            ParticipantAction::Promote => GroupEventKind::ParticipantsPromote,
            ParticipantAction::Demote => GroupEventKind::ParticipantsDemote,
        }
    }
}

impl std::fmt::Display for GroupEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// A membership change observed in a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupEvent {
    pub kind: GroupEventKind,
    pub group_id: String,
    pub participants: Vec<String>,
    /// Who performed the change, when the transport knows.
    #[serde(default)]
    pub actor: Option<String>,
}

/// Anything the transport can deliver to the host.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    Message(IncomingMessage),
    Group(GroupEvent),
}

//! Transport trait: the chat network the bot speaks through.

use async_trait::async_trait;
use futures::stream::Stream;

use crate::error::Result;
use crate::types::{GroupMetadata, OutgoingMedia, ParticipantAction, TransportEvent};

/// Inbound event stream handed out by [`Transport::listen`].
pub type EventStream = Box<dyn Stream<Item = TransportEvent> + Send + Unpin>;

/// A chat transport (WhatsApp, console, ...).
///
/// Failures reaching the network surface as
/// [`PlugHostError::TransportUnavailable`](crate::PlugHostError::TransportUnavailable).
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send_text(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()>;

    async fn send_media(&self, chat_id: &str, media: OutgoingMedia) -> Result<()>;

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata>;

    async fn group_participants_update(
        &self,
        group_id: &str,
        participant_ids: &[String],
        action: ParticipantAction,
    ) -> Result<()>;

    /// Start receiving messages and group events.
    async fn listen(&self) -> Result<EventStream>;
}

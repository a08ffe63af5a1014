//! Test doubles for the capability traits.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{PlugHostError, Result};
use crate::traits::transport::{EventStream, Transport};
use crate::types::{GroupMetadata, GroupParticipant, OutgoingMedia, ParticipantAction};

/// A transport that records everything sent through it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    texts: Mutex<Vec<(String, String)>>,
    media: Mutex<Vec<(String, OutgoingMedia)>>,
    updates: Mutex<Vec<(String, Vec<String>, ParticipantAction)>>,
    offline: std::sync::atomic::AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with `TransportUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn sent_texts(&self) -> Vec<(String, String)> {
        self.texts.lock().clone()
    }

    pub fn sent_media_count(&self) -> usize {
        self.media.lock().len()
    }

    pub fn participant_updates(&self) -> Vec<(String, Vec<String>, ParticipantAction)> {
        self.updates.lock().clone()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            Err(PlugHostError::TransportUnavailable("recording transport offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_text(&self, chat_id: &str, text: &str, _reply_to: Option<&str>) -> Result<()> {
        self.check_online()?;
        self.texts.lock().push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn send_media(&self, chat_id: &str, media: OutgoingMedia) -> Result<()> {
        self.check_online()?;
        self.media.lock().push((chat_id.to_string(), media));
        Ok(())
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        self.check_online()?;
        Ok(GroupMetadata {
            id: group_id.to_string(),
            subject: format!("group {group_id}"),
            participants: vec![GroupParticipant { id: "owner".into(), admin: true }],
        })
    }

    async fn group_participants_update(
        &self,
        group_id: &str,
        participant_ids: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        self.check_online()?;
        self.updates
            .lock()
            .push((group_id.to_string(), participant_ids.to_vec(), action));
        Ok(())
    }

    async fn listen(&self) -> Result<EventStream> {
        Ok(Box::new(futures::stream::pending()))
    }
}

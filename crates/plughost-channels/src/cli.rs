//! Console transport: stdin lines in, replies printed to stdout.
//!
//! Every line becomes a message from the configured chat and sender, except:
//! - `!join <id..>` / `!leave <id..>` become `participants.add` / `participants.remove`
//!   group events for the configured chat
//! - `/admin <command>` lines are handed to [`CliTransport::admin_lines`]

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use plughost_core::config::CliTransportConfig;
use plughost_core::error::{PlugHostError, Result};
use plughost_core::traits::{EventStream, Transport};
use plughost_core::types::{
    GroupEvent, GroupEventKind, GroupMetadata, GroupParticipant, IncomingMessage, OutgoingMedia,
    ParticipantAction, TransportEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{LinesStream, UnboundedReceiverStream};

/// Prefix of operator commands typed into the console.
pub const ADMIN_PREFIX: &str = "/admin ";

/// What one console line means.
#[derive(Debug, Clone)]
pub enum CliInput {
    Event(TransportEvent),
    Admin(String),
}

/// Line interpretation state shared with the stdin reader task.
struct Console {
    config: CliTransportConfig,
    members: Mutex<HashMap<String, BTreeSet<String>>>,
    next_id: AtomicU64,
}

pub struct CliTransport {
    console: Arc<Console>,
    out: Mutex<Box<dyn Write + Send>>,
    admin_tx: mpsc::UnboundedSender<String>,
    admin_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    listening: AtomicBool,
}

impl CliTransport {
    pub fn new(config: CliTransportConfig) -> Self {
        Self::with_writer(config, Box::new(std::io::stdout()))
    }

    /// Print replies into `out` instead of stdout.
    pub fn with_writer(config: CliTransportConfig, out: Box<dyn Write + Send>) -> Self {
        let (admin_tx, admin_rx) = mpsc::unbounded_channel();
        Self {
            console: Arc::new(Console {
                config,
                members: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
            out: Mutex::new(out),
            admin_tx,
            admin_rx: Mutex::new(Some(admin_rx)),
            listening: AtomicBool::new(false),
        }
    }

    /// Admin command lines typed into the console. Can be taken once.
    pub fn admin_lines(&self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.admin_rx.lock().take()
    }

    /// Interpret one console line. Blank lines yield nothing.
    pub fn parse_line(&self, line: &str) -> Option<CliInput> {
        self.console.parse_line(line)
    }

    fn print(&self, line: &str) -> Result<()> {
        let mut out = self.out.lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        Ok(())
    }
}

impl Console {
    fn parse_line(&self, line: &str) -> Option<CliInput> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return None;
        }
        if let Some(command) = line.strip_prefix(ADMIN_PREFIX) {
            return Some(CliInput::Admin(command.trim().to_string()));
        }

        let membership = line
            .strip_prefix("!join ")
            .map(|ids| (GroupEventKind::ParticipantsAdd, ids))
            .or_else(|| line.strip_prefix("!leave ").map(|ids| (GroupEventKind::ParticipantsRemove, ids)));
        if let Some((kind, ids)) = membership {
            let participants: Vec<String> = ids.split_whitespace().map(str::to_string).collect();
            if !participants.is_empty() {
                self.track(&self.config.chat_id, &participants, kind);
                return Some(CliInput::Event(TransportEvent::Group(GroupEvent {
                    kind,
                    group_id: self.config.chat_id.clone(),
                    participants,
                    actor: Some(self.config.sender_id.clone()),
                })));
            }
        }

        let id = format!("cli-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut message = IncomingMessage::text(&id, &self.config.chat_id, &self.config.sender_id, line);
        message.is_group = self.config.is_group;
        Some(CliInput::Event(TransportEvent::Message(message)))
    }

    fn track(&self, group_id: &str, ids: &[String], kind: GroupEventKind) {
        let mut members = self.members.lock();
        let group = members.entry(group_id.to_string()).or_default();
        for id in ids {
            match kind {
                GroupEventKind::ParticipantsAdd => {
                    group.insert(id.clone());
                }
                GroupEventKind::ParticipantsRemove => {
                    group.remove(id);
                }
                _ => {}
            }
        }
    }
}

#[async_trait]
impl Transport for CliTransport {
    fn name(&self) -> &str {
        "cli"
    }

    async fn send_text(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()> {
        match reply_to {
            Some(id) => self.print(&format!("💬 [{chat_id}] ↩ {id}: {text}")),
            None => self.print(&format!("💬 [{chat_id}] {text}")),
        }
    }

    async fn send_media(&self, chat_id: &str, media: OutgoingMedia) -> Result<()> {
        let caption = media.caption.as_deref().unwrap_or("");
        self.print(&format!(
            "📎 [{chat_id}] {} ({}, {} bytes) {caption}",
            media.kind.as_str(),
            media.mime(),
            media.bytes.len()
        ))
    }

    async fn group_metadata(&self, group_id: &str) -> Result<GroupMetadata> {
        let members = self.console.members.lock();
        let mut participants: Vec<GroupParticipant> = members
            .get(group_id)
            .map(|ids| {
                ids.iter()
                    .map(|id| GroupParticipant {
                        id: id.clone(),
                        admin: false,
                    })
                    .collect()
            })
            .unwrap_or_default();
        participants.push(GroupParticipant {
            id: self.console.config.sender_id.clone(),
            admin: true,
        });
        Ok(GroupMetadata {
            id: group_id.to_string(),
            subject: format!("console {group_id}"),
            participants,
        })
    }

    async fn group_participants_update(
        &self,
        group_id: &str,
        participant_ids: &[String],
        action: ParticipantAction,
    ) -> Result<()> {
        self.console.track(group_id, participant_ids, action.into());
        self.print(&format!("👥 [{group_id}] {} {}", action.as_str(), participant_ids.join(", ")))
    }

    async fn listen(&self) -> Result<EventStream> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(PlugHostError::TransportUnavailable("console is already being read".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let admin = self.admin_tx.clone();
        let console = self.console.clone();

        tokio::spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("⚠️ Console read failed: {e}");
                        break;
                    }
                };
                let delivered = match console.parse_line(&line) {
                    Some(CliInput::Event(event)) => tx.send(event).is_ok(),
                    Some(CliInput::Admin(command)) => admin.send(command).is_ok(),
                    None => true,
                };
                if !delivered {
                    break;
                }
            }
            tracing::info!("📭 Console input closed");
        });

        Ok(Box::new(UnboundedReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    fn transport() -> (CliTransport, Buffer) {
        let buffer = Buffer::default();
        let config = CliTransportConfig {
            chat_id: "room".into(),
            sender_id: "me".into(),
            is_group: true,
        };
        (CliTransport::with_writer(config, Box::new(buffer.clone())), buffer)
    }

    #[test]
    fn test_parse_message_line() {
        let (cli, _) = transport();
        match cli.parse_line(".menu fun\n") {
            Some(CliInput::Event(TransportEvent::Message(m))) => {
                assert_eq!(m.body, ".menu fun");
                assert_eq!(m.chat_id, "room");
                assert_eq!(m.sender_id, "me");
                assert!(m.is_group);
                assert_eq!(m.id, "cli-1");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(cli.parse_line("   ").is_none());
    }

    #[test]
    fn test_parse_membership_and_admin_lines() {
        let (cli, _) = transport();
        match cli.parse_line("!join alice bob") {
            Some(CliInput::Event(TransportEvent::Group(e))) => {
                assert_eq!(e.kind, GroupEventKind::ParticipantsAdd);
                assert_eq!(e.group_id, "room");
                assert_eq!(e.participants, vec!["alice", "bob"]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            cli.parse_line("!leave bob"),
            Some(CliInput::Event(TransportEvent::Group(GroupEvent { kind: GroupEventKind::ParticipantsRemove, .. })))
        ));
        assert!(matches!(
            cli.parse_line("/admin disable ping"),
            Some(CliInput::Admin(ref c)) if c == "disable ping"
        ));
        // A bare "!join" is an ordinary message.
        assert!(matches!(
            cli.parse_line("!join"),
            Some(CliInput::Event(TransportEvent::Message(_)))
        ));
    }

    #[tokio::test]
    async fn test_group_metadata_tracks_members() {
        let (cli, out) = transport();
        cli.parse_line("!join alice bob");
        cli.parse_line("!leave bob");
        cli.group_participants_update("room", &["carol".into()], ParticipantAction::Add)
            .await
            .unwrap();

        let meta = cli.group_metadata("room").await.unwrap();
        let ids: Vec<_> = meta.participants.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol", "me"]);
        assert!(out.text().contains("add carol"));
    }

    #[tokio::test]
    async fn test_replies_are_printed() {
        let (cli, out) = transport();
        cli.send_text("room", "pong", Some("cli-1")).await.unwrap();
        cli.send_media(
            "room",
            OutgoingMedia::new(plughost_core::types::MediaKind::Image, vec![0; 4]).with_caption("cat"),
        )
        .await
        .unwrap();
        let text = out.text();
        assert!(text.contains("[room] ↩ cli-1: pong"));
        assert!(text.contains("image (image/jpeg, 4 bytes) cat"));
    }

    #[test]
    fn test_admin_lines_taken_once() {
        let (cli, _) = transport();
        assert!(cli.admin_lines().is_some());
        assert!(cli.admin_lines().is_none());
    }
}

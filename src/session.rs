//! The session controller: one conversation, its identity, and the connection serving it.
//!
//! A session is either a draft (no identity yet) or bound to a chat.  A draft becomes bound on
//! its first send, either by minting the identity locally or by adopting the one the backend
//! announces with `chat_created`.  Moving to another chat tears the connection down, loads the
//! new chat's history, and only then reconnects; frames still queued from the old connection
//! carry an older epoch and are dropped.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, watch};

use crate::backend::Backend;
use crate::client_logger::ClientLogger;
use crate::config::{IdentityMode, SessionConfig};
use crate::connection::{ConnectionScope, ConnectionState};
use crate::error::{Error, Result};
use crate::observability::{
    SESSION_SEND_REJECTED, SESSION_STALE_FRAMES, SESSION_STREAM_ERRORS, SESSION_TURN_DURATION,
    SESSION_TURNS,
};
use crate::reducer::{Applied, Conversation};
use crate::socket::{Connection, Connector, InboundEvent, InboundFrame};
use crate::types::{
    ChatIdentity, LocalFile, Message, MessageKind, PendingUpload, ProtocolEvent, SendFrame,
    UserMessage,
};
use crate::uploads::MediaUploadCoordinator;

/// What an inbound frame changed, for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// The streaming reply grew by this fragment.
    Token(String),
    /// The reply finished.
    Finished,
    /// The draft was bound to the chat the backend created.
    Bound(ChatIdentity),
    /// The reply failed, or its socket dropped, and shows the fallback text.
    Failed,
    /// Nothing visible changed.
    Ignored,
}

/// Drives one conversation.
pub struct SessionController {
    backend: Arc<dyn Backend>,
    config: SessionConfig,
    identity: Option<ChatIdentity>,
    conversation: Conversation,
    uploads: MediaUploadCoordinator,
    connection: Connection,
    frames: mpsc::UnboundedReceiver<InboundFrame>,
    epoch: u64,
    logger: Option<Arc<dyn ClientLogger>>,
    turn_started: Option<Instant>,
}

impl SessionController {
    /// Starts a draft session and connects it.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> Result<Self> {
        let (connection, frames) = Connection::spawn(connector, config.reconnect_delay);
        let epoch = 1;
        connection.connect(ConnectionScope::Draft, epoch)?;
        Ok(Self {
            backend,
            uploads: MediaUploadCoordinator::new(config.attachment_cap),
            config,
            identity: None,
            conversation: Conversation::new(),
            connection,
            frames,
            epoch,
            logger: None,
            turn_started: None,
        })
    }

    /// Captures traffic with `logger`.
    pub fn with_logger(mut self, logger: Arc<dyn ClientLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// The identity of the bound chat; `None` for a draft.
    pub fn identity(&self) -> Option<&ChatIdentity> {
        self.identity.as_ref()
    }

    /// The messages, oldest first.
    pub fn messages(&self) -> &[Message] {
        self.conversation.messages()
    }

    /// Returns true while a reply is streaming.
    pub fn is_processing(&self) -> bool {
        self.conversation.is_processing()
    }

    /// Returns true if messages can be sent.
    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// The connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// A receiver that observes connection state changes.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The model asked to answer.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Changes the model for the following turns.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
        tracing::info!(model = %self.config.model, "model selected");
    }

    /// The attachments of the message being composed.
    pub fn uploads(&self) -> &MediaUploadCoordinator {
        &self.uploads
    }

    /// Mutable access to the attachments, for hosts that stage and finish uploads themselves.
    pub fn uploads_mut(&mut self) -> &mut MediaUploadCoordinator {
        &mut self.uploads
    }

    /// Uploads `files` as attachments of the next message.
    ///
    /// Returns how many resolved; files beyond the attachment limit are discarded.
    pub async fn attach(&mut self, files: Vec<LocalFile>) -> Result<usize> {
        self.uploads.enqueue(self.backend.as_ref(), files).await
    }

    /// Removes the attachment at `index`.
    pub fn detach(&mut self, index: usize) -> Option<PendingUpload> {
        self.uploads.remove(index)
    }

    /// Sends a message.
    ///
    /// Frames queued since the last wait are applied first, so a reply that already ended
    /// does not hold the send back.  A send is rejected without changing anything while an
    /// attachment uploads, while the previous reply streams, or (for text turns) while
    /// disconnected.  Otherwise the message and a placeholder for the reply are appended and
    /// the attachments are handed over.  If the frame cannot be written the turn is rolled back
    /// and the attachments stay armed.
    pub async fn send(&mut self, content: &str, kind: MessageKind) -> Result<()> {
        let drained = self.poll_updates();
        if !drained.is_empty() {
            tracing::debug!(updates = drained.len(), "applied queued frames before sending");
        }
        if self.uploads.is_uploading() {
            SESSION_SEND_REJECTED.click();
            return Err(Error::uploads_pending(self.uploads.in_flight()));
        }
        if self.conversation.is_processing() {
            SESSION_SEND_REJECTED.click();
            return Err(Error::turn_in_progress());
        }
        if kind == MessageKind::Image {
            return self.send_image(content).await;
        }
        if !self.connection.is_connected() {
            SESSION_SEND_REJECTED.click();
            return Err(Error::not_connected(format!(
                "cannot send while {}",
                self.connection.state()
            )));
        }

        // The identity is only kept once the frame carrying it is written.
        let identity = match (&self.identity, self.config.identity_mode) {
            (Some(identity), _) => Some(identity.clone()),
            (None, IdentityMode::ClientMinted) => Some(ChatIdentity::mint()),
            (None, IdentityMode::ServerAssigned) => None,
        };
        let (message, user) = self.compose(content, kind);
        let frame = SendFrame::new(message, identity.as_ref());
        self.conversation.begin_turn(
            user,
            Message::placeholder(Some(self.config.model.clone()), kind),
        );
        match self.connection.send(&frame).await {
            Ok(()) => {
                if self.identity.is_none() && identity.is_some() {
                    tracing::info!(identity = ?identity, "bound new chat");
                }
                self.identity = identity;
                self.uploads.armed_keys();
                self.turn_started = Some(Instant::now());
                SESSION_TURNS.click();
                if let Some(logger) = &self.logger {
                    logger.log_send(&frame);
                }
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "send failed; rolling back");
                self.conversation.rollback_turn();
                Err(err)
            }
        }
    }

    // Image turns go over HTTP and need a persisted chat, so a draft is bound first.
    async fn send_image(&mut self, prompt: &str) -> Result<()> {
        let identity = match &self.identity {
            Some(identity) => identity.clone(),
            None => {
                let identity = ChatIdentity::mint();
                tracing::info!(%identity, "bound new chat for image");
                self.identity = Some(identity.clone());
                identity
            }
        };
        let (message, user) = self.compose(prompt, MessageKind::Image);
        self.conversation.begin_turn(
            user,
            Message::placeholder(Some(self.config.model.clone()), MessageKind::Image),
        );
        self.uploads.armed_keys();
        SESSION_TURNS.click();
        let start = Instant::now();
        match self.backend.generate_image(&identity, &message).await {
            Ok(reply) => {
                SESSION_TURN_DURATION.add(start.elapsed().as_secs_f64());
                self.conversation.complete_turn(reply);
            }
            Err(err) => {
                SESSION_STREAM_ERRORS.click();
                tracing::warn!(error = %err, "image generation failed");
                self.conversation
                    .apply(&ProtocolEvent::error(Some(err.to_string())));
            }
        }
        Ok(())
    }

    fn compose(&self, content: &str, kind: MessageKind) -> (UserMessage, Message) {
        let media = self.uploads.peek_armed();
        let message = UserMessage::new(content, self.config.model.clone(), kind)
            .with_media_keys(media.keys.clone());
        let user = message
            .to_message()
            .with_media(media.keys, media.preview_urls);
        (message, user)
    }

    /// Switches to an existing chat.
    ///
    /// The connection is closed and the messages cleared before the history is fetched, so no
    /// stale message is ever shown.  If the fetch fails the session falls back to a draft,
    /// reconnects, and returns [`Error::HistoryLoad`].
    pub async fn select_chat(&mut self, identity: ChatIdentity) -> Result<()> {
        if self.identity.as_ref() == Some(&identity) {
            return Ok(());
        }
        self.connection.close()?;
        self.reset();
        tracing::info!(%identity, "loading chat");
        match self.backend.chat_history(&identity).await {
            Ok(record) => {
                if let Some(logger) = &self.logger {
                    logger.log_history(&record);
                }
                self.conversation.load(record.messages);
                self.identity = Some(identity.clone());
                self.connection
                    .connect(ConnectionScope::Chat(identity), self.epoch)?;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%identity, error = %err, "failed to load chat; starting a new one");
                self.connection.connect(ConnectionScope::Draft, self.epoch)?;
                Err(Error::history_load(identity, err))
            }
        }
    }

    /// Leaves the current chat for a new draft.
    pub fn start_new_chat(&mut self) -> Result<()> {
        self.connection.close()?;
        self.reset();
        tracing::info!("started new chat");
        self.connection.connect(ConnectionScope::Draft, self.epoch)
    }

    fn reset(&mut self) {
        self.epoch += 1;
        self.identity = None;
        self.conversation.clear();
        self.uploads.clear();
        self.turn_started = None;
    }

    /// Waits for the next frame of the current chat and applies it.
    ///
    /// Returns `None` once the connection task has stopped.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let frame = self.frames.recv().await?;
            if let Some(update) = self.accept(frame) {
                return Some(update);
            }
        }
    }

    /// Applies every frame of the current chat that has already arrived, without waiting.
    pub fn poll_updates(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            updates.extend(self.accept(frame));
        }
        updates
    }

    fn accept(&mut self, frame: InboundFrame) -> Option<SessionUpdate> {
        if frame.epoch != self.epoch {
            SESSION_STALE_FRAMES.click();
            tracing::debug!(epoch = frame.epoch, current = self.epoch, "dropping stale frame");
            return None;
        }
        Some(match frame.event {
            InboundEvent::Protocol(event) => self.handle_frame(event),
            InboundEvent::Lost => self.connection_lost(),
        })
    }

    // The socket carrying the open turn is gone, so its reply can never finish.
    fn connection_lost(&mut self) -> SessionUpdate {
        if !self.conversation.is_processing() {
            return SessionUpdate::Ignored;
        }
        let err = Error::streaming("connection lost before the reply finished", None);
        match self.conversation.apply(&ProtocolEvent::error(Some(err.to_string()))) {
            Applied::Failed => {
                self.turn_failed(&err);
                SessionUpdate::Failed
            }
            _ => SessionUpdate::Ignored,
        }
    }

    fn turn_failed(&mut self, err: &Error) {
        SESSION_STREAM_ERRORS.click();
        self.turn_started = None;
        tracing::warn!(error = %err, "reply failed");
    }

    /// Applies one inbound event.
    pub fn handle_frame(&mut self, event: ProtocolEvent) -> SessionUpdate {
        if let Some(logger) = &self.logger {
            logger.log_event(self.identity.as_ref(), &event);
        }
        match self.conversation.apply(&event) {
            Applied::Token => match event {
                ProtocolEvent::Token { content } => SessionUpdate::Token(content.unwrap_or_default()),
                _ => SessionUpdate::Ignored,
            },
            Applied::Finished => {
                if let Some(start) = self.turn_started.take() {
                    SESSION_TURN_DURATION.add(start.elapsed().as_secs_f64());
                }
                SessionUpdate::Finished
            }
            Applied::ChatCreated(created) => match &self.identity {
                None => {
                    tracing::info!(identity = %created, "bound new chat");
                    self.identity = Some(created.clone());
                    SessionUpdate::Bound(created)
                }
                Some(current) if *current == created => SessionUpdate::Ignored,
                Some(current) => {
                    tracing::warn!(%current, %created, "ignoring identity for another chat");
                    SessionUpdate::Ignored
                }
            },
            Applied::Failed => {
                let detail = match event {
                    ProtocolEvent::Error {
                        content: Some(content),
                    } => content,
                    _ => "the backend reported an error".to_string(),
                };
                self.turn_failed(&Error::streaming(detail, None));
                SessionUpdate::Failed
            }
            Applied::Ignored => SessionUpdate::Ignored,
        }
    }

    /// Closes the connection without reconnecting.
    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }
}

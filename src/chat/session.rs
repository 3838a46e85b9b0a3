//! The interactive chat session.
//!
//! [`ChatSession`] ties a [`SessionController`] and a [`HistoryController`] to a
//! [`Renderer`]: it streams replies to the terminal and carries out slash commands.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::Backend;
use crate::chat::commands::{ChatCommand, help_text};
use crate::chat::render::Renderer;
use crate::config::SessionConfig;
use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::history::HistoryController;
use crate::session::{SessionController, SessionUpdate};
use crate::socket::Connector;
use crate::types::{ChatSummary, LocalFile, MessageKind};

/// How often a streaming wait checks for an interrupt.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// What the REPL should do after a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Keep reading input.
    Continue,

    /// Exit.
    Quit,
}

/// An interactive chat session.
pub struct ChatSession {
    backend: Arc<dyn Backend>,
    controller: SessionController,
    history: HistoryController,
}

impl ChatSession {
    /// Starts a draft session.  Must be called within a tokio runtime.
    pub fn new(
        backend: Arc<dyn Backend>,
        connector: Arc<dyn Connector>,
        config: SessionConfig,
    ) -> Result<Self> {
        let history = HistoryController::new(config.page_size);
        let controller = SessionController::new(backend.clone(), connector, config)?;
        Ok(Self {
            backend,
            controller,
            history,
        })
    }

    /// Wraps an existing controller.
    pub fn with_controller(backend: Arc<dyn Backend>, controller: SessionController) -> Self {
        let history = HistoryController::new(controller.config().page_size);
        Self {
            backend,
            controller,
            history,
        }
    }

    /// The underlying session.
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// The chat list.
    pub fn history(&self) -> &HistoryController {
        &self.history
    }

    /// The current model.
    pub fn model(&self) -> &str {
        self.controller.model()
    }

    /// Sends a text message and renders the reply as it streams.
    ///
    /// Returns once the reply finishes or fails, or when the renderer asks to stop waiting.
    /// An abandoned reply keeps streaming into the conversation; the next send applies whatever
    /// has arrived and is only refused if that reply is still going.
    pub async fn send_streaming(&mut self, content: &str, renderer: &mut dyn Renderer) -> Result<()> {
        self.controller.send(content, MessageKind::Text).await?;
        let mut state = self.controller.watch_connection();
        state.borrow_and_update();
        loop {
            tokio::select! {
                update = self.controller.next_update() => {
                    match update {
                        Some(SessionUpdate::Token(text)) => renderer.print_token(&text),
                        Some(SessionUpdate::Finished) => {
                            renderer.finish_response();
                            return Ok(());
                        }
                        Some(SessionUpdate::Failed) => {
                            let detail = self
                                .controller
                                .messages()
                                .last()
                                .map(|m| m.content.clone())
                                .unwrap_or_default();
                            renderer.print_error(&detail);
                            return Ok(());
                        }
                        Some(SessionUpdate::Bound(identity)) => {
                            tracing::debug!(%identity, "chat bound while streaming");
                        }
                        Some(SessionUpdate::Ignored) => {}
                        None => return Err(Error::not_connected("connection task stopped")),
                    }
                }
                changed = state.changed() => {
                    if changed.is_err() {
                        return Err(Error::not_connected("connection task stopped"));
                    }
                    let current = *state.borrow_and_update();
                    match current {
                        ConnectionState::Disconnected => {
                            renderer.print_info("Connection lost; reconnecting...")
                        }
                        ConnectionState::Connected => renderer.print_info("Reconnected."),
                        ConnectionState::Connecting => {}
                    }
                }
                _ = tokio::time::sleep(INTERRUPT_POLL) => {
                    if renderer.should_interrupt() {
                        renderer.print_interrupted();
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Carries out a command, reporting failures through the renderer.
    pub async fn handle_command(
        &mut self,
        command: ChatCommand,
        renderer: &mut dyn Renderer,
    ) -> CommandOutcome {
        match self.run_command(command, renderer).await {
            Ok(outcome) => outcome,
            Err(err) => {
                renderer.print_error(&err.to_string());
                CommandOutcome::Continue
            }
        }
    }

    async fn run_command(
        &mut self,
        command: ChatCommand,
        renderer: &mut dyn Renderer,
    ) -> Result<CommandOutcome> {
        match command {
            ChatCommand::Quit => return Ok(CommandOutcome::Quit),
            ChatCommand::Help => renderer.print_info(help_text()),
            ChatCommand::Invalid(message) => renderer.print_error(&message),
            ChatCommand::New => {
                self.controller.start_new_chat()?;
                renderer.print_info("Started a new chat.");
            }
            ChatCommand::Chats => {
                self.history.fetch_page(self.backend.as_ref(), true).await?;
                self.print_chats(renderer);
            }
            ChatCommand::More => {
                if self.history.is_exhausted() {
                    renderer.print_info("No more chats.");
                } else {
                    self.history.fetch_page(self.backend.as_ref(), false).await?;
                    self.print_chats(renderer);
                }
            }
            ChatCommand::Search(term) => {
                let term = term.unwrap_or_default();
                self.history.search(self.backend.as_ref(), &term).await?;
                self.print_chats(renderer);
            }
            ChatCommand::Open(index) => {
                let summary = self.summary(index)?;
                self.controller.select_chat(summary.identity()).await?;
                renderer.print_info(&format!("Opened \"{}\".", summary.title_preview));
                for message in self.controller.messages() {
                    renderer.print_message(message);
                }
            }
            ChatCommand::Delete(index) => {
                let summary = self.summary(index)?;
                self.history
                    .delete_summary(self.backend.as_ref(), &summary.chat_id, summary.timestamp)
                    .await?;
                if self.controller.identity() == Some(&summary.identity()) {
                    self.controller.start_new_chat()?;
                }
                renderer.print_info(&format!("Deleted \"{}\".", summary.title_preview));
            }
            ChatCommand::Attach(path) => {
                let file = LocalFile::read(path).await?;
                let name = file.file_name();
                match self.controller.attach(vec![file]).await? {
                    0 => renderer.print_info(&format!(
                        "Attachment limit of {} reached.",
                        self.controller.uploads().cap()
                    )),
                    _ => renderer.print_info(&format!("Attached {name}.")),
                }
            }
            ChatCommand::Detach(index) => match self.controller.detach(index) {
                Some(upload) => {
                    renderer.print_info(&format!("Removed {}.", upload.local_file.file_name()))
                }
                None => renderer.print_error(&format!("No attachment {}.", index + 1)),
            },
            ChatCommand::Attachments => {
                renderer.print_attachments(self.controller.uploads().pending())
            }
            ChatCommand::Model(model) => {
                self.controller.set_model(model.clone());
                renderer.print_info(&format!("Model changed to: {model}"));
            }
            ChatCommand::Image(prompt) => {
                self.controller.send(&prompt, MessageKind::Image).await?;
                if let Some(reply) = self.controller.messages().last() {
                    renderer.print_message(reply);
                }
            }
            ChatCommand::Status => self.print_status(renderer),
        }
        Ok(CommandOutcome::Continue)
    }

    fn summary(&self, index: usize) -> Result<ChatSummary> {
        self.history.get(index).cloned().ok_or_else(|| {
            Error::validation(
                format!("no chat {} in the list; use /chats", index + 1),
                Some("index".to_string()),
            )
        })
    }

    fn print_chats(&self, renderer: &mut dyn Renderer) {
        renderer.print_chats(self.history.summaries(), !self.history.is_exhausted());
    }

    fn print_status(&self, renderer: &mut dyn Renderer) {
        let chat = match self.controller.identity() {
            Some(identity) => identity.to_string(),
            None => "new chat".to_string(),
        };
        let uploads = self.controller.uploads();
        renderer.print_info(&format!(
            "connection: {}\nchat: {chat}\nmodel: {}\nmessages: {}\nattachments: {}/{}",
            self.controller.connection_state(),
            self.controller.model(),
            self.controller.messages().len(),
            uploads.pending().len(),
            uploads.cap(),
        ));
    }
}

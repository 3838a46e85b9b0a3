//! Output rendering for the chat application.
//!
//! A trait-based rendering abstraction so the REPL can be styled for a terminal, left plain for
//! piping, or captured in tests.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use time::OffsetDateTime;
use time::macros::format_description;

use crate::types::{ChatSummary, Message, MessageRole, PendingUpload};

/// ANSI escape code for dim text (used for metadata).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for informational lines).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for the user's messages).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for list indices).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print a streamed chunk of the assistant's reply.
    fn print_token(&mut self, text: &str);

    /// Called once the reply is complete.
    fn finish_response(&mut self);

    /// Print a whole message, as when replaying a loaded chat.
    fn print_message(&mut self, message: &Message);

    /// Print the chat list; `more` says whether another page exists.
    fn print_chats(&mut self, summaries: &[ChatSummary], more: bool);

    /// Print the pending attachments.
    fn print_attachments(&mut self, uploads: &[PendingUpload]);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when the user interrupts a streaming reply.
    fn print_interrupted(&mut self) {}

    /// Returns true if the wait for the current reply should stop.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    out: Box<dyn Write + Send>,
    use_color: bool,
    in_reply: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer {
    /// Creates a renderer that writes to stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a renderer that writes to stdout with the given color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }

    /// Creates a renderer over any writer.
    pub fn with_writer(out: impl Write + Send + 'static, use_color: bool) -> Self {
        Self {
            out: Box::new(out),
            use_color,
            in_reply: false,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        if self.in_reply {
            let _ = writeln!(self.out);
            self.in_reply = false;
        }
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_token(&mut self, text: &str) {
        if !self.in_reply {
            let label = self.styled(ANSI_DIM, "Assistant: ");
            let _ = write!(self.out, "{label}");
            self.in_reply = true;
        }
        let _ = write!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn finish_response(&mut self) {
        if self.in_reply {
            let _ = writeln!(self.out);
            self.in_reply = false;
        }
        let _ = writeln!(self.out);
        let _ = self.out.flush();
    }

    fn print_message(&mut self, message: &Message) {
        let text = match message.role {
            MessageRole::User => {
                let label = self.styled(ANSI_YELLOW, "You:");
                format!("{label} {}", message.content)
            }
            MessageRole::Assistant => {
                let label = self.styled(ANSI_DIM, "Assistant:");
                match &message.media {
                    Some(media) if message.content.is_empty() => format!("{label} [image] {media}"),
                    Some(media) => format!("{label} {} [image] {media}", message.content),
                    None => format!("{label} {}", message.content),
                }
            }
        };
        self.line(&text);
        if !message.media_keys.is_empty() {
            let attached = self.styled(
                ANSI_DIM,
                &format!("  attached: {}", message.media_keys.join(", ")),
            );
            self.line(&attached);
        }
    }

    fn print_chats(&mut self, summaries: &[ChatSummary], more: bool) {
        if summaries.is_empty() {
            self.line("No chats.");
            return;
        }
        for (index, summary) in summaries.iter().enumerate() {
            let number = self.styled(ANSI_GREEN, &format!("{:>3}.", index + 1));
            let when = self.styled(ANSI_DIM, &format_timestamp(summary.timestamp));
            self.line(&format!("{number} {}  {when}", summary.title_preview));
        }
        if more {
            let hint = self.styled(ANSI_DIM, "  (/more for older chats)");
            self.line(&hint);
        }
    }

    fn print_attachments(&mut self, uploads: &[PendingUpload]) {
        if uploads.is_empty() {
            self.line("No attachments.");
            return;
        }
        for (index, upload) in uploads.iter().enumerate() {
            let number = self.styled(ANSI_GREEN, &format!("{:>3}.", index + 1));
            let state = if upload.is_uploading {
                "uploading"
            } else if upload.remote_key.is_some() {
                "ready"
            } else {
                "pending"
            };
            let state = self.styled(ANSI_DIM, state);
            self.line(&format!("{number} {}  {state}", upload.local_file.file_name()));
        }
    }

    fn print_error(&mut self, error: &str) {
        let text = self.styled(ANSI_RED, &format!("Error: {error}"));
        self.line(&text);
    }

    fn print_info(&mut self, info: &str) {
        let text = self.styled(ANSI_CYAN, info);
        self.line(&text);
    }

    fn print_interrupted(&mut self) {
        let text = self.styled(ANSI_DIM, "[stopped waiting for the reply]");
        self.line(&text);
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Formats a chat timestamp (seconds since the epoch) as a UTC date and time.
pub fn format_timestamp(timestamp: f64) -> String {
    OffsetDateTime::from_unix_timestamp(timestamp as i64)
        .ok()
        .and_then(|dt| {
            dt.format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
                .ok()
        })
        .unwrap_or_else(|| timestamp.to_string())
}

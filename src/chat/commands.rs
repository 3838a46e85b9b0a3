//! Slash command parsing for the chat application.
//!
//! Lines starting with `/` control the session; everything else is sent to the model.

/// A parsed chat command.
///
/// Indices carried by commands are zero-based; users type them one-based, as listed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Leave the current chat and start a draft.
    New,

    /// Fetch the first page of chats.
    Chats,

    /// Fetch the next page of chats.
    More,

    /// Search chats; `None` clears the search.
    Search(Option<String>),

    /// Open the listed chat at the index.
    Open(usize),

    /// Delete the listed chat at the index.
    Delete(usize),

    /// Attach a file from disk.
    Attach(String),

    /// Remove the attachment at the index.
    Detach(usize),

    /// List pending attachments.
    Attachments,

    /// Change the model.
    Model(String),

    /// Ask for a generated image.
    Image(String),

    /// Show connection and session state.
    Status,

    /// Show help.
    Help,

    /// Exit.
    Quit,

    /// Unknown or malformed command, with a message for the user.
    Invalid(String),
}

/// Parses a line of user input.
///
/// Returns `None` when the input is not a command.
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();

    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ChatCommand::New,
        "chats" | "list" => ChatCommand::Chats,
        "more" => ChatCommand::More,
        "search" => ChatCommand::Search(argument.map(|s| s.to_string())),
        "open" => parse_index(argument, ChatCommand::Open, "/open"),
        "delete" => parse_index(argument, ChatCommand::Delete, "/delete"),
        "attach" => match argument {
            Some(path) => ChatCommand::Attach(path.to_string()),
            None => ChatCommand::Invalid("/attach requires a file path".to_string()),
        },
        "detach" => parse_index(argument, ChatCommand::Detach, "/detach"),
        "attachments" => ChatCommand::Attachments,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model id".to_string()),
        },
        "image" => match argument {
            Some(prompt) => ChatCommand::Image(prompt.to_string()),
            None => ChatCommand::Invalid("/image requires a prompt".to_string()),
        },
        "status" => ChatCommand::Status,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

fn parse_index(
    argument: Option<&str>,
    constructor: fn(usize) -> ChatCommand,
    name: &str,
) -> ChatCommand {
    match argument {
        Some(arg) => match arg.parse::<usize>() {
            Ok(n) if n > 0 => constructor(n - 1),
            _ => ChatCommand::Invalid(format!("{name} expects a positive number")),
        },
        None => ChatCommand::Invalid(format!("{name} requires a number")),
    }
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new chat
  /chats                 List recent chats
  /more                  Load more chats
  /search [term]         Search chats (no argument clears the search)
  /open <n>              Open chat n from the list
  /delete <n>            Delete chat n from the list
  /attach <path>         Attach a file to the next message
  /detach <n>            Remove attachment n
  /attachments           List pending attachments
  /model <id>            Change the model
  /image <prompt>        Generate an image
  /status                Show connection and session state
  /help                  Show this help message
  /quit                  Exit the chat"#
}

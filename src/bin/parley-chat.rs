//! Interactive chat against a parley backend.
//!
//! # Usage
//!
//! ```bash
//! # Development backend on localhost:8000
//! parley-chat
//!
//! # Production backend, logged in
//! PARLEY_ENV=production PARLEY_HOST=chat.example.com PARLEY_PASSWORD=... \
//!     parley-chat --username ada@example.com
//!
//! # Deployment from a YAML file, different model
//! parley-chat --config deploy.yaml --model openai/gpt-4o
//! ```
//!
//! Type `/help` at the prompt for the list of commands.  Logging goes to stderr and is
//! controlled by `RUST_LOG`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use parley::chat::{
    ChatArgs, ChatConfig, ChatSession, CommandOutcome, PASSWORD_VAR, PlainTextRenderer, Renderer,
    parse_command,
};
use parley::ApiClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("parley-chat [OPTIONS]");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = ChatConfig::from_args(args)?;
    let mut rl = DefaultEditor::new()?;

    let client = Arc::new(ApiClient::new(&config.client)?);
    if let Some(username) = config.username.as_deref() {
        let password = match std::env::var(PASSWORD_VAR) {
            Ok(password) => password,
            Err(_) => rl.readline("Password: ")?,
        };
        client.login(username, &password).await?;
        println!("Logged in as {username}.");
    }

    let connector = Arc::new(client.connector());
    let mut session = ChatSession::new(client.clone(), connector, config.session.clone())?;

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;
    let mut renderer =
        PlainTextRenderer::with_color(config.use_color).with_interrupt(interrupted.clone());

    println!("Parley Chat ({}, model: {})", client.base_url(), session.model());
    println!("Type /help for commands, /quit to exit\n");

    loop {
        interrupted.store(false, Ordering::Relaxed);

        match rl.readline("You: ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(line);

                if let Some(command) = parse_command(line) {
                    if session.handle_command(command, &mut renderer).await == CommandOutcome::Quit
                    {
                        println!("Goodbye!");
                        break;
                    }
                    continue;
                }

                if let Err(e) = session.send_streaming(line, &mut renderer).await {
                    renderer.print_error(&e.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    session.controller().close()?;
    Ok(())
}

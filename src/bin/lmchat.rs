//! Interactive terminal client for the chat backend.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a local backend, opening the most recent chat
//! lmchat
//!
//! # Another server, a specific chat and model
//! lmchat --base-url http://gpu-box:5000/ --chat 12 --model llama3
//!
//! # Disable colors (useful for piping output)
//! lmchat --no-color
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/new` - Start a new chat
//! - `/model <name>` - Select a model
//! - `/stop` - Stop the reply in progress
//! - `/quit` - Exit the application
//!
//! Ctrl-C while a message is sent or a reply streams stops it.

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use lmchat::chat::{ChatArgs, ChatCommand, ChatConfig, help_text, parse_command};
use lmchat::{
    ChatView, FileStore, HttpBackend, ModelRegistry, PlainTextView, SessionController, StartError,
    Submission, init_tracing,
};

type Controller = SessionController<HttpBackend, FileStore, PlainTextView>;

/// Main entry point for the lmchat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("lmchat [OPTIONS]");
    let config = ChatConfig::from(args);
    init_tracing(&config.log_level);

    let backend = HttpBackend::with_options(
        Some(config.base_url.clone()),
        Some(config.timeout),
        config.cookie.clone(),
    )?;
    let registry = ModelRegistry::load(FileStore::open(&config.state_file)?)?;
    let view = PlainTextView::with_color(config.use_color);
    let mut controller =
        SessionController::new(Arc::new(backend), registry, view).with_idle_timeout(config.idle_timeout);

    if let Err(err) = controller.refresh_models().await {
        tracing::warn!(error = %err, "could not load the model catalog");
        controller
            .view_mut()
            .render_error(&format!("Could not load models: {err}"));
    }
    if let Some(model) = config.model.as_deref() {
        controller.set_model(model)?;
    }
    open_initial_chat(&mut controller, config.chat.as_deref()).await;

    let mut rl = DefaultEditor::new()?;

    // Raised by Ctrl+C; observed while a message is sent and while a reply streams
    let stop = controller.stop_signal();
    let stop_clone = stop.clone();
    ctrlc::set_handler(move || {
        stop_clone.raise();
    })?;

    println!(
        "lmchat ({}, model: {})",
        controller.backend().base_url(),
        controller.registry().selection()
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        // Reset stop flag before each input
        stop.reset();

        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    if !run_command(&mut controller, cmd).await {
                        break;
                    }
                    continue;
                }

                // Regular message - send to the backend
                match controller.submit(line).await {
                    Ok(Submission::Started) => controller.drive().await,
                    Ok(Submission::Stopped) => controller
                        .view_mut()
                        .render_info("Stopped the reply in progress; your message was not sent."),
                    Ok(Submission::Rejected(StartError::NoModel)) => controller
                        .view_mut()
                        .render_error("No model selected. Use /models and /model <name>."),
                    Ok(Submission::Rejected(err)) => {
                        controller.view_mut().render_error(&err.to_string())
                    }
                    Err(err) => controller.view_mut().render_error(&err.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                controller
                    .view_mut()
                    .render_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    controller.stop();
    controller.settle().await;
    Ok(())
}

/// Returns false when the REPL should exit.
async fn run_command(controller: &mut Controller, cmd: ChatCommand) -> bool {
    match cmd {
        ChatCommand::Quit => {
            println!("Goodbye!");
            return false;
        }
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
        }
        ChatCommand::New => match controller.new_chat().await {
            Ok(chat) => controller
                .view_mut()
                .render_info(&format!("Opened new chat {} ({})", chat.id, chat.title)),
            Err(err) => controller
                .view_mut()
                .render_error(&format!("Failed to create chat: {}", err)),
        },
        ChatCommand::Chats => match controller.list_chats().await {
            Ok(chats) if chats.is_empty() => controller.view_mut().render_info("No chats."),
            Ok(chats) => {
                let current = controller.current_chat().cloned();
                for chat in chats {
                    let marker = if Some(&chat.id) == current.as_ref() {
                        "*"
                    } else {
                        " "
                    };
                    println!("    {marker} {:>6}  {}", chat.id, chat.title);
                }
            }
            Err(err) => controller
                .view_mut()
                .render_error(&format!("Failed to list chats: {}", err)),
        },
        ChatCommand::Open(chat) => {
            controller.open_chat(chat.clone());
            controller
                .view_mut()
                .render_info(&format!("Switched to chat {}", chat));
        }
        ChatCommand::Delete(chat) => match controller.delete_chat(&chat).await {
            Ok(()) => {
                controller
                    .view_mut()
                    .render_info(&format!("Deleted chat {}", chat));
                if controller.current_chat().is_none() {
                    open_initial_chat(controller, None).await;
                }
            }
            Err(err) => controller
                .view_mut()
                .render_error(&format!("Failed to delete chat: {}", err)),
        },
        ChatCommand::Rename(title) => {
            if let Err(err) = controller.rename_chat(&title).await {
                controller
                    .view_mut()
                    .render_error(&format!("Failed to rename chat: {}", err));
            }
        }
        ChatCommand::Models => print_models(controller),
        ChatCommand::Model(model) => match controller.set_model(&model) {
            Ok(()) if model.is_empty() => {
                controller.view_mut().render_info("Model selection cleared.")
            }
            Ok(()) => controller
                .view_mut()
                .render_info(&format!("Model changed to: {}", model)),
            Err(err) => controller
                .view_mut()
                .render_error(&format!("Failed to save model selection: {}", err)),
        },
        ChatCommand::Retry => {
            if controller.retry().await {
                controller.drive().await;
            } else {
                controller
                    .view_mut()
                    .render_info("Nothing to resend.");
            }
        }
        ChatCommand::Stop => {
            if !controller.stop() {
                controller.view_mut().render_info("Nothing to stop.");
            }
        }
        ChatCommand::Status => print_status(controller),
        ChatCommand::Invalid(message) => {
            controller.view_mut().render_error(&message);
        }
    }
    true
}

async fn open_initial_chat(controller: &mut Controller, requested: Option<&str>) {
    if let Some(chat) = requested {
        controller.open_chat(chat.into());
        return;
    }
    match controller.list_chats().await {
        Ok(chats) => {
            if let Some(latest) = chats.into_iter().next() {
                controller.open_chat(latest.id);
                return;
            }
        }
        Err(err) => tracing::warn!(error = %err, "could not list chats"),
    }
    if let Err(err) = controller.new_chat().await {
        controller
            .view_mut()
            .render_error(&format!("Failed to create chat: {}", err));
    }
}

fn print_models(controller: &Controller) {
    let registry = controller.registry();
    if registry.models().is_empty() {
        println!("    No models available.");
        return;
    }
    println!("    Models:");
    for model in registry.models() {
        let marker = if registry.selection().as_str() == model {
            "*"
        } else {
            " "
        };
        println!("      {marker} {}", model);
    }
}

fn print_status(controller: &Controller) {
    println!("    Status:");
    match controller.current_chat() {
        Some(chat) => println!("      Chat: {}", chat),
        None => println!("      Chat: (none)"),
    }
    println!("      Model: {}", controller.registry().selection());
    println!("      Generation: {}", controller.state());
    let reply = controller.reply();
    if let Some(id) = reply.message_id() {
        println!("      Last message id: {}", id);
    }
    println!("      Last reply: {} chars", reply.text().chars().count());
}

//! stay - terminal client for the stay chat backend

mod commands;
mod config;

use clap::Parser;
use commands::Command;
use std::io::{self, Write};
use std::sync::Arc;
use stay_api::{ChatMessage, FormField, HttpChatClient, Role};
use stay_chat::{ChatStore, SessionOutcome, StoreEvent};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

/// stay - chat with the pricing assistant
#[derive(Parser, Debug)]
#[command(name = "stay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Backend API root (default: http://localhost:8000/api/v1)
    #[arg(short, long)]
    base_url: Option<String>,

    /// Open an existing conversation by id
    #[arg(short, long)]
    conversation: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        Some(EnvFilter::new("stay=debug"))
    } else {
        EnvFilter::try_from_default_env().ok()
    };

    if let Some(filter) = filter {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    // Initialize config and exit
    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let cfg = config::Config::load();
    let client = HttpChatClient::new(cfg.client_config(args.base_url))?;
    let base_url = client.config().base_url.clone();
    let mut store = ChatStore::new(cfg.chat_config(), Arc::new(client));

    if let Err(e) = store.load_conversations().await {
        eprintln!("Warning: could not load conversations from {}: {}", base_url, e);
    }

    if let Some(ref id) = args.conversation {
        if let Err(e) = store.select_conversation(id).await {
            eprintln!("Error opening conversation {}: {}", id, e);
            std::process::exit(1);
        }
        print_history(&store);
    }

    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    tokio::spawn(print_events(store.subscribe(), ended_tx));

    // Ctrl-C stops a streaming reply; with nothing streaming it exits
    let handle = store.handle();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if !handle.abort() {
                eprintln!();
                std::process::exit(130);
            }
        }
    });

    if io::IsTerminal::is_terminal(&io::stderr()) {
        eprintln!("stay ({})", base_url);
        eprintln!("Type /help for commands.");
        eprintln!();
    }

    run_interactive(&mut store, &mut ended_rx).await
}

async fn run_interactive(
    store: &mut ChatStore,
    ended: &mut mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<()> {
    loop {
        let label = store
            .conversation()
            .title
            .clone()
            .unwrap_or_else(|| "new".to_string());
        print!("{}> ", label);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            // EOF
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match commands::parse_command(input) {
            Some(command) => match execute(store, command, ended).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => eprintln!("Error: {}", e),
            },
            None => {
                let result = store.send_message(input).await;
                finish_exchange(store, ended, result).await;
            }
        }
        println!();
    }

    Ok(())
}

/// Run a slash command; returns `true` when the user asked to quit
async fn execute(
    store: &mut ChatStore,
    command: Command,
    ended: &mut mpsc::UnboundedReceiver<()>,
) -> anyhow::Result<bool> {
    match command {
        Command::Help => println!("{}", commands::help_message()),
        Command::New => {
            store.new_conversation();
            println!("Started a new conversation.");
        }
        Command::List => {
            store.load_conversations().await?;
            print_conversations(store);
        }
        Command::Open(target) => {
            let Some(id) = resolve_target(store, &target) else {
                println!("No conversation at that position. Use /list first.");
                return Ok(false);
            };
            store.select_conversation(&id).await?;
            print_history(store);
        }
        Command::Delete(target) => {
            let Some(id) = resolve_target(store, &target) else {
                println!("No conversation at that position. Use /list first.");
                return Ok(false);
            };
            store.delete_conversation(&id).await?;
            println!("Deleted conversation {}.", id);
        }
        Command::Edit {
            message_id,
            content,
        } => {
            let result = store.edit_message(message_id, &content).await;
            if matches!(result, Ok(None)) {
                println!("Message {} is not one of your messages here.", message_id);
            }
            finish_exchange(store, ended, result).await;
        }
        Command::Regenerate { message_id } => {
            let result = store.regenerate_message(message_id).await;
            if matches!(result, Ok(None)) {
                println!("Message {} is not an assistant reply here.", message_id);
            }
            finish_exchange(store, ended, result).await;
        }
        Command::Confirm => match store.confirm_action().await? {
            None => println!("Nothing to confirm."),
            Some(result) if result.success => {
                if let Some(message) = store.messages().last() {
                    println!("{}", message.content);
                }
            }
            Some(_) => println!("The action was not applied."),
        },
        Command::Cancel => {
            if store.cancel_action() {
                println!("Action dismissed.");
            } else {
                println!("Nothing to cancel.");
            }
        }
        Command::Form => {
            let open = store.messages().iter().enumerate().rev().find_map(|(i, m)| {
                m.form
                    .as_ref()
                    .filter(|f| !f.submitted)
                    .map(|f| (i, f.descriptor.clone()))
            });
            let Some((index, form)) = open else {
                println!("No open form.");
                return Ok(false);
            };

            let mut values = Vec::with_capacity(form.fields.len());
            for field in &form.fields {
                values.push(read_field(field)?);
            }
            let Some(reply) = commands::form_reply(&form.fields, &values) else {
                println!("Form left empty.");
                return Ok(false);
            };

            store.mark_form_submitted(index);
            let result = store.send_message(&reply).await;
            finish_exchange(store, ended, result).await;
        }
        Command::History => print_history(store),
        Command::Quit => return Ok(true),
        Command::Usage(usage) => println!("Usage: {}", usage),
        Command::Unknown(cmd) => {
            println!("Unknown command: /{}", cmd);
            println!("Type /help for available commands.");
        }
    }
    Ok(false)
}

/// Ask for one form field; required fields are asked again until answered
fn read_field(field: &FormField) -> io::Result<String> {
    loop {
        print!("  {}: ", commands::field_prompt(field));
        io::stdout().flush()?;

        let mut value = String::new();
        if io::stdin().read_line(&mut value)? == 0 {
            return Ok(String::new());
        }
        let value = value.trim().to_string();
        if value.is_empty() && field.required {
            println!("  {} is required.", field.label);
            continue;
        }
        return Ok(value);
    }
}

fn resolve_target(store: &ChatStore, target: &commands::Target) -> Option<String> {
    let ids: Vec<&str> = store.conversations().iter().map(|c| c.id.as_str()).collect();
    target.resolve(&ids).map(str::to_string)
}

/// Wait for the printer to finish the exchange, then report how it ended
async fn finish_exchange(
    store: &ChatStore,
    ended: &mut mpsc::UnboundedReceiver<()>,
    result: stay_chat::Result<Option<SessionOutcome>>,
) {
    match result {
        Ok(Some(outcome)) => {
            let _ = ended.recv().await;
            match outcome {
                SessionOutcome::Completed => {}
                SessionOutcome::Aborted => println!("[stopped]"),
                SessionOutcome::Errored { message, .. } => {
                    println!("{}", store.config().failure_notice);
                    eprintln!("Error: {}", message);
                }
            }
        }
        Ok(None) => {}
        Err(e) => eprintln!("Error: {}", e),
    }
}

/// Print streamed output as the store reports it
async fn print_events(
    mut events: broadcast::Receiver<StoreEvent>,
    ended: mpsc::UnboundedSender<()>,
) {
    let mut in_thinking = false;
    let mut streamed = String::new();

    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Printer lagged, dropped {} events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        match event {
            StoreEvent::SessionStarted { .. } => {
                in_thinking = false;
                streamed.clear();
                println!();
            }
            StoreEvent::ThinkingDelta { delta, .. } => {
                if !in_thinking {
                    print!("[thinking] ");
                    in_thinking = true;
                }
                print!("{}", delta);
                io::stdout().flush().ok();
            }
            StoreEvent::ContentDelta { delta, .. } => {
                if in_thinking {
                    println!("\n");
                    in_thinking = false;
                }
                streamed.push_str(&delta);
                print!("{}", delta);
                io::stdout().flush().ok();
            }
            StoreEvent::FormAttached { .. } => {
                println!("\n[form] The assistant attached a form. Fill it in with /form.");
            }
            StoreEvent::PendingActionChanged {
                action: Some(action),
            } => {
                let title = if action.display.title.is_empty() {
                    action.action_type.as_str()
                } else {
                    action.display.title.as_str()
                };
                println!("\n[action] {}", title);
                for item in &action.display.items {
                    println!("  {}", item);
                }
                println!("  /confirm to apply, /cancel to dismiss");
            }
            StoreEvent::MessageFinalized { message, .. } => {
                if message.content != streamed {
                    if in_thinking || !streamed.is_empty() {
                        println!();
                    }
                    print!("{}", message.content);
                }
                in_thinking = false;
                if let Some(p) = &message.pricing {
                    println!(
                        "\n[pricing] {}: conservative {:.2}, suggested {:.2}, aggressive {:.2}",
                        p.target_date, p.conservative_price, p.suggested_price, p.aggressive_price
                    );
                }
            }
            StoreEvent::SessionEnded { .. } => {
                println!();
                if ended.send(()).is_err() {
                    break;
                }
            }
            _ => {}
        }
    }
}

fn print_conversations(store: &ChatStore) {
    let conversations = store.conversations();
    if conversations.is_empty() {
        println!("No conversations yet.");
        return;
    }

    let current = store.conversation().id.as_deref();
    for (i, c) in conversations.iter().enumerate() {
        let marker = if Some(c.id.as_str()) == current { "*" } else { " " };
        println!(
            "{}{:>3}. {:<40} {}",
            marker,
            i + 1,
            c.title.as_deref().unwrap_or("(untitled)"),
            c.id
        );
    }
    println!("\nOpen with: /open <n>");
}

fn print_history(store: &ChatStore) {
    let messages = store.messages();
    if messages.is_empty() {
        println!("No messages.");
        return;
    }
    for message in messages {
        println!("{}", format_message(message));
    }
}

fn format_message(message: &ChatMessage) -> String {
    let id = message
        .id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "-".to_string());
    let role = match message.role {
        Role::User => "you",
        Role::Assistant => "assistant",
    };
    let mut line = format!("[{}] {}: {}", id, role, message.content);
    if message.pricing.is_some() {
        line.push_str(" [pricing]");
    }
    if let Some(form) = &message.form {
        line.push_str(if form.submitted { " [form submitted]" } else { " [form]" });
    }
    line
}

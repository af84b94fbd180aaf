// ABOUTME: Simple interactive console client for a chatline conversation.
// ABOUTME: Usage: chat-repl [config.toml]; credentials also via CHATLINE_SECRET/CHATLINE_TOKEN.

use chatline::{Activity, ActivityType, ClientConfig, ConnectionClient};
use std::io::{self, BufRead, Write};

fn print_colored(color: &str, text: &str) {
    let code = match color {
        "green" => "\x1b[32m",
        "yellow" => "\x1b[33m",
        "cyan" => "\x1b[36m",
        "red" => "\x1b[31m",
        "dim" => "\x1b[2m",
        "bold" => "\x1b[1m",
        _ => "",
    };
    print!("{}{}\x1b[0m", code, text);
}

fn println_colored(color: &str, text: &str) {
    print_colored(color, text);
    println!();
}

fn print_help() {
    println!();
    println_colored("bold", "Commands:");
    println!("  /status   - Show the connection status");
    println!("  /quit     - End the conversation and exit");
    println!("  /help     - Show this help");
    println!();
    println!("Type anything else to send as a message.");
    println!();
}

fn print_activity(activity: &Activity) {
    let sender = activity
        .from
        .as_ref()
        .map(|from| from.name.clone().unwrap_or_else(|| from.id.clone()))
        .unwrap_or_else(|| "bot".to_string());

    match activity.activity_type {
        ActivityType::Message => {
            print_colored("cyan", &format!("{}: ", sender));
            println!("{}", activity.text.as_deref().unwrap_or(""));
            for attachment in &activity.attachments {
                println_colored(
                    "dim",
                    &format!(
                        "  [attachment: {} {}]",
                        attachment.content_type,
                        attachment.content_url.as_deref().unwrap_or("(inline)")
                    ),
                );
            }
        }
        ActivityType::Typing => {
            println_colored("dim", &format!("{} is typing...", sender));
        }
        ActivityType::EndOfConversation => {
            println_colored("yellow", "The bot ended the conversation.");
        }
        _ => {
            println_colored(
                "dim",
                &format!("[{:?} activity from {}]", activity.activity_type, sender),
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.get(1) {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::load()?,
    };

    println!();
    println_colored("bold", "chatline REPL");
    println!("Service: {}", config.base_url);

    let client = ConnectionClient::new(config)?;
    let mut status_rx = client.status();

    println!("Connecting...");
    let mut receiver = client.start().await?;
    println_colored("green", "Online.");
    print_help();

    // Print incoming activities as they arrive
    tokio::spawn(async move {
        while let Some(activity) = receiver.recv().await {
            print_activity(&activity);
            print_colored("bold", ">>> ");
            io::stdout().flush().ok();
        }
        println_colored("yellow", "\nActivity stream closed.");
    });

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print_colored("bold", ">>> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" => break,
            "/help" => print_help(),
            "/status" => {
                println!("Status: {}", *status_rx.borrow_and_update());
            }
            text => match client.post_activity(Activity::message(text)).await {
                Ok(id) => println_colored("dim", &format!("[sent {}]", id)),
                Err(e) => println_colored("red", &format!("Error: {}", e)),
            },
        }
    }

    client.end();
    println_colored("yellow", "Conversation ended.");
    Ok(())
}

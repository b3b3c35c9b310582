use std::sync::Arc;

use clap::Parser;
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use lingoroom::cli::Args;
use lingoroom::config::AppConfig;
use lingoroom::lifecycle::RoomLifecycle;
use lingoroom::store::MemoryStore;
use lingoroom::translate::{EchoTranslator, HttpTranslator, TranslationProvider};
use lingoroom::{ChatController, ChatEvent};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => match AppConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{} {}", "config error:".bright_red(), e);
                std::process::exit(1);
            }
        },
        None => AppConfig::default(),
    };

    let endpoint = args.endpoint.clone().or_else(|| config.translation.endpoint.clone());
    let translator: Arc<dyn TranslationProvider> = match endpoint {
        Some(url) => Arc::new(HttpTranslator::with_cache_size(url, config.translation.cache_size)),
        None => Arc::new(EchoTranslator),
    };

    let store = MemoryStore::new();
    let presence = store.presence();
    let lifecycle = Arc::new(
        RoomLifecycle::new(Arc::new(store), translator, config.lifecycle_config())
            .with_presence(Arc::new(presence)),
    );

    let idle_grace = config.idle_grace();
    let (mut controller, mut events) = ChatController::new(lifecycle, config);

    match controller.login(&args.room, &args.password, &args.name, &args.language).await {
        Ok(outcome) => {
            println!(
                "{} room '{}' ({})",
                "connected:".bright_green(),
                args.room.bright_white(),
                outcome
            );
            println!("{}", "type a message, or /quit to leave".bright_black());
        }
        Err(e) => {
            eprintln!("{} {}", "login failed:".bright_red(), e);
            std::process::exit(1);
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                controller.touch();

                if line == "/quit" {
                    break;
                }
                match controller.send(&line).await {
                    Ok(message) => {
                        println!(
                            "{} {} {}",
                            format!("{}:", message.sender).bright_cyan().bold(),
                            message.original_text,
                            format!("→ {}", message.translated_text).bright_black()
                        );
                    }
                    Err(e) => eprintln!("{} {}", "send failed:".bright_red(), e),
                }
            }

            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ChatEvent::Users(users) => {
                        let names: Vec<&str> = users.iter().map(|u| u.name.as_str()).collect();
                        println!(
                            "{} {} ({}/2)",
                            "members:".bright_yellow(),
                            names.join(", "),
                            users.len()
                        );
                    }
                    ChatEvent::Messages(messages) => {
                        if let Some(last) = messages.last() {
                            println!(
                                "{} {}",
                                format!("[{}]", last.sender).bright_magenta(),
                                last.translated_text
                            );
                        }
                    }
                    ChatEvent::Settings(settings) => {
                        println!(
                            "{} empty room is {}",
                            "settings:".bright_yellow(),
                            if settings.auto_delete_empty {
                                "deleted on leave"
                            } else {
                                "kept for the sweep"
                            }
                        );
                    }
                    ChatEvent::RoomVanished => {
                        eprintln!("{}", "room was deleted, logging out".bright_red());
                        break;
                    }
                    ChatEvent::IdleTimeout => {
                        eprintln!(
                            "{}",
                            "no activity, logging out automatically".bright_yellow()
                        );
                        tokio::time::sleep(idle_grace).await;
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = controller.logout().await {
        eprintln!("{} {}", "logout error:".bright_red(), e);
    }
    println!("{}", "left the room".bright_green());
}

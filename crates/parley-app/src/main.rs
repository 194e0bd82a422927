//! Parley application binary - composition root.
//!
//! Ties the Parley crates together into a runnable widget demo:
//! 1. Load configuration from TOML
//! 2. Open the chat store (SQLite by default, in-memory with --memory)
//! 3. Seed demo rules and settings on first run
//! 4. Initialize the widget runtime for this visitor
//! 5. Drive an interactive conversation loop on stdin
//!
//! Plain input lines are visitor messages. Slash commands expose the
//! operator-side controls that a dashboard would normally own:
//! `/open`, `/close`, `/mode auto|ai|live`, `/online`, `/end`, `/quit`.

mod cli;

use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use parley_core::config::ParleyConfig;
use parley_core::types::{MatchType, Message, OperatorMode, Rule, RuleKind, Sender, VisitorId};
use parley_engine::WidgetRuntime;
use parley_rules::CannedAiResponder;
use parley_store::{ChatStore, MemoryStore, SqliteStore};

use cli::CliArgs;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config.
    let config_file = args.resolve_config_path();
    let config = ParleyConfig::load_or_default(&config_file);

    // Tracing.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    tracing::info!("Starting Parley v{}", env!("CARGO_PKG_VERSION"));

    // Store.
    let use_memory = args.memory || config.store.backend == "memory";
    let store: Arc<dyn ChatStore> = if use_memory {
        tracing::info!("Using in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        let data_dir = args.resolve_data_dir(&config.general.data_dir);
        let db_path = data_dir.join(&config.store.database);
        let store = SqliteStore::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "SQLite store opened");
        Arc::new(store)
    };

    // Widget config: CLI tenant wins; the demo falls back to "demo" so a
    // bare `parley` run works out of the box.
    let mut widget_config = config.widget.clone();
    widget_config.tenant = args.resolve_tenant(&widget_config.tenant);
    if widget_config.tenant.trim().is_empty() {
        widget_config.tenant = "demo".to_string();
    }

    seed_demo_rules(store.as_ref(), &widget_config.tenant).await?;

    // Widget runtime for this visitor. A fresh visitor id per run keeps
    // demo sessions independent; embed deployments persist theirs.
    let runtime = WidgetRuntime::init(
        &widget_config,
        Arc::clone(&store),
        Arc::new(CannedAiResponder),
        &config.typing,
        VisitorId::generate(),
    )
    .await?;

    println!(
        "Parley demo — chatting with {} (tenant '{}').",
        runtime.settings().business_name,
        widget_config.tenant
    );
    println!("Type a message, or /help for commands.\n");

    runtime.open_widget().await;
    let mut printed = print_new_messages(&runtime, 0);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = input.strip_prefix('/') {
            if !handle_command(&runtime, command).await {
                break;
            }
        } else {
            match runtime.submit_visitor_message(input).await {
                Ok(_) => {}
                Err(e) => println!("  ! {}", e),
            }
        }
        printed = print_new_messages(&runtime, printed);
    }

    tracing::info!("Parley demo exiting");
    Ok(())
}

/// Execute one operator command; returns false to exit the loop.
async fn handle_command(runtime: &WidgetRuntime, command: &str) -> bool {
    let mut parts = command.split_whitespace();
    match parts.next().unwrap_or_default() {
        "open" => {
            runtime.open_widget().await;
            println!("  widget open (unread cleared)");
        }
        "close" => {
            runtime.close_widget();
            println!("  widget closed");
        }
        "mode" => match parts.next().and_then(OperatorMode::from_store) {
            Some(mode) => match runtime.set_operator_mode(mode).await {
                Ok(()) => println!("  operator mode -> {}", mode.as_str()),
                Err(e) => println!("  ! {}", e),
            },
            None => println!("  usage: /mode auto|ai|live"),
        },
        "online" => match runtime.toggle_online_status().await {
            Ok(online) => println!("  operator {}", if online { "online" } else { "offline" }),
            Err(e) => println!("  ! {}", e),
        },
        "end" => match runtime.close_session().await {
            Ok(()) => println!("  session closed (terminal)"),
            Err(e) => println!("  ! {}", e),
        },
        "status" => {
            let settings = runtime.settings();
            println!(
                "  session {} | mode {} | {} | unread: {}",
                runtime.session_info().status.as_str(),
                settings.operator_mode.as_str(),
                if settings.is_online { "online" } else { "offline" },
                runtime.has_unread(),
            );
        }
        "quit" | "exit" => return false,
        _ => {
            println!("  commands: /open /close /mode <auto|ai|live> /online /end /status /quit");
        }
    }
    true
}

/// Print timeline entries past `already_printed`; returns the new count.
fn print_new_messages(runtime: &WidgetRuntime, already_printed: usize) -> usize {
    let timeline = runtime.timeline();
    for message in timeline.iter().skip(already_printed) {
        println!("{}", format_message(message));
    }
    timeline.len()
}

fn format_message(message: &Message) -> String {
    let who = match message.sender {
        Sender::User => "you",
        Sender::Bot => "bot",
        Sender::Ai => "ai",
        Sender::Agent => "agent",
        Sender::System => "system",
    };
    format!(
        "  [{}] {:>6}: {}",
        message.created_at.format("%H:%M:%S"),
        who,
        message.content
    )
}

/// Seed example rules the first time a tenant is used, so the demo has
/// something to match against.
async fn seed_demo_rules(
    store: &dyn ChatStore,
    tenant: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if !store.rules(tenant, RuleKind::Auto).await?.is_empty()
        || !store.rules(tenant, RuleKind::Advanced).await?.is_empty()
    {
        return Ok(());
    }

    store
        .put_rules(
            tenant,
            RuleKind::Auto,
            vec![
                Rule::new(
                    vec!["hello".to_string(), "hi".to_string(), "hey".to_string()],
                    MatchType::Exact,
                    "Hello! What can we do for you today?",
                ),
                Rule::new(
                    vec!["pricing".to_string(), "price".to_string(), "cost".to_string()],
                    MatchType::Synonym,
                    "Our plans start at $29/month. Ask about a trial!",
                ),
                Rule::new(
                    vec!["refund".to_string()],
                    MatchType::Fuzzy,
                    "Refunds are processed within 3-5 business days.",
                ),
            ],
        )
        .await?;

    store
        .put_rules(
            tenant,
            RuleKind::Advanced,
            vec![Rule::new_html(
                vec!["hours".to_string(), "open".to_string()],
                MatchType::Synonym,
                "<b>Opening hours</b><br>Mon-Fri 9:00-17:00",
            )],
        )
        .await?;

    tracing::info!(tenant, "Seeded demo rules");
    Ok(())
}

//! # coedit
//!
//! Terminal client and scripted demos for coedit rooms.
//!
//! The scripted subcommands run entirely in-process on the in-memory hub and
//! store, so they need no server. `connect` joins a room on a running room
//! server and turns stdin into edits and chat.
//!
//! ```text
//! coedit demo                       two members edit and converge
//! coedit race                       live edits racing a slow snapshot load
//! coedit chat                       chat with a store outage and a retry
//! coedit connect --room r1 --name alice
//! ```

use std::sync::Arc;

use clap::{Parser, Subcommand};
use coedit_sdk::{
    quick, ChatMessage, Client, ClientConfig, DeliveryStatus, HttpRest, Participant, RestApi,
    Room, SessionEvent, WsConnector,
};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ─── CLI ───────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "coedit")]
#[command(about = "Collaborative text rooms with live sync and chat")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Basic demo: two members edit the same room and converge
    Demo,
    /// Join race: live edits arrive while the snapshot is still loading
    Race,
    /// Chat: history, a failed send during a store outage, and a retry
    Chat,
    /// Join a room on a running server and edit from the terminal
    Connect {
        /// Room code
        #[arg(long)]
        room: String,
        /// Display name
        #[arg(long)]
        name: String,
    },
}

type Failure = Box<dyn std::error::Error>;

// ─── Pretty printing ──────────────────────────────────────────────────────

fn header(text: &str) {
    let bar = "═".repeat(60);
    println!("\n{}", bar.bright_cyan());
    println!("  {}", text.bold().bright_white());
    println!("{}", bar.bright_cyan());
}

fn section(text: &str) {
    println!("\n{} {}", "▸".bright_yellow(), text.bold());
}

fn step(text: &str) {
    println!("  {} {}", "•".bright_green(), text);
}

fn show_text<R: RestApi>(room: &Room<R>) {
    let border = "─".repeat(44);
    println!("  ┌{}┐", border);
    println!(
        "  │ {:^42} │",
        format!("{} ({})", room.session.user_name(), room.session.state())
            .bright_yellow()
            .to_string()
    );
    println!("  ├{}┤", border);

    let text = room.session.text();
    if text.is_empty() {
        println!("  │ {:^42} │", "(empty)".dimmed().to_string());
    } else {
        for line in text.lines() {
            println!("  │ {:<42} │", line);
        }
    }
    println!("  └{}┘", border);
}

fn show_message(message: &ChatMessage) {
    let status = match message.status {
        DeliveryStatus::Pending => "…".dimmed(),
        DeliveryStatus::Confirmed => "✓".bright_green(),
        DeliveryStatus::Failed => "✗".bright_red(),
    };
    println!(
        "  {} {:>3} {}: {}",
        status,
        message.order,
        message.author_name.bright_magenta(),
        message.text
    );
}

fn convergence_result(converged: bool) {
    if converged {
        println!(
            "\n  {} {}",
            "✓".bright_green().bold(),
            "ALL MEMBERS CONVERGED, texts are identical".bright_green().bold()
        );
    } else {
        println!(
            "\n  {} {}",
            "✗".bright_red().bold(),
            "DIVERGENCE DETECTED, members differ".bright_red().bold()
        );
    }
}

/// Wait until every member shows the same text, or give up after a second.
async fn settle<R: RestApi>(rooms: &[&Room<R>]) -> bool {
    for _ in 0..100 {
        let first = rooms[0].session.text();
        if rooms[1..].iter().all(|room| room.session.text() == first) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}

// ─── Demo ──────────────────────────────────────────────────────────────────

async fn run_demo() -> Result<(), Failure> {
    header("DEMO - Two Members, One Document");

    section("Phase 1: Both members join room 'notes'");
    let cluster = quick::memory_clients(&["alice", "bob"]);
    let alice = cluster.clients[0].join("notes").await?;
    let bob = cluster.clients[1].join("notes").await?;
    alice.session.wait_active().await?;
    bob.session.wait_active().await?;
    step(&format!("{} members connected", cluster.hub.members("notes")));

    section("Phase 2: Alice types, Bob sees it");
    alice.session.edit("Shopping list\n- milk").await?;
    step("alice: wrote the list header and one item");
    settle(&[&alice, &bob]).await;
    show_text(&bob);

    section("Phase 3: Concurrent edits");
    let (a, b) = tokio::join!(
        alice.session.append("\n- eggs"),
        bob.session.edit("Shopping list (weekend)\n- milk"),
    );
    a?;
    b?;
    step("alice: appended '- eggs'");
    step("bob:   renamed the list at the same time");

    let converged = settle(&[&alice, &bob]).await;
    show_text(&alice);
    show_text(&bob);
    convergence_result(converged);

    section("Phase 4: The stored snapshot follows the edits");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    match cluster.rest.document("notes") {
        Some(saved) => step(&format!("saved {} characters", saved.chars().count())),
        None => step("no snapshot saved yet"),
    }

    alice.leave().await;
    bob.leave().await;
    Ok(())
}

// ─── Join race ────────────────────────────────────────────────────────────

async fn run_race() -> Result<(), Failure> {
    header("RACE - Live Edits vs. A Slow Snapshot Load");

    section("Phase 1: Bob is already editing");
    let cluster = quick::memory_clients(&["alice", "bob"]);
    let bob = cluster.clients[1].join("race").await?;
    bob.session.wait_active().await?;
    bob.session.edit("draft 1").await?;
    step("bob: 'draft 1'");

    section("Phase 2: Alice joins while the store is slow");
    let gate = cluster.rest.hold_snapshots();
    let alice = cluster.clients[0].join("race").await?;
    let mut events = alice.session.subscribe();
    step(&format!("alice is {}", alice.session.state()));

    bob.session.edit("draft 2, live").await?;
    step("bob: 'draft 2, live'");
    settle(&[&alice, &bob]).await;
    show_text(&alice);

    section("Phase 3: The snapshot finally arrives");
    gate.release();
    alice.session.wait_active().await?;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::SnapshotDiscarded => step("snapshot discarded, live state wins"),
            SessionEvent::Active { seeded } => step(&format!("active (seeded: {})", seeded)),
            _ => {}
        }
    }

    alice.session.append(" + alice").await?;
    let converged = settle(&[&alice, &bob]).await;
    show_text(&alice);
    show_text(&bob);
    convergence_result(converged);

    alice.leave().await;
    bob.leave().await;
    Ok(())
}

// ─── Chat ─────────────────────────────────────────────────────────────────

async fn run_chat() -> Result<(), Failure> {
    header("CHAT - History, Outage And Retry");

    section("Phase 1: Alice and Bob talk");
    let cluster = quick::memory_clients(&["alice", "bob", "carol"]);
    let alice = cluster.clients[0].join("lobby").await?;
    let bob = cluster.clients[1].join("lobby").await?;
    alice.chat.send("hi bob").await?;
    bob.chat.send("hey alice").await?;
    for message in alice.chat.messages() {
        show_message(&message);
    }

    section("Phase 2: The store goes offline");
    cluster.rest.set_offline(true);
    if let Err(err) = alice.chat.send("anyone there?").await {
        step(&format!("send failed: {}", err));
    }
    for message in alice.chat.messages() {
        show_message(&message);
    }

    section("Phase 3: Back online, retry");
    cluster.rest.set_offline(false);
    let failed: Vec<u64> = alice
        .chat
        .messages()
        .iter()
        .filter(|m| m.status == DeliveryStatus::Failed)
        .map(|m| m.order)
        .collect();
    for order in failed {
        let message = alice.chat.retry(order).await?;
        show_message(&message);
    }

    section("Phase 4: Carol joins and reads the history");
    let carol = cluster.clients[2].join("lobby").await?;
    for message in carol.chat.messages() {
        show_message(&message);
    }
    Ok(())
}

// ─── Connect ──────────────────────────────────────────────────────────────

async fn run_connect(room_code: &str, name: &str) -> Result<(), Failure> {
    let config = ClientConfig::from_env();
    header(&format!("ROOM '{}' - {}", room_code, config.ws_url));

    let rest = Arc::new(HttpRest::new(config.clone())?);
    let client = Client::new(
        Participant::generate(name),
        WsConnector::new(config.ws_url.clone()),
        rest,
        config,
    );
    let room = client.join(room_code).await?;
    room.session.wait_active().await?;

    for message in room.chat.messages() {
        show_message(&message);
    }
    show_text(&room);

    println!();
    println!("  {}", "Commands:".bold().underline());
    println!("    {}                  Append a line to the document", "<text>".bright_cyan());
    println!("    {} <message>         Send a chat message", "/chat".bright_cyan());
    println!("    {}                  Show the document", "/show".bright_cyan());
    println!("    {}                  Show the chat log", "/log".bright_cyan());
    println!("    {}                  Leave the room", "/quit".bright_cyan());
    println!();

    // Print remote changes as they land
    let mut text_rx = room.session.watch_text();
    let watcher = tokio::spawn(async move {
        while text_rx.changed().await.is_ok() {
            let text = text_rx.borrow_and_update().clone();
            println!(
                "  {} {}",
                "⟳".bright_cyan(),
                text.lines().last().unwrap_or("").dimmed()
            );
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(input) = lines.next_line().await? {
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input.split_once(' ').unwrap_or((input, "")) {
            ("/quit", _) | ("/q", _) => break,
            ("/show", _) => show_text(&room),
            ("/log", _) => {
                for message in room.chat.messages() {
                    show_message(&message);
                }
            }
            ("/chat", message) => match room.chat.send(message).await {
                Ok(message) => show_message(&message),
                Err(err) => println!("  {} {}", "!".bright_red(), err),
            },
            _ => {
                let line = if room.session.text().is_empty() {
                    input.to_string()
                } else {
                    format!("\n{}", input)
                };
                if let Err(err) = room.session.append(line).await {
                    println!("  {} {}", "!".bright_red(), err);
                }
            }
        }
    }

    room.leave().await;
    watcher.abort();
    println!("  {}", "Goodbye!".dimmed());
    Ok(())
}

// ─── Entry point ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coedit_sdk=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Demo => run_demo().await,
        Commands::Race => run_race().await,
        Commands::Chat => run_chat().await,
        Commands::Connect { room, name } => run_connect(&room, &name).await,
    };

    if let Err(err) = result {
        eprintln!("{} {}", "error:".bright_red().bold(), err);
        std::process::exit(1);
    }
}

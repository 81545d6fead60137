//! TimeDriver control CLI
//!
//! Two modes:
//! - send: issue one command to a running driver's command channel
//! - watch: stand in for a time bus and print the ticks a driver publishes

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, connect_async};

use time_driver::transport::BusMessage;

#[derive(Parser)]
#[command(name = "time-control")]
#[command(about = "Send commands to a TimeDriver and watch the ticks it publishes")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one command (PAUSE, UNPAUSE, RUN <s>, UNTIL <t>, INCREASE, DECREASE, HELP)
    Send {
        /// Command words, joined with spaces
        #[arg(required = true)]
        words: Vec<String>,

        /// Command channel address
        #[arg(short, long, default_value = "ws://127.0.0.1:12002")]
        addr: String,
    },

    /// Accept time bus connections and print every frame received
    Watch {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:12001")]
        listen: String,

        /// Exit after this many ticks
        #[arg(short, long)]
        count: Option<u64>,
    },
}

async fn send(addr: &str, words: &[String]) -> Result<()> {
    let command = words.join(" ");
    let (mut ws, _) = connect_async(addr)
        .await
        .with_context(|| format!("Failed to connect to command channel at {addr}"))?;

    ws.send(Message::Text(command.clone())).await.context("Failed to send command")?;
    while let Some(frame) = ws.next().await {
        match frame.context("Command channel error")? {
            Message::Text(reply) => {
                let reply = if reply.starts_with("INVALID") { reply.red() } else { reply.green() };
                println!("{} {}", command.bold(), reply);
                let _ = ws.close(None).await;
                return Ok(());
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    anyhow::bail!("Command channel closed without a reply")
}

async fn watch(listen: &str, count: Option<u64>) -> Result<()> {
    let listener = TcpListener::bind(listen).await.with_context(|| format!("Failed to listen on {listen}"))?;
    println!("{} {}", "Watching for time buses on".cyan(), listen.bold());

    let (tick_tx, mut tick_rx) = tokio::sync::mpsc::unbounded_channel::<()>();
    let mut seen = 0u64;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted.context("Failed to accept connection")?;
                let tick_tx = tick_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) = print_bus(stream, tick_tx).await {
                        eprintln!("{} {}: {}", "Connection from".red(), peer, e);
                    }
                });
            }
            Some(()) = tick_rx.recv() => {
                seen += 1;
                if count.is_some_and(|count| seen >= count) {
                    return Ok(());
                }
            }
        }
    }
}

async fn print_bus(stream: TcpStream, ticks: tokio::sync::mpsc::UnboundedSender<()>) -> Result<()> {
    let mut path = String::new();
    let ws = accept_hdr_async(stream, |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        path = request.uri().path().to_string();
        Ok(response)
    })
    .await?;
    println!("{} {}", "Time bus connected:".green(), path.bold());

    let (_sink, mut inbound) = ws.split();
    while let Some(frame) = inbound.next().await {
        let Message::Text(text) = frame? else { continue };
        match serde_json::from_str::<BusMessage>(&text) {
            Ok(BusMessage::EnableSetTime { bus }) => println!("{} {}", "enable".yellow(), bus),
            Ok(BusMessage::SetTime { bus, tick }) => {
                println!("{:>12} {}", tick.to_string().bold(), bus.dimmed());
                let _ = ticks.send(());
            }
            Err(_) => println!("{} {}", "unrecognized".red(), text),
        }
    }
    println!("{} {}", "Time bus disconnected:".yellow(), path);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Send { words, addr } => send(&addr, &words).await,
        Commands::Watch { listen, count } => watch(&listen, count).await,
    }
}

//! Skirmish RTS - match server.
//!
//! # Usage
//!
//! ```bash
//! cargo run -p rts_server -- --port 7777 --tick-rate 10 --grace-secs 30
//! RUST_LOG=rts_server=debug cargo run -p rts_server
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rts_server::lobby::Lobby;
use rts_server::{network, ServerConfig, ServerError};

#[derive(Parser, Debug)]
#[command(name = "rts_server")]
#[command(about = "Authoritative match server for Skirmish RTS")]
#[command(version)]
struct Args {
    /// Interface to bind
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Simulation ticks per second
    #[arg(short, long)]
    tick_rate: Option<u32>,

    /// Seconds a disconnected player has to rejoin
    #[arg(short, long)]
    grace_secs: Option<u64>,

    /// Seats per room
    #[arg(short, long)]
    seats: Option<usize>,
}

impl Args {
    /// Layer the flags over the defaults.
    fn into_config(self) -> ServerConfig {
        let defaults = ServerConfig::default();
        let mut room = defaults.room.clone();
        if let Some(tick_rate) = self.tick_rate {
            room = room.with_tick_rate(tick_rate);
        }
        if let Some(grace_secs) = self.grace_secs {
            room = room.with_grace_secs(grace_secs);
        }
        if let Some(seats) = self.seats {
            room = room.with_seats(seats);
        }

        ServerConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            room,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().into_config();
    tracing::info!(
        port = config.port,
        tick_rate = config.room.tick_rate,
        seats = config.room.seats,
        grace_secs = config.room.grace_secs,
        "Starting Skirmish RTS match server"
    );

    let listener = network::bind(&config.bind_address()).await?;
    let lobby = Lobby::new(config.room);

    tokio::select! {
        () = network::serve(listener, lobby.clone()) => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        }
    }

    lobby.shutdown().await;
    tracing::info!("Server stopped");
    Ok(())
}

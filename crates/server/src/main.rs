mod config;
mod events;
mod plugin;
mod server;
mod store;

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::{self, Instant, MissedTickBehavior};

use config::ServerConfig;
use configsync::{PacketLossSimulation, SyncConfig};
use server::ConfigServer;
use store::JsonFileStore;

#[derive(Parser)]
#[command(name = "configsync-server")]
#[command(about = "Config sync server with simulated clients")]
struct Args {
    #[arg(short, long, default_value_t = 20)]
    tick_rate: u32,

    #[arg(short, long, default_value_t = 4, help = "Number of simulated clients")]
    clients: u64,

    #[arg(long, value_delimiter = ',', help = "Host names treated as admins")]
    admins: Vec<String>,

    #[arg(long, help = "JSON file holding the server's config values")]
    store: Option<PathBuf>,

    #[arg(short, long, help = "Stop after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Client whose send queue never drains")]
    stall_client: Option<u64>,

    #[arg(long, default_value_t = 10, help = "Seconds between server config edits, 0 disables")]
    edit_interval: u64,

    #[arg(long, help = "Print stats as JSON every N seconds")]
    stats_interval: Option<u64>,

    #[arg(long, default_value_t = 10_000, help = "Compress packages larger than this")]
    compression_threshold: usize,

    #[arg(long, help = "Enable global packet loss simulation")]
    simulate_packet_loss: bool,

    #[arg(long, default_value_t = 0.0, help = "Packet loss percentage (0-100)")]
    loss_percent: f32,

    #[arg(long, default_value_t = 0, help = "Minimum latency in ms")]
    min_latency: u32,

    #[arg(long, default_value_t = 0, help = "Maximum latency in ms")]
    max_latency: u32,

    #[arg(long, default_value_t = 0, help = "Jitter in ms")]
    jitter: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let global_packet_loss = if args.simulate_packet_loss {
        Some(PacketLossSimulation {
            enabled: true,
            loss_percent: args.loss_percent,
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency,
            jitter_ms: args.jitter,
        })
    } else {
        None
    };

    let config = ServerConfig {
        tick_rate: args.tick_rate,
        client_count: args.clients,
        admins: args.admins,
        sync: SyncConfig {
            compression_threshold: args.compression_threshold,
            ..Default::default()
        },
        global_packet_loss,
        stalled_client: args.stall_client,
        edit_interval: Duration::from_secs(args.edit_interval),
    };

    let store = args.store.map(JsonFileStore::open).transpose()?;
    let mut server = ConfigServer::new(config, store)?;
    log::info!("Server started with {} simulated clients", args.clients);

    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs(secs));
    let stats_every = args.stats_interval.map(Duration::from_secs);
    serve(&mut server, deadline, stats_every, tokio::signal::ctrl_c()).await?;

    log::info!("Server shutting down");
    server.shutdown();
    for event in server.drain_events() {
        log::info!("{}", event);
    }
    log::info!("{}", serde_json::to_string_pretty(&server.stats())?);

    Ok(())
}

/// Ticks the server until `shutdown` resolves, the deadline passes or the
/// server stops itself. Returns the number of ticks run.
async fn serve<F: Future>(
    server: &mut ConfigServer,
    deadline: Option<Instant>,
    stats_every: Option<Duration>,
    shutdown: F,
) -> Result<u64> {
    let running = server.running();
    let mut last_stats = Instant::now();
    let mut ticks = 0;

    let mut interval = time::interval(server.tick_duration());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tokio::pin!(shutdown);

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            _ = interval.tick() => {}
            _ = &mut shutdown => {
                running.store(false, Ordering::SeqCst);
                break;
            }
        }

        server.tick_once();
        ticks += 1;
        for event in server.drain_events() {
            log::info!("{}", event);
        }

        if let Some(every) = stats_every {
            if last_stats.elapsed() >= every {
                last_stats = Instant::now();
                println!("{}", serde_json::to_string(&server.stats())?);
            }
        }

        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_server() -> ConfigServer {
        let config = ServerConfig {
            tick_rate: 200,
            client_count: 1,
            edit_interval: Duration::ZERO,
            ..Default::default()
        };
        ConfigServer::new(config, None).unwrap()
    }

    #[tokio::test]
    async fn test_shutdown_signal_outlives_ticks() {
        let mut server = fast_server();
        let shutdown = time::sleep(Duration::from_millis(50));

        let ticks = time::timeout(
            Duration::from_secs(5),
            serve(&mut server, None, None, shutdown),
        )
        .await
        .expect("shutdown future was never completed")
        .unwrap();

        assert!(ticks > 1);
        assert!(!server.running().load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_deadline_stops_serving() {
        let mut server = fast_server();
        let deadline = Instant::now() + Duration::from_millis(30);

        let ticks = serve(&mut server, Some(deadline), None, std::future::pending::<()>())
            .await
            .unwrap();

        assert!(ticks > 0);
        assert!(server.running().load(Ordering::SeqCst));
    }
}

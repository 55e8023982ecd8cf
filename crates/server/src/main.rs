use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use lowcraft_server::config::ServerConfig;
use lowcraft_server::net::listener;
use lowcraft_server::persistence::{self, SaveTrigger, Saver};
use lowcraft_server::server::Server;
use lowcraft_server::simulation::{self, TickLoop};

const DEFAULT_CONFIG: &str = "server.toml";
/// How long shutdown waits for connections to close on their own.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn arg(name: &str) -> Option<String> {
    std::env::args().skip_while(|a| a != name).nth(1)
}

/// Config file (if any) with command-line overrides applied.
fn load_config() -> Result<ServerConfig> {
    let mut config = match arg("--config") {
        Some(path) => ServerConfig::load(&path)?,
        None if Path::new(DEFAULT_CONFIG).exists() => ServerConfig::load(DEFAULT_CONFIG)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = arg("--bind") {
        config.server.bind = bind;
    }
    if let Some(port) = arg("--port") {
        config.server.port = port.parse().with_context(|| format!("invalid --port {}", port))?;
    }
    if let Some(dir) = arg("--world") {
        config.world.dir = PathBuf::from(dir);
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = load_config();
    let level = config
        .as_ref()
        .map(|c| c.logging.level.clone())
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Bad configuration: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Server error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> Result<()> {
    tracing::info!("lowcraft server starting");

    let server = Arc::new(Server::open(config)?);
    let config = server.config();

    let socket = listener::bind(&config.bind_addr()).await?;

    // ── Background threads ──────────────────────────────────────────────
    let saver = if config.world.async_save {
        Some(Saver::spawn(Arc::clone(&server))?)
    } else {
        None
    };
    let trigger = saver.as_ref().map_or(SaveTrigger::Inline, Saver::trigger);
    let tick_thread = TickLoop::new(Arc::clone(&server), simulation::default_layers(), trigger).spawn()?;

    let accept = tokio::spawn(listener::run(Arc::clone(&server), socket));

    shutdown_signal().await;

    // ── Shutdown ────────────────────────────────────────────────────────
    tracing::info!("Shutting down...");
    server.stop();
    let closing = server.players.close_all("Server closed");
    if closing > 0 {
        tracing::info!("Closing {} connections", closing);
    }
    let deadline = Instant::now() + DRAIN_TIMEOUT;
    while server.players.active_count() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if server.players.active_count() > 0 {
        tracing::warn!("{} connections still open after {:?}", server.players.active_count(), DRAIN_TIMEOUT);
    }
    if let Err(e) = accept.await {
        tracing::error!("Listener task failed: {}", e);
    }

    let joined = tokio::task::spawn_blocking(move || {
        if tick_thread.join().is_err() {
            tracing::error!("Tick thread panicked");
        }
        if let Some(saver) = saver {
            saver.join();
        }
    })
    .await;
    if let Err(e) = joined {
        tracing::error!("Joining background threads failed: {}", e);
    }

    let report = persistence::save_pass(&server);
    tracing::info!(
        "Shutdown complete: {} chunks flushed, {} failed",
        report.saved,
        report.failed
    );
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Ctrl+C handler failed: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERM handler failed: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

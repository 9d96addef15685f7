use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use uos_linker::{bootstrap, console};
use uos_linker::chain::ChainGateway;
use uos_linker::commands::CommandDispatcher;
use uos_linker::config::{Config, LogFormat};
use uos_linker::db::Database;
use uos_linker::linking::{ChallengeStore, EosioK1Verifier, LinkService, SigningUrls};
use uos_linker::platform::{ChatPlatform, DiscordPlatform};
use uos_linker::roles::{RoleAdmin, RoleReconciler};
use uos_linker::web::{WebState, start_server};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    Dev,
    Prod,
}

#[derive(Parser)]
#[command(author, version, about = "Links Discord users to Ultra accounts and syncs guild roles")]
struct Cli {
    /// dev serves the signing page from the Vite dev server over plain http
    #[arg(long, value_enum, default_value = "prod", env = "MODE")]
    mode: Mode,

    /// Read chat commands from stdin
    #[arg(long)]
    console: bool,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(format: LogFormat, log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("uos_linker={log_level},warn")));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[cfg(feature = "libsql")]
async fn open_database(config: &Config) -> Result<Arc<dyn Database>> {
    use uos_linker::db::libsql::LibSqlBackend;

    let backend = LibSqlBackend::new_local(&config.database.path)
        .await
        .with_context(|| format!("failed to open {}", config.database.path.display()))?;
    backend
        .run_migrations()
        .await
        .context("failed to run database migrations")?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "libsql"))]
async fn open_database(_config: &Config) -> Result<Arc<dyn Database>> {
    anyhow::bail!("uos-linker was built without a database backend; enable the `libsql` feature")
}

#[tokio::main]
async fn main() -> Result<()> {
    let loaded_env = bootstrap::load_env();
    let cli = Cli::parse();
    let dev_mode = cli.mode == Mode::Dev;

    let config = Config::from_env(dev_mode).context("invalid configuration")?;
    init_tracing(config.log_format, &cli.log_level);
    info!(?loaded_env, mode = ?cli.mode, "Starting uos-linker");

    let db = open_database(&config).await?;
    let chain = Arc::new(ChainGateway::from_config(&config.chain)?);
    let platform: Arc<dyn ChatPlatform> = Arc::new(DiscordPlatform::new(&config.discord)?);

    let reconciler = Arc::new(RoleReconciler::new(
        chain.clone(),
        platform.clone(),
        db.clone(),
        config.refresh.clone(),
    ));
    let challenges = Arc::new(ChallengeStore::new(
        config.challenge.ttl,
        Arc::new(EosioK1Verifier),
    ));
    let urls = SigningUrls::new(&config.server);
    info!(callback = urls.callback_url(), "Signature callback configured");
    let links = Arc::new(LinkService::new(
        challenges,
        chain.clone(),
        db.clone(),
        platform,
        reconciler.clone(),
        urls,
    ));
    let admin = Arc::new(RoleAdmin::new(db.clone(), chain));
    let commands = Arc::new(CommandDispatcher::new(
        links.clone(),
        admin,
        reconciler.clone(),
        db,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = reconciler.spawn_sweeper(shutdown_rx);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "invalid bind address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let state = Arc::new(WebState {
        links,
        dev_mode,
    });
    let bound = start_server(addr, state).await?;
    info!(%bound, "Accepting signature callbacks");

    if cli.console {
        console::spawn_stdio(commands);
        info!("Console ready, type /help");
    }

    signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "Role sweeper did not stop cleanly");
    }
    Ok(())
}

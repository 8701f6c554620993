use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use schemars::schema_for;
use tracing::info;
use watchtower_core::control::{self, AppState};
use watchtower_core::notify::{NullNotifier, Notifier};
use watchtower_core::{Config, boot_store, init_logging, load_config, save_snapshot};

#[derive(Debug, Parser)]
#[command(
    name = "watchtower",
    version,
    about = "Continuous HTTP endpoint monitor with debounced incident tracking"
)]
struct Cli {
    /// Path to config file (json|yaml). Falls back to $CONFIG_PATH or ./config/config.json
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Print JSON schema for the config and exit
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("CONFIG_PATH").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./config/config.json"));

    if cli.print_schema {
        let schema = schema_for!(Config);
        println!("{}", serde_json::to_string_pretty(&schema)?);
        return Ok(());
    }

    let cfg: Config = if config_path.exists() {
        load_config(&config_path)?
    } else {
        Config::default()
    };
    init_logging(&cfg);
    info!(?config_path, "loaded configuration");

    let notifiers: Vec<Arc<dyn Notifier>> = vec![Arc::new(NullNotifier)];
    let store = boot_store(&cfg, notifiers).await?;

    let snapshot_path = PathBuf::from(&cfg.snapshot_path);
    // Best-effort periodic save so in-flight incident state survives an
    // unclean shutdown even without a control-plane mutation to trigger
    // a save.
    {
        let store = Arc::clone(&store);
        let snapshot_path = snapshot_path.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                ticker.tick().await;
                if let Err(err) = save_snapshot(&store, &snapshot_path) {
                    tracing::error!(error = %err, "periodic snapshot save failed");
                }
            }
        });
    }

    let state = AppState {
        store: Arc::clone(&store),
        snapshot_path: snapshot_path.clone(),
    };
    let app = control::router(state);
    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    info!(addr = cfg.listen_addr.as_str(), "control plane listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    save_snapshot(&store, &snapshot_path)?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

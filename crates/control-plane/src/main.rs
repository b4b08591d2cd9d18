// Conductor API server
// Decision: One binary; --print-config / --hash are offline helpers that exit early
// Decision: No DATABASE_URL means the in-memory store (dev mode, data lost on restart)

use anyhow::{Context, Result};
use clap::Parser;
use conductor_control_plane::{app, seed_admin, AppConfig, AppState};
use conductor_storage::{password::hash_password, StorageBackend};
use std::path::PathBuf;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "conductor", version, about = "Conductor API server")]
struct Args {
    /// Path to a JSON config file
    #[arg(long, env = "CONDUCTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Print an example config with freshly generated secrets and exit
    #[arg(long)]
    print_config: bool,

    /// Print the password hash for PASSWORD and exit
    #[arg(long, value_name = "PASSWORD")]
    hash: Option<String>,

    /// Run database migrations and exit
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conductor_control_plane=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&AppConfig::example())?);
        return Ok(());
    }
    if let Some(password) = args.hash.as_deref() {
        println!("{}", hash_password(password)?);
        return Ok(());
    }

    let config = AppConfig::load(args.config.as_deref()).context("Invalid configuration")?;
    tracing::info!("conductor starting...");

    let store = match config.database_url.as_deref() {
        Some(url) => {
            let store = StorageBackend::postgres(url)
                .await
                .context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            store.migrate().await.context("Failed to run migrations")?;
            store
        }
        None => {
            tracing::warn!("DATABASE_URL not set: using in-memory store, data is lost on restart");
            StorageBackend::in_memory()
        }
    };

    if args.migrate {
        tracing::info!("Migrations applied");
        return Ok(());
    }

    if let Some(admin) = config.admin.as_ref() {
        seed_admin(&store, admin)
            .await
            .context("Failed to create admin account")?;
    }

    let listen = config.listen.clone();
    let state = AppState::new(config, store).context("Invalid session secrets")?;

    let app = app(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&listen)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", listen);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

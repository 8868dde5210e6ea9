mod config;
mod maintenance;

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method, header::CONTENT_TYPE};
use clap::Parser;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use ck_api::registration::RegistrationRules;
use ck_api::storage::BlobStore;
use ck_api::{AppState, AppStateInner};
use ck_db::Database;
use ck_presence::{PresenceTracker, SessionStore};

use crate::config::{Cli, Command, Config};

/// How often expired sessions are swept.
const SESSION_SWEEP_SECS: u64 = 600;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ck=debug,ck_api=debug,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config;

    let db = Database::open(&config.db_path)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, db).await,
        Command::HashPasswords => {
            let (rehashed, skipped) = maintenance::hash_passwords(&db)?;
            println!("re-hashed {} password(s), {} already hashed", rehashed, skipped);
            Ok(())
        }
        Command::CheckAdmin { username } => {
            println!("{}", maintenance::check_admin(&db, &username)?);
            Ok(())
        }
        Command::CheckDb => {
            for (table, count) in maintenance::check_db(&db)? {
                println!("{:<18} {}", table, count);
            }
            println!("database OK: {}", config.db_path.display());
            Ok(())
        }
    }
}

async fn serve(config: Config, db: Database) -> anyhow::Result<()> {
    if let Some(username) = &config.superadmin {
        match maintenance::ensure_superadmin(&db, username) {
            Ok(true) => info!("Granted super-admin to {}", username),
            Ok(false) => info!("{} is already super-admin", username),
            Err(e) => warn!("Super-admin grant skipped: {}", e),
        }
    }

    let storage = BlobStore::new(config.upload_dir.clone()).await?;
    let sessions = SessionStore::new(config.session_ttl_ms());

    let state: AppState = Arc::new(AppStateInner {
        db,
        presence: PresenceTracker::new(config.presence_timeout_ms()),
        sessions: sessions.clone(),
        storage,
        rules: RegistrationRules {
            founders: config.founders(),
        },
        secure_cookies: config.secure_cookies,
    });

    // Background session sweep
    tokio::spawn(run_session_sweep(sessions, SESSION_SWEEP_SECS));

    let app = ck_api::router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("ck server listening on {}", addr);
    info!(
        "Presence timeout {} ms, session lifetime {} h",
        config.presence_timeout_ms, config.session_ttl_hours
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Cookie sessions need an explicit origin list; `*` cannot carry credentials.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .allow_credentials(true)
}

async fn run_session_sweep(sessions: SessionStore, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        let pruned = sessions.prune_expired().await;
        if pruned > 0 {
            info!("Session sweep: pruned {} expired session(s)", pruned);
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}

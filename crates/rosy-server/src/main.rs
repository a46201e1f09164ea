mod cleanup;
mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use rosy_api::clock::SystemClock;
use rosy_api::codes::{CodeService, InMemoryCodeStore};
use rosy_api::flow::FlowController;
use rosy_api::mailer::{LogMailer, Mailer, SmtpMailer};
use rosy_api::{AppState, AppStateInner};
use rosy_classifier::{Classifier, FilenameKeywordValidator};
use rosy_db::Database;

use crate::config::Config;

/// Seconds between sweeps of expired codes.
const CLEANUP_INTERVAL_SECS: u64 = 60;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rosy_server=debug,rosy_api=debug,rosy_classifier=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;
    if config.uses_dev_secret() {
        warn!("ROSY_JWT_SECRET is unset or still the development placeholder");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Classifier
    let classifier = Arc::new(Classifier::new(
        config.classifier.clone(),
        config.offline_mode.build(),
    )?);
    if classifier.is_online() {
        info!("Classifier online, model {}", config.classifier.model);
    } else {
        info!("Classifier offline, using {:?} catalog", config.offline_mode);
    }

    // Mail
    let mailer: Arc<dyn Mailer> = match config.smtp.clone() {
        Some(smtp) => {
            info!("Sending codes through SMTP relay {}:{}", smtp.host, smtp.port);
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            warn!("ROSY_SMTP_HOST not set; verification codes will only be logged");
            Arc::new(LogMailer)
        }
    };

    // Shared state
    let codes = CodeService::new(
        Arc::new(InMemoryCodeStore::new()),
        Arc::new(SystemClock),
        mailer,
        config.code_max_attempts,
    );
    let flow = FlowController::new(
        classifier,
        Arc::new(FilenameKeywordValidator::default()),
        db.clone(),
        config.upload_dir.clone(),
    );
    let state: AppState = Arc::new(AppStateInner {
        db,
        codes,
        flow,
        jwt_secret: config.jwt_secret.clone(),
    });

    tokio::spawn(cleanup::run_cleanup_loop(state.clone(), CLEANUP_INTERVAL_SECS));

    let app = rosy_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Rosy Scan server listening on {}", addr);
    info!("Proof images stored in {}", config.upload_dir.display());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
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

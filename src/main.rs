use std::sync::Arc;

use dotenv::dotenv;
use playground_accounts::{
    app,
    config::Config,
    db,
    mailer::{DisabledMailer, HttpMailer, Mailer},
    state::AppState,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let conn = match db::establish_connection(&config.database.path) {
        Ok(conn) => conn,
        Err(e) => {
            error!(path = %config.database.path, error = %e, "failed to open database");
            std::process::exit(1);
        }
    };

    let mailer: Arc<dyn Mailer> = match config.mail.clone() {
        Some(mail) => Arc::new(HttpMailer::new(mail)),
        None => {
            warn!("MAIL_API_KEY or OTP_EMAIL_USER unset, otp emails will not be delivered");
            Arc::new(DisabledMailer)
        }
    };

    let addr = match config.server.address() {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "invalid listen address");
            std::process::exit(1);
        }
    };

    let state = AppState::new(conn.clone(), config.auth, mailer);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr = %addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    info!(addr = %addr, "server running");
    if let Err(e) = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    drop(conn);
    info!("shutdown complete");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

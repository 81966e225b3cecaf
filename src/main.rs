use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use scribe::accounts::{AccountSettings, Accounts};
use scribe::auth::{session, tokens::TokenCodec};
use scribe::config::{Cli, Config};
use scribe::mail::{LogMailer, Mailer, SmtpMailer};
use scribe::state::AppState;
use scribe::{db, follows, roles, routes};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI args and load config
    let cli = Cli::parse();
    let data_dir = Config::data_dir(&cli);
    std::fs::create_dir_all(&data_dir)?;
    tracing::info!("Data directory: {}", data_dir.display());

    let config = Config::load(&cli)?;

    // Initialize database
    let pool = db::create_pool(&config.db_path())?;
    db::run_migrations(&pool)?;
    {
        let conn = pool.get()?;
        roles::insert_roles(&conn)?;
        let backfilled = follows::add_self_follows(&conn)?;
        if backfilled > 0 {
            tracing::info!(count = backfilled, "Backfilled self-follows");
        }
        let purged = session::purge_expired(&conn)?;
        tracing::debug!(count = purged, "Purged expired sessions");
    }

    // Signed tokens outlive the process only with a configured secret
    let tokens = match config.auth.secret_key.as_deref() {
        Some(secret) if !secret.is_empty() => TokenCodec::new(secret.as_bytes().to_vec()),
        _ => {
            tracing::warn!("No auth.secret_key configured; issued links and API tokens will not survive a restart");
            TokenCodec::with_random_secret()
        }
    };
    let mailer: Arc<dyn Mailer> = match &config.mail.smtp {
        Some(smtp) => {
            tracing::info!(host = %smtp.host, port = smtp.port, "Delivering mail over SMTP");
            Arc::new(SmtpMailer::new(smtp)?)
        }
        None => {
            tracing::warn!("No mail.smtp configured; outgoing mail is only written to the log");
            Arc::new(LogMailer)
        }
    };
    let accounts = Accounts::new(
        tokens,
        mailer,
        AccountSettings::from_config(&config),
    );

    let state = AppState {
        db: pool,
        config: config.clone(),
        accounts: Arc::new(accounts),
    };
    let app = routes::router(state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

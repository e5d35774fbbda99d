//! tor_server: REST server for the TOR approval workflow.
//!
//! Configuration comes from the environment (and `.env`); see
//! [`tor_server::config::ServerConfig`]. Without a database URL the server
//! runs on the in-memory store, seeded from `TOR_SEED_FILE` or the demo
//! organization.

use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tor_core::memory::MemoryStore;
use tor_core::ports::{NoopNotifier, Notifier};
use tor_core::seeds::SeedBundle;
use tor_core::service::{TorService, TorServiceImpl};
use tor_postgres::PgStores;
use tor_server::config::ServerConfig;
use tor_server::middleware::jwt::JwtConfig;
use tor_server::middleware::rate_limit::RateLimitState;
use tor_server::notifier::{LogNotifier, MailRelayNotifier};
use tor_server::router::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tor_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;

    let seed = match &config.seed_file {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading seed file {}", path.display()))?;
            Some(SeedBundle::from_yaml(&text).context("parsing seed file")?)
        }
        None => None,
    };

    let notifier = build_notifier(&config)?;

    let service: Arc<dyn TorService> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .acquire_timeout(config.retry.attempt_timeout)
                .connect(url)
                .await
                .context("failed to connect to database")?;
            tracing::info!("Connected to database");

            tor_postgres::migrate(&pool)
                .await
                .context("running migrations")?;
            if let Some(bundle) = &seed {
                tor_postgres::seed::apply(&pool, bundle)
                    .await
                    .context("applying seed bundle")?;
            }

            let stores = PgStores::new(pool);
            Arc::new(
                TorServiceImpl::new(
                    Arc::new(stores.directory),
                    Arc::new(stores.workflows),
                    Arc::new(stores.documents),
                    Arc::new(stores.history),
                    notifier,
                )
                .with_app_url(config.app_url.clone())
                .with_retry(config.retry),
            )
        }
        None => {
            tracing::warn!("no database configured, running on the in-memory store");
            let bundle = match seed {
                Some(b) => b,
                None => SeedBundle::demo().context("loading demo organization")?,
            };
            let store = Arc::new(MemoryStore::from_seed(&bundle)?);
            Arc::new(
                TorServiceImpl::new(
                    store.clone(),
                    store.clone(),
                    store.clone(),
                    store,
                    notifier,
                )
                .with_app_url(config.app_url.clone())
                .with_retry(config.retry),
            )
        }
    };

    let jwt_config = JwtConfig::from_secret(config.jwt_secret.as_bytes());
    let limits = RateLimitState::token_bucket(config.rate_limit);
    let app = build_router(service, jwt_config, limits);

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("tor_server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn build_notifier(config: &ServerConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    if !config.notifications_enabled {
        tracing::info!("notifications disabled");
        return Ok(Arc::new(NoopNotifier));
    }
    Ok(match &config.mail {
        Some(mail) => {
            let client = reqwest::Client::builder()
                .timeout(config.retry.attempt_timeout)
                .build()
                .context("building mail relay client")?;
            tracing::info!(relay = %mail.relay_url, "notifications via mail relay");
            Arc::new(MailRelayNotifier::new(client, &mail.relay_url, &mail.from))
        }
        None => Arc::new(LogNotifier),
    })
}

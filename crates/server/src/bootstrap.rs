use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::info;

use voxstay_core::adapters::{HmacTokenizer, StaticHotelSearch};
use voxstay_core::audit::TracingAuditSink;
use voxstay_core::config::{AppConfig, ConfigError, LoadOptions, SearchProvider};
use voxstay_core::session::spawn_sweeper;
use voxstay_core::{BookingOrchestrator, HotelSearch, SessionStore, WebhookDispatcher};
use voxstay_db::{connect_with_settings, migrations, DbPool, SqlBookingRepository};

use crate::search::AzdsHotelSearch;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub store: Arc<SessionStore>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub sweeper: JoinHandle<()>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("search client could not be built: {0}")]
    SearchClient(#[source] reqwest::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        search_provider = config.search.provider.as_str(),
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SessionStore::new(config.session.ttl()));
    let sweeper = spawn_sweeper(store.clone(), config.session.sweep_interval());

    let orchestrator = BookingOrchestrator::new(
        store.clone(),
        hotel_search(&config)?,
        Arc::new(HmacTokenizer::new(config.payment.tokenizer_secret.clone())),
        Arc::new(SqlBookingRepository::new(db_pool.clone())),
        Arc::new(TracingAuditSink),
        config.orchestrator_settings(),
    );
    let dispatcher = Arc::new(WebhookDispatcher::new(Arc::new(orchestrator)));

    Ok(Application { config, db_pool, store, dispatcher, sweeper })
}

fn hotel_search(config: &AppConfig) -> Result<Arc<dyn HotelSearch>, BootstrapError> {
    let search = &config.search;
    match (search.provider, search.base_url.as_deref()) {
        (SearchProvider::Azds, Some(base_url)) => {
            let client = AzdsHotelSearch::new(
                base_url,
                search.hotel_code.clone(),
                search.hotel_name.clone(),
                std::time::Duration::from_secs(search.timeout_secs),
            )
            .map_err(BootstrapError::SearchClient)?;
            Ok(Arc::new(client))
        }
        // validation guarantees azds always carries a base url
        _ => Ok(Arc::new(StaticHotelSearch::new(
            search.hotel_code.clone(),
            search.hotel_name.clone(),
        ))),
    }
}

#[cfg(test)]
mod tests {
    use voxstay_core::config::{ConfigOverrides, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                tokenizer_secret: Some("test-tokenizer-secret-0001".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_tokenizer_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                tokenizer_secret: Some("short".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().map(|error| error.to_string()).unwrap_or_default();
        assert!(message.contains("payment.tokenizer_secret"), "{message}");
    }

    #[tokio::test]
    async fn bootstrap_applies_migrations_and_wires_an_empty_store() {
        let app = bootstrap(valid_overrides("sqlite::memory:"))
            .await
            .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('users', 'hotels', 'payment_info', 'bookings')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("booking tables should exist after bootstrap");
        assert_eq!(table_count, 4);
        assert!(app.store.is_empty().await);

        app.sweeper.abort();
        app.db_pool.close().await;
    }
}

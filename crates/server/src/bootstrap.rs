use std::sync::Arc;

use facturo_core::config::{AppConfig, ConfigError, LoadOptions};
use facturo_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

use crate::pdf::{DocumentRenderer, FactureRenderer, PdfError, WkhtmltopdfRenderer};
use crate::storage::{build_storage, ArtefactStorage, StorageError};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub renderer: Arc<FactureRenderer>,
    pub convertisseur: Arc<dyn DocumentRenderer>,
    pub stockage: Option<Arc<dyn ArtefactStorage>>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("invoice template initialization failed: {0}")]
    Templates(#[from] PdfError),
    #[error("artifact storage initialization failed: {0}")]
    Storage(#[from] StorageError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
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

    let renderer = Arc::new(FactureRenderer::new(&config.pdf.template_dir)?);
    let convertisseur: Arc<dyn DocumentRenderer> = Arc::new(WkhtmltopdfRenderer::new(
        config.pdf.wkhtmltopdf_path.as_deref(),
        config.pdf.rendus_simultanes,
        config.pdf.timeout_secs,
    ));
    let stockage = build_storage(&config.stockage)?;

    Ok(Application { config, db_pool, renderer, convertisseur, stockage })
}

#[cfg(test)]
mod tests {
    use facturo_core::config::{ConfigOverrides, LoadOptions, StockageMode};

    use crate::bootstrap::bootstrap;

    fn options_memoire() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:?cache=shared".to_string()),
                stockage_mode: Some(StockageMode::Desactive),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_prepares_schema_and_components() {
        let app = bootstrap(options_memoire()).await.expect("bootstrap should succeed");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('devis', 'factures', 'opportunite_lignes', 'parametres_entreprise')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected billing tables to be available after bootstrap");
        assert_eq!(table_count, 4, "bootstrap should expose the billing tables");

        assert!(app.stockage.is_none(), "storage was explicitly disabled");

        app.db_pool.close().await;
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_an_invalid_database_url() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("postgres://not-sqlite/facturo".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("database.url"));
    }
}

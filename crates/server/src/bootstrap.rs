use std::sync::Arc;

use careline_agent::{
    CompletionProvider, OpenAiCompatibleClient, ProviderError, RuntimeSettings, SessionService,
};
use careline_core::config::{AppConfig, ConfigError};
use careline_db::{
    connect_with_settings, migrations, DbPool, SqlPatientRepository, SqlSchedulingRepository,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub sessions: SessionService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("completion provider setup failed: {0}")]
    Provider(#[from] ProviderError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        tool_calling = ?config.agent.tool_calling,
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

    let provider = Arc::new(OpenAiCompatibleClient::from_config(&config.llm)?);
    info!(
        event_name = "system.bootstrap.provider_ready",
        correlation_id = "bootstrap",
        endpoint = provider.endpoint(),
        model = provider.model(),
        "completion provider configured"
    );

    let sessions = session_service(&config, db_pool.clone(), provider);
    Ok(Application { config, db_pool, sessions })
}

/// Session service over the SQL backend.
pub fn session_service(
    config: &AppConfig,
    db_pool: DbPool,
    provider: Arc<dyn CompletionProvider>,
) -> SessionService {
    SessionService::for_booking(
        Arc::new(SqlPatientRepository::new(db_pool.clone())),
        Arc::new(SqlSchedulingRepository::new(db_pool)),
        provider,
        RuntimeSettings::from(&config.agent),
    )
}

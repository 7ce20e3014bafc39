use std::sync::Arc;

use nearbux_client::{HttpBackendGateway, IdentityToolkitProvider};
use nearbux_core::audit::TracingAuditSink;
use nearbux_core::backend::{BackendGateway, InMemoryBackend};
use nearbux_core::config::{
    AppConfig, BackendProvider, ConfigError, LoadOptions, VerificationProviderKind,
};
use nearbux_core::flows::{Collaborators, FlowRuntime};
use nearbux_core::payment::RazorpaySignatureVerifier;
use nearbux_core::verification::{
    ConsoleVerificationProvider, HeadlessWidgetFactory, VerificationProvider,
};
use nearbux_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: FlowRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("collaborator client setup failed: {0}")]
    Client(#[source] reqwest::Error),
    #[error("verification provider is not configured: {0}")]
    Verification(&'static str),
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

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let runtime = build_runtime(&config)?;
    info!(
        event_name = "system.bootstrap.collaborators_ready",
        correlation_id = "bootstrap",
        backend = ?config.backend.provider,
        verification = ?config.verification.provider,
        "flow collaborators initialized"
    );

    Ok(Application { config, db_pool, runtime })
}

/// Wires the collaborators selected by configuration into a flow runtime.
pub fn build_runtime(config: &AppConfig) -> Result<FlowRuntime, BootstrapError> {
    let backend: Arc<dyn BackendGateway> = match config.backend.provider {
        BackendProvider::Http => Arc::new(
            HttpBackendGateway::from_config(&config.backend).map_err(BootstrapError::Client)?,
        ),
        BackendProvider::InMemory => Arc::new(InMemoryBackend::default()),
    };

    let verification: Arc<dyn VerificationProvider> = match config.verification.provider {
        VerificationProviderKind::Console => Arc::new(ConsoleVerificationProvider::default()),
        VerificationProviderKind::IdentityToolkit => {
            let timeout = config.flow.step_timeout();
            let provider = IdentityToolkitProvider::from_config(&config.verification, timeout)
                .map_err(BootstrapError::Client)?
                .ok_or(BootstrapError::Verification("verification.api_key is missing"))?;
            Arc::new(provider)
        }
    };

    let payments = Arc::new(RazorpaySignatureVerifier::new(
        config.payment.key_id.clone(),
        config.payment.key_secret.clone(),
        config.payment.fee(),
    ));

    Ok(FlowRuntime {
        collaborators: Collaborators { verification, backend, payments },
        widgets: Arc::new(HeadlessWidgetFactory),
        widget_container: config.verification.widget_container.clone(),
        call_timeout: config.flow.step_timeout(),
        snapshot_ttl: config.flow.snapshot_ttl(),
        audit: Arc::new(TracingAuditSink),
    })
}

#[cfg(test)]
mod tests {
    use nearbux_core::config::{BackendProvider, ConfigOverrides, LoadOptions};
    use nearbux_core::flows::{FlowContext, FlowKind, Step};

    use crate::bootstrap::bootstrap;

    #[tokio::test]
    async fn bootstrap_fails_fast_without_payment_key_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = match result {
            Ok(_) => panic!("bootstrap should fail without a payment key secret"),
            Err(error) => error.to_string(),
        };
        assert!(message.contains("payment.key_secret"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_opens_flows() {
        let app = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                backend_provider: Some(BackendProvider::InMemory),
                payment_key_secret: Some("test-secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'flow_snapshot'",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("snapshot table should exist after bootstrap");
        assert_eq!(table_count, 1);

        let session =
            app.runtime.start("sess-boot", FlowKind::BusinessSignup, FlowContext::default());
        assert_eq!(session.state().step, Step::PhoneEntry);
        assert_eq!(
            session.widget_handle().map(|handle| handle.container_id),
            Some("recaptcha-container".to_string())
        );

        app.db_pool.close().await;
    }
}

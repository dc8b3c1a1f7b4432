pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod models;
pub mod page;
pub mod state;
pub mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use fedsecrets_core::{
    FederatedCredential, Http, ManagedIdentityProvider, ManagedIdentitySource, RetrievalSettings,
    SecretAccessor,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::auth::{LoginFlow, SessionStore};
pub use config::AppConfig;
pub use state::AppState;
pub use telemetry::CorrelationId;

pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let bind_address = config.server.bind_address;
    let state = build_state(config)?;

    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("failed to bind http listener on {bind_address}"))?;
    let http_addr = listener.local_addr()?;
    info!(%http_addr, "http server listening");

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;
    Ok(())
}

/// Wire the managed identity provider, the secret accessor and the login
/// flow from resolved configuration.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let http = Http::new(config.http_timeout)?;

    let source = match &config.managed_identity.endpoint {
        Some(endpoint) => ManagedIdentitySource::custom(endpoint.clone()),
        None => ManagedIdentitySource::from_env(),
    };
    let identity = ManagedIdentityProvider::new(
        http.clone(),
        source,
        config.managed_identity.client_id.clone(),
    );
    info!(
        source = identity.source().kind(),
        user_assigned = identity.client_id().is_some(),
        "managed identity configured"
    );

    let settings = RetrievalSettings {
        client_id: config.azure_ad.client_id.clone(),
        authority: config.azure_ad.instance.clone(),
        vault_scope: config.key_vault_scope.clone(),
        retry: config.retry,
    };
    let accessor = SecretAccessor::new(http.clone(), settings, identity.assertion_supplier());

    let credential = FederatedCredential::new(
        http,
        &config.azure_ad.instance,
        &config.azure_ad.tenant_id,
        &config.azure_ad.client_id,
        identity.assertion_supplier(),
    )
    .context("invalid AzureAd configuration")?;
    let login = LoginFlow::new(&config, credential);
    let sessions = SessionStore::new(config.server.session_ttl);

    Ok(AppState::new(
        Arc::new(config),
        Arc::new(accessor),
        sessions,
        Arc::new(login),
    ))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(?err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => warn!(?err, "failed to install sigterm handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

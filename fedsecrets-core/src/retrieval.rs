//! The per-target lookup: one parameterised path shared by the same-tenant
//! and cross-tenant secrets.

use tracing::{Instrument, debug, info, info_span};
use url::Url;

use crate::error::RetrievalError;
use crate::federated::{AssertionSupplier, DEFAULT_AUTHORITY, FederatedCredential};
use crate::host::RequestHost;
use crate::http::Http;
use crate::retry::{RetryPolicy, retry_transient};
use crate::target::{SecretOutcome, TenantTarget};
use crate::vault::{DEFAULT_VAULT_SCOPE, SecretStoreClient};

#[derive(Clone, Debug)]
pub struct RetrievalSettings {
    /// Application (client) id the federated credential authenticates as.
    pub client_id: String,
    pub authority: Url,
    pub vault_scope: String,
    pub retry: RetryPolicy,
}

impl RetrievalSettings {
    pub fn new(client_id: impl Into<String>) -> Result<Self, RetrievalError> {
        let authority = Url::parse(DEFAULT_AUTHORITY)
            .map_err(|err| RetrievalError::Configuration(format!("invalid authority: {err}")))?;
        Ok(Self {
            client_id: client_id.into(),
            authority,
            vault_scope: DEFAULT_VAULT_SCOPE.to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_authority(mut self, authority: Url) -> Self {
        self.authority = authority;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Reads a configured secret on behalf of the application, authenticating
/// with a federated credential built for the target's home tenant.
#[derive(Clone)]
pub struct SecretAccessor {
    http: Http,
    settings: RetrievalSettings,
    supplier: AssertionSupplier,
    store: SecretStoreClient,
}

impl std::fmt::Debug for SecretAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretAccessor")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl SecretAccessor {
    pub fn new(http: Http, settings: RetrievalSettings, supplier: AssertionSupplier) -> Self {
        let store = SecretStoreClient::new(http.clone());
        Self {
            http,
            settings,
            supplier,
            store,
        }
    }

    /// Look up `target`'s secret for a request addressed to `host`.
    ///
    /// Loopback hosts short-circuit to [`SecretOutcome::NotSupportedLocally`]
    /// without touching configuration or the network. Configuration problems
    /// are reported before any outbound call.
    pub async fn fetch(
        &self,
        target: &TenantTarget,
        host: &RequestHost,
    ) -> Result<SecretOutcome, RetrievalError> {
        let span = info_span!(
            "secret.fetch",
            kind = %target.kind,
            tenant_id = %target.tenant_id,
        );
        async move {
            if host.is_loopback() {
                debug!(host = host.as_str(), "loopback host, skipping managed identity");
                return Ok(SecretOutcome::NotSupportedLocally);
            }

            let vault = target.vault_url()?;
            let name = target.check_secret_name()?;
            let credential = FederatedCredential::new(
                self.http.clone(),
                &self.settings.authority,
                &target.tenant_id,
                &self.settings.client_id,
                self.supplier.clone(),
            )?;
            let scopes = [self.settings.vault_scope.as_str()];

            let secret = retry_transient(&self.settings.retry, || async {
                let token = credential.get_token(&scopes).await?;
                self.store.get_secret(&vault, name, &token).await
            })
            .await?;

            info!(
                secret = %secret.name,
                version = secret.version.as_deref().unwrap_or("-"),
                "secret retrieved"
            );
            Ok(SecretOutcome::Value(secret))
        }
        .instrument(span)
        .await
    }
}

//! Layered configuration: defaults, then a TOML/JSON file, then `Section__Key`
//! environment variables, then command line overrides.

mod loaders;
mod merge;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use fedsecrets_core::{
    DEFAULT_AUTHORITY, DEFAULT_VAULT_SCOPE, RetryPolicy, TargetKind, TenantTarget,
};
use serde::{Deserialize, Serialize};
use url::Url;

pub use loaders::{CONFIG_ENV, DEFAULT_CONFIG_FILE, env_layer_from, load_from_file};

pub const DEFAULT_CALLBACK_PATH: &str = "/signin-oidc";
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigLayer {
    pub azure_ad: Option<AzureAdLayer>,
    pub managed_identity: Option<ManagedIdentityLayer>,
    pub same_tenant: Option<TargetLayer>,
    pub cross_tenant: Option<TargetLayer>,
    pub key_vault: Option<KeyVaultLayer>,
    pub server: Option<ServerLayer>,
    pub http: Option<HttpLayer>,
    pub retry: Option<RetryLayer>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AzureAdLayer {
    pub instance: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub callback_path: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManagedIdentityLayer {
    pub client_id: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetLayer {
    pub key_vault_uri: Option<String>,
    pub secret_name: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyVaultLayer {
    pub scope: Option<String>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerLayer {
    pub bind_address: Option<String>,
    pub public_base_url: Option<String>,
    pub session_ttl_secs: Option<u64>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HttpLayer {
    pub timeout_secs: Option<u64>,
}

#[derive(Default, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RetryLayer {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    File,
    Env,
    Cli,
}

pub type ProvenanceMap = BTreeMap<String, ConfigSource>;

#[derive(Default, Debug, Clone)]
pub struct CliOverrides {
    pub bind_address: Option<String>,
    pub public_base_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AzureAdConfig {
    pub instance: Url,
    pub tenant_id: String,
    pub client_id: String,
    pub callback_path: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ManagedIdentityConfig {
    pub client_id: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub public_base_url: Option<Url>,
    pub session_ttl: Duration,
}

/// Fully resolved settings for the web application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub azure_ad: AzureAdConfig,
    pub managed_identity: ManagedIdentityConfig,
    pub same_tenant: TenantTarget,
    pub cross_tenant: TenantTarget,
    pub key_vault_scope: String,
    pub server: ServerConfig,
    pub http_timeout: Duration,
    pub retry: RetryPolicy,
}

impl AppConfig {
    /// Apply defaults to a merged layer and validate what startup needs.
    /// Target fields are left as configured; they are checked per request.
    pub fn from_layer(layer: ConfigLayer) -> Result<Self> {
        let azure_ad = layer.azure_ad.unwrap_or_default();
        let tenant_id = required(azure_ad.tenant_id, "AzureAd.TenantId")?;
        let client_id = required(azure_ad.client_id, "AzureAd.ClientId")?;
        let instance = non_empty(azure_ad.instance).unwrap_or_else(|| DEFAULT_AUTHORITY.into());
        let instance = Url::parse(&instance)
            .with_context(|| format!("AzureAd.Instance `{instance}` is not a valid url"))?;
        if instance.cannot_be_a_base() {
            bail!("AzureAd.Instance `{instance}` is not a base url");
        }
        let callback_path =
            non_empty(azure_ad.callback_path).unwrap_or_else(|| DEFAULT_CALLBACK_PATH.into());
        if !callback_path.starts_with('/') || callback_path.starts_with("//") {
            bail!("AzureAd.CallbackPath `{callback_path}` must be an absolute path");
        }

        let managed_identity = layer.managed_identity.unwrap_or_default();
        let managed_identity = ManagedIdentityConfig {
            client_id: non_empty(managed_identity.client_id),
            endpoint: non_empty(managed_identity.endpoint),
        };

        let same = layer.same_tenant.unwrap_or_default();
        let same_tenant = TenantTarget::new(
            TargetKind::SameTenant,
            non_empty(same.tenant_id).unwrap_or_else(|| tenant_id.clone()),
            same.key_vault_uri.unwrap_or_default(),
            same.secret_name.unwrap_or_default(),
        );
        let cross = layer.cross_tenant.unwrap_or_default();
        let cross_tenant = TenantTarget::new(
            TargetKind::CrossTenant,
            cross.tenant_id.unwrap_or_default(),
            cross.key_vault_uri.unwrap_or_default(),
            cross.secret_name.unwrap_or_default(),
        );

        let key_vault_scope = layer
            .key_vault
            .and_then(|kv| non_empty(kv.scope))
            .unwrap_or_else(|| DEFAULT_VAULT_SCOPE.into());

        let server = layer.server.unwrap_or_default();
        let bind = non_empty(server.bind_address).unwrap_or_else(|| DEFAULT_BIND_ADDRESS.into());
        let bind_address = bind
            .parse::<SocketAddr>()
            .with_context(|| format!("Server.BindAddress `{bind}` is not a socket address"))?;
        let public_base_url = non_empty(server.public_base_url)
            .map(|raw| {
                Url::parse(&raw)
                    .with_context(|| format!("Server.PublicBaseUrl `{raw}` is not a valid url"))
            })
            .transpose()?;
        let session_ttl_secs = server.session_ttl_secs.unwrap_or(DEFAULT_SESSION_TTL_SECS);
        if session_ttl_secs == 0 {
            bail!("Server.SessionTtlSecs must be greater than zero");
        }

        let http_timeout = Duration::from_secs(
            layer
                .http
                .and_then(|http| http.timeout_secs)
                .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        );

        let defaults = RetryPolicy::default();
        let retry_layer = layer.retry.unwrap_or_default();
        let retry = RetryPolicy {
            max_attempts: retry_layer.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: retry_layer
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
        };
        if retry.max_attempts == 0 {
            bail!("Retry.MaxAttempts must be at least 1");
        }

        Ok(Self {
            azure_ad: AzureAdConfig {
                instance,
                tenant_id,
                client_id,
                callback_path,
            },
            managed_identity,
            same_tenant,
            cross_tenant,
            key_vault_scope,
            server: ServerConfig {
                bind_address,
                public_base_url,
                session_ttl: Duration::from_secs(session_ttl_secs),
            },
            http_timeout,
            retry,
        })
    }

    pub fn targets(&self) -> [&TenantTarget; 2] {
        [&self.same_tenant, &self.cross_tenant]
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(value: Option<String>, key: &str) -> Result<String> {
    non_empty(value).with_context(|| format!("{key} must be configured"))
}

pub struct ResolvedConfig {
    pub config: AppConfig,
    pub provenance: ProvenanceMap,
    pub warnings: Vec<String>,
}

pub struct ConfigResolver {
    project_root: PathBuf,
    config_path: Option<PathBuf>,
    env: Option<Vec<(String, String)>>,
    cli_overrides: CliOverrides,
}

impl ConfigResolver {
    pub fn new() -> Self {
        Self {
            project_root: PathBuf::from("."),
            config_path: None,
            env: None,
            cli_overrides: CliOverrides::default(),
        }
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Use `vars` instead of the process environment.
    pub fn with_env<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env = Some(
            vars.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        );
        self
    }

    pub fn with_cli_overrides(mut self, overrides: CliOverrides) -> Self {
        self.cli_overrides = overrides;
        self
    }

    pub fn load(&self) -> Result<ResolvedConfig> {
        let mut merged = ConfigLayer::default();
        let mut provenance = ProvenanceMap::new();

        let vars: Vec<(String, String)> = match &self.env {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };

        if let Some(path) = self.config_file(&vars) {
            let layer = load_from_file(&path)?;
            merge::apply_layer(&mut merged, layer, ConfigSource::File, &mut provenance);
        }

        let env_layer = env_layer_from(vars)?;
        merge::apply_layer(&mut merged, env_layer, ConfigSource::Env, &mut provenance);

        if let Some(cli_layer) = cli_layer(&self.cli_overrides) {
            merge::apply_layer(&mut merged, cli_layer, ConfigSource::Cli, &mut provenance);
        }

        let config = AppConfig::from_layer(merged)?;
        let warnings = validate(&config);
        Ok(ResolvedConfig {
            config,
            provenance,
            warnings,
        })
    }

    fn config_file(&self, vars: &[(String, String)]) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }
        let from_env = vars
            .iter()
            .find(|(key, value)| key == CONFIG_ENV && !value.trim().is_empty())
            .map(|(_, value)| PathBuf::from(value.trim()));
        if from_env.is_some() {
            return from_env;
        }
        let default = Path::new(&self.project_root).join(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn cli_layer(overrides: &CliOverrides) -> Option<ConfigLayer> {
    if overrides.bind_address.is_none() && overrides.public_base_url.is_none() {
        return None;
    }
    Some(ConfigLayer {
        server: Some(ServerLayer {
            bind_address: overrides.bind_address.clone(),
            public_base_url: overrides.public_base_url.clone(),
            session_ttl_secs: None,
        }),
        ..ConfigLayer::default()
    })
}

fn validate(config: &AppConfig) -> Vec<String> {
    let mut warnings = Vec::new();
    for target in config.targets() {
        let prefix = match target.kind {
            TargetKind::SameTenant => "SameTenant",
            TargetKind::CrossTenant => "CrossTenant",
        };
        if target.vault_uri.trim().is_empty() {
            warnings.push(format!("{prefix}.KeyVaultUri is not set; lookups will fail"));
        }
        if target.secret_name.trim().is_empty() {
            warnings.push(format!("{prefix}.SecretName is not set; lookups will fail"));
        }
        if target.tenant_id.trim().is_empty() {
            warnings.push(format!("{prefix}.TenantId is not set; lookups will fail"));
        }
    }
    if config.cross_tenant.tenant_id == config.azure_ad.tenant_id
        && !config.cross_tenant.tenant_id.is_empty()
    {
        warnings.push(
            "CrossTenant.TenantId equals AzureAd.TenantId; it must be the vault's home tenant"
                .to_string(),
        );
    }
    warnings
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use super::{
    AzureAdLayer, ConfigLayer, HttpLayer, KeyVaultLayer, ManagedIdentityLayer, RetryLayer,
    ServerLayer, TargetLayer,
};

pub const CONFIG_ENV: &str = "FEDSECRETS_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "fedsecrets.toml";

const SEPARATOR: &str = "__";

pub fn load_from_file(path: &Path) -> Result<ConfigLayer> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&data, path)
}

fn parse_config(data: &str, path: &Path) -> Result<ConfigLayer> {
    if path.extension().map(|ext| ext == "json").unwrap_or(false) {
        let layer: ConfigLayer = serde_json::from_str(data)
            .with_context(|| format!("invalid json config {}", path.display()))?;
        Ok(layer)
    } else {
        let layer: ConfigLayer = toml::from_str(data)
            .with_context(|| format!("invalid toml config {}", path.display()))?;
        Ok(layer)
    }
}

/// Build a layer from `Section__Key` variables. Names are matched without
/// regard to case; unrelated variables are ignored.
pub fn env_layer_from<I, K, V>(vars: I) -> Result<ConfigLayer>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Into<String>,
{
    let mut layer = ConfigLayer::default();
    for (name, value) in vars {
        let name = name.as_ref();
        let Some((section, key)) = name.split_once(SEPARATOR) else {
            continue;
        };
        let value: String = value.into();
        apply_env_value(
            &mut layer,
            &section.to_ascii_lowercase(),
            &key.to_ascii_lowercase(),
            value,
        )
        .with_context(|| format!("invalid value for environment variable {name}"))?;
    }
    Ok(layer)
}

fn apply_env_value(layer: &mut ConfigLayer, section: &str, key: &str, value: String) -> Result<()> {
    match (section, key) {
        ("azuread", "instance") => azure_ad(layer).instance = Some(value),
        ("azuread", "tenantid") => azure_ad(layer).tenant_id = Some(value),
        ("azuread", "clientid") => azure_ad(layer).client_id = Some(value),
        ("azuread", "callbackpath") => azure_ad(layer).callback_path = Some(value),

        ("managedidentity", "clientid") => managed_identity(layer).client_id = Some(value),
        ("managedidentity", "endpoint") => managed_identity(layer).endpoint = Some(value),

        ("sametenant", key) => apply_target(
            layer.same_tenant.get_or_insert_with(Default::default),
            key,
            value,
        ),
        ("crosstenant", key) => apply_target(
            layer.cross_tenant.get_or_insert_with(Default::default),
            key,
            value,
        ),

        ("keyvault", "scope") => {
            layer.key_vault.get_or_insert_with(KeyVaultLayer::default).scope = Some(value)
        }

        ("server", "bindaddress") => server(layer).bind_address = Some(value),
        ("server", "publicbaseurl") => server(layer).public_base_url = Some(value),
        ("server", "sessionttlsecs") => {
            server(layer).session_ttl_secs = Some(value.trim().parse()?)
        }

        ("http", "timeoutsecs") => {
            layer.http.get_or_insert_with(HttpLayer::default).timeout_secs =
                Some(value.trim().parse()?)
        }

        ("retry", "maxattempts") => retry(layer).max_attempts = Some(value.trim().parse()?),
        ("retry", "basedelayms") => retry(layer).base_delay_ms = Some(value.trim().parse()?),

        _ => {}
    }
    Ok(())
}

fn apply_target(target: &mut TargetLayer, key: &str, value: String) {
    match key {
        "keyvaulturi" => target.key_vault_uri = Some(value),
        "secretname" => target.secret_name = Some(value),
        "tenantid" => target.tenant_id = Some(value),
        _ => {}
    }
}

fn azure_ad(layer: &mut ConfigLayer) -> &mut AzureAdLayer {
    layer.azure_ad.get_or_insert_with(Default::default)
}

fn managed_identity(layer: &mut ConfigLayer) -> &mut ManagedIdentityLayer {
    layer.managed_identity.get_or_insert_with(Default::default)
}

fn server(layer: &mut ConfigLayer) -> &mut ServerLayer {
    layer.server.get_or_insert_with(Default::default)
}

fn retry(layer: &mut ConfigLayer) -> &mut RetryLayer {
    layer.retry.get_or_insert_with(Default::default)
}

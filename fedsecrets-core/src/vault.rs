use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::RetrievalError;
use crate::http::Http;
use crate::target::Secret;
use crate::token::AccessToken;

pub const DEFAULT_VAULT_SCOPE: &str = "https://vault.azure.net/.default";
const SECRETS_API_VERSION: &str = "7.4";

/// Read-only client for the secret store "get secret" API.
#[derive(Clone, Debug)]
pub struct SecretStoreClient {
    http: Http,
}

#[derive(Deserialize)]
struct SecretBundle {
    value: String,
    #[serde(default)]
    id: Option<String>,
}

impl SecretStoreClient {
    pub fn new(http: Http) -> Self {
        Self { http }
    }

    /// Fetch the current version of `name` from `vault`.
    pub async fn get_secret(
        &self,
        vault: &Url,
        name: &str,
        token: &AccessToken,
    ) -> Result<Secret, RetrievalError> {
        let url = secret_url(vault, name)?;
        debug!(vault = %vault, secret = %name, "fetching secret");

        let response = self
            .http
            .get(url)
            .bearer_auth(token.secret())
            .send()
            .await
            .map_err(|err| {
                RetrievalError::Transient(format!("secret store request failed: {err}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            RetrievalError::Transient(format!("reading secret store response: {err}"))
        })?;
        match status {
            status if status.is_success() => parse_secret_bundle(name, &body),
            StatusCode::NOT_FOUND => Err(RetrievalError::NotFound {
                name: name.to_string(),
                vault: vault.to_string(),
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(RetrievalError::Authentication(format!(
                    "secret store denied access: {status} {}",
                    body.trim()
                )))
            }
            StatusCode::TOO_MANY_REQUESTS => Err(RetrievalError::Transient(format!(
                "secret store throttled the request: {status}"
            ))),
            status if status.is_server_error() => Err(RetrievalError::Transient(format!(
                "secret store unavailable: {status} {}",
                body.trim()
            ))),
            status => Err(RetrievalError::Configuration(format!(
                "secret store rejected the request: {status} {}",
                body.trim()
            ))),
        }
    }
}

/// `{vault}/secrets/{name}?api-version=7.4`
pub fn secret_url(vault: &Url, name: &str) -> Result<Url, RetrievalError> {
    let mut url = vault.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| {
            RetrievalError::Configuration(format!("vault URI `{vault}` is not a base url"))
        })?
        .pop_if_empty()
        .extend(["secrets", name]);
    url.query_pairs_mut()
        .append_pair("api-version", SECRETS_API_VERSION);
    Ok(url)
}

fn parse_secret_bundle(name: &str, body: &str) -> Result<Secret, RetrievalError> {
    let bundle: SecretBundle = serde_json::from_str(body).map_err(|err| {
        RetrievalError::Transient(format!("invalid secret store response: {err}"))
    })?;
    let version = bundle.id.as_deref().and_then(version_from_id);
    Ok(Secret {
        name: name.to_string(),
        value: bundle.value,
        version,
    })
}

/// Secret ids look like `https://{vault}/secrets/{name}/{version}`.
fn version_from_id(id: &str) -> Option<String> {
    let url = Url::parse(id).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let position = segments.iter().rposition(|segment| *segment == "secrets")?;
    segments
        .get(position + 2)
        .map(|version| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_secret_url() {
        let vault = Url::parse("https://contoso.vault.azure.net/").expect("url");
        let url = secret_url(&vault, "db-password").expect("url");
        assert_eq!(
            url.as_str(),
            "https://contoso.vault.azure.net/secrets/db-password?api-version=7.4"
        );
    }

    #[test]
    fn secret_url_keeps_vault_path_prefix() {
        let vault = Url::parse("http://127.0.0.1:8200/vaults/same?stale=1").expect("url");
        let url = secret_url(&vault, "name").expect("url");
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8200/vaults/same/secrets/name?api-version=7.4"
        );
    }

    #[test]
    fn parses_bundle_version() {
        let secret = parse_secret_bundle(
            "db-password",
            r#"{"value":"s3cr3t","id":"https://contoso.vault.azure.net/secrets/db-password/4387e9f3d6e14c459867679a90fd0f79","attributes":{"enabled":true}}"#,
        )
        .expect("secret");
        assert_eq!(secret.value, "s3cr3t");
        assert_eq!(
            secret.version.as_deref(),
            Some("4387e9f3d6e14c459867679a90fd0f79")
        );
    }

    #[test]
    fn missing_id_leaves_version_empty() {
        let secret = parse_secret_bundle("n", r#"{"value":"v"}"#).expect("secret");
        assert!(secret.version.is_none());
    }
}

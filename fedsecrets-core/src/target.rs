use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::RetrievalError;
use crate::host::url_is_loopback;

/// Returned instead of a secret when the request arrived on a development host.
pub const NOT_SUPPORTED_LOCALLY: &str =
    "Managed identity is not supported when running locally; deploy to the hosting platform to read this secret.";

const MAX_SECRET_NAME_LEN: usize = 127;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    SameTenant,
    CrossTenant,
}

impl TargetKind {
    pub fn label(&self) -> &'static str {
        match self {
            TargetKind::SameTenant => "same tenant",
            TargetKind::CrossTenant => "cross tenant",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One secret store location. `tenant_id` is the store's home tenant, which
/// is the tenant the token exchange has to run against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TenantTarget {
    pub kind: TargetKind,
    pub tenant_id: String,
    pub vault_uri: String,
    pub secret_name: String,
}

impl TenantTarget {
    pub fn new(
        kind: TargetKind,
        tenant_id: impl Into<String>,
        vault_uri: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            tenant_id: tenant_id.into(),
            vault_uri: vault_uri.into(),
            secret_name: secret_name.into(),
        }
    }

    /// Parsed vault endpoint. Plain http is only accepted for loopback hosts.
    pub fn vault_url(&self) -> Result<Url, RetrievalError> {
        let raw = self.vault_uri.trim();
        if raw.is_empty() {
            return Err(RetrievalError::Configuration(format!(
                "{} vault URI is not configured",
                self.kind
            )));
        }

        let url = Url::parse(raw).map_err(|err| {
            RetrievalError::Configuration(format!(
                "{} vault URI `{raw}` is malformed: {err}",
                self.kind
            ))
        })?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(RetrievalError::Configuration(format!(
                "{} vault URI `{raw}` has no host",
                self.kind
            )));
        }
        match url.scheme() {
            "https" => {}
            "http" if url_is_loopback(&url) => {}
            scheme => {
                return Err(RetrievalError::Configuration(format!(
                    "{} vault URI `{raw}` must use https, not {scheme}",
                    self.kind
                )));
            }
        }
        Ok(url)
    }

    pub fn check_secret_name(&self) -> Result<&str, RetrievalError> {
        let name = self.secret_name.trim();
        if name.is_empty() {
            return Err(RetrievalError::Configuration(format!(
                "{} secret name is not configured",
                self.kind
            )));
        }
        if name.len() > MAX_SECRET_NAME_LEN
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(RetrievalError::Configuration(format!(
                "{} secret name `{name}` must be 1-{MAX_SECRET_NAME_LEN} characters of letters, digits and dashes",
                self.kind
            )));
        }
        Ok(name)
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub value: String,
    pub version: Option<String>,
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Secret")
            .field("name", &self.name)
            .field("value", &"<redacted>")
            .field("version", &self.version)
            .finish()
    }
}

/// Successful lookup result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SecretOutcome {
    Value(Secret),
    NotSupportedLocally,
}

impl SecretOutcome {
    /// Text shown to the user for this outcome.
    pub fn display_value(&self) -> &str {
        match self {
            SecretOutcome::Value(secret) => &secret.value,
            SecretOutcome::NotSupportedLocally => NOT_SUPPORTED_LOCALLY,
        }
    }
}

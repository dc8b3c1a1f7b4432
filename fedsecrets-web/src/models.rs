use fedsecrets_core::{NOT_SUPPORTED_LOCALLY, RetrievalError, SecretOutcome};
use serde::Serialize;

pub type LookupResult = Result<SecretOutcome, RetrievalError>;

/// JSON shape of one lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeBody {
    Ok {
        name: String,
        value: String,
        version: Option<String>,
    },
    NotSupportedLocally {
        message: String,
    },
    Error {
        kind: String,
        message: String,
    },
}

impl From<&LookupResult> for OutcomeBody {
    fn from(value: &LookupResult) -> Self {
        match value {
            Ok(SecretOutcome::Value(secret)) => OutcomeBody::Ok {
                name: secret.name.clone(),
                value: secret.value.clone(),
                version: secret.version.clone(),
            },
            Ok(SecretOutcome::NotSupportedLocally) => OutcomeBody::NotSupportedLocally {
                message: NOT_SUPPORTED_LOCALLY.to_string(),
            },
            Err(err) => OutcomeBody::Error {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SecretsResponse {
    pub same_tenant: OutcomeBody,
    pub cross_tenant: OutcomeBody,
}

use thiserror::Error;

/// Failures reported by the platform identity endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagedIdentityError {
    #[error("invalid managed identity endpoint `{0}`")]
    InvalidEndpoint(String),
    #[error("managed identity endpoint unreachable: {0}")]
    Unreachable(String),
    #[error("no managed identity is assigned to this host: {0}")]
    IdentityNotAssigned(String),
    #[error("managed identity endpoint rejected audience `{audience}`: {message}")]
    AudienceRejected { audience: String, message: String },
    #[error("managed identity endpoint unavailable: {status} {message}")]
    Unavailable { status: u16, message: String },
    #[error("managed identity endpoint rejected the request: {status} {message}")]
    Rejected { status: u16, message: String },
    #[error("invalid managed identity response: {0}")]
    InvalidResponse(String),
}

impl ManagedIdentityError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Unavailable { .. })
    }
}

/// Failures raised while exchanging a client assertion for an access token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("invalid credential configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to obtain client assertion: {0}")]
    Assertion(#[from] ManagedIdentityError),
    #[error("token endpoint rejected the request: {status} {error}: {description}")]
    Rejected {
        status: u16,
        error: String,
        description: String,
    },
    #[error("token endpoint unavailable: {status} {body}")]
    Unavailable { status: u16, body: String },
    #[error("failed to reach token endpoint: {0}")]
    Transport(String),
    #[error("failed to parse token response: {0}")]
    InvalidResponse(String),
}

impl CredentialError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } | Self::Transport(_) => true,
            Self::Assertion(inner) => inner.is_transient(),
            _ => false,
        }
    }
}

/// Outcome taxonomy of a single secret lookup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("secret `{name}` not found in {vault}")]
    NotFound { name: String, vault: String },
    #[error("transient failure: {0}")]
    Transient(String),
}

impl RetrievalError {
    /// Stable machine-readable name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Authentication(_) => "authentication",
            Self::NotFound { .. } => "not_found",
            Self::Transient(_) => "transient",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<CredentialError> for RetrievalError {
    fn from(value: CredentialError) -> Self {
        match value {
            CredentialError::InvalidConfiguration(message) => Self::Configuration(message),
            err if err.is_transient() => Self::Transient(err.to_string()),
            err => Self::Authentication(err.to_string()),
        }
    }
}

//! Managed identity federation primitives.
//!
//! The crate covers the outbound half of the system: acquiring a managed
//! identity token for the token-exchange audience, presenting it as a client
//! assertion to obtain an application token for a tenant, and reading secrets
//! from a secret store with that token.

pub mod error;
pub mod federated;
pub mod host;
pub mod http;
pub mod managed_identity;
pub mod retrieval;
pub mod retry;
pub mod target;
pub mod token;
pub mod vault;

pub use error::{CredentialError, ManagedIdentityError, RetrievalError};
pub use federated::{
    AssertionRequest, AssertionSupplier, CodeRedemption, DEFAULT_AUTHORITY, FederatedCredential,
    TOKEN_EXCHANGE_AUDIENCE, assertion_supplier,
};
pub use host::RequestHost;
pub use http::Http;
pub use managed_identity::{ManagedIdentityProvider, ManagedIdentitySource};
pub use retrieval::{RetrievalSettings, SecretAccessor};
pub use retry::RetryPolicy;
pub use target::{NOT_SUPPORTED_LOCALLY, Secret, SecretOutcome, TargetKind, TenantTarget};
pub use token::{AccessToken, TokenCache};
pub use vault::{DEFAULT_VAULT_SCOPE, SecretStoreClient};

//! Client-assertion federation against the identity provider.
//!
//! A [`FederatedCredential`] never holds a client secret. Every token request
//! asks its [`AssertionSupplier`] for a fresh assertion (normally the managed
//! identity token for [`TOKEN_EXCHANGE_AUDIENCE`]) and presents it with the
//! `jwt-bearer` assertion type. The identity provider accepts it only when a
//! federated identity credential on the application trusts the assertion's
//! issuer and subject.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use crate::error::{CredentialError, ManagedIdentityError};
use crate::http::Http;
use crate::token::{AccessToken, Seconds, expiry_from};

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const TOKEN_EXCHANGE_AUDIENCE: &str = "api://AzureADTokenExchange";
pub const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Context handed to the assertion supplier for one token request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssertionRequest {
    pub audience: String,
    pub tenant_id: String,
}

pub type AssertionFuture = BoxFuture<'static, Result<String, ManagedIdentityError>>;
pub type AssertionSupplier = Arc<dyn Fn(AssertionRequest) -> AssertionFuture + Send + Sync>;

/// Wrap an async closure as an [`AssertionSupplier`].
pub fn assertion_supplier<F, Fut>(supplier: F) -> AssertionSupplier
where
    F: Fn(AssertionRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ManagedIdentityError>> + Send + 'static,
{
    Arc::new(move |request| supplier(request).boxed())
}

/// Result of redeeming an authorization code.
#[derive(Clone)]
pub struct CodeRedemption {
    pub access_token: AccessToken,
    pub id_token: Option<String>,
}

impl fmt::Debug for CodeRedemption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeRedemption")
            .field("access_token", &self.access_token)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[derive(Clone)]
pub struct FederatedCredential {
    tenant_id: String,
    client_id: String,
    token_endpoint: Url,
    http: Http,
    supplier: AssertionSupplier,
}

impl fmt::Debug for FederatedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederatedCredential")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("token_endpoint", &self.token_endpoint.as_str())
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Seconds>,
    #[serde(default)]
    expires_on: Option<Seconds>,
    #[serde(default)]
    id_token: Option<String>,
}

#[derive(Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

impl FederatedCredential {
    /// Build a credential for `tenant_id`. The identifiers are checked here so
    /// a misconfigured target fails before any network call.
    pub fn new(
        http: Http,
        authority: &Url,
        tenant_id: &str,
        client_id: &str,
        supplier: AssertionSupplier,
    ) -> Result<Self, CredentialError> {
        let tenant_id = validate_identifier("tenant_id", tenant_id)?;
        let client_id = validate_identifier("client_id", client_id)?;
        let token_endpoint = token_endpoint(authority, &tenant_id)?;

        Ok(Self {
            tenant_id,
            client_id,
            token_endpoint,
            http,
            supplier,
        })
    }

    pub fn token_endpoint(&self) -> &Url {
        &self.token_endpoint
    }

    /// Client-credentials grant for `scopes`.
    pub async fn get_token(&self, scopes: &[&str]) -> Result<AccessToken, CredentialError> {
        let scope = scopes.join(" ");
        let payload = self
            .exchange(&[
                ("grant_type", "client_credentials"),
                ("scope", scope.as_str()),
            ])
            .await?;
        Ok(access_token_from(&payload, scope))
    }

    /// Authorization-code grant used by the interactive login callback.
    pub async fn redeem_authorization_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scopes: &[&str],
    ) -> Result<CodeRedemption, CredentialError> {
        let scope = scopes.join(" ");
        let payload = self
            .exchange(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
            ])
            .await?;
        let access_token = access_token_from(&payload, scope);
        Ok(CodeRedemption {
            access_token,
            id_token: payload.id_token,
        })
    }

    async fn exchange(&self, grant: &[(&str, &str)]) -> Result<TokenResponse, CredentialError> {
        let assertion = (self.supplier)(AssertionRequest {
            audience: TOKEN_EXCHANGE_AUDIENCE.to_string(),
            tenant_id: self.tenant_id.clone(),
        })
        .await?;

        let mut form: Vec<(&str, &str)> = grant.to_vec();
        form.push(("client_id", self.client_id.as_str()));
        form.push(("client_assertion_type", CLIENT_ASSERTION_TYPE));
        form.push(("client_assertion", assertion.as_str()));

        debug!(
            tenant_id = %self.tenant_id,
            client_id = %self.client_id,
            "exchanging client assertion for access token"
        );

        let response = self
            .http
            .post(self.token_endpoint.clone())
            .form(&form)
            .send()
            .await
            .map_err(|err| CredentialError::Transport(err.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| CredentialError::Transport(format!("reading token response: {err}")))?;
        if !status.is_success() {
            let err = classify_failure(status, &body);
            warn!(tenant_id = %self.tenant_id, error = %err, "token exchange failed");
            return Err(err);
        }

        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|err| CredentialError::InvalidResponse(err.to_string()))?;
        if payload.access_token.trim().is_empty() {
            return Err(CredentialError::InvalidResponse(
                "token endpoint returned an empty access token".into(),
            ));
        }
        Ok(payload)
    }
}

fn access_token_from(payload: &TokenResponse, audience: String) -> AccessToken {
    let expires_on = expiry_from(
        payload.expires_in.as_ref(),
        payload.expires_on.as_ref(),
        SystemTime::now(),
    );
    AccessToken::new(payload.access_token.clone(), expires_on, audience)
}

fn classify_failure(status: StatusCode, body: &str) -> CredentialError {
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return CredentialError::Unavailable {
            status: status.as_u16(),
            body: body.trim().to_string(),
        };
    }

    let parsed: TokenErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let error = if parsed.error.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("unexpected_status")
            .to_string()
    } else {
        parsed.error
    };
    let description = if parsed.error_description.is_empty() {
        body.trim().to_string()
    } else {
        parsed.error_description
    };

    CredentialError::Rejected {
        status: status.as_u16(),
        error,
        description,
    }
}

fn validate_identifier(field: &str, value: &str) -> Result<String, CredentialError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CredentialError::InvalidConfiguration(format!(
            "{field} must not be empty"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
    {
        return Err(CredentialError::InvalidConfiguration(format!(
            "{field} contains invalid characters: {value}"
        )));
    }
    Ok(value.to_string())
}

fn token_endpoint(authority: &Url, tenant_id: &str) -> Result<Url, CredentialError> {
    let mut url = authority.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| {
            CredentialError::InvalidConfiguration(format!(
                "authority `{authority}` is not a base url"
            ))
        })?
        .pop_if_empty()
        .extend([tenant_id, "oauth2", "v2.0", "token"]);
    Ok(url)
}

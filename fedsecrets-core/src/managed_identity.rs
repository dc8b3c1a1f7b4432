//! Platform-assigned identity tokens.
//!
//! Two endpoint flavours exist: the instance metadata service on the
//! link-local address, and the App Service identity endpoint advertised
//! through `IDENTITY_ENDPOINT` / `IDENTITY_HEADER`.

use std::fmt;
use std::time::SystemTime;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::ManagedIdentityError;
use crate::federated::{AssertionRequest, AssertionSupplier, assertion_supplier};
use crate::http::Http;
use crate::token::{AccessToken, CacheKey, Seconds, TokenCache, expiry_from};

pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const IDENTITY_ENDPOINT_ENV: &str = "IDENTITY_ENDPOINT";
const IDENTITY_HEADER_ENV: &str = "IDENTITY_HEADER";
const APP_SERVICE_SECRET_HEADER: &str = "x-identity-header";

#[derive(Clone, PartialEq, Eq)]
pub enum ManagedIdentitySource {
    Imds { endpoint: String },
    AppService { endpoint: String, secret: String },
}

impl fmt::Debug for ManagedIdentitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imds { endpoint } => f.debug_struct("Imds").field("endpoint", endpoint).finish(),
            Self::AppService { endpoint, .. } => f
                .debug_struct("AppService")
                .field("endpoint", endpoint)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

impl ManagedIdentitySource {
    pub fn imds() -> Self {
        Self::Imds {
            endpoint: IMDS_ENDPOINT.to_string(),
        }
    }

    /// App Service when the platform advertises its identity endpoint,
    /// otherwise the instance metadata service.
    pub fn from_env() -> Self {
        Self::detect(
            std::env::var(IDENTITY_ENDPOINT_ENV).ok(),
            std::env::var(IDENTITY_HEADER_ENV).ok(),
        )
    }

    /// Source selection from the values of `IDENTITY_ENDPOINT` and
    /// `IDENTITY_HEADER`. Both must be non-blank for App Service.
    pub fn detect(endpoint: Option<String>, secret: Option<String>) -> Self {
        match (non_blank(endpoint), non_blank(secret)) {
            (Some(endpoint), Some(secret)) => Self::AppService { endpoint, secret },
            _ => Self::imds(),
        }
    }

    /// Explicit endpoint speaking the metadata-service dialect.
    pub fn custom(endpoint: impl Into<String>) -> Self {
        Self::Imds {
            endpoint: endpoint.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Imds { .. } => "imds",
            Self::AppService { .. } => "app-service",
        }
    }

    pub fn endpoint(&self) -> &str {
        match self {
            Self::Imds { endpoint } | Self::AppService { endpoint, .. } => endpoint,
        }
    }

    fn api_version(&self) -> &'static str {
        match self {
            Self::Imds { .. } => IMDS_API_VERSION,
            Self::AppService { .. } => APP_SERVICE_API_VERSION,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Deserialize)]
struct ManagedIdentityTokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<Seconds>,
    #[serde(default)]
    expires_on: Option<Seconds>,
}

#[derive(Default, Deserialize)]
struct ManagedIdentityErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
    #[serde(default)]
    message: String,
}

/// Acquires tokens for the identity assigned to this compute resource.
///
/// Tokens are cached per audience until they come within the refresh margin
/// of their expiry.
#[derive(Clone)]
pub struct ManagedIdentityProvider {
    http: Http,
    source: ManagedIdentitySource,
    client_id: Option<String>,
    cache: TokenCache,
}

impl fmt::Debug for ManagedIdentityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedIdentityProvider")
            .field("source", &self.source)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl ManagedIdentityProvider {
    /// `client_id` selects a user-assigned identity; `None` (or blank) uses
    /// the system-assigned one.
    pub fn new(http: Http, source: ManagedIdentitySource, client_id: Option<String>) -> Self {
        Self {
            http,
            source,
            client_id: client_id
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            cache: TokenCache::new(),
        }
    }

    pub fn source(&self) -> &ManagedIdentitySource {
        &self.source
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub async fn token(&self, audience: &str) -> Result<AccessToken, ManagedIdentityError> {
        let key = CacheKey::new(audience, self.client_id.as_deref());
        self.cache
            .get_or_fetch(key, || self.request_token(audience))
            .await
    }

    /// Supplier handing out this identity's token as a client assertion.
    pub fn assertion_supplier(&self) -> AssertionSupplier {
        let provider = self.clone();
        assertion_supplier(move |request: AssertionRequest| {
            let provider = provider.clone();
            async move {
                provider
                    .token(&request.audience)
                    .await
                    .map(|token| token.token)
            }
        })
    }

    async fn request_token(&self, audience: &str) -> Result<AccessToken, ManagedIdentityError> {
        let mut url = Url::parse(self.source.endpoint())
            .map_err(|_| ManagedIdentityError::InvalidEndpoint(self.source.endpoint().into()))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("api-version", self.source.api_version());
            query.append_pair("resource", audience);
            if let Some(client_id) = &self.client_id {
                query.append_pair("client_id", client_id);
            }
        }

        debug!(
            source = self.source.kind(),
            %audience,
            user_assigned = self.client_id.is_some(),
            "requesting managed identity token"
        );

        let request = match &self.source {
            ManagedIdentitySource::Imds { .. } => self.http.get(url).header("Metadata", "true"),
            ManagedIdentitySource::AppService { secret, .. } => self
                .http
                .get(url)
                .header(APP_SERVICE_SECRET_HEADER, secret.as_str()),
        };

        let response = request
            .send()
            .await
            .map_err(|err| ManagedIdentityError::Unreachable(err.to_string()))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| {
            ManagedIdentityError::Unreachable(format!("reading identity response: {err}"))
        })?;
        if !status.is_success() {
            return Err(classify_failure(status, &body, audience));
        }

        parse_token_response(&body, audience, SystemTime::now())
    }
}

fn parse_token_response(
    body: &str,
    audience: &str,
    now: SystemTime,
) -> Result<AccessToken, ManagedIdentityError> {
    let payload: ManagedIdentityTokenResponse = serde_json::from_str(body)
        .map_err(|err| ManagedIdentityError::InvalidResponse(err.to_string()))?;
    if payload.access_token.trim().is_empty() {
        return Err(ManagedIdentityError::InvalidResponse(
            "endpoint returned an empty access token".into(),
        ));
    }

    let expires_on = expiry_from(payload.expires_in.as_ref(), payload.expires_on.as_ref(), now);
    Ok(AccessToken::new(payload.access_token, expires_on, audience))
}

fn classify_failure(status: StatusCode, body: &str, audience: &str) -> ManagedIdentityError {
    let parsed: ManagedIdentityErrorResponse = serde_json::from_str(body).unwrap_or_default();
    let message = [parsed.error_description, parsed.message]
        .into_iter()
        .find(|value| !value.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return ManagedIdentityError::Unavailable {
            status: status.as_u16(),
            message,
        };
    }

    if matches!(parsed.error.as_str(), "invalid_resource" | "invalid_scope") {
        return ManagedIdentityError::AudienceRejected {
            audience: audience.to_string(),
            message,
        };
    }

    let lower = message.to_ascii_lowercase();
    if lower.contains("identity not found")
        || lower.contains("no managed identity")
        || lower.contains("identity is not assigned")
    {
        return ManagedIdentityError::IdentityNotAssigned(message);
    }

    ManagedIdentityError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn parses_string_lifetimes() {
        let now = UNIX_EPOCH + Duration::from_secs(100);
        let token = parse_token_response(
            r#"{"access_token":"abc","expires_in":"3599","expires_on":"1506484173","resource":"api://AzureADTokenExchange","token_type":"Bearer"}"#,
            "api://AzureADTokenExchange",
            now,
        )
        .expect("token");
        assert_eq!(token.secret(), "abc");
        assert_eq!(token.expires_on, now + Duration::from_secs(3599));
        assert_eq!(token.audience, "api://AzureADTokenExchange");
    }

    #[test]
    fn app_service_epoch_expiry() {
        let token = parse_token_response(
            r#"{"access_token":"abc","expires_on":1700000000}"#,
            "aud",
            SystemTime::now(),
        )
        .expect("token");
        assert_eq!(token.expires_on, UNIX_EPOCH + Duration::from_secs(1_700_000_000));
    }

    #[test]
    fn empty_token_is_an_error() {
        let err = parse_token_response(r#"{"access_token":""}"#, "aud", SystemTime::now())
            .expect_err("empty token");
        assert!(matches!(err, ManagedIdentityError::InvalidResponse(_)));
    }

    #[test]
    fn classifies_endpoint_failures() {
        let missing = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_request","error_description":"Identity not found"}"#,
            "aud",
        );
        assert!(matches!(missing, ManagedIdentityError::IdentityNotAssigned(_)));

        let audience = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_resource","error_description":"AADSTS500011"}"#,
            "aud",
        );
        assert!(matches!(
            audience,
            ManagedIdentityError::AudienceRejected { ref audience, .. } if audience == "aud"
        ));

        let busy = classify_failure(StatusCode::SERVICE_UNAVAILABLE, "busy", "aud");
        assert!(busy.is_transient());

        let app_service = classify_failure(
            StatusCode::BAD_REQUEST,
            r#"{"statusCode":400,"message":"No Managed Identity found for specified ClientId"}"#,
            "aud",
        );
        assert!(matches!(app_service, ManagedIdentityError::IdentityNotAssigned(_)));
    }

    #[test]
    fn app_service_needs_both_values() {
        let endpoint = || Some("http://127.0.0.1:41741/msi/token".to_string());
        assert_eq!(
            ManagedIdentitySource::detect(endpoint(), Some(" s3cret ".into())),
            ManagedIdentitySource::AppService {
                endpoint: "http://127.0.0.1:41741/msi/token".into(),
                secret: "s3cret".into(),
            }
        );
        assert_eq!(
            ManagedIdentitySource::detect(endpoint(), None),
            ManagedIdentitySource::imds()
        );
        assert_eq!(
            ManagedIdentitySource::detect(endpoint(), Some("  ".into())),
            ManagedIdentitySource::imds()
        );
        assert_eq!(
            ManagedIdentitySource::detect(None, Some("s3cret".into())).kind(),
            "imds"
        );
    }

    #[test]
    fn debug_hides_app_service_secret() {
        let source = ManagedIdentitySource::AppService {
            endpoint: "http://127.0.0.1:41741/msi/token".into(),
            secret: "hunter2".into(),
        };
        assert!(!format!("{source:?}").contains("hunter2"));
    }
}

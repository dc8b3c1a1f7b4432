//! In-process stand-in for the three collaborators: the platform identity
//! endpoint, the identity provider token endpoint and the secret store.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::{Form, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::AUTHORIZATION};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::{Value, json};
use url::Url;

pub const APP_CLIENT_ID: &str = "app-client-id";
pub const HOME_TENANT: &str = "tenant-home";
pub const OTHER_TENANT: &str = "tenant-other";
pub const JWT_BEARER: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
pub const APP_SERVICE_SECRET: &str = "app-service-secret";

#[derive(Default)]
pub struct PlatformState {
    pub base: String,
    pub mi_calls: AtomicUsize,
    pub mi_expires_in: AtomicU64,
    pub mi_delay_ms: AtomicU64,
    pub identity_missing: AtomicBool,
    pub mi_client_ids: Mutex<Vec<Option<String>>>,
    pub mi_resources: Mutex<Vec<String>>,
    /// tenant -> application client id with a federation trust record.
    pub trust: Mutex<HashMap<String, String>>,
    pub exchanges: Mutex<Vec<String>>,
    pub token_failures: AtomicUsize,
    /// vault name -> (home tenant, secrets)
    pub vaults: Mutex<HashMap<String, (String, HashMap<String, String>)>>,
    pub vault_calls: AtomicUsize,
    pub vault_failures: AtomicUsize,
    /// code -> id_token claims
    pub codes: Mutex<HashMap<String, Value>>,
    pub redirect_uris: Mutex<Vec<String>>,
}

pub struct MockPlatform {
    pub state: Arc<PlatformState>,
    pub base: Url,
}

impl MockPlatform {
    /// Starts the mock with a trust record in both tenants, a same-tenant
    /// vault `home` and a cross-tenant vault `other`.
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock platform");
        let addr = listener.local_addr().expect("local addr");
        let base = format!("http://{addr}");

        let state = Arc::new(PlatformState {
            base: base.clone(),
            mi_expires_in: AtomicU64::new(3600),
            ..PlatformState::default()
        });
        {
            let mut trust = state.trust.lock().unwrap();
            trust.insert(HOME_TENANT.into(), APP_CLIENT_ID.into());
            trust.insert(OTHER_TENANT.into(), APP_CLIENT_ID.into());
        }
        {
            let mut vaults = state.vaults.lock().unwrap();
            vaults.insert(
                "home".into(),
                (
                    HOME_TENANT.into(),
                    HashMap::from([("same-secret".to_string(), "same-value".to_string())]),
                ),
            );
            vaults.insert(
                "other".into(),
                (
                    OTHER_TENANT.into(),
                    HashMap::from([("cross-secret".to_string(), "cross-value".to_string())]),
                ),
            );
        }

        let app = Router::new()
            .route("/msi/token", get(managed_identity_token))
            .route("/appservice/token", get(app_service_token))
            .route("/{tenant}/oauth2/v2.0/token", post(token_endpoint))
            .route("/vaults/{vault}/secrets/{name}", get(get_secret))
            .with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            state,
            base: Url::parse(&format!("{base}/")).expect("base url"),
        }
    }

    pub fn authority(&self) -> Url {
        self.base.clone()
    }

    pub fn msi_endpoint(&self) -> String {
        format!("{}msi/token", self.base)
    }

    pub fn app_service_endpoint(&self) -> String {
        format!("{}appservice/token", self.base)
    }

    pub fn vault_uri(&self, vault: &str) -> String {
        format!("{}vaults/{vault}", self.base)
    }

    pub fn mi_calls(&self) -> usize {
        self.state.mi_calls.load(Ordering::SeqCst)
    }

    pub fn vault_calls(&self) -> usize {
        self.state.vault_calls.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> Vec<String> {
        self.state.exchanges.lock().unwrap().clone()
    }

    pub fn total_calls(&self) -> usize {
        self.mi_calls() + self.exchanges().len() + self.vault_calls()
    }

    pub fn register_code(&self, code: &str, claims: Value) {
        self.state
            .codes
            .lock()
            .unwrap()
            .insert(code.to_string(), claims);
    }
}

/// Unsigned JWT carrying `claims`.
pub fn fake_id_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

fn oauth_error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

async fn managed_identity_token(
    State(state): State<Arc<PlatformState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if headers.get("Metadata").and_then(|v| v.to_str().ok()) != Some("true") {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "Required metadata header not specified",
        );
    }
    let resource = query.get("resource").cloned().unwrap_or_default();
    state.mi_client_ids.lock().unwrap().push(query.get("client_id").cloned());
    state.mi_resources.lock().unwrap().push(resource.clone());

    let delay = state.mi_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let n = state.mi_calls.fetch_add(1, Ordering::SeqCst) + 1;

    if state.identity_missing.load(Ordering::SeqCst) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "Identity not found");
    }

    let expires_in = state.mi_expires_in.load(Ordering::SeqCst);
    Json(json!({
        "access_token": format!("mi-token-{n}"),
        "expires_in": expires_in.to_string(),
        "resource": resource,
        "token_type": "Bearer",
    }))
    .into_response()
}

/// App Service flavour: secret header, newer api-version and an absolute
/// `expires_on` sent as a string.
async fn app_service_token(
    State(state): State<Arc<PlatformState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let secret = headers.get("x-identity-header").and_then(|v| v.to_str().ok());
    if secret != Some(APP_SERVICE_SECRET) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "statusCode": 401, "message": "Invalid X-IDENTITY-HEADER" })),
        )
            .into_response();
    }
    if query.get("api-version").map(String::as_str) != Some("2019-08-01") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "statusCode": 400, "message": "Unsupported api-version" })),
        )
            .into_response();
    }
    let resource = query.get("resource").cloned().unwrap_or_default();
    state
        .mi_client_ids
        .lock()
        .unwrap()
        .push(query.get("client_id").cloned());
    state.mi_resources.lock().unwrap().push(resource.clone());
    let n = state.mi_calls.fetch_add(1, Ordering::SeqCst) + 1;

    let expires_on = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_secs()
        + state.mi_expires_in.load(Ordering::SeqCst);
    Json(json!({
        "access_token": format!("mi-token-{n}"),
        "expires_on": expires_on.to_string(),
        "resource": resource,
        "token_type": "Bearer",
        "client_id": query.get("client_id"),
    }))
    .into_response()
}

async fn token_endpoint(
    State(state): State<Arc<PlatformState>>,
    Path(tenant): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    state.exchanges.lock().unwrap().push(tenant.clone());

    if state
        .token_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "try again").into_response();
    }

    let field = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();
    if field("client_assertion_type") != JWT_BEARER
        || !field("client_assertion").starts_with("mi-token-")
    {
        return oauth_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "AADSTS7000215: invalid client assertion",
        );
    }

    let trusted = state.trust.lock().unwrap().get(&tenant).cloned();
    if trusted.as_deref() != Some(field("client_id")) {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_client",
            "AADSTS700236: no matching federated identity record found for presented assertion",
        );
    }

    match field("grant_type") {
        "client_credentials" => Json(json!({
            "token_type": "Bearer",
            "expires_in": 3599,
            "access_token": format!("vault-token-{tenant}"),
        }))
        .into_response(),
        "authorization_code" => {
            state
                .redirect_uris
                .lock()
                .unwrap()
                .push(field("redirect_uri").to_string());
            let claims = state.codes.lock().unwrap().remove(field("code"));
            match claims {
                Some(claims) => Json(json!({
                    "token_type": "Bearer",
                    "expires_in": 3599,
                    "access_token": format!("user-token-{tenant}"),
                    "id_token": fake_id_token(&claims),
                }))
                .into_response(),
                None => oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "AADSTS70008: code expired",
                ),
            }
        }
        other => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("grant {other} is not supported"),
        ),
    }
}

async fn get_secret(
    State(state): State<Arc<PlatformState>>,
    Path((vault, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    state.vault_calls.fetch_add(1, Ordering::SeqCst);

    if state
        .vault_failures
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
    {
        return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
    }

    let vaults = state.vaults.lock().unwrap();
    let Some((home_tenant, secrets)) = vaults.get(&vault) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    if bearer != format!("vault-token-{home_tenant}") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": { "code": "Unauthorized", "message": "AKV10032: Invalid issuer." }
            })),
        )
            .into_response();
    }

    match secrets.get(&name) {
        Some(value) => Json(json!({
            "value": value,
            "id": format!("{}/vaults/{vault}/secrets/{name}/v1", state.base),
            "attributes": { "enabled": true },
        }))
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": {
                    "code": "SecretNotFound",
                    "message": format!(
                        "A secret with (name/id) {name} was not found in this key vault."
                    ),
                }
            })),
        )
            .into_response(),
    }
}

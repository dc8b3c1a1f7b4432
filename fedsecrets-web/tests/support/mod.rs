#![allow(dead_code)]

#[path = "../../../fedsecrets-core/tests/support/platform.rs"]
pub mod platform;

use axum::Router;
use axum::body::Body;
use axum::http::header::{COOKIE, HOST, LOCATION, SET_COOKIE};
use axum::http::{Request, Response, StatusCode};
use fedsecrets_web::AppState;
use fedsecrets_web::auth::SESSION_COOKIE;
use fedsecrets_web::config::ConfigResolver;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;

use platform::{APP_CLIENT_ID, HOME_TENANT, MockPlatform, OTHER_TENANT};

pub const PUBLIC_HOST: &str = "app.contoso.net";

pub struct TestApp {
    pub platform: MockPlatform,
    pub state: AppState,
    pub router: Router,
}

/// Default configuration pointing every collaborator at the mock platform.
pub fn base_env(platform: &MockPlatform) -> Vec<(String, String)> {
    [
        ("AzureAd__Instance", platform.authority().to_string()),
        ("AzureAd__TenantId", HOME_TENANT.to_string()),
        ("AzureAd__ClientId", APP_CLIENT_ID.to_string()),
        ("ManagedIdentity__Endpoint", platform.msi_endpoint()),
        ("SameTenant__KeyVaultUri", platform.vault_uri("home")),
        ("SameTenant__SecretName", "same-secret".to_string()),
        ("CrossTenant__KeyVaultUri", platform.vault_uri("other")),
        ("CrossTenant__SecretName", "cross-secret".to_string()),
        ("CrossTenant__TenantId", OTHER_TENANT.to_string()),
        ("Retry__BaseDelayMs", "5".to_string()),
        ("Http__TimeoutSecs", "5".to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), value))
    .collect()
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

/// Start the mock platform and build the router, letting the caller adjust
/// the environment-style configuration first.
pub async fn spawn_app_with(adjust: impl FnOnce(&mut Vec<(String, String)>)) -> TestApp {
    let platform = MockPlatform::start().await;
    let mut env = base_env(&platform);
    adjust(&mut env);

    let resolved = ConfigResolver::new()
        .with_project_root("/nonexistent")
        .with_env(env)
        .load()
        .expect("config");
    let state = fedsecrets_web::build_state(resolved.config).expect("state");
    let router = fedsecrets_web::http::router(state.clone());
    TestApp {
        platform,
        state,
        router,
    }
}

pub fn set_env(env: &mut Vec<(String, String)>, key: &str, value: &str) {
    env.retain(|(existing, _)| existing != key);
    env.push((key.to_string(), value.to_string()));
}

impl TestApp {
    pub async fn get(&self, uri: &str, host: &str, session: Option<&str>) -> Response<Body> {
        let mut request = Request::builder().uri(uri).header(HOST, host);
        if let Some(session) = session {
            request = request.header(COOKIE, format!("{SESSION_COOKIE}={session}"));
        }
        self.router
            .clone()
            .oneshot(request.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    /// Follow the sign-in redirect for `path`, complete the callback with
    /// `claims` (the login nonce is filled in) and return the callback
    /// response.
    pub async fn complete_sign_in(&self, path: &str, mut claims: Value) -> Response<Body> {
        let redirect = self.get(path, PUBLIC_HOST, None).await;
        assert_eq!(redirect.status(), StatusCode::FOUND);
        let authorize = location(&redirect);
        let params = query_map(&authorize);

        if claims.get("nonce").is_none() {
            claims["nonce"] = json!(params["nonce"]);
        }
        self.platform.register_code("code-1", claims);

        let callback = format!(
            "/signin-oidc?code=code-1&state={}&session_state=ignored",
            params["state"]
        );
        self.get(&callback, PUBLIC_HOST, None).await
    }

    /// Sign in as a default user and return the session id.
    pub async fn sign_in(&self) -> String {
        let response = self
            .complete_sign_in(
                "/",
                json!({
                    "name": "Ada Lovelace",
                    "preferred_username": "ada@contoso.com",
                    "oid": "user-oid",
                    "tid": HOME_TENANT,
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::FOUND);
        session_cookie(&response).expect("session cookie")
    }
}

pub fn location(response: &Response<Body>) -> Url {
    let value = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("location header");
    Url::parse(value)
        .or_else(|_| Url::parse("https://relative.invalid").and_then(|base| base.join(value)))
        .expect("location url")
}

pub fn query_map(url: &Url) -> std::collections::HashMap<String, String> {
    url.query_pairs()
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| {
            let pair = value.split(';').next()?;
            let session = pair.strip_prefix(&format!("{SESSION_COOKIE}="))?;
            (!session.is_empty()).then(|| session.to_string())
        })
}

pub async fn json_body(response: Response<Body>) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&body).expect("json body")
}

pub async fn text_body(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8_lossy(&body).into_owned()
}

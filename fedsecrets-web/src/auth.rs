//! Interactive sign-in gate.
//!
//! Requests without a live session are sent to the identity provider's
//! authorize endpoint. The provider returns to the callback path with an
//! authorization code, which is redeemed with the application's federated
//! credential (no client secret). The resulting session id lives in an
//! HttpOnly cookie; session state stays on the server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Extension, Query, State};
use axum::http::header::{HOST, LOCATION};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use fedsecrets_core::{FederatedCredential, RequestHost};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, attach_correlation};
use crate::state::AppState;
use crate::telemetry::{CorrelationId, request_span};

pub const SESSION_COOKIE: &str = "fedsecrets_session";
pub const SIGNOUT_PATH: &str = "/signout";
pub const LOGIN_SCOPES: [&str; 2] = ["openid", "profile"];
const PENDING_LOGIN_TTL: Duration = Duration::from_secs(600);
const MAX_PENDING_LOGINS: usize = 1024;

/// Signed-in user, attached to gated requests as an extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserSession {
    pub id: String,
    pub name: String,
    pub username: Option<String>,
    pub object_id: Option<String>,
    pub tenant_id: Option<String>,
    pub expires_at: Instant,
}

#[derive(Clone, Debug)]
pub struct PendingLogin {
    pub nonce: String,
    pub return_to: String,
    pub redirect_uri: String,
    created_at: Instant,
}

/// In-memory session and pending-login store.
///
/// Expired entries are dropped whenever a new one is added. Pending logins
/// are capped; when full, the oldest attempt is evicted.
#[derive(Clone)]
pub struct SessionStore {
    ttl: Duration,
    pending_limit: usize,
    sessions: Arc<RwLock<HashMap<String, UserSession>>>,
    pending: Arc<RwLock<HashMap<String, PendingLogin>>>,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            pending_limit: MAX_PENDING_LOGINS,
            sessions: Arc::default(),
            pending: Arc::default(),
        }
    }

    /// Record a login attempt and return its `(state, nonce)`.
    pub async fn begin_login(&self, return_to: String, redirect_uri: String) -> (String, String) {
        let state = Uuid::new_v4().simple().to_string();
        let nonce = Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut pending = self.pending.write().await;
        pending.retain(|_, login| now.duration_since(login.created_at) < PENDING_LOGIN_TTL);
        while pending.len() >= self.pending_limit {
            let Some(oldest) = pending
                .iter()
                .min_by_key(|(_, login)| login.created_at)
                .map(|(state, _)| state.clone())
            else {
                break;
            };
            pending.remove(&oldest);
            debug!("pending login limit reached, evicted oldest attempt");
        }
        pending.insert(
            state.clone(),
            PendingLogin {
                nonce: nonce.clone(),
                return_to,
                redirect_uri,
                created_at: now,
            },
        );
        (state, nonce)
    }

    /// Consume the pending login for `state`. Each state is usable once.
    pub async fn take_pending(&self, state: &str) -> Option<PendingLogin> {
        self.take_pending_at(state, Instant::now()).await
    }

    pub async fn take_pending_at(&self, state: &str, now: Instant) -> Option<PendingLogin> {
        let login = self.pending.write().await.remove(state)?;
        (now.duration_since(login.created_at) < PENDING_LOGIN_TTL).then_some(login)
    }

    pub async fn create(&self, claims: &IdTokenClaims) -> UserSession {
        self.create_at(claims, Instant::now()).await
    }

    pub async fn create_at(&self, claims: &IdTokenClaims, now: Instant) -> UserSession {
        let session = UserSession {
            id: Uuid::new_v4().simple().to_string(),
            name: claims.display_name(),
            username: claims.preferred_username.clone(),
            object_id: claims.oid.clone(),
            tenant_id: claims.tid.clone(),
            expires_at: now + self.ttl,
        };
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, existing| existing.expires_at > now);
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get(&self, id: &str) -> Option<UserSession> {
        self.get_at(id, Instant::now()).await
    }

    pub async fn get_at(&self, id: &str, now: Instant) -> Option<UserSession> {
        let session = self.sessions.read().await.get(id).cloned()?;
        if session.expires_at > now {
            return Some(session);
        }
        self.sessions.write().await.remove(id);
        None
    }

    pub async fn remove(&self, id: &str) -> Option<UserSession> {
        self.sessions.write().await.remove(id)
    }
}

/// Claims read from the id token.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub oid: Option<String>,
    #[serde(default)]
    pub tid: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

impl IdTokenClaims {
    pub fn display_name(&self) -> String {
        self.name
            .clone()
            .or_else(|| self.preferred_username.clone())
            .or_else(|| self.oid.clone())
            .unwrap_or_else(|| "signed-in user".to_string())
    }
}

/// Read the payload of an id token received directly from the token
/// endpoint over TLS. The signature is not checked here.
pub fn decode_id_token(token: &str) -> Result<IdTokenClaims, AppError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(AppError::unauthorized("malformed id token")),
    };
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|err| AppError::unauthorized(format!("malformed id token payload: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| AppError::unauthorized(format!("malformed id token claims: {err}")))
}

/// Only same-origin relative paths are accepted as post-login targets.
pub fn sanitize_return_to(candidate: &str) -> String {
    let candidate = candidate.trim();
    let safe = candidate.starts_with('/')
        && !candidate.starts_with("//")
        && !candidate.starts_with("/\\")
        && !candidate.chars().any(|c| c.is_control());
    if safe {
        candidate.to_string()
    } else {
        "/".to_string()
    }
}

/// Endpoints and credential for the authorization-code flow.
#[derive(Clone, Debug)]
pub struct LoginFlow {
    instance: Url,
    tenant_id: String,
    client_id: String,
    callback_path: String,
    public_base_url: Option<Url>,
    credential: FederatedCredential,
}

impl LoginFlow {
    pub fn new(config: &AppConfig, credential: FederatedCredential) -> Self {
        Self {
            instance: config.azure_ad.instance.clone(),
            tenant_id: config.azure_ad.tenant_id.clone(),
            client_id: config.azure_ad.client_id.clone(),
            callback_path: config.azure_ad.callback_path.clone(),
            public_base_url: config.server.public_base_url.clone(),
            credential,
        }
    }

    pub fn callback_path(&self) -> &str {
        &self.callback_path
    }

    fn endpoint(&self, leaf: &str) -> Url {
        let mut url = self.instance.clone();
        url.set_query(None);
        url.set_fragment(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([self.tenant_id.as_str(), "oauth2", "v2.0", leaf]);
        }
        url
    }

    pub fn authorize_url(&self, redirect_uri: &str, state: &str, nonce: &str) -> Url {
        let mut url = self.endpoint("authorize");
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("response_mode", "query")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &LOGIN_SCOPES.join(" "))
            .append_pair("state", state)
            .append_pair("nonce", nonce);
        url
    }

    pub fn logout_url(&self, post_logout_redirect_uri: &str) -> Url {
        let mut url = self.endpoint("logout");
        url.query_pairs_mut()
            .append_pair("post_logout_redirect_uri", post_logout_redirect_uri);
        url
    }

    /// Public origin of this application, from configuration or the request.
    pub fn origin(&self, headers: &HeaderMap) -> String {
        if let Some(base) = &self.public_base_url {
            return base.as_str().trim_end_matches('/').to_string();
        }
        let host = headers
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| value == "http" || value == "https")
            .unwrap_or_else(|| {
                if RequestHost::from_authority(host).is_loopback() {
                    "http".to_string()
                } else {
                    "https".to_string()
                }
            });
        format!("{scheme}://{host}")
    }

    pub fn redirect_uri(&self, headers: &HeaderMap) -> String {
        format!("{}{}", self.origin(headers), self.callback_path)
    }

    pub fn secure_cookies(&self, headers: &HeaderMap) -> bool {
        self.origin(headers).starts_with("https://")
    }

    /// Redeem `code` and check the id token nonce.
    pub async fn redeem(
        &self,
        code: &str,
        pending: &PendingLogin,
    ) -> Result<IdTokenClaims, AppError> {
        let redemption = self
            .credential
            .redeem_authorization_code(code, &pending.redirect_uri, &LOGIN_SCOPES)
            .await?;
        let id_token = redemption
            .id_token
            .ok_or_else(|| AppError::unauthorized("token response did not include an id token"))?;
        let claims = decode_id_token(&id_token)?;
        if claims.nonce.as_deref() != Some(pending.nonce.as_str()) {
            return Err(AppError::unauthorized("id token nonce does not match the login request"));
        }
        Ok(claims)
    }
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(LOCATION, location.to_string())]).into_response()
}

/// Middleware for gated routes: attaches the [`UserSession`] or redirects
/// to the identity provider.
pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.get(cookie.value()).await {
            req.extensions_mut().insert(session);
            return next.run(req).await;
        }
        debug!("session cookie present but session unknown or expired");
    }

    let return_to = req
        .uri()
        .path_and_query()
        .map(|pq| sanitize_return_to(pq.as_str()))
        .unwrap_or_else(|| "/".to_string());
    let redirect_uri = state.login.redirect_uri(req.headers());
    let (login_state, nonce) = state
        .sessions
        .begin_login(return_to, redirect_uri.clone())
        .await;
    let location = state.login.authorize_url(&redirect_uri, &login_state, &nonce);
    info!(path = %req.uri().path(), "unauthenticated request, redirecting to sign-in");
    found(location.as_str())
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn callback(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Result<(CookieJar, Response), AppError> {
    let span = request_span("auth.callback", &correlation);
    async move {
        if let Some(error) = params.error {
            let description = params.error_description.unwrap_or_default();
            warn!(%error, %description, "identity provider returned an error");
            return Err(AppError::unauthorized(format!("{error}: {description}")));
        }
        let login_state = params
            .state
            .ok_or_else(|| AppError::bad_request("missing state parameter"))?;
        let pending = state
            .sessions
            .take_pending(&login_state)
            .await
            .ok_or_else(|| AppError::bad_request("unknown or expired login state"))?;
        let code = params
            .code
            .ok_or_else(|| AppError::bad_request("missing code parameter"))?;

        let claims = state.login.redeem(&code, &pending).await?;
        let session = state.sessions.create(&claims).await;
        info!(user = %session.name, "user signed in");

        let cookie = Cookie::build((SESSION_COOKIE, session.id))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(state.login.secure_cookies(&headers))
            .build();
        Ok((jar.add(cookie), found(&pending.return_to)))
    }
    .instrument(span)
    .await
    .map_err(|err| attach_correlation(err, &correlation))
}

pub async fn signout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> (CookieJar, Response) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Some(session) = state.sessions.remove(cookie.value()).await {
            info!(user = %session.name, "user signed out");
        }
    }
    let post_logout = format!("{}/", state.login.origin(&headers));
    let location = state.login.logout_url(&post_logout);
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, found(location.as_str()))
}

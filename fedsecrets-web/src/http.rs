use axum::extract::State;
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware;
use axum::response::{Html, IntoResponse};
use axum::{Extension, Json, Router, routing::get};
use fedsecrets_core::RequestHost;
use tracing::{Instrument, info};

use crate::auth::{self, SIGNOUT_PATH, UserSession};
use crate::error::{AppError, attach_correlation};
use crate::models::{LookupResult, OutcomeBody, SecretsResponse};
use crate::page;
use crate::state::AppState;
use crate::telemetry::{CorrelationId, correlation_layer, request_span};

pub fn router(state: AppState) -> Router {
    let gated = gated_routes().layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_session,
    ));

    Router::new()
        .route("/healthz", get(health_check))
        .route(state.login.callback_path(), get(auth::callback))
        .route(SIGNOUT_PATH, get(auth::signout))
        .merge(gated)
        .layer(middleware::from_fn(correlation_layer))
        .with_state(state)
}

fn gated_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/api/secrets", get(list_secrets))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// Host the request was addressed to, from the `Host` header or the URI.
pub fn request_host(headers: &HeaderMap, uri: &Uri) -> RequestHost {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(RequestHost::from_authority)
        .or_else(|| uri.host().map(RequestHost::from_authority))
        .unwrap_or_default()
}

/// Both configured lookups, run concurrently.
async fn lookup_both(state: &AppState, host: &RequestHost) -> (LookupResult, LookupResult) {
    let accessor = &state.accessor;
    let (same_tenant, cross_tenant) = tokio::join!(
        accessor.fetch(&state.config.same_tenant, host),
        accessor.fetch(&state.config.cross_tenant, host),
    );
    for (kind, result) in [
        (state.config.same_tenant.kind, &same_tenant),
        (state.config.cross_tenant.kind, &cross_tenant),
    ] {
        if let Err(err) = result {
            info!(
                target_kind = %kind,
                error_kind = err.kind(),
                error = %err,
                "secret lookup failed"
            );
        }
    }
    (same_tenant, cross_tenant)
}

async fn index(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    Extension(session): Extension<UserSession>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Html<String>, AppError> {
    let span = request_span("http.index", &correlation);
    async move {
        let host = request_host(&headers, &uri);
        let (same_tenant, cross_tenant) = lookup_both(&state, &host).await;
        let html = page::render_index(&session, &same_tenant, &cross_tenant)?;
        Ok(Html(html))
    }
    .instrument(span)
    .await
    .map_err(|err| attach_correlation(err, &correlation))
}

async fn list_secrets(
    State(state): State<AppState>,
    Extension(correlation): Extension<CorrelationId>,
    headers: HeaderMap,
    uri: Uri,
) -> Json<SecretsResponse> {
    let span = request_span("http.secrets", &correlation);
    async move {
        let host = request_host(&headers, &uri);
        let (same_tenant, cross_tenant) = lookup_both(&state, &host).await;
        Json(SecretsResponse {
            same_tenant: OutcomeBody::from(&same_tenant),
            cross_tenant: OutcomeBody::from(&cross_tenant),
        })
    }
    .instrument(span)
    .await
}

//! Viewer-facing HTTP surface.
//!
//! ## Endpoints
//!
//! - `GET /translation-events` — long-lived SSE stream: `connected`, then a
//!   replay of the conversation log, then live events.
//! - `GET /api/language-settings` — JSON snapshot of the current pair.
//! - `GET /health` — unauthenticated liveness probe.
//!
//! Viewer tokens are `userId:hex(sha256(userId || sha256(apiKey)))`, passed
//! as a bearer header or `?token=` for browser EventSource clients. Outside
//! production mode a missing or invalid token falls back to `dev-user`, or to
//! the first active user when one exists.

use std::collections::HashMap;
use std::convert::Infallible;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use chrono::Utc;
use futures_util::stream::Stream;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::Relay;

/// Fallback identity used outside production when no token is presented.
const DEV_USER: &str = "dev-user";

/// Build the viewer router.
#[must_use]
pub fn router(relay: Relay) -> Router {
    Router::new()
        .route("/translation-events", get(translation_events))
        .route("/api/language-settings", get(language_settings))
        .route("/health", get(health))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(relay)
}

/// Bind and serve until the token is cancelled.
///
/// # Errors
///
/// Returns an error if the port cannot be bound or the server fails.
pub async fn serve(relay: Relay, port: u16, cancel: CancellationToken) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let local_addr = listener.local_addr()?;
    info!("viewer surface listening on http://{local_addr}");

    axum::serve(listener, router(relay))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

async fn health(State(relay): State<Relay>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "app": relay.config().package_name,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn language_settings(
    State(relay): State<Relay>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match authenticate(&relay, &headers, &query) {
        Some(user_id) => Json(relay.language_pair(&user_id)).into_response(),
        None => unauthorized(),
    }
}

async fn translation_events(
    State(relay): State<Relay>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let Some(user_id) = authenticate(&relay, &headers, &query) else {
        return unauthorized();
    };
    debug!(user = %user_id, "viewer stream opened");

    let subscription = relay.subscribe(&user_id);
    Sse::new(event_stream(subscription))
        .keep_alive(KeepAlive::default())
        .into_response()
}

fn event_stream(
    subscription: crate::hub::ViewerSubscription,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let crate::hub::ViewerSubscription { initial, mut events, .. } = subscription;
        for event in initial {
            yield Ok(sse_event(&event));
        }
        while let Some(event) = events.recv().await {
            yield Ok(sse_event(&event));
        }
    }
}

fn sse_event(event: &crate::events::ViewerEvent) -> Event {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_owned());
    Event::default().event(event.event_type()).data(data)
}

fn unauthorized() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({"error": "unauthorized"})),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Token validation
// ---------------------------------------------------------------------------

/// Resolve the requesting user, or `None` for a hard 401.
fn authenticate(
    relay: &Relay,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Option<String> {
    let token = bearer_token(headers).or_else(|| query.get("token").cloned());

    if let Some(token) = token
        && let Some(user_id) = validate_token(&token, &relay.config().api_key)
    {
        return Some(user_id);
    }

    if relay.config().production {
        return None;
    }
    // Dev affordance: a browser poking at a local relay gets the first
    // active user, or a synthetic identity.
    Some(
        relay
            .first_active_user()
            .unwrap_or_else(|| DEV_USER.to_owned()),
    )
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Check `userId:signature` against the key-derived signature.
fn validate_token(token: &str, api_key: &str) -> Option<String> {
    let (user_id, presented) = token.rsplit_once(':')?;
    if user_id.is_empty() {
        return None;
    }
    let expected = user_token_signature(user_id, api_key);
    constant_time_eq(presented.as_bytes(), expected.as_bytes()).then(|| user_id.to_owned())
}

/// `hex(sha256(userId || sha256(apiKey)))`.
#[must_use]
pub fn user_token_signature(user_id: &str, api_key: &str) -> String {
    let key_digest = Sha256::digest(api_key.as_bytes());
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update(key_digest);
    hex_encode(&hasher.finalize())
}

/// The full token a viewer presents for `user_id`.
#[must_use]
pub fn viewer_token(user_id: &str, api_key: &str) -> String {
    format!("{user_id}:{}", user_token_signature(user_id, api_key))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

//! ActivityPub endpoints
//!
//! - Actor profile
//! - Inbox (activity receiving)
//! - Followers collection

use axum::body::Bytes;
use axum::{
    Router,
    extract::{OriginalUri, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};

use crate::AppState;
use crate::error::AppError;
use crate::federation::{
    ACTIVITY_JSON, Activity, Actor, SignedRequest, Verification,
};
use crate::metrics::ACTIVITIES_RECEIVED;

/// Create ActivityPub router
///
/// Routes:
/// - GET /users/:handle - Actor profile
/// - POST /users/:handle/inbox - Personal inbox
/// - POST /inbox - Shared inbox
/// - GET /users/:handle/followers - Followers collection
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/users/:handle", get(actor))
        .route("/users/:handle/inbox", post(inbox))
        .route("/inbox", post(shared_inbox))
        .route("/users/:handle/followers", get(followers))
}

/// Return true when the client asked for an ActivityStreams document.
fn wants_activity_json(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|media| {
            let media = media.split(';').next().unwrap_or("").trim();
            media.eq_ignore_ascii_case(ACTIVITY_JSON)
                || media.eq_ignore_ascii_case("application/ld+json")
        })
}

fn activity_json(body: serde_json::Value) -> Response {
    ([(header::CONTENT_TYPE, ACTIVITY_JSON)], Json(body)).into_response()
}

/// GET /users/:handle
///
/// Returns the actor document to ActivityPub clients and an HTML profile
/// page to everyone else.
async fn actor(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let actor = state
        .resolver
        .resolve_local(&handle)
        .await?
        .ok_or(AppError::NotFound)?;

    if wants_activity_json(&headers) {
        Ok(activity_json(actor.to_document()))
    } else {
        Ok(Html(render_profile(&actor)).into_response())
    }
}

fn render_profile(actor: &Actor) -> String {
    use html_escape::{encode_double_quoted_attribute, encode_text};

    let handle = actor.preferred_username.as_deref().unwrap_or_default();
    let name = actor.name.as_deref().unwrap_or(handle);
    let summary = actor
        .summary
        .as_deref()
        .map(|summary| format!("<p>{}</p>", encode_text(summary)))
        .unwrap_or_default();

    super::home::page(
        name,
        &format!(
            "<h1>{}</h1>\n<p>@{}</p>\n{}\n<p><a href=\"{}\">ActivityPub actor</a></p>",
            encode_text(name),
            encode_text(handle),
            summary,
            encode_double_quoted_attribute(&actor.id),
        ),
    )
}

/// POST /users/:handle/inbox
///
/// Receives incoming ActivityPub activities for the local actor.
async fn inbox(
    State(state): State<AppState>,
    Path(handle): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    if !state.resolver.is_local_handle(&handle) {
        return Err(AppError::NotFound);
    }
    receive(&state, &uri, &headers, &body).await
}

/// POST /inbox
///
/// Shared inbox. Only one account lives here, so it behaves like the
/// personal inbox.
async fn shared_inbox(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    receive(&state, &uri, &headers, &body).await
}

/// # Steps
/// 1. Reject unsigned requests
/// 2. Parse activity
/// 3. Verify HTTP Signature against the activity actor
/// 4. Apply the activity
async fn receive(
    state: &AppState,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<StatusCode, AppError> {
    if headers.get("signature").is_none() {
        ACTIVITIES_RECEIVED
            .with_label_values(&["unknown", "unsigned"])
            .inc();
        return Err(AppError::Unauthorized);
    }

    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| AppError::Validation(format!("Invalid JSON: {}", e)))?;
    let activity = Activity::from_value(&value)?;
    let activity_type = activity.kind.type_name().to_string();

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let request = SignedRequest {
        method: "POST",
        path_and_query,
        headers,
        body,
    };

    if let Verification::Rejected(reason) = state.verifier.verify(&request, &activity.actor).await {
        ACTIVITIES_RECEIVED
            .with_label_values(&[activity_type.as_str(), "rejected"])
            .inc();
        return Err(reason.into_error());
    }

    let outcome = state.inbox.process(activity).await?;
    ACTIVITIES_RECEIVED
        .with_label_values(&[activity_type.as_str(), outcome.label()])
        .inc();

    Ok(StatusCode::ACCEPTED)
}

/// GET /users/:handle/followers
///
/// Returns the followers as an OrderedCollection of actor URIs.
async fn followers(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> Result<Response, AppError> {
    if !state.resolver.is_local_handle(&handle) {
        return Err(AppError::NotFound);
    }

    let items = state.followers.unique_actor_uris().await?;
    let collection_id = format!("{}/followers", state.config.actor_uri());

    Ok(activity_json(serde_json::json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": collection_id,
        "type": "OrderedCollection",
        "totalItems": items.len(),
        "orderedItems": items,
    })))
}

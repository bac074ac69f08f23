use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{
        IntoResponse,
        sse::{Event as SseEvent, KeepAlive, Sse},
    },
};
use serde::Deserialize;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use vectorsmith_core::{Actor, GenerationId, VersionId};
use vectorsmith_generation::{GenerationRequest, PageRequest};
use vectorsmith_infra::{channel::channel, pipeline::ListScope};

use crate::app::errors;
use crate::app::services::AppServices;

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    #[serde(default)]
    pub mine: bool,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendVersionRequest {
    pub content: String,
    #[serde(default)]
    pub version_number: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateVersionRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibilityRequest {
    pub is_public: bool,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload
        .map(|Json(value)| value)
        .map_err(|e| errors::json_error(StatusCode::BAD_REQUEST, "invalid_body", e.body_text()))
}

fn parse_id<T>(raw: &str) -> Result<T, axum::response::Response>
where
    T: std::str::FromStr<Err = vectorsmith_core::DomainError>,
{
    raw.parse().map_err(errors::domain_error_to_response)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// POST /generations/stream
///
/// Runs the streaming orchestrator in its own task and relays its frames as
/// Server-Sent Events. Dropping the response (client disconnect) closes the
/// frame channel, which the orchestrator observes.
pub async fn stream_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let (tx, rx) = channel(services.stream_channel_capacity());
    let orchestrator = services.orchestrator().clone();
    tokio::spawn(async move {
        orchestrator.run(actor, request, Arc::new(tx)).await;
    });

    let frames = ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(SseEvent::default().data(event.to_json())));

    let mut response = Sse::new(frames).keep_alive(KeepAlive::default()).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

/// POST /generations
pub async fn create_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    payload: Result<Json<GenerationRequest>, JsonRejection>,
) -> axum::response::Response {
    let request = match body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match services.generations().generate(&actor, &request).await {
        Ok(detail) => (StatusCode::CREATED, Json(detail)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /generations?page&page_size&mine&public
pub async fn list_generations(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let scope = ListScope {
        mine: query.mine,
        public_only: query.public,
    };
    let page = PageRequest::new(query.page, query.page_size);

    match services.generations().list(&actor, scope, page).await {
        Ok(listing) => Json(listing).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// GET /generations/:id
pub async fn get_generation(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: GenerationId = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match services.generations().get(&actor, id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// POST /generations/:id/versions
pub async fn append_version(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<AppendVersionRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: GenerationId = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let request = match body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match services
        .generations()
        .append_version(&actor, id, request.content, request.version_number)
        .await
    {
        Ok(version) => (StatusCode::CREATED, Json(version)).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// PUT /versions/:id
pub async fn update_version(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateVersionRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: VersionId = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let request = match body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match services.generations().update_version(&actor, id, request.content).await {
        Ok(version) => Json(version).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

/// PATCH /generations/:id/visibility
pub async fn set_visibility(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<String>,
    payload: Result<Json<VisibilityRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: GenerationId = match parse_id(&id) {
        Ok(id) => id,
        Err(response) => return response,
    };
    let request = match body(payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match services.generations().set_visibility(&actor, id, request.is_public).await {
        Ok(generation) => Json(generation).into_response(),
        Err(e) => errors::service_error_to_response(e),
    }
}

//! JSON API for the approval workflow.
//!
//! Endpoints:
//! - `POST /api/v1/items`                 — submit an approval item
//! - `GET  /api/v1/items`                 — query items by filter
//! - `GET  /api/v1/items/{id}`            — fetch one item with history
//! - `POST /api/v1/items/{id}/actions`    — apply one workflow action
//! - `POST /api/v1/items/actions/batch`   — apply one action to many items
//! - `GET  /api/v1/stats`                 — workflow aggregates

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;

use tierflow_core::{
    ActionRequest, Actor, ApprovalItem, ItemFilter, ItemId, ItemStatus, Priority, WorkflowAction,
    WorkflowError, WorkflowStats,
};
use tierflow_db::ItemRepository;
use tierflow_engine::{ApprovalService, BatchResult, EngineError, NewItem};

pub struct ApiState<R> {
    pub service: Arc<ApprovalService<R>>,
}

impl<R> Clone for ApiState<R> {
    fn clone(&self) -> Self {
        Self { service: self.service.clone() }
    }
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateItemRequest {
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub priority: Option<String>,
    pub amount: Decimal,
    pub requested_by: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ActorPayload {
    pub name: String,
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct ActionPayload {
    pub actor: ActorPayload,
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchActionPayload {
    pub ids: Vec<String>,
    pub actor: ActorPayload,
    pub action: String,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ItemQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub priority: Option<String>,
    pub overdue: Option<bool>,
    pub assigned_name: Option<String>,
    pub assigned_role: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ItemListResponse {
    pub items: Vec<ApprovalItem>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct BatchFailurePayload {
    pub id: String,
    pub code: &'static str,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailurePayload>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    pub code: &'static str,
    pub retry: bool,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> (StatusCode, Json<ApiError>) {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError { error: message.into(), code: "bad_request", retry: false }),
        )
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router<R: ItemRepository + 'static>(service: Arc<ApprovalService<R>>) -> Router {
    Router::new()
        .route("/api/v1/items", post(create_item).get(list_items))
        .route("/api/v1/items/{id}", get(get_item))
        .route("/api/v1/items/{id}/actions", post(act_on_item))
        .route("/api/v1/items/actions/batch", post(batch_act))
        .route("/api/v1/stats", get(stats))
        .with_state(ApiState { service })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn create_item<R: ItemRepository>(
    State(state): State<ApiState<R>>,
    Json(request): Json<CreateItemRequest>,
) -> Result<(StatusCode, Json<ApprovalItem>), (StatusCode, Json<ApiError>)> {
    let priority = match request.priority.as_deref() {
        Some(raw) => Priority::from_str(raw)
            .map_err(|_| ApiError::bad_request(format!("unknown priority `{raw}`")))?,
        None => Priority::default(),
    };

    let item = state
        .service
        .create_item(NewItem {
            title: request.title,
            category: request.category,
            priority,
            amount: request.amount,
            requested_by: request.requested_by,
        })
        .await
        .map_err(error_response)?;

    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_item<R: ItemRepository>(
    State(state): State<ApiState<R>>,
    Path(id): Path<String>,
) -> Result<Json<ApprovalItem>, (StatusCode, Json<ApiError>)> {
    let item = state.service.get_item(&ItemId(id)).await.map_err(error_response)?;
    Ok(Json(item))
}

pub async fn list_items<R: ItemRepository>(
    State(state): State<ApiState<R>>,
    Query(query): Query<ItemQuery>,
) -> Result<Json<ItemListResponse>, (StatusCode, Json<ApiError>)> {
    let filter = parse_filter(query)?;
    let items = state.service.query(&filter).await.map_err(error_response)?;
    let count = items.len();
    Ok(Json(ItemListResponse { items, count }))
}

pub async fn act_on_item<R: ItemRepository>(
    State(state): State<ApiState<R>>,
    Path(id): Path<String>,
    Json(payload): Json<ActionPayload>,
) -> Result<Json<ApprovalItem>, (StatusCode, Json<ApiError>)> {
    let (actor, request) = parse_action(&payload.actor, &payload.action, payload.comment, payload.signature)?;
    let item =
        state.service.act(&ItemId(id), &actor, &request).await.map_err(error_response)?;
    Ok(Json(item))
}

pub async fn batch_act<R: ItemRepository>(
    State(state): State<ApiState<R>>,
    Json(payload): Json<BatchActionPayload>,
) -> Result<Json<BatchResponse>, (StatusCode, Json<ApiError>)> {
    let (actor, request) = parse_action(&payload.actor, &payload.action, payload.comment, payload.signature)?;
    let ids: Vec<ItemId> = payload.ids.into_iter().map(ItemId).collect();
    let result = state.service.batch_act(&ids, &actor, &request).await;
    Ok(Json(batch_response(result)))
}

pub async fn stats<R: ItemRepository>(
    State(state): State<ApiState<R>>,
    Query(query): Query<ItemQuery>,
) -> Result<Json<WorkflowStats>, (StatusCode, Json<ApiError>)> {
    let filter = parse_filter(query)?;
    let stats = state.service.stats(Some(&filter)).await.map_err(error_response)?;
    Ok(Json(stats))
}

// ---------------------------------------------------------------------------
// Parsing and error mapping
// ---------------------------------------------------------------------------

fn parse_action(
    actor: &ActorPayload,
    action: &str,
    comment: Option<String>,
    signature: Option<String>,
) -> Result<(Actor, ActionRequest), (StatusCode, Json<ApiError>)> {
    let action = WorkflowAction::from_str(action)
        .map_err(|_| ApiError::bad_request(format!("unknown action `{action}`")))?;
    let mut request = ActionRequest::new(action);
    if let Some(comment) = comment {
        request = request.with_comment(comment);
    }
    if let Some(signature) = signature {
        request = request.with_signature(signature);
    }
    Ok((Actor::new(actor.name.clone(), actor.role.clone()), request))
}

fn parse_filter(query: ItemQuery) -> Result<ItemFilter, (StatusCode, Json<ApiError>)> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            ItemStatus::from_str(raw)
                .map_err(|_| ApiError::bad_request(format!("unknown status `{raw}`")))?,
        ),
        None => None,
    };
    let priority = match query.priority.as_deref() {
        Some(raw) => Some(
            Priority::from_str(raw)
                .map_err(|_| ApiError::bad_request(format!("unknown priority `{raw}`")))?,
        ),
        None => None,
    };
    let assigned_to = match (query.assigned_name, query.assigned_role) {
        (Some(name), Some(role)) => Some(Actor::new(name, role)),
        (None, None) => None,
        _ => {
            return Err(ApiError::bad_request(
                "assigned_name and assigned_role must be supplied together",
            ))
        }
    };

    Ok(ItemFilter {
        status,
        category: query.category,
        priority,
        overdue_only: query.overdue.unwrap_or(false),
        assigned_to,
    })
}

fn batch_response(result: BatchResult) -> BatchResponse {
    BatchResponse {
        succeeded: result.succeeded.into_iter().map(|id| id.0).collect(),
        failed: result
            .failed
            .into_iter()
            .map(|failure| BatchFailurePayload {
                id: failure.id.0,
                code: failure.error.code(),
                error: failure.error.to_string(),
            })
            .collect(),
    }
}

fn error_response(error: EngineError) -> (StatusCode, Json<ApiError>) {
    let status = match &error {
        EngineError::Workflow(WorkflowError::Unauthorized { .. }) => StatusCode::FORBIDDEN,
        EngineError::Workflow(WorkflowError::InvalidTransition { .. }) => StatusCode::CONFLICT,
        EngineError::Workflow(
            WorkflowError::NegativeAmount { .. }
            | WorkflowError::UnknownRole { .. }
            | WorkflowError::NoMatchingRule { .. },
        ) => StatusCode::BAD_REQUEST,
        EngineError::ConcurrentModification { .. } => StatusCode::CONFLICT,
        EngineError::BatchNotAllowed { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
    };

    if status == StatusCode::SERVICE_UNAVAILABLE {
        warn!(error = %error, "request failed on the persistence layer");
    }

    (
        status,
        Json(ApiError { error: error.to_string(), code: error.code(), retry: error.is_retryable() }),
    )
}

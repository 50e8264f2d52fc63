use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Serialize;

use super::error::{ApiResult, AppError};
use super::state::AppState;
use super::types::*;
use crate::db::Actor;
use crate::engine::TicketEngine;
use crate::idempotency::{CachedResponse, MAX_KEY_LEN};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Absent header means no deduplication. A present one must be usable.
fn idempotency_key(headers: &HeaderMap) -> ApiResult<Option<String>> {
    let Some(value) = headers.get(IDEMPOTENCY_HEADER) else {
        return Ok(None);
    };
    let key = value
        .to_str()
        .map_err(|_| AppError::invalid_input("Idempotency-Key must be visible ASCII"))?
        .trim();
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(AppError::invalid_input(format!(
            "Idempotency-Key must be 1 to {} characters",
            MAX_KEY_LEN
        )));
    }
    Ok(Some(key.to_string()))
}

/// Serialize an outcome into the form the idempotency cache stores and replays.
fn respond<T: Serialize>(status: StatusCode, result: ApiResult<T>) -> CachedResponse {
    match result {
        Ok(body) => match serde_json::to_string(&body) {
            Ok(body) => CachedResponse {
                status_code: status.as_u16(),
                body,
            },
            Err(e) => AppError::internal(e).to_cached(),
        },
        Err(err) => err.to_cached(),
    }
}

fn mutate<F>(state: &AppState, actor: &Actor, headers: &HeaderMap, run: F) -> ApiResult<CachedResponse>
where
    F: FnOnce(&TicketEngine) -> CachedResponse,
{
    let key = idempotency_key(headers)?;
    Ok(state.engine.run_idempotent(actor, key.as_deref(), run))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ===== Tickets =====

pub async fn create_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    headers: HeaderMap,
    body: Result<Json<CreateTicketRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .into_new_ticket()
            .and_then(|new| Ok(engine.create(&actor, new)?))
            .map(TicketResponse::new);
        respond(StatusCode::CREATED, result)
    })
}

pub async fn list_tickets(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    query: Result<Query<ListTicketsQuery>, QueryRejection>,
) -> ApiResult<Json<TicketListResponse>> {
    let Query(query) = query?;
    let page = state.engine.list_tickets(&actor, query.into_filter()?)?;
    Ok(Json(TicketListResponse::from(page)))
}

pub async fn get_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<TicketResponse>> {
    let ticket = state.engine.get_ticket(&actor, &ticket_id)?;
    Ok(Json(TicketResponse::new(ticket)))
}

pub async fn update_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<UpdateTicketRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .into_patch()
            .and_then(|(version, patch)| Ok(engine.apply_update(&actor, &ticket_id, version, patch)?))
            .map(TicketResponse::new);
        respond(StatusCode::OK, result)
    })
}

pub async fn assign_ticket(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .assignee()
            .and_then(|assignee| Ok(engine.assign(&actor, &ticket_id, assignee)?))
            .map(TicketResponse::new);
        respond(StatusCode::OK, result)
    })
}

pub async fn set_status(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .status()
            .and_then(|status| Ok(engine.set_status(&actor, &ticket_id, status)?))
            .map(TicketResponse::new);
        respond(StatusCode::OK, result)
    })
}

pub async fn set_priority(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<PriorityRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .priority()
            .and_then(|priority| Ok(engine.set_priority(&actor, &ticket_id, priority)?))
            .map(TicketResponse::new);
        respond(StatusCode::OK, result)
    })
}

pub async fn bulk_assign(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    headers: HeaderMap,
    body: Result<Json<BulkAssignRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .assigned_to
            .ok_or_else(|| AppError::field_required("assignedTo"))
            .and_then(|assignee| Ok(engine.bulk_assign(&actor, &req.ticket_ids, assignee)?))
            .map(|modified_count| BulkAssignResponse {
                success: true,
                modified_count,
            });
        respond(StatusCode::OK, result)
    })
}

// ===== Comments =====

pub async fn list_comments(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<CommentListResponse>> {
    let comments = state.engine.list_comments(&actor, &ticket_id)?;
    Ok(Json(CommentListResponse {
        success: true,
        comments,
    }))
}

pub async fn create_comment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<CreateCommentRequest>, JsonRejection>,
) -> ApiResult<CachedResponse> {
    let Json(req) = body?;
    mutate(&state, &actor, &headers, |engine| {
        let result = req
            .into_parts()
            .and_then(|(content, kind)| Ok(engine.add_comment(&actor, &ticket_id, &content, kind)?))
            .map(|outcome| CommentResponse {
                success: true,
                comment: outcome.comment,
                ticket: outcome.ticket,
            });
        respond(StatusCode::CREATED, result)
    })
}

// ===== Timeline / Dashboard =====

pub async fn get_timeline(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(ticket_id): Path<String>,
) -> ApiResult<Json<TimelineResponse>> {
    let events = state.engine.timeline(&actor, &ticket_id)?;
    Ok(Json(TimelineResponse {
        success: true,
        events,
    }))
}

pub async fn dashboard_stats(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> ApiResult<Json<DashboardResponse>> {
    let stats = state.engine.dashboard_stats(&actor)?;
    Ok(Json(DashboardResponse {
        success: true,
        stats,
    }))
}

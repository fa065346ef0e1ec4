use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::CurrentUser,
    error::AppError,
    metrics::{
        dto::{
            CreateContributionRequest, CreateMetricRequest, CreateReportRequest, MetricDetails,
            MetricFilter, MetricSummary, OccurrenceFilter, OccurrenceView, OwnerCount, OwnerFilter,
            ReportCreated, UserContributions, WatchResponse,
        },
        repo_types::{Contribution, Metric},
        services,
    },
    state::AppState,
};

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:id/metrics", get(list_metrics))
        .route("/metrics/:id", get(get_metric))
        .route("/metrics/:id/occurrences", get(list_occurrences))
        .route("/metrics/:id/owners", get(list_owners))
        .route("/metrics/:id/contributors/:user_id", get(get_user_contributions))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/projects/:id/metrics", post(create_metric))
        .route("/metrics/:id", axum::routing::delete(delete_metric))
        .route("/metrics/:id/watch", post(toggle_watch))
        .route("/metrics/:id/reports", post(create_report))
        .route("/metrics/:id/contributions", post(create_contribution))
}

// --- handlers ---

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn list_metrics(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(filter): Query<MetricFilter>,
) -> Result<Json<Vec<MetricSummary>>, AppError> {
    let metrics =
        services::list_project_metrics(state.store.as_ref(), &user, id, filter.query.as_deref())
            .await?;
    Ok(Json(metrics))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn create_metric(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateMetricRequest>,
) -> Result<(StatusCode, Json<Metric>), AppError> {
    let metric = services::create_metric(state.store.as_ref(), &user, id, &body.name).await?;
    Ok((StatusCode::CREATED, Json(metric)))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn get_metric(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MetricDetails>, AppError> {
    Ok(Json(services::metric_details(state.store.as_ref(), &user, id).await?))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn delete_metric(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    services::delete_metric(state.store.as_ref(), &user, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn list_occurrences(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(filter): Query<OccurrenceFilter>,
) -> Result<Json<Vec<OccurrenceView>>, AppError> {
    let rows = services::metric_occurrences(
        state.store.as_ref(),
        &user,
        id,
        filter.report_id,
        filter.owner.as_deref(),
    )
    .await?;
    Ok(Json(rows))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn list_owners(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Query(filter): Query<OwnerFilter>,
) -> Result<Json<Vec<OwnerCount>>, AppError> {
    let owners = services::metric_owners(
        state.store.as_ref(),
        &user,
        id,
        filter.report_id,
        filter.search.as_deref(),
    )
    .await?;
    Ok(Json(owners))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn get_user_contributions(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<UserContributions>, AppError> {
    Ok(Json(
        services::user_contributions(state.store.as_ref(), &user, id, user_id).await?,
    ))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn toggle_watch(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<WatchResponse>, AppError> {
    let watch = services::toggle_watch(state.store.as_ref(), &user, id).await?;
    Ok(Json(watch.into()))
}

#[instrument(skip(state, user, body), fields(viewer_id = %user.id))]
pub async fn create_report(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateReportRequest>,
) -> Result<(StatusCode, Json<ReportCreated>), AppError> {
    let created = services::record_report(state.store.as_ref(), &user, id, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip(state, user, body), fields(viewer_id = %user.id))]
pub async fn create_contribution(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<CreateContributionRequest>,
) -> Result<(StatusCode, Json<Contribution>), AppError> {
    let contribution = services::record_contribution(state.store.as_ref(), &user, id, body).await?;
    Ok((StatusCode::CREATED, Json(contribution)))
}

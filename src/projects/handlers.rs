use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::extractors::CurrentUser,
    error::AppError,
    projects::{
        dto::{CreateOrganizationRequest, CreateProjectRequest, GrantAuthorizationRequest},
        repo_types::{Authorization, Organization, ProjectView},
        services,
    },
    state::AppState,
};

pub fn organization_routes() -> Router<AppState> {
    Router::new()
        .route("/organizations", post(create_organization))
        .route("/organizations/:id/authorizations", post(grant_authorization))
}

pub fn project_routes() -> Router<AppState> {
    Router::new().route("/projects", get(list_projects).post(create_project))
}

#[instrument(skip_all, fields(viewer_id = %user.id))]
pub async fn list_projects(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ProjectView>>, AppError> {
    let projects = state.store.visible_projects(&user).await?;
    let views = services::project_views(state.store.as_ref(), projects).await?;
    Ok(Json(views))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn create_project(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<ProjectView>), AppError> {
    let project =
        services::create_project(state.store.as_ref(), &user, &body.name, body.organization_id)
            .await?;
    Ok((StatusCode::CREATED, Json(ProjectView::new(project, user.public()))))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn create_organization(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(body): Json<CreateOrganizationRequest>,
) -> Result<(StatusCode, Json<Organization>), AppError> {
    let org = services::create_organization(state.store.as_ref(), &user, &body.name).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

#[instrument(skip(state, user), fields(viewer_id = %user.id))]
pub async fn grant_authorization(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(body): Json<GrantAuthorizationRequest>,
) -> Result<(StatusCode, Json<Authorization>), AppError> {
    let auth =
        services::grant_authorization(state.store.as_ref(), &user, id, body.user_id).await?;
    Ok((StatusCode::CREATED, Json(auth)))
}

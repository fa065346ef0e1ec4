use axum::{
    extract::{FromRef, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{AuthResponse, RefreshRequest, RegisterRequest, RegisterResponse, TokenRequest},
        extractors::CurrentUser,
        services::{user_for_api_key, JwtKeys},
    },
    error::AppError,
    state::AppState,
    users::{
        repo_types::{NewUser, PublicUser, User},
        services::build_user,
    },
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register))
        .route("/auth/token", post(token))
        .route("/auth/refresh", post(refresh))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

fn issue(keys: &JwtKeys, user: &User) -> Result<AuthResponse, AppError> {
    let (access_token, refresh_token) = keys.sign_pair(user.id)?;
    Ok(AuthResponse {
        access_token,
        refresh_token,
        user: user.public(),
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let user = build_user(NewUser {
        name: payload.name,
        email: payload.email,
        github_handle: payload.github_handle,
        admin: false,
    })?;
    let user = state.store.insert_user(user).await?;

    let keys = JwtKeys::from_ref(&state);
    let auth = issue(&keys, &user)?;
    info!(user_id = %user.id, github_handle = %user.github_handle, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            auth,
            api_key: user.api_key,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let user = user_for_api_key(state.store.as_ref(), &payload.api_key).await?;
    let keys = JwtKeys::from_ref(&state);
    let auth = issue(&keys, &user)?;
    info!(user_id = %user.id, "token issued");
    Ok(Json(auth))
}

#[instrument(skip(state, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    let keys = JwtKeys::from_ref(&state);
    let claims = keys
        .verify_refresh(&payload.refresh_token)
        .map_err(|e| AppError::Unauthorized(e.to_string()))?;

    let user = state
        .store
        .find_user(claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized("user not found".into()))?;
    Ok(Json(issue(&keys, &user)?))
}

pub async fn get_me(CurrentUser(user): CurrentUser) -> Json<PublicUser> {
    Json(user.public())
}

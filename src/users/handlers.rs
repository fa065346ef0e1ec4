use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    auth::extractors::CurrentUser, error::AppError, state::AppState,
    users::{repo_types::PublicUser, services::serializable_attributes},
};

pub fn user_routes() -> Router<AppState> {
    Router::new().route("/users/:id", get(get_user))
}

/// Profile of any user, reduced to public attributes.
#[instrument(skip(state, _viewer))]
pub async fn get_user(
    State(state): State<AppState>,
    _viewer: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state
        .store
        .find_user(id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    debug!(attributes = ?serializable_attributes(&user), "serving public profile");
    Ok(Json(user.public()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::{repo_types::NewUser, services::build_user};

    #[tokio::test]
    async fn profile_is_public_projection() {
        let state = AppState::fake();
        let user = build_user(NewUser {
            name: "Yan Bonnel".into(),
            email: "yan.bonnel@example.com".into(),
            github_handle: Some("yanbonnel".into()),
            admin: false,
        })
        .unwrap();
        let user = state.store.insert_user(user).await.unwrap();

        let Json(profile) = get_user(State(state.clone()), CurrentUser(user.clone()), Path(user.id))
            .await
            .unwrap();
        assert_eq!(profile.github_handle, "yanbonnel");
        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains(&user.api_key));

        let err = get_user(State(state), CurrentUser(user), Path(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound("user")));
    }
}

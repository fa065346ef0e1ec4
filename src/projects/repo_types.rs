use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::PublicUser;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub user_id: Uuid, // owner
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Grants `user_id` visibility into the organization's projects.
#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Authorization {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub user_id: Uuid, // owner
    pub organization_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
}

/// Project with its owner embedded, as returned to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectView {
    pub id: Uuid,
    pub name: String,
    pub organization_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub user: PublicUser,
}

impl ProjectView {
    pub fn new(project: Project, owner: PublicUser) -> Self {
        Self {
            id: project.id,
            name: project.name,
            organization_id: project.organization_id,
            created_at: project.created_at,
            user: owner,
        }
    }
}

use serde::Serialize;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Attributes of a user that may leave the process.
pub const NON_SENSITIVE_ATTRIBUTES: [&str; 6] =
    ["id", "name", "email", "github_handle", "admin", "created_at"];

/// User record in the database.
///
/// Not `Serialize`: the only way out is [`PublicUser`].
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub github_handle: String, // stored without the leading '@'
    pub api_key: String,
    pub admin: bool,
    pub created_at: OffsetDateTime,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Serializable projection of this user.
    pub fn public(&self) -> PublicUser {
        PublicUser::from(self)
    }
}

/// Fields accepted when creating a user.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub github_handle: Option<String>,
    pub admin: bool,
}

/// Public part of the user, used for every serialized form of a user,
/// standalone or embedded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub github_handle: String,
    pub admin: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for PublicUser {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            name: u.name.clone(),
            email: u.email.clone(),
            github_handle: u.github_handle.clone(),
            admin: u.admin,
            created_at: u.created_at,
        }
    }
}

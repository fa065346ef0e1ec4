//! Persistence seam. Services only talk to [`Store`]; `PgStore` backs
//! production and `MemoryStore` backs tests and local demos.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::repo_types::{
    Contribution, Metric, MetricSnapshot, NewContribution, NewReport, Occurrence, Report,
};
use crate::projects::repo_types::{Authorization, NewProject, Organization, Project};
use crate::users::repo_types::User;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Persist an already validated user.
    async fn insert_user(&self, user: User) -> Result<User, AppError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, AppError>;

    async fn insert_organization(&self, name: &str, owner_id: Uuid)
        -> Result<Organization, AppError>;
    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError>;
    /// Idempotent: a second grant returns the existing row.
    async fn grant_authorization(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Authorization, AppError>;
    async fn authorized_organization_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError>;

    async fn insert_project(&self, new: NewProject) -> Result<Project, AppError>;
    async fn find_project(&self, id: Uuid) -> Result<Option<Project>, AppError>;
    /// Projects `viewer` may see, oldest first. Admins see every project.
    async fn visible_projects(&self, viewer: &User) -> Result<Vec<Project>, AppError>;

    async fn insert_metric(&self, project_id: Uuid, name: &str) -> Result<Metric, AppError>;
    /// Metrics of a project in creation order.
    async fn list_metrics(&self, project_id: Uuid) -> Result<Vec<Metric>, AppError>;
    async fn count_metrics(&self) -> Result<i64, AppError>;
    async fn list_reports(&self, metric_id: Uuid) -> Result<Vec<Report>, AppError>;
    /// Consistent read of a metric and everything hanging off it.
    async fn metric_snapshot(&self, metric_id: Uuid) -> Result<Option<MetricSnapshot>, AppError>;
    /// Delete a metric with its reports, occurrences, contributions and
    /// watches in one transaction. Returns false when nothing was deleted.
    async fn delete_metric(&self, metric_id: Uuid) -> Result<bool, AppError>;

    /// Insert a report and its occurrences atomically.
    async fn insert_report(&self, new: NewReport)
        -> Result<(Report, Vec<Occurrence>), AppError>;
    async fn insert_contribution(&self, new: NewContribution) -> Result<Contribution, AppError>;

    /// Flip the (user, metric) watch. Returns whether the user now watches.
    async fn toggle_watch(&self, user_id: Uuid, metric_id: Uuid) -> Result<bool, AppError>;
    async fn is_watching(&self, user_id: Uuid, metric_id: Uuid) -> Result<bool, AppError>;
}

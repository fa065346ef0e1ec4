use std::collections::{BTreeSet, HashSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::repo_types::{
    Contribution, Metric, MetricSnapshot, NewContribution, NewReport, Occurrence, Report,
};
use crate::metrics::services::dedup_owners;
use crate::projects::repo_types::{Authorization, NewProject, Organization, Project};
use crate::projects::services::filter_visible;
use crate::store::Store;
use crate::users::repo_types::User;

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    organizations: Vec<Organization>,
    authorizations: Vec<Authorization>,
    projects: Vec<Project>,
    metrics: Vec<Metric>,
    reports: Vec<Report>,
    occurrences: Vec<Occurrence>,
    contributions: Vec<Contribution>,
    watches: BTreeSet<(Uuid, Uuid)>, // (user_id, metric_id)
}

impl Tables {
    fn has_user(&self, id: Uuid) -> bool {
        self.users.iter().any(|u| u.id == id)
    }

    fn has_metric(&self, id: Uuid) -> bool {
        self.metrics.iter().any(|m| m.id == id)
    }
}

/// Process-local store. Every mutation holds the write lock for its whole
/// duration, so cascades are atomic to readers.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_user(&self, user: User) -> Result<User, AppError> {
        let mut t = self.tables.write().await;
        if t.users.iter().any(|u| u.api_key == user.api_key) {
            return Err(AppError::validation("api_key", "has already been taken"));
        }
        t.users.push(user.clone());
        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, AppError> {
        let t = self.tables.read().await;
        Ok(t.users.iter().find(|u| u.api_key == api_key).cloned())
    }

    async fn insert_organization(
        &self,
        name: &str,
        owner_id: Uuid,
    ) -> Result<Organization, AppError> {
        let mut t = self.tables.write().await;
        if !t.has_user(owner_id) {
            return Err(AppError::NotFound("user"));
        }
        let org = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            user_id: owner_id,
            created_at: OffsetDateTime::now_utc(),
        };
        t.organizations.push(org.clone());
        Ok(org)
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError> {
        let t = self.tables.read().await;
        Ok(t.organizations.iter().find(|o| o.id == id).cloned())
    }

    async fn grant_authorization(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Authorization, AppError> {
        let mut t = self.tables.write().await;
        if let Some(existing) = t
            .authorizations
            .iter()
            .find(|a| a.user_id == user_id && a.organization_id == organization_id)
        {
            return Ok(existing.clone());
        }
        if !t.has_user(user_id) {
            return Err(AppError::NotFound("user"));
        }
        if !t.organizations.iter().any(|o| o.id == organization_id) {
            return Err(AppError::NotFound("organization"));
        }
        let auth = Authorization {
            id: Uuid::new_v4(),
            user_id,
            organization_id,
            created_at: OffsetDateTime::now_utc(),
        };
        t.authorizations.push(auth.clone());
        Ok(auth)
    }

    async fn authorized_organization_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        let t = self.tables.read().await;
        Ok(t.authorizations
            .iter()
            .filter(|a| a.user_id == user_id)
            .map(|a| a.organization_id)
            .collect())
    }

    async fn insert_project(&self, new: NewProject) -> Result<Project, AppError> {
        let mut t = self.tables.write().await;
        if !t.has_user(new.user_id) {
            return Err(AppError::NotFound("user"));
        }
        if let Some(org) = new.organization_id {
            if !t.organizations.iter().any(|o| o.id == org) {
                return Err(AppError::NotFound("organization"));
            }
        }
        let project = Project {
            id: Uuid::new_v4(),
            name: new.name,
            user_id: new.user_id,
            organization_id: new.organization_id,
            created_at: OffsetDateTime::now_utc(),
        };
        t.projects.push(project.clone());
        Ok(project)
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        let t = self.tables.read().await;
        Ok(t.projects.iter().find(|p| p.id == id).cloned())
    }

    async fn visible_projects(&self, viewer: &User) -> Result<Vec<Project>, AppError> {
        let t = self.tables.read().await;
        let orgs: HashSet<Uuid> = t
            .authorizations
            .iter()
            .filter(|a| a.user_id == viewer.id)
            .map(|a| a.organization_id)
            .collect();
        Ok(filter_visible(viewer, t.projects.iter().cloned(), &orgs))
    }

    async fn insert_metric(&self, project_id: Uuid, name: &str) -> Result<Metric, AppError> {
        let mut t = self.tables.write().await;
        if !t.projects.iter().any(|p| p.id == project_id) {
            return Err(AppError::NotFound("project"));
        }
        let metric = Metric {
            id: Uuid::new_v4(),
            project_id,
            name: name.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        t.metrics.push(metric.clone());
        Ok(metric)
    }

    async fn list_metrics(&self, project_id: Uuid) -> Result<Vec<Metric>, AppError> {
        let t = self.tables.read().await;
        Ok(t.metrics
            .iter()
            .filter(|m| m.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn count_metrics(&self) -> Result<i64, AppError> {
        let t = self.tables.read().await;
        Ok(t.metrics.len() as i64)
    }

    async fn list_reports(&self, metric_id: Uuid) -> Result<Vec<Report>, AppError> {
        let t = self.tables.read().await;
        Ok(t.reports
            .iter()
            .filter(|r| r.metric_id == metric_id)
            .cloned()
            .collect())
    }

    async fn metric_snapshot(&self, metric_id: Uuid) -> Result<Option<MetricSnapshot>, AppError> {
        let t = self.tables.read().await;
        let Some(metric) = t.metrics.iter().find(|m| m.id == metric_id).cloned() else {
            return Ok(None);
        };
        let project = t
            .projects
            .iter()
            .find(|p| p.id == metric.project_id)
            .cloned()
            .ok_or(AppError::NotFound("project"))?;
        let reports: Vec<Report> = t
            .reports
            .iter()
            .filter(|r| r.metric_id == metric_id)
            .cloned()
            .collect();
        let report_ids: HashSet<Uuid> = reports.iter().map(|r| r.id).collect();
        let occurrences = t
            .occurrences
            .iter()
            .filter(|o| report_ids.contains(&o.report_id))
            .cloned()
            .collect();
        let contributions = t
            .contributions
            .iter()
            .filter(|c| c.metric_id == metric_id)
            .cloned()
            .collect();
        Ok(Some(MetricSnapshot {
            metric,
            project,
            reports,
            occurrences,
            contributions,
        }))
    }

    async fn delete_metric(&self, metric_id: Uuid) -> Result<bool, AppError> {
        let mut t = self.tables.write().await;
        if !t.has_metric(metric_id) {
            return Ok(false);
        }
        let report_ids: HashSet<Uuid> = t
            .reports
            .iter()
            .filter(|r| r.metric_id == metric_id)
            .map(|r| r.id)
            .collect();
        t.occurrences.retain(|o| !report_ids.contains(&o.report_id));
        t.reports.retain(|r| r.metric_id != metric_id);
        t.contributions.retain(|c| c.metric_id != metric_id);
        t.watches.retain(|(_, m)| *m != metric_id);
        t.metrics.retain(|m| m.id != metric_id);
        debug!(%metric_id, reports = report_ids.len(), "metric removed from memory store");
        Ok(true)
    }

    async fn insert_report(
        &self,
        new: NewReport,
    ) -> Result<(Report, Vec<Occurrence>), AppError> {
        let mut t = self.tables.write().await;
        if !t.has_metric(new.metric_id) {
            return Err(AppError::NotFound("metric"));
        }
        let report = Report {
            id: Uuid::new_v4(),
            metric_id: new.metric_id,
            value: new.value,
            date: new.date,
            value_by_owner: new.value_by_owner,
        };
        let occurrences: Vec<Occurrence> = new
            .occurrences
            .into_iter()
            .map(|o| Occurrence {
                id: Uuid::new_v4(),
                report_id: report.id,
                text: o.text,
                url: o.url,
                value: o.value,
                owners: dedup_owners(o.owners),
            })
            .collect();
        t.reports.push(report.clone());
        t.occurrences.extend(occurrences.iter().cloned());
        Ok((report, occurrences))
    }

    async fn insert_contribution(&self, new: NewContribution) -> Result<Contribution, AppError> {
        let mut t = self.tables.write().await;
        if !t.has_metric(new.metric_id) {
            return Err(AppError::NotFound("metric"));
        }
        let contribution = Contribution {
            id: Uuid::new_v4(),
            metric_id: new.metric_id,
            author_name: new.author_name,
            author_email: new.author_email,
            commit_date: new.commit_date,
            diff: new.diff,
        };
        t.contributions.push(contribution.clone());
        Ok(contribution)
    }

    async fn toggle_watch(&self, user_id: Uuid, metric_id: Uuid) -> Result<bool, AppError> {
        let mut t = self.tables.write().await;
        if !t.has_metric(metric_id) {
            return Err(AppError::NotFound("metric"));
        }
        let key = (user_id, metric_id);
        if t.watches.remove(&key) {
            Ok(false)
        } else {
            t.watches.insert(key);
            Ok(true)
        }
    }

    async fn is_watching(&self, user_id: Uuid, metric_id: Uuid) -> Result<bool, AppError> {
        let t = self.tables.read().await;
        Ok(t.watches.contains(&(user_id, metric_id)))
    }
}

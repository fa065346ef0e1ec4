use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::repo_types::{
    Contribution, Metric, MetricSnapshot, NewContribution, NewReport, Occurrence, Report,
    ReportRow,
};
use crate::metrics::services::dedup_owners;
use crate::projects::repo_types::{Authorization, NewProject, Organization, Project};
use crate::store::Store;
use crate::users::repo_types::User;

const FOREIGN_KEY_VIOLATION: &str = "23503";
const UNIQUE_VIOLATION: &str = "23505";

const USER_COLS: &str = "id, name, email, github_handle, api_key, admin, created_at";
const PROJECT_COLS: &str = "id, name, user_id, organization_id, created_at";

fn db_code(e: &sqlx::Error) -> Option<String> {
    e.as_database_error()
        .and_then(|d| d.code())
        .map(|c| c.into_owned())
}

/// Turns a dangling reference into NotFound for `entity`.
fn missing_parent(entity: &'static str) -> impl FnOnce(sqlx::Error) -> AppError {
    move |e| match db_code(&e).as_deref() {
        Some(FOREIGN_KEY_VIOLATION) => AppError::NotFound(entity),
        _ => AppError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let db = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .context("connect to database")?;
        Ok(Self { db })
    }

    /// Applies the embedded schema. The watch and handle constraints live
    /// there, so a store without them must not serve requests.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_user(&self, user: User) -> Result<User, AppError> {
        let sql = format!(
            "INSERT INTO users ({USER_COLS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(user.id)
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.github_handle)
            .bind(&user.api_key)
            .bind(user.admin)
            .bind(user.created_at)
            .fetch_one(&self.db)
            .await
            .map_err(|e| match db_code(&e).as_deref() {
                Some(UNIQUE_VIOLATION) => AppError::validation("api_key", "has already been taken"),
                _ => AppError::Database(e),
            })
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {USER_COLS} FROM users WHERE api_key = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(api_key)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn insert_organization(
        &self,
        name: &str,
        owner_id: Uuid,
    ) -> Result<Organization, AppError> {
        sqlx::query_as::<_, Organization>(
            r#"
            INSERT INTO organizations (id, name, user_id)
            VALUES ($1, $2, $3)
            RETURNING id, name, user_id, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(owner_id)
        .fetch_one(&self.db)
        .await
        .map_err(missing_parent("user"))
    }

    async fn find_organization(&self, id: Uuid) -> Result<Option<Organization>, AppError> {
        Ok(sqlx::query_as::<_, Organization>(
            r#"SELECT id, name, user_id, created_at FROM organizations WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?)
    }

    async fn grant_authorization(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
    ) -> Result<Authorization, AppError> {
        sqlx::query(
            r#"
            INSERT INTO authorizations (id, user_id, organization_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, organization_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(organization_id)
        .execute(&self.db)
        .await
        .map_err(missing_parent("organization"))?;

        Ok(sqlx::query_as::<_, Authorization>(
            r#"
            SELECT id, user_id, organization_id, created_at
              FROM authorizations
             WHERE user_id = $1 AND organization_id = $2
            "#,
        )
        .bind(user_id)
        .bind(organization_id)
        .fetch_one(&self.db)
        .await?)
    }

    async fn authorized_organization_ids(&self, user_id: Uuid) -> Result<Vec<Uuid>, AppError> {
        Ok(sqlx::query_scalar::<_, Uuid>(
            r#"SELECT organization_id FROM authorizations WHERE user_id = $1"#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn insert_project(&self, new: NewProject) -> Result<Project, AppError> {
        let sql = format!(
            "INSERT INTO projects (id, name, user_id, organization_id) \
             VALUES ($1, $2, $3, $4) RETURNING {PROJECT_COLS}"
        );
        sqlx::query_as::<_, Project>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.name)
            .bind(new.user_id)
            .bind(new.organization_id)
            .fetch_one(&self.db)
            .await
            .map_err(missing_parent("organization"))
    }

    async fn find_project(&self, id: Uuid) -> Result<Option<Project>, AppError> {
        let sql = format!("SELECT {PROJECT_COLS} FROM projects WHERE id = $1");
        Ok(sqlx::query_as::<_, Project>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?)
    }

    async fn visible_projects(&self, viewer: &User) -> Result<Vec<Project>, AppError> {
        let rows = if viewer.is_admin() {
            let sql = format!("SELECT {PROJECT_COLS} FROM projects ORDER BY created_at, id");
            sqlx::query_as::<_, Project>(&sql)
                .fetch_all(&self.db)
                .await?
        } else {
            let sql = format!(
                r#"
                SELECT {PROJECT_COLS}
                  FROM projects
                 WHERE user_id = $1
                    OR organization_id IN (
                        SELECT organization_id FROM authorizations WHERE user_id = $1
                    )
                 ORDER BY created_at, id
                "#
            );
            sqlx::query_as::<_, Project>(&sql)
                .bind(viewer.id)
                .fetch_all(&self.db)
                .await?
        };
        Ok(rows)
    }

    async fn insert_metric(&self, project_id: Uuid, name: &str) -> Result<Metric, AppError> {
        sqlx::query_as::<_, Metric>(
            r#"
            INSERT INTO metrics (id, project_id, name)
            VALUES ($1, $2, $3)
            RETURNING id, project_id, name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(name)
        .fetch_one(&self.db)
        .await
        .map_err(missing_parent("project"))
    }

    async fn list_metrics(&self, project_id: Uuid) -> Result<Vec<Metric>, AppError> {
        Ok(sqlx::query_as::<_, Metric>(
            r#"
            SELECT id, project_id, name, created_at
              FROM metrics
             WHERE project_id = $1
             ORDER BY created_at, id
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.db)
        .await?)
    }

    async fn count_metrics(&self) -> Result<i64, AppError> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM metrics")
            .fetch_one(&self.db)
            .await?)
    }

    async fn list_reports(&self, metric_id: Uuid) -> Result<Vec<Report>, AppError> {
        let rows = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT id, metric_id, value, date, value_by_owner
              FROM reports
             WHERE metric_id = $1
             ORDER BY date DESC
            "#,
        )
        .bind(metric_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(Report::from).collect())
    }

    async fn metric_snapshot(&self, metric_id: Uuid) -> Result<Option<MetricSnapshot>, AppError> {
        let mut tx = self.db.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let Some(metric) = sqlx::query_as::<_, Metric>(
            r#"SELECT id, project_id, name, created_at FROM metrics WHERE id = $1"#,
        )
        .bind(metric_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await?;
            return Ok(None);
        };

        let sql = format!("SELECT {PROJECT_COLS} FROM projects WHERE id = $1");
        let project = sqlx::query_as::<_, Project>(&sql)
            .bind(metric.project_id)
            .fetch_one(&mut *tx)
            .await?;

        let reports: Vec<Report> = sqlx::query_as::<_, ReportRow>(
            r#"
            SELECT id, metric_id, value, date, value_by_owner
              FROM reports
             WHERE metric_id = $1
             ORDER BY date DESC
            "#,
        )
        .bind(metric_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .map(Report::from)
        .collect();

        let occurrences = sqlx::query_as::<_, Occurrence>(
            r#"
            SELECT o.id, o.report_id, o.text, o.url, o.value, o.owners
              FROM occurrences o
              JOIN reports r ON r.id = o.report_id
             WHERE r.metric_id = $1
            "#,
        )
        .bind(metric_id)
        .fetch_all(&mut *tx)
        .await?;

        let contributions = sqlx::query_as::<_, Contribution>(
            r#"
            SELECT id, metric_id, author_name, author_email, commit_date, diff
              FROM contributions
             WHERE metric_id = $1
             ORDER BY commit_date DESC
            "#,
        )
        .bind(metric_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(MetricSnapshot {
            metric,
            project,
            reports,
            occurrences,
            contributions,
        }))
    }

    async fn delete_metric(&self, metric_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.db.begin().await?;

        // Lock the row first so concurrent report inserts wait for us.
        let exists =
            sqlx::query_scalar::<_, Uuid>("SELECT id FROM metrics WHERE id = $1 FOR UPDATE")
                .bind(metric_id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
        if !exists {
            tx.rollback().await?;
            return Ok(false);
        }

        let occurrences = sqlx::query(
            r#"
            DELETE FROM occurrences
             WHERE report_id IN (SELECT id FROM reports WHERE metric_id = $1)
            "#,
        )
        .bind(metric_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let reports = sqlx::query("DELETE FROM reports WHERE metric_id = $1")
            .bind(metric_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        sqlx::query("DELETE FROM contributions WHERE metric_id = $1")
            .bind(metric_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM watches WHERE metric_id = $1")
            .bind(metric_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM metrics WHERE id = $1")
            .bind(metric_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!(%metric_id, reports, occurrences, "metric deleted with cascade");
        Ok(true)
    }

    async fn insert_report(
        &self,
        new: NewReport,
    ) -> Result<(Report, Vec<Occurrence>), AppError> {
        let mut tx = self.db.begin().await?;

        let report: Report = sqlx::query_as::<_, ReportRow>(
            r#"
            INSERT INTO reports (id, metric_id, value, date, value_by_owner)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, metric_id, value, date, value_by_owner
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.metric_id)
        .bind(new.value)
        .bind(new.date)
        .bind(Json(&new.value_by_owner))
        .fetch_one(&mut *tx)
        .await
        .map_err(missing_parent("metric"))?
        .into();

        let mut occurrences = Vec::with_capacity(new.occurrences.len());
        for o in new.occurrences {
            let occurrence = sqlx::query_as::<_, Occurrence>(
                r#"
                INSERT INTO occurrences (id, report_id, text, url, value, owners)
                VALUES ($1, $2, $3, $4, $5, $6)
                RETURNING id, report_id, text, url, value, owners
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(report.id)
            .bind(o.text)
            .bind(o.url)
            .bind(o.value)
            .bind(dedup_owners(o.owners))
            .fetch_one(&mut *tx)
            .await?;
            occurrences.push(occurrence);
        }

        tx.commit().await?;
        Ok((report, occurrences))
    }

    async fn insert_contribution(&self, new: NewContribution) -> Result<Contribution, AppError> {
        sqlx::query_as::<_, Contribution>(
            r#"
            INSERT INTO contributions (id, metric_id, author_name, author_email, commit_date, diff)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, metric_id, author_name, author_email, commit_date, diff
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.metric_id)
        .bind(new.author_name)
        .bind(new.author_email)
        .bind(new.commit_date)
        .bind(new.diff)
        .fetch_one(&self.db)
        .await
        .map_err(missing_parent("metric"))
    }

    async fn toggle_watch(&self, user_id: Uuid, metric_id: Uuid) -> Result<bool, AppError> {
        let mut tx = self.db.begin().await?;
        let removed = sqlx::query("DELETE FROM watches WHERE user_id = $1 AND metric_id = $2")
            .bind(user_id)
            .bind(metric_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            // The primary key keeps a single row even if two toggles race here.
            sqlx::query(
                r#"
                INSERT INTO watches (user_id, metric_id)
                VALUES ($1, $2)
                ON CONFLICT (user_id, metric_id) DO NOTHING
                "#,
            )
            .bind(user_id)
            .bind(metric_id)
            .execute(&mut *tx)
            .await
            .map_err(missing_parent("metric"))?;
        }
        tx.commit().await?;
        Ok(removed == 0)
    }

    async fn is_watching(&self, user_id: Uuid, metric_id: Uuid) -> Result<bool, AppError> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"SELECT EXISTS (SELECT 1 FROM watches WHERE user_id = $1 AND metric_id = $2)"#,
        )
        .bind(user_id)
        .bind(metric_id)
        .fetch_one(&self.db)
        .await?)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use sqlx::postgres::PgPoolOptions;
    use time::OffsetDateTime;

    use super::*;
    use crate::metrics::repo_types::NewOccurrence;
    use crate::users::repo_types::NewUser;
    use crate::users::services::build_user;

    async fn user(store: &PgStore, handle: &str) -> User {
        let user = build_user(NewUser {
            name: handle.into(),
            email: format!("{handle}@example.com"),
            github_handle: Some(handle.into()),
            admin: false,
        })
        .unwrap();
        store.insert_user(user).await.unwrap()
    }

    async fn metric(store: &PgStore, owner: &User) -> Metric {
        let project = store
            .insert_project(NewProject {
                name: "rails/rails".into(),
                user_id: owner.id,
                organization_id: None,
            })
            .await
            .unwrap();
        store.insert_metric(project.id, "rubocop").await.unwrap()
    }

    async fn seed_report(store: &PgStore, metric_id: Uuid) -> Report {
        let (report, occurrences) = store
            .insert_report(NewReport {
                metric_id,
                value: 3.0,
                date: OffsetDateTime::now_utc(),
                value_by_owner: BTreeMap::from([("@rchoquet".to_string(), 3)]),
                occurrences: vec![NewOccurrence {
                    text: "Style/StringLiterals".into(),
                    url: String::new(),
                    value: 3.0,
                    owners: vec!["@rchoquet".into(), "@rchoquet".into()],
                }],
            })
            .await
            .unwrap();
        assert_eq!(occurrences[0].owners, ["@rchoquet"]);
        report
    }

    #[tokio::test]
    async fn migrate_reports_unreachable_database() {
        let db = PgPoolOptions::new()
            .acquire_timeout(Duration::from_secs(2))
            .connect_lazy("postgres://metricboard@127.0.0.1:1/metricboard")
            .unwrap();
        let err = PgStore { db }.migrate().await.unwrap_err();
        assert!(format!("{err:#}").contains("run migrations"));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn toggle_watch_flips_a_single_row(db: PgPool) {
        let store = PgStore { db };
        let owner = user(&store, "yanbonnel").await;
        let m = metric(&store, &owner).await;

        assert!(store.toggle_watch(owner.id, m.id).await.unwrap());
        assert!(store.is_watching(owner.id, m.id).await.unwrap());
        assert!(!store.toggle_watch(owner.id, m.id).await.unwrap());
        assert!(!store.is_watching(owner.id, m.id).await.unwrap());

        let (a, b) = tokio::join!(
            store.toggle_watch(owner.id, m.id),
            store.toggle_watch(owner.id, m.id)
        );
        a.unwrap();
        b.unwrap();
        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM watches WHERE metric_id = $1")
            .bind(m.id)
            .fetch_one(&store.db)
            .await
            .unwrap();
        assert!(rows <= 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn delete_metric_cascades(db: PgPool) {
        let store = PgStore { db };
        let owner = user(&store, "yanbonnel").await;
        let m = metric(&store, &owner).await;
        seed_report(&store, m.id).await;
        store
            .insert_contribution(NewContribution {
                metric_id: m.id,
                author_name: Some("Yan Bonnel".into()),
                author_email: None,
                commit_date: OffsetDateTime::now_utc(),
                diff: 42,
            })
            .await
            .unwrap();
        store.toggle_watch(owner.id, m.id).await.unwrap();

        assert!(store.delete_metric(m.id).await.unwrap());
        assert!(!store.delete_metric(m.id).await.unwrap());
        assert!(store.metric_snapshot(m.id).await.unwrap().is_none());
        assert!(!store.is_watching(owner.id, m.id).await.unwrap());
        assert_eq!(store.count_metrics().await.unwrap(), 0);
        let occurrences: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM occurrences")
            .fetch_one(&store.db)
            .await
            .unwrap();
        assert_eq!(occurrences, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn snapshot_reads_metric_with_children(db: PgPool) {
        let store = PgStore { db };
        let owner = user(&store, "yanbonnel").await;
        let m = metric(&store, &owner).await;
        let report = seed_report(&store, m.id).await;

        let snapshot = store.metric_snapshot(m.id).await.unwrap().unwrap();
        assert_eq!(snapshot.metric.id, m.id);
        assert_eq!(snapshot.reports.len(), 1);
        assert_eq!(snapshot.occurrences_of(report.id).count(), 1);
        assert_eq!(snapshot.reports[0].value_by_owner["@rchoquet"], 3);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs DATABASE_URL"]
    async fn blank_handle_is_rejected_by_schema(db: PgPool) {
        let result =
            sqlx::query("INSERT INTO users (id, github_handle, api_key) VALUES ($1, '', 'k')")
                .bind(Uuid::new_v4())
                .execute(&db)
                .await;
        assert!(result.is_err());
    }
}

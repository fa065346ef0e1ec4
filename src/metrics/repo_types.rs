use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::{types::Json, FromRow};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::projects::repo_types::Project;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Metric {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A dated measurement of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: Uuid,
    pub metric_id: Uuid,
    pub value: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub date: OffsetDateTime,
    pub value_by_owner: BTreeMap<String, i64>,
}

#[derive(Debug, FromRow)]
pub struct ReportRow {
    pub id: Uuid,
    pub metric_id: Uuid,
    pub value: f64,
    pub date: OffsetDateTime,
    pub value_by_owner: Json<BTreeMap<String, i64>>,
}

impl From<ReportRow> for Report {
    fn from(r: ReportRow) -> Self {
        Self {
            id: r.id,
            metric_id: r.metric_id,
            value: r.value,
            date: r.date,
            value_by_owner: r.value_by_owner.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Occurrence {
    pub id: Uuid,
    pub report_id: Uuid,
    pub text: String,
    pub url: String,
    pub value: f64,
    pub owners: Vec<String>, // ordered, no duplicates
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Contribution {
    pub id: Uuid,
    pub metric_id: Uuid,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub commit_date: OffsetDateTime,
    pub diff: i64,
}

#[derive(Debug, Clone)]
pub struct NewOccurrence {
    pub text: String,
    pub url: String,
    pub value: f64,
    pub owners: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub metric_id: Uuid,
    pub value: f64,
    pub date: OffsetDateTime,
    pub value_by_owner: BTreeMap<String, i64>,
    pub occurrences: Vec<NewOccurrence>,
}

#[derive(Debug, Clone)]
pub struct NewContribution {
    pub metric_id: Uuid,
    pub author_name: Option<String>,
    pub author_email: Option<String>,
    pub commit_date: OffsetDateTime,
    pub diff: i64,
}

/// Everything known about one metric, read at a single point in time.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub metric: Metric,
    pub project: Project,
    pub reports: Vec<Report>,
    pub occurrences: Vec<Occurrence>, // across all of the metric's reports
    pub contributions: Vec<Contribution>,
}

impl MetricSnapshot {
    pub fn report(&self, report_id: Uuid) -> Option<&Report> {
        self.reports.iter().find(|r| r.id == report_id)
    }

    pub fn occurrences_of(&self, report_id: Uuid) -> impl Iterator<Item = &Occurrence> {
        self.occurrences
            .iter()
            .filter(move |o| o.report_id == report_id)
    }
}

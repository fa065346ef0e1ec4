use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::metrics::repo_types::{Contribution, Metric, Occurrence, Report};
use crate::users::repo_types::PublicUser;

#[derive(Debug, Default, Deserialize)]
pub struct MetricFilter {
    #[serde(default)]
    pub query: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OccurrenceFilter {
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub report_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OwnerFilter {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub report_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMetricRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateOccurrenceRequest {
    pub text: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub owners: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReportRequest {
    pub value: f64,
    /// Defaults to now.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub date: Option<OffsetDateTime>,
    #[serde(default)]
    pub value_by_owner: BTreeMap<String, i64>,
    #[serde(default)]
    pub occurrences: Vec<CreateOccurrenceRequest>,
}

#[derive(Debug, Deserialize)]
pub struct CreateContributionRequest {
    #[serde(default)]
    pub author_name: Option<String>,
    #[serde(default)]
    pub author_email: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub commit_date: Option<OffsetDateTime>,
    pub diff: i64,
}

/// One row of a project's metric list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub id: Uuid,
    pub name: String,
    pub latest_value: Option<f64>,
    pub previous_value: Option<f64>,
    pub trend: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccurrenceView {
    pub id: Uuid,
    pub text: String,
    pub url: String,
    pub value: f64,
    pub owners: Vec<String>,
    /// Full owner set joined with ", ", whatever filter selected the row.
    pub owners_text: String,
}

impl From<&Occurrence> for OccurrenceView {
    fn from(o: &Occurrence) -> Self {
        Self {
            id: o.id,
            text: o.text.clone(),
            url: o.url.clone(),
            value: o.value,
            owners: o.owners.clone(),
            owners_text: o.owners.join(", "),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnerCount {
    pub owner: String,
    pub count: i64,
    pub label: String, // "@rchoquet (8)"
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributorTotal {
    pub author_name: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributionView {
    #[serde(flatten)]
    pub contribution: Contribution,
    pub diff_label: String, // "+42" / "-12"
}

impl From<Contribution> for ContributionView {
    fn from(c: Contribution) -> Self {
        let diff_label = format!("{:+}", c.diff);
        Self {
            contribution: c,
            diff_label,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricDetails {
    pub metric: Metric,
    pub latest: Option<Report>,
    pub previous: Option<Report>,
    pub trend: Option<f64>,
    pub owners: Vec<OwnerCount>,
    pub top_contributors: Vec<ContributorTotal>,
    pub recent_contributions: Vec<ContributionView>,
    pub watching: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WatchState {
    pub watching: bool,
}

#[derive(Debug, Serialize)]
pub struct WatchResponse {
    #[serde(flatten)]
    pub state: WatchState,
    pub message: &'static str,
}

impl From<WatchState> for WatchResponse {
    fn from(state: WatchState) -> Self {
        let message = if state.watching {
            "You're now watching this metric"
        } else {
            "You're no longer watching this metric"
        };
        Self { state, message }
    }
}

#[derive(Debug, Serialize)]
pub struct ReportCreated {
    pub report: Report,
    pub occurrences: Vec<OccurrenceView>,
}

#[derive(Debug, Serialize)]
pub struct UserContributions {
    pub user: PublicUser,
    pub contributions: Vec<ContributionView>,
}

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::metrics::dto::{
    ContributionView, ContributorTotal, CreateContributionRequest, CreateReportRequest,
    MetricDetails, MetricSummary, OccurrenceView, OwnerCount, ReportCreated, UserContributions,
    WatchState,
};
use crate::metrics::repo_types::{
    Contribution, Metric, MetricSnapshot, NewContribution, NewOccurrence, NewReport, Occurrence,
    Report,
};
use crate::projects::services::{ensure_visible, find_visible_project};
use crate::store::Store;
use crate::users::repo_types::User;

pub const RECENT_CONTRIBUTIONS: usize = 10;

// ---- pure aggregation ----

/// Trims owner handles and drops blanks and repeats, keeping first positions.
pub fn dedup_owners(owners: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    owners
        .into_iter()
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty() && seen.insert(o.clone()))
        .collect()
}

fn same_handle(a: &str, b: &str) -> bool {
    a.trim()
        .trim_start_matches('@')
        .eq_ignore_ascii_case(b.trim().trim_start_matches('@'))
}

/// Case-insensitive substring match on the name. Order is preserved.
pub fn filter_metrics(metrics: Vec<Metric>, query: Option<&str>) -> Vec<Metric> {
    let query = query.map(str::trim).unwrap_or_default().to_lowercase();
    if query.is_empty() {
        return metrics;
    }
    metrics
        .into_iter()
        .filter(|m| m.name.to_lowercase().contains(&query))
        .collect()
}

/// The two most recent reports by date, newest first.
pub fn latest_and_previous(reports: &[Report]) -> (Option<&Report>, Option<&Report>) {
    let mut by_date: Vec<&Report> = reports.iter().collect();
    by_date.sort_by(|a, b| b.date.cmp(&a.date));
    let mut it = by_date.into_iter();
    (it.next(), it.next())
}

pub fn trend(latest: Option<&Report>, previous: Option<&Report>) -> Option<f64> {
    Some(latest?.value - previous?.value)
}

/// Highest value first. An owner filter narrows the list, never the owners shown.
pub fn occurrences<'a, I>(occurrences: I, owner: Option<&str>) -> Vec<OccurrenceView>
where
    I: IntoIterator<Item = &'a Occurrence>,
{
    let owner = owner.map(str::trim).filter(|o| !o.is_empty());
    let mut rows: Vec<&Occurrence> = occurrences
        .into_iter()
        .filter(|o| match owner {
            Some(wanted) => o.owners.iter().any(|h| same_handle(h, wanted)),
            None => true,
        })
        .collect();
    rows.sort_by(|a, b| {
        b.value
            .total_cmp(&a.value)
            .then_with(|| a.text.cmp(&b.text))
    });
    rows.into_iter().map(OccurrenceView::from).collect()
}

/// Per-owner values of a report, largest first.
pub fn owner_counts(report: &Report, search: Option<&str>) -> Vec<OwnerCount> {
    let search = search
        .map(|s| s.trim().trim_start_matches('@').to_lowercase())
        .filter(|s| !s.is_empty());
    let mut counts: Vec<OwnerCount> = report
        .value_by_owner
        .iter()
        .filter(|(owner, _)| match &search {
            Some(needle) => owner.to_lowercase().contains(needle.as_str()),
            None => true,
        })
        .map(|(owner, count)| OwnerCount {
            owner: owner.clone(),
            count: *count,
            label: format!("{owner} ({count})"),
        })
        .collect();
    counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.owner.cmp(&b.owner)));
    counts
}

fn author_label(c: &Contribution) -> String {
    [c.author_name.as_deref(), c.author_email.as_deref()]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

/// Signed diff totals per author, largest magnitude first, then by name.
pub fn top_contributors(contributions: &[Contribution]) -> Vec<ContributorTotal> {
    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    for c in contributions {
        let total = totals.entry(author_label(c)).or_default();
        *total = total.saturating_add(c.diff);
    }
    let mut out: Vec<ContributorTotal> = totals
        .into_iter()
        .map(|(author_name, total)| ContributorTotal { author_name, total })
        .collect();
    out.sort_by(|a, b| match b.total.unsigned_abs().cmp(&a.total.unsigned_abs()) {
        Ordering::Equal => a.author_name.cmp(&b.author_name),
        other => other,
    });
    out
}

fn newest_first(contributions: &mut [Contribution]) {
    contributions.sort_by(|a, b| b.commit_date.cmp(&a.commit_date));
}

pub fn recent_contributions(contributions: &[Contribution], limit: usize) -> Vec<Contribution> {
    let mut recent = contributions.to_vec();
    newest_first(&mut recent);
    recent.truncate(limit);
    recent
}

/// Name, email, or an email embedding the user's GitHub handle.
pub fn contribution_matches(user: &User, c: &Contribution) -> bool {
    let by_name = !user.name.is_empty() && c.author_name.as_deref() == Some(user.name.as_str());
    let email = c.author_email.as_deref().unwrap_or_default().to_lowercase();
    let by_email = !user.email.is_empty() && email == user.email.to_lowercase();
    let handle = user.github_handle.to_lowercase();
    let by_handle = !handle.is_empty() && email.contains(&handle);
    by_name || by_email || by_handle
}

pub fn contributions_for_user(user: &User, contributions: &[Contribution]) -> Vec<Contribution> {
    let mut mine: Vec<Contribution> = contributions
        .iter()
        .filter(|c| contribution_matches(user, c))
        .cloned()
        .collect();
    newest_first(&mut mine);
    mine
}

// ---- store-backed operations ----

/// Snapshot of a metric the viewer can see; hidden metrics are NotFound.
async fn visible_snapshot(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
) -> Result<MetricSnapshot, AppError> {
    let snapshot = store
        .metric_snapshot(metric_id)
        .await?
        .ok_or(AppError::NotFound("metric"))?;
    match ensure_visible(store, viewer, &snapshot.project).await {
        Ok(()) => Ok(snapshot),
        Err(AppError::NotFound(_)) => Err(AppError::NotFound("metric")),
        Err(e) => Err(e),
    }
}

fn pick_report(
    snapshot: &MetricSnapshot,
    report_id: Option<Uuid>,
) -> Result<Option<&Report>, AppError> {
    match report_id {
        Some(id) => snapshot.report(id).map(Some).ok_or(AppError::NotFound("report")),
        None => Ok(latest_and_previous(&snapshot.reports).0),
    }
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn list_project_metrics(
    store: &dyn Store,
    viewer: &User,
    project_id: Uuid,
    query: Option<&str>,
) -> Result<Vec<MetricSummary>, AppError> {
    let project = find_visible_project(store, viewer, project_id).await?;
    let metrics = filter_metrics(store.list_metrics(project.id).await?, query);
    let mut summaries = Vec::with_capacity(metrics.len());
    for metric in metrics {
        let reports = store.list_reports(metric.id).await?;
        let (latest, previous) = latest_and_previous(&reports);
        summaries.push(MetricSummary {
            id: metric.id,
            name: metric.name,
            latest_value: latest.map(|r| r.value),
            previous_value: previous.map(|r| r.value),
            trend: trend(latest, previous),
        });
    }
    Ok(summaries)
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn metric_details(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
) -> Result<MetricDetails, AppError> {
    let snapshot = visible_snapshot(store, viewer, metric_id).await?;
    let watching = store.is_watching(viewer.id, metric_id).await?;
    let (latest, previous) = latest_and_previous(&snapshot.reports);
    Ok(MetricDetails {
        trend: trend(latest, previous),
        owners: latest.map(|r| owner_counts(r, None)).unwrap_or_default(),
        top_contributors: top_contributors(&snapshot.contributions),
        recent_contributions: recent_contributions(&snapshot.contributions, RECENT_CONTRIBUTIONS)
            .into_iter()
            .map(ContributionView::from)
            .collect(),
        latest: latest.cloned(),
        previous: previous.cloned(),
        metric: snapshot.metric,
        watching,
    })
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn metric_occurrences(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
    report_id: Option<Uuid>,
    owner: Option<&str>,
) -> Result<Vec<OccurrenceView>, AppError> {
    let snapshot = visible_snapshot(store, viewer, metric_id).await?;
    let Some(report) = pick_report(&snapshot, report_id)? else {
        return Ok(Vec::new());
    };
    Ok(occurrences(snapshot.occurrences_of(report.id), owner))
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn metric_owners(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
    report_id: Option<Uuid>,
    search: Option<&str>,
) -> Result<Vec<OwnerCount>, AppError> {
    let snapshot = visible_snapshot(store, viewer, metric_id).await?;
    Ok(pick_report(&snapshot, report_id)?
        .map(|r| owner_counts(r, search))
        .unwrap_or_default())
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn user_contributions(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
    user_id: Uuid,
) -> Result<UserContributions, AppError> {
    let snapshot = visible_snapshot(store, viewer, metric_id).await?;
    let user = store
        .find_user(user_id)
        .await?
        .ok_or(AppError::NotFound("user"))?;
    let contributions = contributions_for_user(&user, &snapshot.contributions)
        .into_iter()
        .map(ContributionView::from)
        .collect();
    Ok(UserContributions {
        user: user.public(),
        contributions,
    })
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn toggle_watch(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
) -> Result<WatchState, AppError> {
    visible_snapshot(store, viewer, metric_id).await?;
    let watching = store.toggle_watch(viewer.id, metric_id).await?;
    info!(%metric_id, watching, "watch toggled");
    Ok(WatchState { watching })
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn delete_metric(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
) -> Result<(), AppError> {
    visible_snapshot(store, viewer, metric_id).await?;
    if !store.delete_metric(metric_id).await? {
        // lost a race with another delete
        return Err(AppError::NotFound("metric"));
    }
    info!(%metric_id, "metric deleted");
    Ok(())
}

#[instrument(skip(store, viewer), fields(viewer_id = %viewer.id))]
pub async fn create_metric(
    store: &dyn Store,
    viewer: &User,
    project_id: Uuid,
    name: &str,
) -> Result<Metric, AppError> {
    let name = name.trim();
    if name.is_empty() {
        warn!("blank metric name");
        return Err(AppError::validation("name", "can't be blank"));
    }
    let project = find_visible_project(store, viewer, project_id).await?;
    let metric = store.insert_metric(project.id, name).await?;
    info!(metric_id = %metric.id, project_id = %project.id, "metric created");
    Ok(metric)
}

#[instrument(skip(store, viewer, req), fields(viewer_id = %viewer.id))]
pub async fn record_report(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
    req: CreateReportRequest,
) -> Result<ReportCreated, AppError> {
    if !req.value.is_finite() {
        return Err(AppError::validation("value", "must be a number"));
    }
    visible_snapshot(store, viewer, metric_id).await?;
    let new = NewReport {
        metric_id,
        value: req.value,
        date: req.date.unwrap_or_else(OffsetDateTime::now_utc),
        value_by_owner: req.value_by_owner,
        occurrences: req
            .occurrences
            .into_iter()
            .map(|o| NewOccurrence {
                text: o.text,
                url: o.url,
                value: o.value,
                owners: o.owners,
            })
            .collect(),
    };
    let (report, occurrences) = store.insert_report(new).await?;
    info!(report_id = %report.id, %metric_id, occurrences = occurrences.len(), "report recorded");
    Ok(ReportCreated {
        occurrences: self::occurrences(&occurrences, None),
        report,
    })
}

#[instrument(skip(store, viewer, req), fields(viewer_id = %viewer.id))]
pub async fn record_contribution(
    store: &dyn Store,
    viewer: &User,
    metric_id: Uuid,
    req: CreateContributionRequest,
) -> Result<Contribution, AppError> {
    let blank = |s: &Option<String>| s.as_deref().map_or(true, |v| v.trim().is_empty());
    if blank(&req.author_name) && blank(&req.author_email) {
        return Err(AppError::validation("author", "needs a name or an email"));
    }
    visible_snapshot(store, viewer, metric_id).await?;
    let contribution = store
        .insert_contribution(NewContribution {
            metric_id,
            author_name: req.author_name,
            author_email: req.author_email,
            commit_date: req.commit_date.unwrap_or_else(OffsetDateTime::now_utc),
            diff: req.diff,
        })
        .await?;
    info!(contribution_id = %contribution.id, %metric_id, "contribution recorded");
    Ok(contribution)
}

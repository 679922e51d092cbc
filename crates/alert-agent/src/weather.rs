use crate::dedup::DedupGuard;
use crate::fanout::{EmailSender, Fanout, FanoutReport, PushSender};
use crate::forecast::ForecastProvider;
use crate::geo::GeoIndex;
use crate::rules;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use models::{AlertType, FarmerProfile, Region, WeatherAlertCandidate};
use notifications::AlertEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name under which the state of weather runs is persisted.
pub const WEATHER_JOB: &str = "weather-alerts";

/// Summary of one weather run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherRunSummary {
    pub regions_evaluated: usize,
    /// Regions whose forecast was unavailable.
    pub regions_skipped: usize,
    /// Farmers whose district doesn't resolve to a region.
    pub unresolved_users: usize,
    pub candidates: usize,
    /// Candidates that were delivered to at least one farmer.
    pub alerts_created: usize,
    /// Per-farmer deliveries suppressed because the farmer was already
    /// alerted today.
    pub duplicates_suppressed: usize,
    pub notifications_created: usize,
    pub push_sent: usize,
    pub push_failed: usize,
    pub email_sent: usize,
    pub email_failed: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub alerts_by_type: BTreeMap<AlertType, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl WeatherRunSummary {
    fn add_fanout(&mut self, report: &FanoutReport) {
        self.notifications_created += report.notifications_created();
        self.push_sent += report.push_sent();
        self.push_failed += report.push_failed();
        self.email_sent += report.email_sent();
        self.email_failed += report.email_failed();
        for failed in report.persist_failures() {
            self.errors.push(format!(
                "persisting notification for {}: {}",
                failed.user_id,
                failed.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    fn merge(&mut self, other: WeatherRunSummary) {
        self.regions_evaluated += other.regions_evaluated;
        self.regions_skipped += other.regions_skipped;
        self.unresolved_users += other.unresolved_users;
        self.candidates += other.candidates;
        self.alerts_created += other.alerts_created;
        self.duplicates_suppressed += other.duplicates_suppressed;
        self.notifications_created += other.notifications_created;
        self.push_sent += other.push_sent;
        self.push_failed += other.push_failed;
        self.email_sent += other.email_sent;
        self.email_failed += other.email_failed;
        for (alert_type, count) in other.alerts_by_type {
            *self.alerts_by_type.entry(alert_type).or_default() += count;
        }
        self.errors.extend(other.errors);
    }
}

/// Runs all weather rules for every region that has farmers in it, and
/// delivers the resulting alerts. Failures are contained to the region,
/// candidate, or recipient that they occur in, and are reported in the
/// summary. An error is returned only if the run couldn't start.
pub async fn run<F, ES, PS>(
    forecasts: &F,
    fanout: &Fanout<ES, PS>,
    region_concurrency: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<WeatherRunSummary>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let store = fanout.store();

    let mut state = store
        .load_job_state(WEATHER_JOB)
        .await
        .context("loading job state")?;
    state.last_started = Some(now);
    store
        .save_job_state(WEATHER_JOB, &state)
        .await
        .context("saving job state")?;

    match evaluate_all(forecasts, fanout, region_concurrency, now).await {
        Ok(summary) => {
            state.last_completed = Some(now);
            state.last_summary = Some(serde_json::to_value(&summary)?);
            state.consecutive_failures = 0;
            state.last_error = summary.errors.first().cloned();
            store
                .save_job_state(WEATHER_JOB, &state)
                .await
                .context("saving job state")?;

            tracing::info!(
                regions_evaluated = summary.regions_evaluated,
                regions_skipped = summary.regions_skipped,
                alerts_created = summary.alerts_created,
                duplicates_suppressed = summary.duplicates_suppressed,
                notifications_created = summary.notifications_created,
                errors = summary.errors.len(),
                "weather run completed"
            );
            Ok(summary)
        }
        Err(error) => {
            tracing::error!(error = %format!("{error:#}"), "weather run failed");
            state.consecutive_failures += 1;
            state.last_error = Some(format!("{error:#}"));
            if let Err(save_error) = store.save_job_state(WEATHER_JOB, &state).await {
                tracing::error!(error = %format!("{save_error:#}"), "failed to save job state");
            }
            Err(error)
        }
    }
}

async fn evaluate_all<F, ES, PS>(
    forecasts: &F,
    fanout: &Fanout<ES, PS>,
    region_concurrency: usize,
    now: DateTime<Utc>,
) -> anyhow::Result<WeatherRunSummary>
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let store = fanout.store();
    let geo = GeoIndex::new(store.list_regions().await.context("listing regions")?);
    let farmers = store.list_farmers().await.context("listing farmers")?;
    let mut groups = geo.group(farmers);

    let mut summary = WeatherRunSummary {
        unresolved_users: groups.unresolved.len(),
        ..Default::default()
    };

    // Each farmer belongs to exactly one region, so regions never contend
    // for the same alert markers.
    let work: Vec<(&Region, Vec<FarmerProfile>)> = geo
        .regions()
        .iter()
        .filter_map(|region| groups.by_region.remove(&region.id).map(|f| (region, f)))
        .collect();

    let regions: Vec<_> = work
        .into_iter()
        .map(|(region, farmers)| evaluate_region(forecasts, fanout, region, farmers, now))
        .collect();
    let mut outcomes = futures::stream::iter(regions).buffer_unordered(region_concurrency.max(1));

    while let Some(outcome) = outcomes.next().await {
        summary.merge(outcome);
    }
    Ok(summary)
}

#[tracing::instrument(skip_all, fields(region = %region.name, farmers = farmers.len()))]
async fn evaluate_region<F, ES, PS>(
    forecasts: &F,
    fanout: &Fanout<ES, PS>,
    region: &Region,
    farmers: Vec<FarmerProfile>,
    now: DateTime<Utc>,
) -> WeatherRunSummary
where
    F: ForecastProvider,
    ES: EmailSender,
    PS: PushSender,
{
    let mut summary = WeatherRunSummary::default();

    let forecast = match forecasts.fetch(region).await {
        Ok(forecast) => forecast,
        Err(error) => {
            tracing::warn!(error = %format!("{:#}", anyhow::Error::from(error)), "forecast unavailable, skipping region");
            summary.regions_skipped = 1;
            return summary;
        }
    };

    let today = region.local_day(now);
    let candidates = today
        .succ_opt()
        .and_then(|tomorrow| rules::evaluate(region.id, &forecast, tomorrow));
    let Some(candidates) = candidates else {
        tracing::warn!(%today, "forecast doesn't cover the next day, skipping region");
        summary.regions_skipped = 1;
        return summary;
    };

    summary.regions_evaluated = 1;
    summary.candidates = candidates.len();

    for candidate in candidates {
        deliver_candidate(fanout, region, &farmers, candidate, now, &mut summary).await;
    }
    summary
}

#[tracing::instrument(skip_all, fields(alert_type = %candidate.alert_type()))]
async fn deliver_candidate<ES, PS>(
    fanout: &Fanout<ES, PS>,
    region: &Region,
    farmers: &[FarmerProfile],
    candidate: WeatherAlertCandidate,
    now: DateTime<Utc>,
    summary: &mut WeatherRunSummary,
) where
    ES: EmailSender,
    PS: PushSender,
{
    let alert_type = candidate.alert_type();
    let guard = DedupGuard::new(fanout.store());

    let mut recipients = Vec::new();
    for farmer in farmers {
        let marker = DedupGuard::user_marker(farmer.user_id, region, alert_type, now);
        match guard.already_delivered(&marker).await {
            Ok(true) => summary.duplicates_suppressed += 1,
            Ok(false) => recipients.push(farmer.clone()),
            Err(error) => {
                tracing::warn!(user_id = %farmer.user_id, error = %format!("{error:#}"), "failed to check alert marker");
                summary.errors.push(format!(
                    "checking {alert_type} marker for {}: {error:#}",
                    farmer.user_id
                ));
            }
        }
    }
    if recipients.is_empty() {
        return;
    }

    let event = AlertEvent {
        region: region.name.clone(),
        target_day: Some(candidate.target_day),
        payload: candidate.payload,
    };
    let report = match fanout.deliver(&event, &recipients, now).await {
        Ok(report) => report,
        Err(error) => {
            summary
                .errors
                .push(format!("delivering {alert_type} in {}: {error:#}", region.name));
            return;
        }
    };

    summary.alerts_created += 1;
    *summary.alerts_by_type.entry(alert_type).or_default() += 1;
    summary.add_fanout(&report);

    // Only recipients whose notification was written are marked, so the
    // others are retried by the next run.
    for outcome in report.recipients.iter().filter(|r| r.notification_id.is_some()) {
        let marker = DedupGuard::user_marker(outcome.user_id, region, alert_type, now);
        if let Err(error) = guard.mark_delivered(&marker).await {
            tracing::warn!(user_id = %outcome.user_id, error = %format!("{error:#}"), "failed to write alert marker");
            summary.errors.push(format!(
                "writing {alert_type} marker for {}: {error:#}",
                outcome.user_id
            ));
        }
    }
}

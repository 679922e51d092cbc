//! Detection of disease outbreaks from independent reports.
//!
//! Condition labels are free text, and two labels are considered the same
//! condition when either one contains the other after case folding and
//! whitespace normalization. So "blast" and "Rice Blast" cluster together.
use crate::fanout::{EmailSender, Fanout, FanoutReport, PushSender};
use crate::geo::GeoIndex;
use alerts_sql::NewOutbreak;
use anyhow::Context;
use chrono::{DateTime, Utc};
use models::{
    normalize_label, AlertPayload, FarmerProfile, OutbreakRecord, Region, ReporterObservation,
    Severity,
};
use notifications::AlertEvent;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Observations older than this, relative to now, don't count toward a cluster.
pub const OUTBREAK_WINDOW_HOURS: i64 = 72;
/// Minimum number of distinct reporters that constitutes an outbreak.
pub const OUTBREAK_THRESHOLD: usize = 3;
/// Severity of new outbreaks when the triggering observation doesn't have one.
pub const DEFAULT_SEVERITY: Severity = Severity::Medium;

/// What a single observation check did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OutbreakOutcome {
    /// The observation's region could not be determined.
    NoRegion,
    BelowThreshold {
        reporter_count: u32,
    },
    Created {
        outbreak: OutbreakRecord,
        notifications: FanoutReport,
    },
    Updated {
        outbreak: OutbreakRecord,
    },
}

pub fn conditions_match(a: &str, b: &str) -> bool {
    let (a, b) = (normalize_label(a), normalize_label(b));
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}

/// Reports in the window that match the triggering observation.
#[derive(Debug, PartialEq)]
pub struct Cluster {
    pub reporters: BTreeSet<uuid::Uuid>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Computes the cluster that `trigger` belongs to, given the region's
/// recent `observations`. The trigger itself is always included, even if it
/// hasn't been stored yet.
pub fn cluster(
    trigger: &ReporterObservation,
    observations: &[ReporterObservation],
    now: DateTime<Utc>,
) -> Cluster {
    let since = now - chrono::Duration::hours(OUTBREAK_WINDOW_HOURS);

    let matching = observations
        .iter()
        .filter(|o| trigger.id.is_none() || o.id != trigger.id)
        .chain(std::iter::once(trigger))
        .filter(|o| o.observed_at >= since)
        .filter(|o| conditions_match(&o.condition, &trigger.condition));

    let mut out = Cluster {
        reporters: BTreeSet::new(),
        first_seen: trigger.observed_at,
        last_seen: trigger.observed_at,
    };
    for observation in matching {
        out.reporters.insert(observation.user_id);
        out.first_seen = out.first_seen.min(observation.observed_at);
        out.last_seen = out.last_seen.max(observation.observed_at);
    }
    out
}

/// Resolves the region of an observation: its own region if it has one,
/// otherwise the district on the reporter's profile.
async fn resolve_region<'g, ES, PS>(
    fanout: &Fanout<ES, PS>,
    geo: &'g GeoIndex,
    observation: &ReporterObservation,
) -> anyhow::Result<Option<&'g Region>>
where
    ES: EmailSender,
    PS: PushSender,
{
    if let Some(region_id) = observation.region_id {
        return Ok(geo.get(region_id));
    }
    let farmer = fanout
        .store()
        .get_farmer(observation.user_id)
        .await
        .context("fetching reporter profile")?;

    Ok(farmer.and_then(|f| geo.resolve_farmer(&f)))
}

/// Keeps observations without a region only if their reporter's profile
/// resolves to `region`. Reporters without a profile are dropped.
fn place_unregioned(
    geo: &GeoIndex,
    region: &Region,
    farmers: &[FarmerProfile],
    observations: &mut Vec<ReporterObservation>,
) {
    let located: HashSet<uuid::Uuid> = farmers
        .iter()
        .filter(|f| geo.resolve_farmer(f).is_some_and(|r| r.id == region.id))
        .map(|f| f.user_id)
        .collect();

    observations.retain(|o| o.region_id.is_some() || located.contains(&o.user_id));
}

/// Checks whether `observation` creates or updates an outbreak in its region.
/// New outbreaks are announced to every other farmer in the region. Updates
/// are not announced.
#[tracing::instrument(skip_all, fields(user_id = %observation.user_id, condition = %observation.condition, region))]
pub async fn check_observation<ES, PS>(
    fanout: &Fanout<ES, PS>,
    observation: &ReporterObservation,
    now: DateTime<Utc>,
) -> anyhow::Result<OutbreakOutcome>
where
    ES: EmailSender,
    PS: PushSender,
{
    let store = fanout.store();
    let geo = GeoIndex::new(store.list_regions().await.context("listing regions")?);

    let Some(region) = resolve_region(fanout, &geo, observation).await? else {
        tracing::info!("observation has no resolvable region, skipping outbreak check");
        return Ok(OutbreakOutcome::NoRegion);
    };
    tracing::Span::current().record("region", region.name.as_str());

    let since = now - chrono::Duration::hours(OUTBREAK_WINDOW_HOURS);
    let mut observations = store
        .fetch_observations(region.id, since)
        .await
        .context("fetching recent observations")?;
    let farmers = store.list_farmers().await.context("listing farmers")?;
    place_unregioned(&geo, region, &farmers, &mut observations);

    let cluster = cluster(observation, &observations, now);
    let reporter_count = cluster.reporters.len() as u32;

    if cluster.reporters.len() < OUTBREAK_THRESHOLD {
        tracing::debug!(%reporter_count, "below outbreak threshold");
        return Ok(OutbreakOutcome::BelowThreshold { reporter_count });
    }

    let active = store
        .fetch_active_outbreaks(region.id)
        .await
        .context("fetching active outbreaks")?
        .into_iter()
        .find(|o| conditions_match(&o.condition, &observation.condition));

    if let Some(existing) = active {
        return update(fanout, existing, &cluster, observation.severity).await;
    }

    let created = store
        .insert_outbreak(NewOutbreak {
            region_id: region.id,
            condition: observation.condition.trim().to_string(),
            first_seen: cluster.first_seen,
            last_seen: cluster.last_seen,
            reporter_count,
            severity: observation.severity.unwrap_or(DEFAULT_SEVERITY),
        })
        .await
        .context("creating outbreak")?;

    let Some(outbreak) = created else {
        // Another check created the record after we looked for it.
        let existing = store
            .fetch_active_outbreaks(region.id)
            .await
            .context("fetching active outbreaks")?
            .into_iter()
            .find(|o| conditions_match(&o.condition, &observation.condition))
            .context("active outbreak disappeared after a conflicting insert")?;
        return update(fanout, existing, &cluster, observation.severity).await;
    };
    tracing::info!(outbreak_id = %outbreak.id, %reporter_count, "outbreak detected");

    let recipients: Vec<_> = geo
        .group(farmers)
        .by_region
        .remove(&region.id)
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f.user_id != observation.user_id)
        .collect();

    let event = AlertEvent {
        region: region.name.clone(),
        target_day: None,
        payload: AlertPayload::OutbreakAlert {
            outbreak_id: outbreak.id,
            condition: outbreak.condition.clone(),
            region: region.name.clone(),
            reporter_count: outbreak.reporter_count,
            severity: outbreak.severity,
            first_seen: outbreak.first_seen,
        },
    };
    let notifications = fanout.deliver(&event, &recipients, now).await?;

    Ok(OutbreakOutcome::Created {
        outbreak,
        notifications,
    })
}

async fn update<ES, PS>(
    fanout: &Fanout<ES, PS>,
    mut outbreak: OutbreakRecord,
    cluster: &Cluster,
    severity: Option<Severity>,
) -> anyhow::Result<OutbreakOutcome>
where
    ES: EmailSender,
    PS: PushSender,
{
    outbreak.reporter_count = cluster.reporters.len() as u32;
    outbreak.last_seen = outbreak.last_seen.max(cluster.last_seen);
    if let Some(severity) = severity {
        outbreak.severity = severity;
    }

    fanout
        .store()
        .update_outbreak(
            outbreak.id,
            outbreak.reporter_count,
            outbreak.last_seen,
            outbreak.severity,
        )
        .await
        .context("updating outbreak")?;

    tracing::info!(outbreak_id = %outbreak.id, reporter_count = outbreak.reporter_count, "updated active outbreak");
    Ok(OutbreakOutcome::Updated { outbreak })
}

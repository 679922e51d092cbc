use alerts_sql::AlertStore;
use chrono::{DateTime, Utc};
use models::{AlertMarker, AlertType, Region, Subject};

/// Guards against delivering more than one alert of a type to the same
/// subject on the same local calendar day.
///
/// The check and the write of a marker are separate operations, and there's
/// no lock between them. Two overlapping runs may both pass the check for
/// the same key, in which case the subject is notified twice. Markers are
/// only written once the subject's notification has been persisted.
#[derive(Clone, Copy)]
pub struct DedupGuard<'a> {
    store: &'a dyn AlertStore,
}

impl<'a> DedupGuard<'a> {
    pub fn new(store: &'a dyn AlertStore) -> Self {
        Self { store }
    }

    /// Returns the marker for alerting `user_id`, who lives in `region`, at `now`.
    pub fn user_marker(
        user_id: uuid::Uuid,
        region: &Region,
        alert_type: AlertType,
        now: DateTime<Utc>,
    ) -> AlertMarker {
        AlertMarker {
            subject: Subject::User(user_id),
            alert_type,
            day: region.local_day(now),
        }
    }

    pub async fn already_delivered(&self, marker: &AlertMarker) -> anyhow::Result<bool> {
        let exists = self.store.marker_exists(marker).await?;
        if exists {
            tracing::debug!(subject = %marker.subject, alert_type = %marker.alert_type, day = %marker.day, "suppressing duplicate alert");
        }
        Ok(exists)
    }

    pub async fn mark_delivered(&self, marker: &AlertMarker) -> anyhow::Result<()> {
        if !self.store.insert_marker(marker).await? {
            tracing::info!(subject = %marker.subject, alert_type = %marker.alert_type, day = %marker.day, "alert marker was written by a concurrent run");
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AlertCategory, AlertPayload, AlertType, Id};

/// A notification that is about to be persisted for one recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNotification {
    pub user_id: uuid::Uuid,
    pub title: String,
    pub message: String,
    pub payload: AlertPayload,
    pub created_at: DateTime<Utc>,
}

impl NewNotification {
    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }
}

/// One row per recipient per alert event. Only the recipient ever changes a
/// notification after it's created, by marking it read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Id,
    pub user_id: uuid::Uuid,
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub payload: AlertPayload,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Per-user channel and category switches. Users without a stored preference
/// get `NotificationPreference::default_for`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationPreference {
    pub user_id: uuid::Uuid,
    /// Only consulted by the app when displaying notifications. The in-app
    /// notification row is always written.
    pub in_app_enabled: bool,
    pub push_enabled: bool,
    pub email_enabled: bool,
    pub outbreak_alerts: bool,
    pub weather_alerts: bool,
}

impl NotificationPreference {
    pub fn default_for(user_id: uuid::Uuid) -> Self {
        Self {
            user_id,
            in_app_enabled: true,
            push_enabled: true,
            email_enabled: true,
            outbreak_alerts: true,
            weather_alerts: true,
        }
    }

    pub fn category_enabled(&self, category: AlertCategory) -> bool {
        match category {
            AlertCategory::Weather => self.weather_alerts,
            AlertCategory::Outbreak => self.outbreak_alerts,
        }
    }
}

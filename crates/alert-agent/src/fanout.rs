use alerts_sql::AlertStore;
use anyhow::Context;
use chrono::{DateTime, Utc};
use derivative::Derivative;
use exponential_backoff::Backoff;
use models::{AlertPayload, FarmerProfile, Id, NewNotification, NotificationPreference};
use notifications::{AlertEvent, NotificationEmail, Recipient, RenderedAlert, Renderer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub trait EmailSender: std::fmt::Debug + Send + Sync + 'static {
    fn send<'s>(
        &'s self,
        email: NotificationEmail,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 's;

    /// Whether this sender delivers anything at all.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// Sends emails using the Resend HTTP API.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ResendSender {
    client: reqwest::Client,
    #[derivative(Debug = "ignore")]
    api_key: String,
    endpoint: url::Url,
    from_address: String,
    reply_to_address: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ResendResponse {
    id: String,
}

impl ResendSender {
    async fn send(&self, notification: NotificationEmail) -> anyhow::Result<()> {
        let NotificationEmail {
            idempotency_key,
            recipient: Recipient { email, .. },
            subject,
            body,
        } = notification;

        let request = ResendRequest {
            from: &self.from_address,
            to: [email.as_str()],
            subject: &subject,
            html: &body,
            reply_to: self.reply_to_address.as_deref(),
        };

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key.as_str())
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .context("calling resend API")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("resend API responded with {status}: {detail}");
        }
        let ResendResponse { id } = response
            .json()
            .await
            .context("decoding resend API response")?;

        tracing::debug!(%idempotency_key, to = %email, email_id = %id, "successfully sent alert email");
        Ok(())
    }
}

#[derive(Debug)]
pub enum Sender {
    Disabled,
    Resend(ResendSender),
}

impl Sender {
    pub fn resend(
        api_key: String,
        from_address: String,
        reply_to_address: Option<String>,
        http_client: reqwest::Client,
        timeout: Duration,
    ) -> anyhow::Result<Sender> {
        Ok(Sender::Resend(ResendSender {
            client: http_client,
            api_key,
            endpoint: url::Url::parse("https://api.resend.com/emails")?,
            from_address,
            reply_to_address,
            timeout,
        }))
    }
}

impl EmailSender for Sender {
    async fn send<'s>(&'s self, notification: NotificationEmail) -> anyhow::Result<()> {
        match self {
            Sender::Disabled => {
                tracing::warn!(
                    to = %notification.recipient.email,
                    subject = %notification.subject,
                    idempotency_key = %notification.idempotency_key,
                    "skipping sending alert email (disabled)"
                );
                Ok(())
            }
            Sender::Resend(resend) => resend.send(notification).await,
        }
    }

    fn is_enabled(&self) -> bool {
        matches!(self, Sender::Resend(_))
    }
}

/// A push message addressed to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushMessage {
    /// Device token of the recipient.
    pub to: String,
    pub title: String,
    pub body: String,
    /// Structured alert payload, so the app can deep-link into it.
    pub data: AlertPayload,
}

pub trait PushSender: std::fmt::Debug + Send + Sync + 'static {
    fn push<'s>(
        &'s self,
        message: PushMessage,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send + 's;

    fn is_enabled(&self) -> bool {
        true
    }
}

/// Posts push messages as JSON to a push gateway.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct HttpPusher {
    client: reqwest::Client,
    gateway_url: url::Url,
    #[derivative(Debug = "ignore")]
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpPusher {
    async fn push(&self, message: PushMessage) -> anyhow::Result<()> {
        let mut request = self
            .client
            .post(self.gateway_url.clone())
            .timeout(self.timeout)
            .json(&message);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.context("calling push gateway")?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            anyhow::bail!("push gateway responded with {status}: {detail}");
        }
        tracing::debug!(title = %message.title, "successfully sent push message");
        Ok(())
    }
}

#[derive(Debug)]
pub enum Pusher {
    Disabled,
    Http(HttpPusher),
}

impl Pusher {
    pub fn http(
        gateway_url: url::Url,
        api_key: Option<String>,
        http_client: reqwest::Client,
        timeout: Duration,
    ) -> Pusher {
        Pusher::Http(HttpPusher {
            client: http_client,
            gateway_url,
            api_key,
            timeout,
        })
    }
}

impl PushSender for Pusher {
    async fn push<'s>(&'s self, message: PushMessage) -> anyhow::Result<()> {
        match self {
            Pusher::Disabled => {
                tracing::warn!(title = %message.title, "skipping sending push message (disabled)");
                Ok(())
            }
            Pusher::Http(http) => http.push(message).await,
        }
    }

    fn is_enabled(&self) -> bool {
        matches!(self, Pusher::Http(_))
    }
}

/// How outbound sends are retried. Each retry waits about twice as long as
/// the one before it, up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

/// Fraction of each delay that is randomized.
const RETRY_JITTER: f32 = 0.25;

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> Backoff {
        let mut backoff = Backoff::new(
            u32::MAX,
            self.backoff,
            Some(self.max_backoff.max(self.backoff)),
        );
        backoff.set_jitter(RETRY_JITTER);
        backoff
    }

    /// Returns how long to wait after `failures` failed attempts.
    pub fn delay(&self, failures: u32) -> Duration {
        self.backoff().next(failures).unwrap_or(self.max_backoff)
    }

    async fn run<F, Fut>(&self, mut attempt: F) -> DeliveryState
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<()>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let backoff = self.backoff();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match attempt().await {
                Ok(()) => return DeliveryState::Sent { attempts },
                Err(error) if attempts >= max_attempts => {
                    return DeliveryState::Failed {
                        attempts,
                        error: format!("{error:#}"),
                    }
                }
                Err(error) => {
                    let delay = backoff.next(attempts).unwrap_or(self.max_backoff);
                    tracing::debug!(%attempts, ?delay, error = %format!("{error:#}"), "send failed, will retry");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Observable result of one outbound send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeliveryState {
    Sent { attempts: u32 },
    Failed { attempts: u32, error: String },
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The in-app notification could not be written.
    NotPersisted,
    /// The user's preferences could not be read.
    PreferencesUnavailable,
    /// The user turned off this category of alerts.
    CategoryDisabled,
    /// The user turned off this channel.
    ChannelDisabled,
    /// The user has no email address or device token.
    NoAddress,
    /// This deployment has no provider configured for the channel.
    ProviderDisabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientOutcome {
    pub user_id: uuid::Uuid,
    /// Id of the in-app notification, if it was written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub push: DeliveryState,
    pub email: DeliveryState,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FanoutReport {
    pub recipients: Vec<RecipientOutcome>,
}

impl FanoutReport {
    pub fn notifications_created(&self) -> usize {
        self.recipients.iter().filter(|r| r.notification_id.is_some()).count()
    }

    pub fn persist_failures(&self) -> impl Iterator<Item = &RecipientOutcome> {
        self.recipients.iter().filter(|r| r.notification_id.is_none())
    }

    fn count(&self, channel: fn(&RecipientOutcome) -> &DeliveryState, sent: bool) -> usize {
        self.recipients
            .iter()
            .filter(|r| match channel(r) {
                DeliveryState::Sent { .. } => sent,
                DeliveryState::Failed { .. } => !sent,
                DeliveryState::Skipped { .. } => false,
            })
            .count()
    }

    pub fn push_sent(&self) -> usize {
        self.count(|r| &r.push, true)
    }

    pub fn push_failed(&self) -> usize {
        self.count(|r| &r.push, false)
    }

    pub fn email_sent(&self) -> usize {
        self.count(|r| &r.email, true)
    }

    pub fn email_failed(&self) -> usize {
        self.count(|r| &r.email, false)
    }
}

fn skipped(reason: SkipReason) -> DeliveryState {
    DeliveryState::Skipped { reason }
}

/// Turns one alert event into an in-app notification per recipient, plus
/// push and email deliveries according to each recipient's preferences.
/// Failures are contained to the recipient and channel they occur on.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Fanout<ES, PS> {
    #[derivative(Debug = "ignore")]
    store: Arc<dyn AlertStore>,
    renderer: Renderer,
    email: ES,
    push: PS,
    retry: RetryPolicy,
}

impl<ES: EmailSender, PS: PushSender> Fanout<ES, PS> {
    pub fn new(
        store: Arc<dyn AlertStore>,
        dashboard_base_url: impl Into<String>,
        email: ES,
        push: PS,
        retry: RetryPolicy,
    ) -> anyhow::Result<Fanout<ES, PS>> {
        let renderer = Renderer::try_new(dashboard_base_url.into())?;
        Ok(Fanout {
            store,
            renderer,
            email,
            push,
            retry,
        })
    }

    pub fn store(&self) -> &dyn AlertStore {
        self.store.as_ref()
    }

    /// Delivers `event` to each of `recipients`. Returns an error only if the
    /// event could not be rendered, in which case nothing was written.
    #[tracing::instrument(skip_all, fields(alert_type = %event.alert_type(), region = %event.region, recipients = recipients.len()))]
    pub async fn deliver(
        &self,
        event: &AlertEvent,
        recipients: &[FarmerProfile],
        now: DateTime<Utc>,
    ) -> anyhow::Result<FanoutReport> {
        let rendered = self
            .renderer
            .render_alert(event)
            .context("rendering alert")?;

        let mut report = FanoutReport::default();
        for recipient in recipients {
            let outcome = self.deliver_one(event, &rendered, recipient, now).await;
            report.recipients.push(outcome);
        }

        tracing::info!(
            notifications = report.notifications_created(),
            push_sent = report.push_sent(),
            push_failed = report.push_failed(),
            email_sent = report.email_sent(),
            email_failed = report.email_failed(),
            "finished alert fanout"
        );
        Ok(report)
    }

    async fn deliver_one(
        &self,
        event: &AlertEvent,
        rendered: &RenderedAlert,
        recipient: &FarmerProfile,
        now: DateTime<Utc>,
    ) -> RecipientOutcome {
        let user_id = recipient.user_id;
        let notification = NewNotification {
            user_id,
            title: rendered.title.clone(),
            message: rendered.message.clone(),
            payload: event.payload.clone(),
            created_at: now,
        };

        let notification_id = match self.store.insert_notification(&notification).await {
            Ok(id) => id,
            Err(error) => {
                let error = format!("{error:#}");
                tracing::warn!(%user_id, %error, "failed to persist notification");
                return RecipientOutcome {
                    user_id,
                    notification_id: None,
                    error: Some(error),
                    push: skipped(SkipReason::NotPersisted),
                    email: skipped(SkipReason::NotPersisted),
                };
            }
        };

        let outcome = |push, email| RecipientOutcome {
            user_id,
            notification_id: Some(notification_id),
            error: None,
            push,
            email,
        };

        let preference = match self.store.fetch_preferences(user_id).await {
            Ok(preference) => {
                preference.unwrap_or_else(|| NotificationPreference::default_for(user_id))
            }
            Err(error) => {
                tracing::warn!(%user_id, error = %format!("{error:#}"), "failed to fetch notification preferences");
                return outcome(
                    skipped(SkipReason::PreferencesUnavailable),
                    skipped(SkipReason::PreferencesUnavailable),
                );
            }
        };
        if !preference.category_enabled(event.alert_type().category()) {
            return outcome(
                skipped(SkipReason::CategoryDisabled),
                skipped(SkipReason::CategoryDisabled),
            );
        }

        let (push, email) = tokio::join!(
            self.push_to(event, rendered, recipient, &preference),
            self.email_to(event, recipient, &preference, notification_id),
        );
        outcome(push, email)
    }

    async fn push_to(
        &self,
        event: &AlertEvent,
        rendered: &RenderedAlert,
        recipient: &FarmerProfile,
        preference: &NotificationPreference,
    ) -> DeliveryState {
        if !preference.push_enabled {
            return skipped(SkipReason::ChannelDisabled);
        }
        let Some(token) = recipient.push_token.as_deref().filter(|t| !t.trim().is_empty()) else {
            return skipped(SkipReason::NoAddress);
        };
        if !self.push.is_enabled() {
            return skipped(SkipReason::ProviderDisabled);
        }

        let message = PushMessage {
            to: token.to_string(),
            title: rendered.title.clone(),
            body: rendered.message.clone(),
            data: event.payload.clone(),
        };
        let state = self.retry.run(|| self.push.push(message.clone())).await;
        if let DeliveryState::Failed { error, .. } = &state {
            tracing::warn!(user_id = %recipient.user_id, %error, "failed to send push message");
        }
        state
    }

    async fn email_to(
        &self,
        event: &AlertEvent,
        recipient: &FarmerProfile,
        preference: &NotificationPreference,
        notification_id: Id,
    ) -> DeliveryState {
        if !preference.email_enabled {
            return skipped(SkipReason::ChannelDisabled);
        }
        let Some(address) = recipient
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
        else {
            return skipped(SkipReason::NoAddress);
        };
        if !self.email.is_enabled() {
            return skipped(SkipReason::ProviderDisabled);
        }

        let email = match self.renderer.render_email(
            event,
            Recipient {
                email: address.to_string(),
                full_name: recipient.full_name.clone(),
            },
            format!("{}-{notification_id}", event.alert_type()),
        ) {
            Ok(email) => email,
            Err(error) => {
                return DeliveryState::Failed {
                    attempts: 0,
                    error: format!("{error:#}"),
                }
            }
        };

        let state = self.retry.run(|| self.email.send(email.clone())).await;
        if let DeliveryState::Failed { error, .. } = &state {
            tracing::warn!(user_id = %recipient.user_id, %error, "failed to send alert email");
        }
        state
    }
}

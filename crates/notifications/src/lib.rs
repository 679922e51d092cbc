//! Renders alert events into the text of in-app notifications, push
//! messages, and emails.
//!
//! Each alert type has its own module that registers four templates: an
//! in-app `title` and `message` (plain text, also used for push), and an
//! email `subject` and HTML `body`. Email bodies are wrapped in a shared
//! layout. Templates are rendered against an `AlertEvent`, with the alert
//! payload available as `arguments`.
use anyhow::Context;
use chrono::NaiveDate;
use handlebars::{handlebars_helper, Handlebars};
use models::{AlertPayload, AlertType};
use serde::{Deserialize, Serialize};

mod cold_stress;
mod heat_stress;
mod heavy_rain;
mod outbreak_alert;
mod safe_spray_window;

/// The channel that a pair of templates renders for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// In-app notification and push: a title and a short plain-text message.
    InApp,
    /// Email: a subject and an HTML body.
    Email,
}

/// Returns the names of the (title, message) or (subject, body) templates for
/// the given alert type and channel.
pub fn template_names(alert_type: AlertType, channel: Channel) -> (String, String) {
    let name = alert_type.name();
    match channel {
        Channel::InApp => (format!("{name}-title"), format!("{name}-message")),
        Channel::Email => (format!("{name}-subject"), format!("{name}-body")),
    }
}

/// An alert that's being sent to one or more users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    /// Display name of the region the alert pertains to.
    pub region: String,
    /// The day that a weather alert is about, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_day: Option<NaiveDate>,
    pub payload: AlertPayload,
}

impl AlertEvent {
    pub fn alert_type(&self) -> AlertType {
        self.payload.alert_type()
    }
}

/// The rendered in-app (and push) text of an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedAlert {
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEmail {
    /// Stable key for this (alert event, recipient), passed to the email
    /// provider so that a re-sent email is not delivered twice.
    pub idempotency_key: String,
    pub recipient: Recipient,
    pub subject: String,
    pub body: String,
}

#[derive(Serialize)]
struct TemplateContext<'a> {
    region: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_day: Option<NaiveDate>,
    arguments: &'a AlertPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a Recipient>,
    dashboard_url: &'a str,
}

// Numbers in payloads are floats, but "30 mm" reads better than "30.0 mm".
handlebars_helper!(num: |value: f64| format_number(value));
// Local times are serialized as `YYYY-MM-DDTHH:MM:SS`; show just `HH:MM`.
handlebars_helper!(clock: |value: String| value.get(11..16).unwrap_or(value.as_str()).to_string());

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

const EMAIL_LAYOUT: &str = r#"<html>
<body>
{{#if recipient.full_name}}<p class="body-text">Hello {{recipient.full_name}},</p>{{/if}}
{{{body}}}
<p class="body-text">
    You can change which alerts you receive in <a href="{{dashboard_url}}/settings/notifications" target="_blank" rel="noopener">your notification settings</a>.
</p>
</body>
</html>"#;

/// Renders alert events using the templates registered by each alert type.
#[derive(Debug)]
pub struct Renderer {
    /// Plain text templates, for in-app notifications and email subjects.
    text: Handlebars<'static>,
    /// HTML templates, for email bodies.
    html: Handlebars<'static>,
    dashboard_base_url: String,
}

impl Renderer {
    pub fn try_new(dashboard_base_url: String) -> anyhow::Result<Renderer> {
        let mut text = Handlebars::new();
        text.set_strict_mode(true);
        text.register_escape_fn(handlebars::no_escape);

        // Email bodies reference optional fields, such as the recipient's name.
        let mut html = Handlebars::new();

        for reg in [&mut text, &mut html] {
            reg.register_helper("num", Box::new(num));
            reg.register_helper("clock", Box::new(clock));
        }
        html.register_template_string("email-layout", EMAIL_LAYOUT)
            .context("registering email-layout template")?;

        heavy_rain::register_templates(&mut text, &mut html)?;
        heat_stress::register_templates(&mut text, &mut html)?;
        cold_stress::register_templates(&mut text, &mut html)?;
        safe_spray_window::register_templates(&mut text, &mut html)?;
        outbreak_alert::register_templates(&mut text, &mut html)?;

        Ok(Renderer {
            text,
            html,
            dashboard_base_url: dashboard_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Renders the in-app title and message of `event`.
    pub fn render_alert(&self, event: &AlertEvent) -> anyhow::Result<RenderedAlert> {
        let alert_type = event.alert_type();
        let (title_name, message_name) = template_names(alert_type, Channel::InApp);
        let ctx = self.context(event, None);

        let title = self
            .text
            .render(&title_name, &ctx)
            .with_context(|| format!("rendering {title_name}"))?;
        let message = self
            .text
            .render(&message_name, &ctx)
            .with_context(|| format!("rendering {message_name}"))?;

        Ok(RenderedAlert {
            title: title.trim().to_string(),
            message: message.trim().to_string(),
        })
    }

    /// Renders the email for `event` that's addressed to `recipient`.
    pub fn render_email(
        &self,
        event: &AlertEvent,
        recipient: Recipient,
        idempotency_key: String,
    ) -> anyhow::Result<NotificationEmail> {
        let alert_type = event.alert_type();
        let (subject_name, body_name) = template_names(alert_type, Channel::Email);
        let ctx = self.context(event, Some(&recipient));

        let subject = self
            .text
            .render(&subject_name, &ctx)
            .with_context(|| format!("rendering {subject_name}"))?;
        let inner = self
            .html
            .render(&body_name, &ctx)
            .with_context(|| format!("rendering {body_name}"))?;

        let layout_ctx = serde_json::json!({
            "body": inner,
            "recipient": &recipient,
            "dashboard_url": &self.dashboard_base_url,
        });
        let body = self
            .html
            .render("email-layout", &layout_ctx)
            .context("rendering email-layout")?;

        Ok(NotificationEmail {
            idempotency_key,
            recipient,
            subject: subject.trim().to_string(),
            body,
        })
    }

    fn context<'a>(
        &'a self,
        event: &'a AlertEvent,
        recipient: Option<&'a Recipient>,
    ) -> TemplateContext<'a> {
        TemplateContext {
            region: &event.region,
            target_day: event.target_day,
            arguments: &event.payload,
            recipient,
            dashboard_url: &self.dashboard_base_url,
        }
    }
}

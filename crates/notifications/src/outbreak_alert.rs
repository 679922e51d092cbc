use super::{template_names, Channel};
use anyhow::Context;
use handlebars::Handlebars;
use models::AlertType;

pub fn register_templates<'a>(
    text: &mut Handlebars<'a>,
    html: &mut Handlebars<'a>,
) -> anyhow::Result<()> {
    let (title, message) = template_names(AlertType::OutbreakAlert, Channel::InApp);
    text.register_template_string(&title, r#"Disease outbreak nearby: {{arguments.condition}}"#)
        .context("registering outbreak_alert-title template")?;
    text.register_template_string(
        &message,
        r#"{{arguments.reporter_count}} farmers in {{arguments.region}} have reported {{arguments.condition}} in the last 3 days (severity: {{arguments.severity}}). Inspect your crops and consider preventive treatment."#,
    )
    .context("registering outbreak_alert-message template")?;

    let (subject, body) = template_names(AlertType::OutbreakAlert, Channel::Email);
    text.register_template_string(
        &subject,
        r#"Cropwatch: {{arguments.condition}} outbreak reported in {{arguments.region}}"#,
    )
    .context("registering outbreak_alert-subject template")?;
    html.register_template_string(
        &body,
        r#"<p class="body-text">
    {{arguments.reporter_count}} farmers in <span class="identifier">{{arguments.region}}</span> have reported <strong>{{arguments.condition}}</strong> in the last 3 days. The outbreak severity is currently <strong>{{arguments.severity}}</strong>.
</p>
<ul>
    <li>Inspect your fields for early symptoms.</li>
    <li>Use the diagnosis tool in the app if you notice anything unusual.</li>
    <li>Ask your local extension officer about preventive treatment.</li>
</ul>"#,
    )
    .context("registering outbreak_alert-body template")?;

    Ok(())
}

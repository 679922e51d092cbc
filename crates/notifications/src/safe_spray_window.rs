use super::{template_names, Channel};
use anyhow::Context;
use handlebars::Handlebars;
use models::AlertType;

pub fn register_templates<'a>(
    text: &mut Handlebars<'a>,
    html: &mut Handlebars<'a>,
) -> anyhow::Result<()> {
    let (title, message) = template_names(AlertType::SafeSprayWindow, Channel::InApp);
    text.register_template_string(&title, r#"Safe spray window tomorrow"#)
        .context("registering safe_spray_window-title template")?;
    text.register_template_string(
        &message,
        r#"Good spraying conditions in {{region}} on {{target_day}} from {{clock arguments.window_start}} to {{clock arguments.window_end}} ({{arguments.hours}} hours): {{num arguments.probability}}% chance of rain, wind up to {{num arguments.wind_max}} km/h."#,
    )
    .context("registering safe_spray_window-message template")?;

    let (subject, body) = template_names(AlertType::SafeSprayWindow, Channel::Email);
    text.register_template_string(
        &subject,
        r#"Cropwatch: safe spray window in {{region}} on {{target_day}}"#,
    )
    .context("registering safe_spray_window-subject template")?;
    html.register_template_string(
        &body,
        r#"<p class="body-text">
    Conditions in <span class="identifier">{{region}}</span> look good for spraying on {{target_day}} between <strong>{{clock arguments.window_start}}</strong> and <strong>{{clock arguments.window_end}}</strong>.
</p>
<p class="body-text">
    The chance of rain is {{num arguments.probability}}% and wind speeds stay below {{num arguments.wind_max}} km/h, so sprays are unlikely to drift or wash off.
</p>"#,
    )
    .context("registering safe_spray_window-body template")?;

    Ok(())
}

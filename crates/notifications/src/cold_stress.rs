use super::{template_names, Channel};
use anyhow::Context;
use handlebars::Handlebars;
use models::AlertType;

pub fn register_templates<'a>(
    text: &mut Handlebars<'a>,
    html: &mut Handlebars<'a>,
) -> anyhow::Result<()> {
    let (title, message) = template_names(AlertType::ColdStress, Channel::InApp);
    text.register_template_string(&title, r#"Cold stress warning"#)
        .context("registering cold_stress-title template")?;
    text.register_template_string(
        &message,
        r#"Temperatures in {{region}} are forecast to drop to {{num arguments.temp_min}}°C on {{target_day}}. Protect nurseries and sensitive crops from frost."#,
    )
    .context("registering cold_stress-message template")?;

    let (subject, body) = template_names(AlertType::ColdStress, Channel::Email);
    text.register_template_string(
        &subject,
        r#"Cropwatch: cold stress expected in {{region}} on {{target_day}}"#,
    )
    .context("registering cold_stress-subject template")?;
    html.register_template_string(
        &body,
        r#"<p class="body-text">
    Temperatures in <span class="identifier">{{region}}</span> are forecast to drop to <strong>{{num arguments.temp_min}}°C</strong> on {{target_day}}.
</p>
<ul>
    <li>Cover nurseries and sensitive crops overnight.</li>
    <li>A light irrigation in the evening helps protect against frost.</li>
</ul>"#,
    )
    .context("registering cold_stress-body template")?;

    Ok(())
}

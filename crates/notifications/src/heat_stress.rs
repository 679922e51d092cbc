use super::{template_names, Channel};
use anyhow::Context;
use handlebars::Handlebars;
use models::AlertType;

pub fn register_templates<'a>(
    text: &mut Handlebars<'a>,
    html: &mut Handlebars<'a>,
) -> anyhow::Result<()> {
    let (title, message) = template_names(AlertType::HeatStress, Channel::InApp);
    text.register_template_string(&title, r#"Heat stress warning"#)
        .context("registering heat_stress-title template")?;
    text.register_template_string(
        &message,
        r#"Temperatures in {{region}} are forecast to reach {{num arguments.temp_max}}°C on {{target_day}}. Irrigate in the early morning or evening and provide shade for livestock."#,
    )
    .context("registering heat_stress-message template")?;

    let (subject, body) = template_names(AlertType::HeatStress, Channel::Email);
    text.register_template_string(
        &subject,
        r#"Cropwatch: heat stress expected in {{region}} on {{target_day}}"#,
    )
    .context("registering heat_stress-subject template")?;
    html.register_template_string(
        &body,
        r#"<p class="body-text">
    Temperatures in <span class="identifier">{{region}}</span> are forecast to reach <strong>{{num arguments.temp_max}}°C</strong> on {{target_day}}.
</p>
<ul>
    <li>Irrigate in the early morning or evening to reduce evaporation.</li>
    <li>Mulch around young plants to keep soil moisture in.</li>
    <li>Make sure livestock have shade and plenty of water.</li>
</ul>"#,
    )
    .context("registering heat_stress-body template")?;

    Ok(())
}

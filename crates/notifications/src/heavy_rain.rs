use super::{template_names, Channel};
use anyhow::Context;
use handlebars::Handlebars;
use models::AlertType;

pub fn register_templates<'a>(
    text: &mut Handlebars<'a>,
    html: &mut Handlebars<'a>,
) -> anyhow::Result<()> {
    let (title, message) = template_names(AlertType::HeavyRain, Channel::InApp);
    text.register_template_string(&title, r#"Heavy rain expected tomorrow"#)
        .context("registering heavy_rain-title template")?;
    text.register_template_string(
        &message,
        r#"Heavy rain is expected in {{region}} on {{target_day}}: {{num arguments.rain_mm}} mm with an {{num arguments.probability}}% chance of rain. Delay irrigation and fertilizer application, and clear field drainage."#,
    )
    .context("registering heavy_rain-message template")?;

    let (subject, body) = template_names(AlertType::HeavyRain, Channel::Email);
    text.register_template_string(
        &subject,
        r#"Cropwatch: heavy rain expected in {{region}} on {{target_day}}"#,
    )
    .context("registering heavy_rain-subject template")?;
    html.register_template_string(
        &body,
        r#"<p class="body-text">
    The forecast for <span class="identifier">{{region}}</span> on {{target_day}} shows <strong>{{num arguments.rain_mm}} mm</strong> of rain, with a {{num arguments.probability}}% chance of precipitation.
</p>
<ul>
    <li>Postpone irrigation, fertilizer, and pesticide applications until the rain has passed.</li>
    <li>Clear drainage channels so that water does not stand in your fields.</li>
    <li>Move harvested produce under cover.</li>
</ul>"#,
    )
    .context("registering heavy_rain-body template")?;

    Ok(())
}

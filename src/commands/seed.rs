use crate::output::UserOutput;
use mission_control::config::Settings;
use mission_control::MissionControl;

pub async fn run_seed(
    app: &MissionControl,
    settings: &Settings,
    replace: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if settings.services.is_empty() {
        out.warning("The settings file declares no services; nothing to seed");
        return Ok(());
    }

    if !replace && app.store().count().await? > 0 {
        out.warning("Database already has services. Use --replace to start over");
        return Ok(());
    }

    out.status(&format!("Seeding {} service(s)...", settings.services.len()));
    let seeded = app.seed(settings.services.clone(), replace).await?;
    for service in &seeded {
        out.status(&format!("  {} {}", service.id(), service.name));
    }
    out.success(&format!("Seeded {} service(s)", seeded.len()));
    Ok(())
}

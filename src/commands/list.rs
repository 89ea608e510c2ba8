use crate::output::UserOutput;
use mission_control::state::ServiceFilter;
use mission_control::MissionControl;

pub async fn run_list(
    app: &MissionControl,
    json: bool,
    daemons_only: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let filter = if daemons_only {
        ServiceFilter {
            daemon: Some(true),
            ..ServiceFilter::all()
        }
    } else {
        ServiceFilter::all()
    };
    let services = app.store().list(filter).await?;

    if json {
        out.line(&serde_json::to_string_pretty(&services)?);
        return Ok(());
    }

    if services.is_empty() {
        out.status("No services. Seed some with: mctl seed");
        return Ok(());
    }

    out.line(&format!(
        "{:>4}  {:<24} {:<18} {:<8} {:<12} {:<32} URL",
        "ID", "NAME", "TYPE", "STATE", "CONTAINER", "IMAGE"
    ));
    for service in &services {
        let state = if service.is_disabled {
            "disabled"
        } else if service.is_running() {
            "running"
        } else {
            "stopped"
        };
        let container = service
            .container_reference()
            .map(|id| id.get(..12).unwrap_or(id))
            .unwrap_or("-");
        let name = if service.is_daemon {
            format!("{}*", service.name)
        } else {
            service.name.clone()
        };
        out.line(&format!(
            "{:>4}  {:<24} {:<18} {:<8} {:<12} {:<32} {}",
            service.id(),
            name,
            service.service_type,
            state,
            container,
            service.image_ref(),
            service.access_url().unwrap_or_default()
        ));
    }
    if services.iter().any(|s| s.is_daemon) {
        out.status("\n* daemon");
    }
    Ok(())
}

use crate::output::UserOutput;
use mission_control::MissionControl;

pub async fn run_start(app: &MissionControl, id: i64, out: &dyn UserOutput) -> anyhow::Result<()> {
    let mut service = app.controller().load(id).await?;
    out.status(&format!("Starting {}...", service));
    let outcome = app.controller().start(&mut service).await?;
    out.success(&format!("{}: {}", service, outcome));
    Ok(())
}

pub async fn run_stop(app: &MissionControl, id: i64, out: &dyn UserOutput) -> anyhow::Result<()> {
    let mut service = app.controller().load(id).await?;
    out.status(&format!("Stopping {}...", service));
    let outcome = app.controller().stop(&mut service).await?;
    out.success(&format!("{}: {}", service, outcome));
    Ok(())
}

pub async fn run_restart(
    app: &MissionControl,
    id: i64,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let mut service = app.controller().load(id).await?;
    out.status(&format!("Restarting {}...", service));
    let outcome = app.controller().restart(&mut service).await?;
    out.success(&format!("{}: {}", service, outcome));
    Ok(())
}

use crate::output::UserOutput;
use mission_control::MissionControl;

pub async fn run_cache(app: &MissionControl, out: &dyn UserOutput) -> anyhow::Result<()> {
    out.status("Caching service images...");
    let report = app.warm_images().await?;

    for image in &report.present {
        out.status(&format!("  {} present", image));
    }
    for image in &report.pulled {
        out.success(&format!("  {} pulled", image));
    }
    for (image, reason) in &report.failed {
        out.error(&format!("  {} failed: {}", image, reason));
    }

    if report.is_complete() {
        out.success(&format!(
            "{} image(s) cached",
            report.present.len() + report.pulled.len()
        ));
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} image(s) could not be cached",
            report.failed.len()
        ))
    }
}

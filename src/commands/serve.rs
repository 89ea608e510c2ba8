use crate::output::UserOutput;
use mission_control::docker::{wait_for_daemon, DockerClient};
use mission_control::notify::BroadcastNotifier;
use mission_control::MissionControl;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const DAEMON_WAIT_ATTEMPTS: u32 = 10;
const DAEMON_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Boot, then print every notification as a JSON line until Ctrl+C.
pub async fn run_serve(
    app: &MissionControl,
    notifier: &BroadcastNotifier,
    docker: &DockerClient,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    // Subscribe first so boot-time notifications are printed too.
    let mut notifications = notifier.subscribe();

    out.status("Waiting for the Docker daemon...");
    if !wait_for_daemon(docker, DAEMON_WAIT_ATTEMPTS, DAEMON_WAIT_TIMEOUT).await {
        out.warning("Docker daemon is not responding; booting anyway, the event loop will keep retrying");
    }

    out.status("Booting...");
    let report = app.boot().await;
    if report.images.is_complete() {
        out.status(&format!(
            "Images: {} present, {} pulled",
            report.images.present.len(),
            report.images.pulled.len()
        ));
    } else {
        for (image, reason) in &report.images.failed {
            out.warning(&format!("Could not cache {}: {}", image, reason));
        }
    }
    if report.daemons.is_complete() {
        out.status(&format!("Daemons: {}", report.daemons));
    } else {
        for (id, reason) in &report.daemons.failed {
            out.warning(&format!("Daemon #{} failed: {}", id, reason));
        }
    }
    out.success("Watching container events (Press Ctrl+C to stop)");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            received = notifications.recv() => match received {
                Ok(notification) => out.line(&serde_json::to_string(&notification)?),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Dropped {} notification(s) while printing", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    out.status("Shutting down...");
    app.shutdown().await;
    Ok(())
}

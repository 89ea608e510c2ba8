//! Boot-time supervision of always-on services.

use crate::error::Result;
use crate::model::Service;
use crate::service::ServiceController;
use crate::state::ServiceFilter;
use std::fmt;

/// What happened to each daemon during one supervision pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DaemonReport {
    /// Service ids left running.
    pub running: Vec<i64>,
    /// Service id and error for every daemon that could not be brought up.
    pub failed: Vec<(i64, String)>,
}

impl DaemonReport {
    /// True when every daemon ended up running.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl fmt::Display for DaemonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} daemon(s) running, {} failed",
            self.running.len(),
            self.failed.len()
        )
    }
}

/// Make sure every enabled daemon is running.
///
/// A daemon whose container is found and marked running is restarted; any
/// other daemon is started. Every daemon is attempted; failures are logged
/// and collected. Only a store failure while listing aborts the pass.
pub async fn supervise_daemons(controller: &ServiceController) -> Result<DaemonReport> {
    let daemons = controller.store().list(ServiceFilter::daemons()).await?;
    tracing::info!("Supervising {} daemon service(s)", daemons.len());

    let mut report = DaemonReport::default();
    for mut service in daemons {
        match ensure_daemon(controller, &mut service).await {
            Ok(()) => report.running.push(service.id()),
            Err(e) => {
                tracing::error!(
                    service_id = service.id(),
                    service = %service.name,
                    "Failed to bring up daemon: {}",
                    e
                );
                report.failed.push((service.id(), e.to_string()));
            }
        }
    }

    if report.is_complete() {
        tracing::info!("Daemons: {}", report);
    } else {
        tracing::warn!("Daemons: {}", report);
    }
    Ok(report)
}

async fn ensure_daemon(controller: &ServiceController, service: &mut Service) -> Result<()> {
    let found = controller.locate(service).await?;
    if found.is_some() && service.is_running() {
        controller.restart(service).await?;
    } else {
        controller.start(service).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_completeness() {
        let mut report = DaemonReport {
            running: vec![1, 2],
            failed: vec![],
        };
        assert!(report.is_complete());
        assert_eq!(report.to_string(), "2 daemon(s) running, 0 failed");

        report.failed.push((3, "boom".into()));
        assert!(!report.is_complete());
    }
}

//! Request handlers for clients of the notification channel.
//!
//! Each handler runs behind [`authenticated`], which checks the caller's
//! [`Session`] before anything else happens. Results are reported back
//! through the [`Notifier`](crate::notify::Notifier) under the event names
//! clients listen for (`service_started`, `service_stop_failed`, ...) and
//! also returned to the caller.

use crate::error::{Error, Result};
use crate::model::Service;
use crate::orchestrator::MissionControl;
use crate::service::{RestartOutcome, StartOutcome, StopOutcome};
use crate::streaming::StreamKind;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Who is calling. Authentication itself happens elsewhere; handlers only
/// look at the outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    user: Option<String>,
}

impl Session {
    pub fn authenticated(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }
}

/// Run `handler` only for an authenticated session.
pub async fn authenticated<F, Fut, T>(session: &Session, handler: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if !session.is_authenticated() {
        tracing::warn!("Rejected request from unauthenticated session");
        return Err(Error::Unauthenticated);
    }
    handler().await
}

/// Start or stop a log/stats stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamCommand {
    Start,
    Stop,
}

impl std::str::FromStr for StreamCommand {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(StreamCommand::Start),
            "stop" => Ok(StreamCommand::Stop),
            other => Err(Error::Config(format!("Unknown stream command '{}'", other))),
        }
    }
}

/// The service-facing request surface.
#[derive(Clone)]
pub struct ServiceHandlers {
    app: Arc<MissionControl>,
}

/// Event names and wording for one lifecycle operation.
struct Operation {
    verb: &'static str,
    past: &'static str,
    ok_event: &'static str,
    failed_event: &'static str,
}

const START: Operation = Operation {
    verb: "starting",
    past: "started",
    ok_event: "service_started",
    failed_event: "service_start_failed",
};

const STOP: Operation = Operation {
    verb: "stopping",
    past: "stopped",
    ok_event: "service_stopped",
    failed_event: "service_stop_failed",
};

const RESTART: Operation = Operation {
    verb: "restarting",
    past: "restarted",
    ok_event: "service_restarted",
    failed_event: "service_restart_failed",
};

impl ServiceHandlers {
    pub fn new(app: Arc<MissionControl>) -> Self {
        Self { app }
    }

    pub async fn start_service(&self, session: &Session, service_id: i64) -> Result<StartOutcome> {
        authenticated(session, move || async move {
            tracing::info!(service_id, "Client requested to start service");
            let mut service = self.load(service_id, &START).await?;
            let result = self.app.controller().start(&mut service).await;
            self.report(service_id, &START, result)
        })
        .await
    }

    pub async fn stop_service(&self, session: &Session, service_id: i64) -> Result<StopOutcome> {
        authenticated(session, move || async move {
            tracing::info!(service_id, "Client requested to stop service");
            let mut service = self.load(service_id, &STOP).await?;
            let result = self.app.controller().stop(&mut service).await;
            self.report(service_id, &STOP, result)
        })
        .await
    }

    pub async fn restart_service(
        &self,
        session: &Session,
        service_id: i64,
    ) -> Result<RestartOutcome> {
        authenticated(session, move || async move {
            tracing::info!(service_id, "Client requested to restart service");
            let mut service = self.load(service_id, &RESTART).await?;
            let result = self.app.controller().restart(&mut service).await;
            self.report(service_id, &RESTART, result)
        })
        .await
    }

    /// Start or stop relaying a service's logs.
    ///
    /// Returns the relay task when a stream was started. A service without a
    /// container has nothing to stream; that is logged, not reported.
    pub async fn logs(
        &self,
        session: &Session,
        service_id: i64,
        command: StreamCommand,
    ) -> Result<Option<JoinHandle<usize>>> {
        authenticated(session, move || self.stream(service_id, StreamKind::Logs, command)).await
    }

    /// Start or stop relaying a service's resource usage.
    pub async fn stats(
        &self,
        session: &Session,
        service_id: i64,
        command: StreamCommand,
    ) -> Result<Option<JoinHandle<usize>>> {
        authenticated(session, move || self.stream(service_id, StreamKind::Stats, command)).await
    }

    async fn stream(
        &self,
        service_id: i64,
        kind: StreamKind,
        command: StreamCommand,
    ) -> Result<Option<JoinHandle<usize>>> {
        tracing::info!(service_id, ?kind, ?command, "Client requested stream change");
        if command == StreamCommand::Stop {
            self.app.stop_stream(service_id, kind);
            return Ok(None);
        }

        let service = self.app.controller().load(service_id).await?;
        if service.container_reference().is_none() {
            tracing::info!(service_id, "Service is not running; nothing to stream");
            return Ok(None);
        }

        let handle = match kind {
            StreamKind::Logs => self.app.start_log_stream(&service)?,
            StreamKind::Stats => self.app.start_stats_stream(&service)?,
        };
        Ok(Some(handle))
    }

    async fn load(&self, service_id: i64, op: &Operation) -> Result<Service> {
        match self.app.controller().load(service_id).await {
            Err(Error::ServiceNotFound(_)) => {
                tracing::error!(service_id, "Service not found");
                self.app.notifier().emit(
                    op.failed_event,
                    json!({
                        "service_id": service_id,
                        "message": "Service not found",
                        "error": format!("Service not found for service_id={}", service_id),
                    }),
                );
                Err(Error::ServiceNotFound(service_id.to_string()))
            }
            other => other,
        }
    }

    fn report<T>(&self, service_id: i64, op: &Operation, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                tracing::info!(service_id, "Service {}", op.past);
                self.app.notifier().emit(
                    op.ok_event,
                    json!({
                        "service_id": service_id,
                        "message": format!("Service {} successfully", op.past),
                    }),
                );
            }
            Err(e) => {
                tracing::error!(service_id, "Error {} service: {}", op.verb, e);
                self.app.notifier().emit(
                    op.failed_event,
                    json!({
                        "service_id": service_id,
                        "message": format!("Error {} service", op.verb),
                        "error": e.to_string(),
                    }),
                );
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn guard_rejects_anonymous_sessions() {
        let called = AtomicBool::new(false);
        let flag = &called;
        let result = authenticated(&Session::anonymous(), move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(Error::Unauthenticated)));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn guard_runs_handler_for_authenticated_sessions() {
        let session = Session::authenticated("ops");
        let value = authenticated(&session, || async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(session.user(), Some("ops"));
    }

    #[test]
    fn stream_command_parsing() {
        assert_eq!("start".parse::<StreamCommand>().unwrap(), StreamCommand::Start);
        assert_eq!("stop".parse::<StreamCommand>().unwrap(), StreamCommand::Stop);
        assert!("pause".parse::<StreamCommand>().is_err());
    }
}

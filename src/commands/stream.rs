use crate::output::{format_bytes, UserOutput};
use futures::{Stream, StreamExt};
use mission_control::config::parse_setting;
use mission_control::streaming::{stream_logs, stream_stats, StatsSnapshot, StreamFlag, StreamKind};
use mission_control::{Error, MissionControl};
use std::time::Duration;

pub async fn run_logs(app: &MissionControl, id: i64, out: &dyn UserOutput) -> anyhow::Result<()> {
    let service = app.controller().load(id).await?;
    let flag = app.streams().enable(id, StreamKind::Logs);
    let stream = stream_logs(app.controller().runtime().clone(), &service, flag.clone())?;

    out.status(&format!("Following logs for {} (Press Ctrl+C to stop):", service));
    out.status(&format!("{:-<50}", ""));
    follow(stream, flag, |line| out.line(&line)).await?;
    out.status("\nStopped following logs");
    Ok(())
}

pub async fn run_stats(
    app: &MissionControl,
    id: i64,
    interval: Duration,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let service = app.controller().load(id).await?;
    let flag = app.streams().enable(id, StreamKind::Stats);
    let stream = stream_stats(
        app.controller().runtime().clone(),
        &service,
        flag.clone(),
        interval,
    )?;

    out.status(&format!("Resource usage for {} (Press Ctrl+C to stop):", service));
    out.line(&format!(
        "{:>8}  {:>12}  {:>12}  {:>12}",
        "CPU", "MEMORY", "DISK READ", "DISK WRITE"
    ));
    follow(stream, flag, |snapshot| out.line(&format_snapshot(&snapshot))).await?;
    Ok(())
}

/// Parse `--interval`, falling back to the configured value.
pub fn stats_interval(flag: Option<&str>, configured: Duration) -> anyhow::Result<Duration> {
    match flag {
        Some(value) => Ok(parse_setting("--interval", value)?),
        None => Ok(configured),
    }
}

/// Drain `stream` into `emit` until it ends or Ctrl+C clears the flag.
async fn follow<S, T>(stream: S, flag: StreamFlag, mut emit: impl FnMut(T)) -> anyhow::Result<()>
where
    S: Stream<Item = Result<T, Error>>,
{
    futures::pin_mut!(stream);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                flag.clear();
                return Ok(());
            }
            next = stream.next() => match next {
                Some(Ok(item)) => emit(item),
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            }
        }
    }
}

fn format_snapshot(snapshot: &StatsSnapshot) -> String {
    let cpu = snapshot
        .cpu_percent
        .map(|p| format!("{:.2}%", p))
        .unwrap_or_else(|| "-".to_string());
    let bytes = |value: Option<u64>| value.map(format_bytes).unwrap_or_else(|| "-".to_string());
    format!(
        "{:>8}  {:>12}  {:>12}  {:>12}",
        cpu,
        bytes(snapshot.memory_bytes),
        bytes(snapshot.disk_read_bytes),
        bytes(snapshot.disk_write_bytes)
    )
}

use super::StreamFlag;
use crate::error::{Error, Result};
use crate::model::Service;
use crate::runtime::{ContainerRuntime, StatsSample};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Resource usage derived from one statistics sample. `None` means the
/// sample did not carry enough data.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StatsSnapshot {
    pub cpu_percent: Option<f64>,
    pub memory_bytes: Option<u64>,
    pub disk_read_bytes: Option<u64>,
    pub disk_write_bytes: Option<u64>,
}

impl StatsSnapshot {
    pub fn from_sample(sample: &StatsSample) -> Self {
        let blkio = sample.blkio_stats.io_service_bytes_recursive.as_deref();
        Self {
            cpu_percent: cpu_percent(sample),
            memory_bytes: sample.memory_stats.usage,
            disk_read_bytes: blkio.map(|entries| sum_op(entries, "read")),
            disk_write_bytes: blkio.map(|entries| sum_op(entries, "write")),
        }
    }
}

fn sum_op(entries: &[crate::runtime::BlkioEntry], op: &str) -> u64 {
    entries
        .iter()
        .filter(|e| e.op.eq_ignore_ascii_case(op))
        .fold(0u64, |acc, e| acc.saturating_add(e.value))
}

/// CPU usage in percent of one core, rounded to two decimals.
///
/// `(cpu_delta / system_delta) * online_cpus * 100`, where deltas are taken
/// against the previous sample and a missing previous value counts as 0.
/// Returns `None` when a required field is missing or the system delta is
/// zero.
pub fn cpu_percent(sample: &StatsSample) -> Option<f64> {
    let total = sample.cpu_stats.cpu_usage.total_usage?;
    let system = sample.cpu_stats.system_cpu_usage?;
    let online = sample.cpu_stats.online_cpus?;

    let previous_total = sample.precpu_stats.cpu_usage.total_usage.unwrap_or(0);
    let previous_system = sample.precpu_stats.system_cpu_usage.unwrap_or(0);

    let system_delta = system.checked_sub(previous_system)?;
    if system_delta == 0 {
        return None;
    }
    let cpu_delta = total.saturating_sub(previous_total);

    let percent = (cpu_delta as f64 / system_delta as f64) * f64::from(online) * 100.0;
    Some((percent * 100.0).round() / 100.0)
}

struct StatsState {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    service: String,
    flag: StreamFlag,
    interval: Duration,
    first: bool,
    done: bool,
}

/// Sample a service's container repeatedly, waiting `interval` between
/// samples.
///
/// Fails up front with [`Error::ContainerNotFound`] when the service has no
/// container reference.
pub fn stream_stats(
    runtime: Arc<dyn ContainerRuntime>,
    service: &Service,
    flag: StreamFlag,
    interval: Duration,
) -> Result<BoxStream<'static, Result<StatsSnapshot>>> {
    let Some(container_id) = service.container_reference() else {
        return Err(Error::ContainerNotFound {
            service: service.name.clone(),
            reference: None,
        });
    };

    let state = StatsState {
        runtime,
        container_id: container_id.to_string(),
        service: service.name.clone(),
        flag,
        interval,
        first: true,
        done: false,
    };

    Ok(futures::stream::unfold(state, |mut st| async move {
        if st.done || !st.flag.is_enabled() {
            return None;
        }
        if !st.first && !st.interval.is_zero() {
            tokio::time::sleep(st.interval).await;
            if !st.flag.is_enabled() {
                return None;
            }
        }
        st.first = false;

        let sample = st.runtime.stats(&st.container_id).await;
        if !st.flag.is_enabled() {
            return None;
        }

        match sample {
            Ok(sample) => Some((Ok(StatsSnapshot::from_sample(&sample)), st)),
            Err(e) => {
                st.done = true;
                let err = Error::StreamingInterrupted {
                    service: st.service.clone(),
                    reason: e.to_string(),
                };
                Some((Err(err), st))
            }
        }
    })
    .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{BlkioEntry, BlkioStats, CpuStats, CpuUsage, MemoryStats};

    fn sample(total: u64, pre_total: Option<u64>, system: u64, cpus: u32) -> StatsSample {
        StatsSample {
            cpu_stats: CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: Some(total),
                },
                system_cpu_usage: Some(system),
                online_cpus: Some(cpus),
            },
            precpu_stats: CpuStats {
                cpu_usage: CpuUsage {
                    total_usage: pre_total,
                },
                system_cpu_usage: None,
                online_cpus: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn cpu_percent_reference_case() {
        assert_eq!(cpu_percent(&sample(200, Some(100), 1000, 4)), Some(40.0));
    }

    #[test]
    fn cpu_percent_without_previous_sample() {
        assert_eq!(cpu_percent(&sample(50, None, 1000, 1)), Some(5.0));
    }

    #[test]
    fn cpu_percent_rounds_to_two_decimals() {
        assert_eq!(cpu_percent(&sample(1, Some(0), 3, 1)), Some(33.33));
    }

    #[test]
    fn cpu_percent_unavailable_when_fields_missing() {
        let mut s = sample(200, Some(100), 1000, 4);
        s.cpu_stats.online_cpus = None;
        assert_eq!(cpu_percent(&s), None);

        let mut s = sample(200, Some(100), 1000, 4);
        s.cpu_stats.system_cpu_usage = None;
        assert_eq!(cpu_percent(&s), None);

        assert_eq!(cpu_percent(&StatsSample::default()), None);
    }

    #[test]
    fn cpu_percent_unavailable_for_zero_system_delta() {
        let mut s = sample(200, Some(100), 1000, 4);
        s.precpu_stats.system_cpu_usage = Some(1000);
        assert_eq!(cpu_percent(&s), None);
    }

    #[test]
    fn snapshot_sums_block_io() {
        let mut s = sample(200, Some(100), 1000, 4);
        s.memory_stats = MemoryStats {
            usage: Some(4096),
        };
        s.blkio_stats = BlkioStats {
            io_service_bytes_recursive: Some(vec![
                BlkioEntry {
                    op: "Read".into(),
                    value: 10,
                },
                BlkioEntry {
                    op: "read".into(),
                    value: 5,
                },
                BlkioEntry {
                    op: "Write".into(),
                    value: 7,
                },
                BlkioEntry {
                    op: "Total".into(),
                    value: 22,
                },
            ]),
        };
        let snap = StatsSnapshot::from_sample(&s);
        assert_eq!(snap.cpu_percent, Some(40.0));
        assert_eq!(snap.memory_bytes, Some(4096));
        assert_eq!(snap.disk_read_bytes, Some(15));
        assert_eq!(snap.disk_write_bytes, Some(7));
    }

    #[test]
    fn snapshot_without_block_io() {
        let snap = StatsSnapshot::from_sample(&StatsSample::default());
        assert_eq!(snap, StatsSnapshot::default());
    }
}

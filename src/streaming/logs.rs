use super::StreamFlag;
use crate::error::{Error, Result};
use crate::model::Service;
use crate::runtime::{ContainerRuntime, LogStream};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::sync::Arc;

struct LogState {
    runtime: Arc<dyn ContainerRuntime>,
    container_id: String,
    service: String,
    flag: StreamFlag,
    inner: Option<LogStream>,
    done: bool,
}

/// Follow a service's container output.
///
/// Fails up front with [`Error::ContainerNotFound`] when the service has no
/// container reference. The runtime is not contacted until the first pull.
pub fn stream_logs(
    runtime: Arc<dyn ContainerRuntime>,
    service: &Service,
    flag: StreamFlag,
) -> Result<BoxStream<'static, Result<String>>> {
    let Some(container_id) = service.container_reference() else {
        return Err(Error::ContainerNotFound {
            service: service.name.clone(),
            reference: None,
        });
    };

    let state = LogState {
        runtime,
        container_id: container_id.to_string(),
        service: service.name.clone(),
        flag,
        inner: None,
        done: false,
    };

    Ok(futures::stream::unfold(state, |mut st| async move {
        if st.done || !st.flag.is_enabled() {
            return None;
        }

        if st.inner.is_none() {
            match st.runtime.logs(&st.container_id).await {
                Ok(inner) => st.inner = Some(inner),
                Err(e) => {
                    st.done = true;
                    let err = Error::StreamingInterrupted {
                        service: st.service.clone(),
                        reason: e.to_string(),
                    };
                    return Some((Err(err), st));
                }
            }
        }

        let next = st.inner.as_mut()?.next().await;
        if !st.flag.is_enabled() {
            return None;
        }

        match next {
            Some(Ok(line)) => Some((Ok(line), st)),
            Some(Err(e)) => {
                st.done = true;
                let err = Error::StreamingInterrupted {
                    service: st.service.clone(),
                    reason: e.to_string(),
                };
                Some((Err(err), st))
            }
            None => None,
        }
    })
    .boxed())
}

//! Minimal Docker Engine API access over the daemon's unix socket.
//!
//! Only used where the CLI cannot give us raw data (statistics samples).

use super::DockerError;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::net::UnixStream;

#[derive(Deserialize)]
struct EngineMessage {
    message: String,
}

/// GET `path` from the Engine API and decode the JSON body.
///
/// A 404 is reported as [`DockerError::ContainerNotFound`] for `subject`.
pub(crate) async fn get_json<T: DeserializeOwned>(
    socket: &Path,
    path: &str,
    subject: &str,
    timeout: Duration,
) -> Result<T, DockerError> {
    let (status, body) = tokio::time::timeout(timeout, get(socket, path))
        .await
        .map_err(|_| DockerError::timeout(format!("GET {}", path), timeout))??;

    if status == StatusCode::NOT_FOUND {
        return Err(DockerError::ContainerNotFound {
            container: subject.to_string(),
        });
    }
    if !status.is_success() {
        let message = serde_json::from_slice::<EngineMessage>(&body)
            .map(|m| m.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).trim().to_string());
        return Err(DockerError::engine(
            path,
            format!("daemon returned {}: {}", status, message),
        ));
    }

    serde_json::from_slice(&body).map_err(|e| DockerError::engine(path, e))
}

async fn get(socket: &Path, path: &str) -> Result<(StatusCode, Bytes), DockerError> {
    let stream = UnixStream::connect(socket).await.map_err(|e| {
        tracing::debug!("Failed to connect to {}: {}", socket.display(), e);
        DockerError::DaemonUnavailable
    })?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| DockerError::engine(path, e))?;

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("Engine connection error: {}", e);
        }
    });

    let request = Request::builder()
        .method(Method::GET)
        .uri(path)
        .header("Host", "localhost")
        .body(Full::new(Bytes::new()))
        .map_err(|e| DockerError::engine(path, e))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| DockerError::engine(path, e))?;

    let status = response.status();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|e| DockerError::engine(path, e))?
        .to_bytes();

    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StatsSample;

    #[tokio::test]
    async fn missing_socket_is_daemon_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("docker.sock");
        let result: Result<StatsSample, _> = get_json(
            &socket,
            "/containers/abc/stats?stream=false",
            "abc",
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(DockerError::DaemonUnavailable)));
    }
}

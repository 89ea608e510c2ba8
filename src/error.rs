// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    #[diagnostic(
        code(mctl::config::error),
        help("Check mission-control.yaml or pass --config explicitly")
    )]
    Config(String),

    #[error("No container found for service '{service}'{}",
        .reference.as_ref().map(|r| format!(" (last known container {})", r)).unwrap_or_default()
    )]
    #[diagnostic(
        code(mctl::container::not_found),
        help("The container was removed outside mission-control. Its state has been cleared; start the service again")
    )]
    ContainerNotFound {
        service: String,
        reference: Option<String>,
    },

    #[error("Image '{image}' not found")]
    #[diagnostic(
        code(mctl::image::not_found),
        help("Check the image name and tag, and that the registry is reachable with `docker pull {image}`")
    )]
    ImageNotFound { image: String },

    #[error("Runtime API error: {0}")]
    #[diagnostic(
        code(mctl::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    RuntimeApi(DockerError),

    #[error("Streaming interrupted for service '{service}': {reason}")]
    #[diagnostic(code(mctl::stream::interrupted))]
    StreamingInterrupted { service: String, reason: String },

    #[error("Service not found: {0}")]
    #[diagnostic(
        code(mctl::service::not_found),
        help("List known services with `mctl list`")
    )]
    ServiceNotFound(String),

    #[error("Not authenticated")]
    #[diagnostic(code(mctl::session::unauthenticated))]
    Unauthenticated,

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Database error: {0}")]
    #[diagnostic(
        code(mctl::database::error),
        help("See recovery suggestions based on the specific error type")
    )]
    Database(#[from] tokio_rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<DockerError> for Error {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::ImageNotFound { image } => Error::ImageNotFound { image },
            other => Error::RuntimeApi(other),
        }
    }
}

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::ServiceNotFound(_) => {
                Some("List known services with: mctl list".to_string())
            }
            Error::ContainerNotFound { service, .. } => Some(format!(
                "The container for '{}' no longer exists. Start it again with: mctl start <id>",
                service
            )),
            Error::ImageNotFound { image } => Some(format!(
                "Verify the image exists and is reachable: docker pull {}",
                image
            )),
            Error::RuntimeApi(DockerError::DaemonUnavailable) => Some(
                "The Docker daemon is not responding. Start it and retry.".to_string(),
            ),
            Error::RuntimeApi(_) => Some("Check that Docker is running: docker ps".to_string()),
            Error::Config(msg) if msg.contains("Could not find") => Some(
                "Create mission-control.yaml in this directory or pass --config <path>".to_string(),
            ),
            Error::Database(e) => {
                // tokio_rusqlite wraps the underlying rusqlite error opaquely,
                // so the message is all there is to match on.
                let err_str = e.to_string();
                if err_str.contains("database is locked") || err_str.contains("SQLITE_BUSY") {
                    Some(
                        "Another mctl instance may be holding the database. Stop it and retry."
                            .to_string(),
                    )
                } else if err_str.contains("database disk image is malformed")
                    || err_str.contains("SQLITE_CORRUPT")
                {
                    Some(
                        "Database corrupted. Remove it and re-seed with: mctl seed".to_string(),
                    )
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }

    /// True for errors that stem from the runtime transport rather than from
    /// the request itself.
    pub fn is_runtime(&self) -> bool {
        matches!(self, Error::RuntimeApi(_))
    }
}

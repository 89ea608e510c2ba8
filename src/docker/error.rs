use std::fmt;
use std::time::Duration;

/// Structured error type for container runtime operations.
///
/// CLI failures are classified from `docker`'s stderr into machine-actionable
/// variants so callers can tell "gone" from "broken".
#[derive(Debug)]
pub enum DockerError {
    /// Docker command timed out.
    Timeout { command: String, timeout: Duration },

    /// Docker command ran but returned non-zero exit.
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Docker binary couldn't be executed (not in PATH, permission denied).
    ExecFailed {
        command: String,
        source: std::io::Error,
    },

    /// Container doesn't exist (parsed from "No such container" stderr).
    ContainerNotFound { container: String },

    /// Image or tag doesn't exist locally or in the registry.
    ImageNotFound { image: String },

    /// Docker daemon not responding.
    DaemonUnavailable,

    /// Engine API request over the daemon socket failed.
    Engine { path: String, reason: String },

    /// Docker produced output we could not interpret.
    Parse { command: String, reason: String },
}

impl DockerError {
    /// Create a timeout error.
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        DockerError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Create a command-failed error from an `std::process::Output`.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr,
            exit_code: output.status.code(),
        }
    }

    /// Create a command-failed error from a stderr string and optional exit code.
    pub fn cmd_failed(
        cmd: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Create an exec-failed error (binary not found / permission denied).
    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        DockerError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    pub fn parse(cmd: impl Into<String>, reason: impl Into<String>) -> Self {
        DockerError::Parse {
            command: cmd.into(),
            reason: reason.into(),
        }
    }

    pub fn engine(path: impl Into<String>, reason: impl ToString) -> Self {
        DockerError::Engine {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Classify a failed command by its stderr.
    ///
    /// `subject` is the container or image the command was about; it lands in
    /// the not-found variants.
    pub fn classify(cmd: impl Into<String>, subject: &str, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Self::classify_stderr(cmd, subject, stderr.trim(), output.status.code())
    }

    pub(crate) fn classify_stderr(
        cmd: impl Into<String>,
        subject: &str,
        stderr: &str,
        exit_code: Option<i32>,
    ) -> Self {
        let lower = stderr.to_lowercase();
        if lower.contains("no such container") {
            return DockerError::ContainerNotFound {
                container: subject.to_string(),
            };
        }
        if lower.contains("manifest unknown")
            || lower.contains("pull access denied")
            || lower.contains("no such image")
            || lower.contains("repository does not exist")
            || (lower.contains("manifest for") && lower.contains("not found"))
        {
            return DockerError::ImageNotFound {
                image: subject.to_string(),
            };
        }
        if lower.contains("cannot connect to the docker daemon")
            || lower.contains("is the docker daemon running")
        {
            return DockerError::DaemonUnavailable;
        }
        DockerError::cmd_failed(cmd, stderr, exit_code)
    }

    /// Whether retrying the same call could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DockerError::Timeout { .. } | DockerError::DaemonUnavailable | DockerError::Engine { .. }
        )
    }

    pub fn is_container_not_found(&self) -> bool {
        matches!(self, DockerError::ContainerNotFound { .. })
    }
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerError::Timeout { command, timeout } => {
                write!(
                    f,
                    "Timed out running '{}' (exceeded {} seconds)",
                    command,
                    timeout.as_secs()
                )
            }
            DockerError::CommandFailed {
                command,
                stderr,
                exit_code,
            } => {
                if let Some(code) = exit_code {
                    write!(f, "'{}' failed (exit code {}): {}", command, code, stderr)
                } else {
                    write!(f, "'{}' failed: {}", command, stderr)
                }
            }
            DockerError::ExecFailed { command, source } => {
                write!(f, "Failed to execute '{}': {}", command, source)
            }
            DockerError::ContainerNotFound { container } => {
                write!(f, "No such container: {}", container)
            }
            DockerError::ImageNotFound { image } => {
                write!(f, "No such image: {}", image)
            }
            DockerError::DaemonUnavailable => {
                write!(f, "Docker daemon is not responding")
            }
            DockerError::Engine { path, reason } => {
                write!(f, "Engine API request '{}' failed: {}", path, reason)
            }
            DockerError::Parse { command, reason } => {
                write!(f, "Could not parse output of '{}': {}", command, reason)
            }
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

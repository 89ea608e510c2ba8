use super::Settings;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings file name looked up in the current directory and its parents.
pub const CONFIG_FILE_NAME: &str = "mission-control.yaml";
const ALT_CONFIG_FILE_NAME: &str = "mission-control.yml";

/// Settings plus the file they came from, if any.
#[derive(Debug, Clone, Default)]
pub struct LoadedSettings {
    pub settings: Settings,
    pub path: Option<PathBuf>,
}

impl LoadedSettings {
    /// Directory relative paths in the settings resolve against.
    pub fn base_dir(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }
}

/// Walk up from `dir` looking for the settings file.
pub fn find_config_in_dir(dir: &Path) -> Option<PathBuf> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.is_file() {
        return Some(config_path);
    }

    let alt_path = dir.join(ALT_CONFIG_FILE_NAME);
    if alt_path.is_file() {
        return Some(alt_path);
    }

    dir.parent().and_then(find_config_in_dir)
}

pub fn load_settings(path: impl AsRef<Path>) -> Result<Settings> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| {
        Error::Config(format!(
            "Failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let settings = parse_settings(&content)?;
    tracing::debug!(path = %path.display(), services = settings.services.len(), "Loaded settings");
    Ok(settings)
}

/// Parse and validate settings from YAML. An empty document is the default
/// settings.
pub fn parse_settings(content: &str) -> Result<Settings> {
    let settings: Settings = if content.trim().is_empty() {
        Settings::default()
    } else {
        serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
    };
    settings.validate()?;
    Ok(settings)
}

/// Load an explicit settings file, or discover one from the current
/// directory. With neither, defaults apply.
pub fn resolve(explicit: Option<&Path>) -> Result<LoadedSettings> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Could not find config file '{}'",
                path.display()
            )));
        }
        return Ok(LoadedSettings {
            settings: load_settings(path)?,
            path: Some(path.to_path_buf()),
        });
    }

    let current_dir = std::env::current_dir()?;
    match find_config_in_dir(&current_dir) {
        Some(path) => Ok(LoadedSettings {
            settings: load_settings(&path)?,
            path: Some(path),
        }),
        None => {
            tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
            Ok(LoadedSettings::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_full_document() {
        let yaml = r#"
database:
  path: data/mc.db
docker:
  binary: podman
  command_timeout: 10s
streaming:
  stats_interval: 2s
services:
  - name: proxy
    type: web-proxy
    is_daemon: true
    image_name: nginx
    ports:
      - container_port: 80
        host_port: 8080
    healthcheck:
      test: curl -f http://localhost
"#;
        let settings = parse_settings(yaml).unwrap();
        assert_eq!(settings.docker.binary, "podman");
        assert_eq!(settings.docker.pull_timeout, "10m");
        assert_eq!(settings.services.len(), 1);
        let proxy = &settings.services[0];
        assert!(proxy.is_daemon);
        assert_eq!(proxy.image_tag, "latest");
        assert_eq!(proxy.ports[0].host_port, 8080);
        assert_eq!(proxy.healthcheck.as_ref().unwrap().retries, 3);
    }

    #[test]
    fn empty_document_is_default() {
        let settings = parse_settings("").unwrap();
        assert!(settings.services.is_empty());
        assert_eq!(settings.docker.binary, "docker");
    }

    #[test]
    fn unknown_sections_are_rejected() {
        let err = parse_settings("dockr:\n  binary: docker\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn finds_config_in_parent_directory() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join(CONFIG_FILE_NAME), "services: []\n").unwrap();

        let found = find_config_in_dir(&nested).unwrap();
        assert_eq!(found, temp.path().join(CONFIG_FILE_NAME));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = resolve(Some(&temp.path().join("nope.yaml"))).unwrap_err();
        assert!(err.to_string().contains("Could not find"));
    }

    #[test]
    fn explicit_file_sets_base_dir() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("custom.yaml");
        std::fs::write(&path, "database:\n  path: mc.db\n").unwrap();

        let loaded = resolve(Some(&path)).unwrap();
        assert_eq!(loaded.base_dir(), Some(temp.path()));
        assert_eq!(
            loaded.settings.database_path(loaded.base_dir(), None),
            temp.path().join("mc.db")
        );
    }
}

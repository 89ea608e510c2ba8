use crate::output::UserOutput;
use mission_control::config::{self, CONFIG_FILE_NAME};
use std::path::Path;

pub fn run_validate(config_path: Option<&Path>, out: &dyn UserOutput) -> anyhow::Result<()> {
    let loaded = config::resolve(config_path)?;

    match &loaded.path {
        Some(path) => out.success(&format!("{} is valid", path.display())),
        None => {
            out.warning(&format!(
                "No {} found in {} or any parent; defaults apply",
                CONFIG_FILE_NAME,
                std::env::current_dir()?.display()
            ));
        }
    }

    let settings = &loaded.settings;
    let timeouts = settings.docker_timeouts()?;
    out.status(&format!(
        "Docker: {} (command {:?}, pull {:?}, stop {:?})",
        settings.docker.binary, timeouts.command, timeouts.pull, timeouts.stop
    ));
    out.status(&format!(
        "Database: {}",
        settings.database_path(loaded.base_dir(), None).display()
    ));

    out.status(&format!("Services: {}", settings.services.len()));
    for spec in &settings.services {
        let mut flags = Vec::new();
        if spec.is_daemon {
            flags.push("daemon");
        }
        if spec.is_disabled {
            flags.push("disabled");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        out.status(&format!(
            "  - {} ({}:{}){}",
            spec.name, spec.image_name, spec.image_tag, flags
        ));
    }
    Ok(())
}

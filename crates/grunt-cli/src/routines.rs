//! Routine files: `<dir>/<name>.yaml` holding a `tasks:` list.

use anyhow::{bail, Context};
use grunt_client::RoutineTask;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct RoutineFile {
    #[serde(default)]
    tasks: Vec<RoutineTask>,
}

/// Path of routine `name`, preferring `.yaml` over `.yml`.
pub fn routine_path(dir: &Path, name: &str) -> PathBuf {
    let yaml = dir.join(format!("{}.yaml", name));
    if yaml.exists() {
        return yaml;
    }
    let yml = dir.join(format!("{}.yml", name));
    if yml.exists() {
        yml
    } else {
        yaml
    }
}

pub fn load_routine(dir: &Path, name: &str) -> anyhow::Result<Vec<RoutineTask>> {
    if name.is_empty() || name.contains(['/', '\\']) {
        bail!("Invalid routine name '{}'", name);
    }

    let path = routine_path(dir, name);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read routine file {}", path.display()))?;
    parse_routine(&contents).with_context(|| format!("Invalid routine file {}", path.display()))
}

pub fn parse_routine(contents: &str) -> anyhow::Result<Vec<RoutineTask>> {
    let file: RoutineFile = serde_yaml::from_str(contents)?;
    Ok(file.tasks)
}

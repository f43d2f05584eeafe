//! Partition-specific directives.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{SubmitError, SubmitResult};
use crate::settings::{ConfigDir, Settings};

/// Comma-separated nodes to exclude, when the resolved partition has an
/// exclusion file.
///
/// A relative file path is taken relative to the configuration directory.
/// A missing file disables exclusion.
pub fn node_exclusions(settings: &Settings, config_dir: &ConfigDir) -> SubmitResult<Option<String>> {
    if settings.partition != settings.node_exclude_partition {
        return Ok(None);
    }
    let Some(ref file) = settings.node_exclude_file else {
        return Ok(None);
    };

    let path = config_dir.root().join(Path::new(file));
    if !path.is_file() {
        debug!("Node exclude file {} not found", path.display());
        return Ok(None);
    }

    let text = fs::read_to_string(&path).map_err(|e| SubmitError::io(&path, e))?;
    let nodes: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if nodes.is_empty() {
        return Ok(None);
    }
    Ok(Some(nodes.join(",")))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::settings::{MemoryUnit, SettingsLayer};

    fn settings(text: &str) -> Settings {
        let layer = SettingsLayer::from_toml(text, Path::new("t.toml")).unwrap();
        Settings::from_layer(layer, MemoryUnit::WholeGb).unwrap()
    }

    #[test]
    fn test_exclusions_joined_for_matching_partition() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("exclude.txt"), "node01\n\n  node07 \n").unwrap();
        let config = ConfigDir::new(dir.path());

        let matching = settings("[node_exclude]\nfile = \"exclude.txt\"\n");
        assert_eq!(
            node_exclusions(&matching, &config).unwrap().as_deref(),
            Some("node01,node07")
        );

        let other = settings("[partition]\ndefault = \"gpu\"\n[node_exclude]\nfile = \"exclude.txt\"\n");
        assert_eq!(node_exclusions(&other, &config).unwrap(), None);
    }

    #[test]
    fn test_missing_file_disables_exclusion() {
        let dir = TempDir::new().unwrap();
        let config = ConfigDir::new(dir.path());
        let settings = settings("[node_exclude]\nfile = \"gone.txt\"\n");
        assert_eq!(node_exclusions(&settings, &config).unwrap(), None);
    }
}

//! Debian family: writes a `policy-rc.d`-style file that denies
//! service starts with exit code 101, per §4.6 step 5.

use std::fs;
use std::os::unix::fs::PermissionsExt;

use anyhow::{Context as _, Result};
use camino::Utf8Path;

use super::DistroFamily;
use crate::config::PluginConfig;

const DEFAULT_POLICY_CONTENT: &str = "#!/bin/sh\nexit 101\n";

#[derive(Debug, Default)]
pub struct DebianFamily;

impl DistroFamily for DebianFamily {
    fn deactivate(&self, root: &Utf8Path, config: &PluginConfig) -> Result<()> {
        let path = policy_path(root, config);
        let content = config
            .get_str("policy_file_content")
            .unwrap_or_else(|| DEFAULT_POLICY_CONTENT.to_string());
        let mode = config.get_mode("policy_file_mode", 0o755);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {parent}"))?;
        }
        fs::write(&path, content).with_context(|| format!("writing {path}"))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).with_context(|| format!("chmod {path}"))?;
        tracing::debug!("wrote policy-rc.d denial file at {path}");
        Ok(())
    }

    fn reactivate(&self, root: &Utf8Path, config: &PluginConfig) -> Result<()> {
        let path = policy_path(root, config);
        if path.is_file() {
            fs::remove_file(&path).with_context(|| format!("removing {path}"))?;
            tracing::debug!("removed policy-rc.d denial file at {path}");
        }
        Ok(())
    }
}

fn policy_path(root: &Utf8Path, config: &PluginConfig) -> camino::Utf8PathBuf {
    let name = config
        .get_str("policy_file_name")
        .unwrap_or_else(|| "policy-rc.d".to_string());
    root.join(config.get_str("policy_file_path").unwrap_or_else(|| "usr/sbin".to_string()))
        .join(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn deactivate_then_reactivate_round_trips() {
        let dir = tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        let config = PluginConfig::default();
        let family = DebianFamily;

        family.deactivate(root, &config).unwrap();
        let path = policy_path(root, &config);
        assert!(path.is_file());
        let meta = fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o755);

        family.reactivate(root, &config).unwrap();
        assert!(!path.exists());
    }
}

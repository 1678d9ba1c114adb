use anyhow::{Context as _, Result};
use gator_utils::run;

use super::ProvisionerFamily;
use crate::config::PluginConfig;

#[derive(Debug, Default)]
pub struct AptFamily;

impl ProvisionerFamily for AptFamily {
    fn refresh_repo_metadata(&self, _config: &PluginConfig) -> Result<()> {
        let result = run(vec!["apt-get".to_string(), "update".to_string()]).context("running apt-get update")?;
        anyhow::ensure!(result.success, "apt-get update failed: {}", result.stderr_str());
        Ok(())
    }

    fn install_package(&self, pkg_arg: &str, local_install: bool, _config: &PluginConfig) -> Result<()> {
        if local_install {
            let result = run(vec!["dpkg".to_string(), "-i".to_string(), pkg_arg.to_string()])
                .context("running dpkg -i")?;
            if !result.success {
                tracing::warn!("dpkg -i reported unmet dependencies, repairing via apt-get install -f");
                let fix = run(vec!["apt-get".to_string(), "install".to_string(), "-y".to_string(), "-f".to_string()])
                    .context("running apt-get install -f")?;
                anyhow::ensure!(fix.success, "dependency repair failed: {}", fix.stderr_str());
            }
        } else {
            let result = run(vec!["apt-get".to_string(), "install".to_string(), "-y".to_string(), pkg_arg.to_string()])
                .context("running apt-get install")?;
            anyhow::ensure!(result.success, "apt-get install {pkg_arg} failed: {}", result.stderr_str());
        }
        Ok(())
    }

    fn query_package(&self, pkg_name: &str, config: &PluginConfig) -> Result<String> {
        let fmt = config
            .get_str("pkg_query_format")
            .unwrap_or_else(|| "name:${Package}\\nversion:${Version}\\narchitecture:${Architecture}\\n".to_string());
        let result = run(vec!["dpkg-query".to_string(), "-W".to_string(), "-f".to_string(), fmt, pkg_name.to_string()])
            .context("running dpkg-query")?;
        anyhow::ensure!(result.success, "dpkg-query {pkg_name} failed: {}", result.stderr_str());
        Ok(result.stdout_str())
    }
}

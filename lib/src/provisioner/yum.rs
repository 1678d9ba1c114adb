use anyhow::{Context as _, Result};
use gator_utils::run;

use super::ProvisionerFamily;
use crate::config::PluginConfig;

#[derive(Debug, Default)]
pub struct YumFamily;

impl ProvisionerFamily for YumFamily {
    fn refresh_repo_metadata(&self, config: &PluginConfig) -> Result<()> {
        let enabled = config.get_str_list("enable_repos").join(",");
        let enabled = if enabled.is_empty() { "*".to_string() } else { enabled };
        let result = run(vec![
            "yum".to_string(),
            "clean".to_string(),
            "metadata".to_string(),
            "--disablerepo=*".to_string(),
            format!("--enablerepo={enabled}"),
        ])
        .context("running yum clean metadata")?;
        anyhow::ensure!(result.success, "yum clean metadata failed: {}", result.stderr_str());
        Ok(())
    }

    fn install_package(&self, pkg_arg: &str, local_install: bool, _config: &PluginConfig) -> Result<()> {
        let cmd = if local_install {
            vec!["yum".to_string(), "localinstall".to_string(), "-y".to_string(), pkg_arg.to_string()]
        } else {
            vec!["yum".to_string(), "install".to_string(), "-y".to_string(), pkg_arg.to_string()]
        };
        let result = run(cmd).context("running yum install")?;
        anyhow::ensure!(result.success, "yum install {pkg_arg} failed: {}", result.stderr_str());
        Ok(())
    }

    fn query_package(&self, pkg_name: &str, config: &PluginConfig) -> Result<String> {
        let fmt = config
            .get_str("pkg_query_format")
            .unwrap_or_else(|| "name:%{NAME}\\nversion:%{VERSION}\\nrelease:%{RELEASE}\\narchitecture:%{ARCH}\\n".to_string());
        let result = run(vec!["rpm".to_string(), "-q".to_string(), "--qf".to_string(), fmt, pkg_name.to_string()])
            .context("running rpm -q")?;
        anyhow::ensure!(result.success, "rpm -q {pkg_name} failed: {}", result.stderr_str());
        Ok(result.stdout_str())
    }
}

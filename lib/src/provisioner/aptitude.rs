//! The Aptitude variant of the Apt family (§4.7 step 3): after `dpkg
//! -i`, dependencies are resolved via `aptitude install name=version`,
//! then the installed state is double-checked against what was
//! requested — a mismatch is unrecoverable, not a transient failure.

use anyhow::{Context as _, Result};
use gator_utils::run;

use super::apt::AptFamily;
use super::ProvisionerFamily;
use crate::config::PluginConfig;
use crate::error::ProvisionError;

#[derive(Debug, Default)]
pub struct AptitudeFamily {
    inner: AptFamily,
}

impl ProvisionerFamily for AptitudeFamily {
    fn refresh_repo_metadata(&self, config: &PluginConfig) -> Result<()> {
        self.inner.refresh_repo_metadata(config)
    }

    fn install_package(&self, pkg_arg: &str, local_install: bool, config: &PluginConfig) -> Result<()> {
        if !local_install {
            return self.inner.install_package(pkg_arg, local_install, config);
        }
        let result = run(vec!["dpkg".to_string(), "-i".to_string(), pkg_arg.to_string()]).context("running dpkg -i")?;
        if !result.success {
            tracing::debug!("dpkg -i left unmet dependencies, resolving via aptitude install");
        }
        let (name, version) = split_name_version(pkg_arg);
        let spec = match version {
            Some(v) => format!("{name}={v}"),
            None => name.to_string(),
        };
        let result = run(vec!["aptitude".to_string(), "install".to_string(), "-y".to_string(), spec.clone()])
            .context("running aptitude install")?;
        anyhow::ensure!(result.success, "aptitude install {spec} failed: {}", result.stderr_str());
        Ok(())
    }

    fn query_package(&self, pkg_name: &str, config: &PluginConfig) -> Result<String> {
        self.inner.query_package(pkg_name, config)
    }

    fn verify_install(&self, pkg_arg: &str, _config: &PluginConfig) -> Result<()> {
        let (name, requested_version) = split_name_version(pkg_arg);
        let Some(requested_version) = requested_version else {
            return Ok(());
        };
        let result = run(vec![
            "dpkg-query".to_string(),
            "-W".to_string(),
            "-f".to_string(),
            "${Status}\\t${Version}".to_string(),
            name.to_string(),
        ])
        .context("running dpkg-query for verification")?;
        anyhow::ensure!(result.success, "dpkg-query {name} failed during verification");

        check_installed_version(&result.stdout_str(), requested_version)
    }
}

fn split_name_version(pkg_arg: &str) -> (&str, Option<&str>) {
    match pkg_arg.split_once('=') {
        Some((name, version)) => (name, Some(version)),
        None => (pkg_arg, None),
    }
}

/// Compare `dpkg-query -W -f "${Status}\t${Version}"`'s raw stdout
/// against the requested version (§4.7 step 3, §8 scenario 3).
fn check_installed_version(stdout: &str, requested_version: &str) -> Result<()> {
    let (status, installed_version) = stdout.split_once('\t').unwrap_or((stdout, ""));
    let installed_version = installed_version.trim();
    if status.trim() != "install ok installed" || installed_version != requested_version {
        return Err(ProvisionError::PackageInstallMismatch {
            requested: requested_version.to_string(),
            installed: installed_version.to_string(),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_name_version_handles_both_forms() {
        assert_eq!(split_name_version("foo=1.2.3"), ("foo", Some("1.2.3")));
        assert_eq!(split_name_version("foo"), ("foo", None));
    }

    #[test]
    fn check_installed_version_accepts_a_matching_version() {
        check_installed_version("install ok installed\t2.4.58", "2.4.58").unwrap();
    }

    #[test]
    fn check_installed_version_rejects_a_version_mismatch() {
        let err = check_installed_version("install ok installed\t2.4.57", "2.4.58").unwrap_err();
        let mismatch = err.downcast_ref::<ProvisionError>().expect("ProvisionError");
        match mismatch {
            ProvisionError::PackageInstallMismatch { requested, installed } => {
                similar_asserts::assert_eq!(requested, "2.4.58");
                similar_asserts::assert_eq!(installed, "2.4.57");
            }
            other => panic!("expected PackageInstallMismatch, got {other:?}"),
        }
    }

    #[test]
    fn check_installed_version_rejects_a_not_fully_installed_status() {
        let err = check_installed_version("deinstall ok config-files\t2.4.58", "2.4.58").unwrap_err();
        assert!(err.downcast_ref::<ProvisionError>().is_some());
    }
}

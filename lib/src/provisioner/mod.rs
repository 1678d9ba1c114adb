//! The Provisioner stage (§4.7): refreshes package-manager metadata,
//! installs the single requested package, and records its attributes.
//! Runs entirely inside the chroot the Distro stage already entered.

pub mod apt;
pub mod aptitude;
pub mod yum;

use anyhow::Result;

use crate::config::PluginConfig;
use crate::context::Context;
use crate::error::{GatorError, ProvisionError};
use crate::linux::parse_keyval;
use crate::metrics::Metrics;

pub trait Provisioner: std::fmt::Debug {
    fn provision(&mut self, ctx: &mut Context, metrics: &dyn Metrics) -> Result<bool>;
}

/// The package-manager-family-specific quarter of provisioning (§4.7
/// steps 1-3). Step 4, metadata collection, is shared by all families
/// via [`GenericProvisioner::store_package_metadata`] and the family's
/// [`query_package`][ProvisionerFamily::query_package] hook.
pub trait ProvisionerFamily: std::fmt::Debug {
    fn refresh_repo_metadata(&self, config: &PluginConfig) -> Result<()>;

    fn install_package(&self, pkg_arg: &str, local_install: bool, config: &PluginConfig) -> Result<()>;

    /// Run the family's metadata query for the installed package and
    /// return its raw key/value stdout for [`parse_keyval`].
    fn query_package(&self, pkg_name: &str, config: &PluginConfig) -> Result<String>;

    /// Aptitude-only post-install double-check (§4.7 step 3); every
    /// other family accepts the install unconditionally.
    fn verify_install(&self, _pkg_arg: &str, _config: &PluginConfig) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct GenericProvisioner<F: ProvisionerFamily> {
    pub config: PluginConfig,
    pub family: F,
}

impl<F: ProvisionerFamily> GenericProvisioner<F> {
    pub fn new(config: PluginConfig, family: F) -> Self {
        Self { config, family }
    }

    fn store_package_metadata(&self, ctx: &mut Context) -> Result<()> {
        let pkg_name = package_query_name(&ctx.package.arg, ctx.package.local_install);
        let stdout = self.family.query_package(&pkg_name, &self.config)?;
        let expected = self.config.get_str_list("pkg_attributes");
        let record_sep = self.config.get_str("record_sep").unwrap_or_else(|| "\n".to_string());
        let field_sep = self.config.get_str("field_sep").unwrap_or_else(|| ":".to_string());
        let attributes = parse_keyval(
            &stdout,
            record_sep.chars().next().unwrap_or('\n'),
            field_sep.chars().next().unwrap_or(':'),
            &expected,
        );
        ctx.package.attributes = attributes;
        Ok(())
    }
}

/// The package-manager query needs the bare package name, not a local
/// file path: a local install's query target is whatever name the
/// operator also supplied via `context.package.attributes`-seeding
/// config, defaulting to the file stem.
fn package_query_name(arg: &str, local_install: bool) -> String {
    if !local_install {
        return arg.to_string();
    }
    std::path::Path::new(arg)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(arg)
        .to_string()
}

impl<F: ProvisionerFamily> Provisioner for GenericProvisioner<F> {
    fn provision(&mut self, ctx: &mut Context, metrics: &dyn Metrics) -> Result<bool> {
        let refresh = metrics.time("provisioner.refresh_repo_metadata", || {
            self.family.refresh_repo_metadata(&self.config)
        });
        if let Err(e) = refresh {
            tracing::error!("refreshing repo metadata failed: {e}");
            return Ok(false);
        }

        let arg = ctx.package.arg.clone();
        let local_install = ctx.package.local_install;
        let install = metrics.time("provisioner.provision_package", || {
            self.family.install_package(&arg, local_install, &self.config)
        });
        if let Err(e) = install {
            tracing::error!("installing package {arg} failed: {e}");
            return Ok(false);
        }

        match self.family.verify_install(&arg, &self.config) {
            Ok(()) => {}
            Err(e) => {
                if let Some(mismatch) = e.downcast_ref::<ProvisionError>() {
                    tracing::error!("package install mismatch: {mismatch}");
                } else {
                    tracing::error!("post-install verification failed: {e}");
                }
                return Ok(false);
            }
        }

        let metadata = metrics.time("provisioner.store_package_metadata", || self.store_package_metadata(ctx));
        if let Err(e) = metadata {
            tracing::error!("storing package metadata failed: {e}");
            return Err(GatorError::Provision(ProvisionError::Generic(e.to_string())).into());
        }

        Ok(true)
    }
}

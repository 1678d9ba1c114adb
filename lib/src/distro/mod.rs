//! The Distro stage (§4.6): mounts the working volume, binds `/proc`
//! `/sys` `/dev`, suppresses service starts inside the chroot, and
//! tears all of it down in strict reverse order on exit.

pub mod debian;
pub mod redhat;

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};

use crate::config::PluginConfig;
use crate::linux::{self, Chroot, MountSpec};

/// The family-specific half of `_deactivate_provisioning_service_block`
/// (§4.6 step 5): Debian writes a `policy-rc.d`-style denial file,
/// Red Hat is a no-op (service starts are already suppressed by the
/// short-circuited init helpers).
pub trait DistroFamily: std::fmt::Debug {
    fn deactivate(&self, root: &Utf8Path, config: &PluginConfig) -> Result<()>;
    fn reactivate(&self, root: &Utf8Path, config: &PluginConfig) -> Result<()>;
}

pub trait Distro: std::fmt::Debug {
    /// Mount, bind, short-circuit, chroot; returns the mountpoint so
    /// the Provisioner knows where it's running (informational only,
    /// since the chroot itself changes `/`).
    fn enter(&mut self, volume_dev: &str, build_id: &str) -> Result<Utf8PathBuf>;
    fn exit(&mut self);
}

/// Linux base implementation, generic over the family hook (§4.6).
#[derive(Debug)]
pub struct LinuxDistro {
    pub config: PluginConfig,
    pub volume_dir: Utf8PathBuf,
    family: Box<dyn DistroFamily>,
    mountpoint: Option<Utf8PathBuf>,
    chroot: Option<Chroot>,
}

impl LinuxDistro {
    pub fn new(config: PluginConfig, volume_dir: Utf8PathBuf, family: Box<dyn DistroFamily>) -> Self {
        Self {
            config,
            volume_dir,
            family,
            mountpoint: None,
            chroot: None,
        }
    }

    fn backup_ext(&self) -> String {
        self.config.get_str("backup_ext").unwrap_or_else(|| "_aminator".to_string())
    }

    fn provisioning_helpers(&self) -> Vec<Utf8PathBuf> {
        self.config
            .get_str_list("provisioning_helpers")
            .into_iter()
            .map(Utf8PathBuf::from)
            .collect()
    }

    fn short_circuit_files(&self) -> Vec<String> {
        self.config.get_str_list("short_circuit_files")
    }
}

impl Distro for LinuxDistro {
    fn enter(&mut self, volume_dev: &str, build_id: &str) -> Result<Utf8PathBuf> {
        let mountpoint = self.volume_dir.join(build_id);
        linux::mount(&MountSpec::new(volume_dev, &mountpoint)).context("mounting working volume")?;

        for (dev, mp) in [
            ("/proc", mountpoint.join("proc")),
            ("/sys", mountpoint.join("sys")),
            ("/dev", mountpoint.join("dev")),
        ] {
            linux::mount(&MountSpec::bind(dev, &mp)).with_context(|| format!("bind-mounting {dev}"))?;
        }

        let backup_ext = self.backup_ext();
        linux::install_provision_configs(&self.provisioning_helpers(), &mountpoint, &backup_ext)
            .context("installing provisioning helpers")?;

        let short_circuit_ext = self.config.get_str("short_circuit_ext").unwrap_or_else(|| "aminator".to_string());
        linux::short_circuit_files(&mountpoint, &self.short_circuit_files(), &short_circuit_ext, "/bin/true")
            .context("short-circuiting service-start helpers")?;

        self.family
            .deactivate(&mountpoint, &self.config)
            .context("deactivating provisioning services")?;

        let chroot = Chroot::enter(&mountpoint).context("entering chroot")?;
        self.mountpoint = Some(mountpoint.clone());
        self.chroot = Some(chroot);
        Ok(mountpoint)
    }

    fn exit(&mut self) {
        let Some(mountpoint) = self.mountpoint.take() else {
            return;
        };

        if let Some(mut chroot) = self.chroot.take() {
            if let Err(e) = chroot.leave() {
                tracing::error!("leaving chroot at {mountpoint} failed: {e}");
            }
        }

        if let Err(e) = self.family.reactivate(&mountpoint, &self.config) {
            tracing::error!("reactivating provisioning services failed: {e}");
        }

        let short_circuit_ext = self.config.get_str("short_circuit_ext").unwrap_or_else(|| "aminator".to_string());
        if let Err(e) = linux::rewire_files(&mountpoint, &self.short_circuit_files(), &short_circuit_ext) {
            tracing::error!("rewiring short-circuited commands failed: {e}");
        }

        let backup_ext = self.backup_ext();
        if let Err(e) = linux::remove_provision_configs(&self.provisioning_helpers(), &mountpoint, &backup_ext) {
            tracing::error!("removing provisioning helpers failed: {e}");
        }

        match linux::lifo_mounts(&mountpoint) {
            Ok(mounts) => {
                for mp in mounts {
                    unmount_retrying(&mp);
                }
            }
            Err(e) => tracing::error!("enumerating mounts under {mountpoint} failed: {e}"),
        }
    }
}

fn unmount_retrying(mountpoint: &Utf8Path) {
    let spec = MountSpec::new("", mountpoint);
    for attempt in 0..2 {
        match linux::unmount(&spec, false) {
            Ok(r) if r.success => return,
            Ok(r) => tracing::warn!("unmount of {mountpoint} failed (attempt {attempt}): {}", r.stderr_str()),
            Err(e) => tracing::warn!("unmount of {mountpoint} failed (attempt {attempt}): {e}"),
        }
    }
    match linux::busy_mount(mountpoint) {
        Ok(r) => tracing::error!("mount {mountpoint} still busy after retry:\n{}", r.stdout_str()),
        Err(e) => tracing::error!("mount {mountpoint} still busy after retry, lsof also failed: {e}"),
    }
}

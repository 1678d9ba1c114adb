//! Filesystem/mount utilities backing the Distro stage (§4.6): mount
//! and bind-mount, chroot with a retained handle back to the original
//! root, LIFO mount teardown, provisioning-config backup/restore, and
//! command short-circuiting.

use std::collections::BTreeMap;
use std::fs;
use std::os::fd::AsFd;
use std::os::unix::fs::symlink;

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use gator_utils::{monitor_command, CommandResult};

/// Describes a single mount operation. `fstype == "bind"` is a bind mount.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub dev: Utf8PathBuf,
    pub fstype: Option<String>,
    pub mountpoint: Utf8PathBuf,
    pub options: Option<String>,
}

impl MountSpec {
    pub fn new(dev: impl Into<Utf8PathBuf>, mountpoint: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dev: dev.into(),
            fstype: None,
            mountpoint: mountpoint.into(),
            options: None,
        }
    }

    pub fn bind(dev: impl Into<Utf8PathBuf>, mountpoint: impl Into<Utf8PathBuf>) -> Self {
        Self {
            dev: dev.into(),
            fstype: Some("bind".to_string()),
            mountpoint: mountpoint.into(),
            options: Some("bind".to_string()),
        }
    }
}

/// Mount `spec`, creating the mountpoint directory if needed.
#[context("Mounting {}", spec.mountpoint)]
pub fn mount(spec: &MountSpec) -> Result<CommandResult> {
    let mountpoint = if spec.fstype.as_deref() == Some("bind") && !spec.dev.is_dir() {
        spec.mountpoint
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_else(|| spec.mountpoint.clone())
    } else {
        spec.mountpoint.clone()
    };
    if !mountpoint.is_dir() {
        fs::create_dir_all(&mountpoint).with_context(|| format!("creating mountpoint {mountpoint}"))?;
    }

    let mut cmd = vec!["mount".to_string()];
    if let Some(fstype) = &spec.fstype {
        if fstype == "bind" {
            cmd.push("-o".to_string());
            cmd.push("bind".to_string());
        } else {
            cmd.push("-t".to_string());
            cmd.push(fstype.clone());
        }
    }
    if let Some(options) = &spec.options {
        if spec.fstype.as_deref() != Some("bind") {
            cmd.push("-o".to_string());
            cmd.push(options.clone());
        }
    }
    cmd.push(spec.dev.to_string());
    cmd.push(spec.mountpoint.to_string());
    monitor_command(cmd, None)
}

/// Unmount `spec.mountpoint`.
pub fn unmount(spec: &MountSpec, recursive: bool) -> Result<CommandResult> {
    let mut cmd = vec!["umount".to_string(), "--verbose".to_string()];
    if recursive {
        cmd.push("--recursive".to_string());
    }
    cmd.push(spec.mountpoint.to_string());
    monitor_command(cmd, None)
}

/// `e2fsck` exits 1 when it found and fixed problems; normalize that to success.
pub fn fsck(dev: &str) -> Result<CommandResult> {
    let r = monitor_command(vec!["fsck".to_string(), "-y".to_string(), "-f".to_string(), dev.to_string()], None)?;
    Ok(if !r.success && r.response.status_code == 1 {
        r.force_success()
    } else {
        r
    })
}

pub fn resize2fs(dev: &str) -> Result<CommandResult> {
    monitor_command(vec!["resize2fs".to_string(), dev.to_string()], None)
}

/// `growpart` exits 1 when there's no free space to grow into; exits 2 for real errors.
pub fn growpart(dev: &str, partition: u32) -> Result<CommandResult> {
    let r = monitor_command(
        vec!["growpart".to_string(), dev.to_string(), partition.to_string()],
        None,
    )?;
    Ok(if !r.success && r.response.status_code == 1 {
        r.force_success()
    } else {
        r
    })
}

/// `lsof` filtered to lines that actually mention `mountpoint` (a bind
/// mount of `/dev` otherwise shows handles against `/dev` generically).
pub fn busy_mount(mountpoint: &Utf8Path) -> Result<CommandResult> {
    let lsof = monitor_command(vec!["lsof".to_string(), "-X".to_string(), mountpoint.to_string()], None)?;
    if !lsof.success || lsof.response.stdout.is_empty() {
        return Ok(lsof);
    }
    let stdout = lsof.stdout_str();
    let mut lines = stdout.lines();
    let header = lines.next().unwrap_or_default().to_string();
    let filtered: Vec<&str> = lines.filter(|l| l.contains(mountpoint.as_str())).collect();
    let success = !filtered.is_empty();
    let mut new_out = header;
    for line in &filtered {
        new_out.push('\n');
        new_out.push_str(line);
    }
    Ok(CommandResult {
        success,
        response: gator_utils::Response {
            command: lsof.response.command,
            stderr: lsof.response.stderr,
            stdout: new_out.into_bytes(),
            status_code: lsof.response.status_code,
        },
    })
}

/// A chroot jail that retains an open handle to the pre-chroot root so
/// `exit`/`Drop` can return there. Mirrors the source's `Chroot`
/// context manager; release is explicit via [`Chroot::leave`] so the
/// Distro stage controls ordering precisely (see `DESIGN.md`).
#[derive(Debug)]
pub struct Chroot {
    root_handle: fs::File,
    prior_cwd: std::path::PathBuf,
    entered: bool,
}

impl Chroot {
    #[context("Entering chroot at {path}")]
    pub fn enter(path: &Utf8Path) -> Result<Self> {
        let root_handle = fs::File::open("/").context("opening / for retained root handle")?;
        let prior_cwd = std::env::current_dir().context("getting cwd")?;
        rustix::process::chroot(path.as_str()).with_context(|| format!("chroot({path})"))?;
        rustix::process::chdir("/").context("chdir(/) inside chroot")?;
        tracing::debug!("inside chroot at {path}");
        Ok(Self {
            root_handle,
            prior_cwd,
            entered: true,
        })
    }

    /// Leave the chroot, restoring the original root and working
    /// directory. Idempotent: a second call is a no-op.
    pub fn leave(&mut self) -> Result<()> {
        if !self.entered {
            return Ok(());
        }
        rustix::process::fchdir(self.root_handle.as_fd()).context("fchdir to retained root")?;
        rustix::process::chroot(".").context("chroot(.)")?;
        rustix::process::chdir(&self.prior_cwd)
            .with_context(|| format!("restoring cwd to {}", self.prior_cwd.display()))?;
        self.entered = false;
        tracing::debug!("left chroot");
        Ok(())
    }
}

/// Mount points at or beneath `root`, in the reverse order they appear
/// in `/proc/mounts` (i.e. the order they should be unmounted in).
pub fn lifo_mounts(root: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let text = fs::read_to_string("/proc/mounts").context("reading /proc/mounts")?;
    let root_str = root.as_str();
    let entries: Vec<&str> = text
        .lines()
        .filter_map(|line| line.split(' ').nth(1))
        .filter(|mp| *mp == root_str || mp.starts_with(&format!("{root_str}/")))
        .collect();
    let mut entries: Vec<Utf8PathBuf> = entries.into_iter().map(Utf8PathBuf::from).collect();
    entries.reverse();
    Ok(entries)
}

/// Scrub the sanitized-metadata characters. Re-exported here for
/// distro-side callers; the canonical definition lives in `gator_utils`.
pub use gator_utils::sanitize_name;

/// Copy `src` from the host into the chroot root at `dstpath`, backing
/// up anything it would overwrite by appending `backup_ext`. Returns
/// `Ok(true)` even when `src` doesn't exist on the host (matching the
/// source's "missing provisioning helper is not fatal" behavior), and
/// `Ok(false)` only... actually never: failures are surfaced as `Err`.
#[context("Installing provision config {src} into {dstpath}")]
pub fn install_provision_config(src: &Utf8Path, dstpath: &Utf8Path, backup_ext: &str) -> Result<()> {
    if !src.is_file() && !src.is_dir() {
        tracing::warn!("provisioning helper {src} not found on host, skipping");
        return Ok(());
    }
    let dst = join_stripped(dstpath, src);
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {parent}"))?;
    }
    if dst.exists() || dst.is_symlink() {
        backup(&dst, backup_ext)?;
    }
    if src.is_dir() {
        copy_dir_recursive(src.as_std_path(), dst.as_std_path())
            .with_context(|| format!("copying directory {src} to {dst}"))?;
    } else {
        fs::copy(src, &dst).with_context(|| format!("copying {src} to {dst}"))?;
    }
    tracing::debug!("{src} copied into {dstpath}");
    Ok(())
}

pub fn install_provision_configs(files: &[Utf8PathBuf], dstpath: &Utf8Path, backup_ext: &str) -> Result<()> {
    for file in files {
        install_provision_config(file, dstpath, backup_ext)?;
    }
    Ok(())
}

fn backup(dst: &Utf8Path, backup_ext: &str) -> Result<()> {
    let backup = Utf8PathBuf::from(format!("{dst}{backup_ext}"));
    tracing::debug!("making backup of {dst}");
    if dst.is_dir() {
        match fs::rename(dst, &backup) {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                copy_dir_recursive(dst.as_std_path(), backup.as_std_path())?;
                fs::remove_dir_all(dst)?;
            }
            Err(e) => return Err(e).with_context(|| format!("renaming {dst} to {backup}")),
        }
    } else if dst.is_symlink() {
        let target = fs::read_link(dst).with_context(|| format!("reading link {dst}"))?;
        match fs::rename(dst, &backup) {
            Ok(()) => {}
            Err(e) if is_cross_device(&e) => {
                fs::remove_file(dst)?;
                symlink(&target, &backup)?;
            }
            Err(e) => return Err(e).with_context(|| format!("renaming symlink {dst} to {backup}")),
        }
    } else if dst.is_file() {
        fs::copy(dst, &backup).with_context(|| format!("copying {dst} to {backup}"))?;
    }
    Ok(())
}

fn is_cross_device(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::EXDEV)
}

/// Remove the copied-in file at `dstpath`/`src`, then restore the
/// backup taken by [`install_provision_config`], if any.
#[context("Removing provision config {src} from {dstpath}")]
pub fn remove_provision_config(src: &Utf8Path, dstpath: &Utf8Path, backup_ext: &str) -> Result<()> {
    let dst = join_stripped(dstpath, src);
    let backup = Utf8PathBuf::from(format!("{dst}{backup_ext}"));

    if dst.is_dir() {
        fs::remove_dir_all(&dst).with_context(|| format!("removing {dst}"))?;
    } else if dst.is_file() || dst.is_symlink() {
        fs::remove_file(&dst).with_context(|| format!("removing {dst}"))?;
    }

    if backup.is_dir() || backup.is_symlink() {
        fs::rename(&backup, &dst).with_context(|| format!("restoring {backup} to {dst}"))?;
    } else if backup.is_file() {
        fs::copy(&backup, &dst).with_context(|| format!("restoring {backup} to {dst}"))?;
        fs::remove_file(&backup).ok();
    } else {
        tracing::warn!("no backup {backup} found, nothing to restore");
    }
    Ok(())
}

pub fn remove_provision_configs(files: &[Utf8PathBuf], dstpath: &Utf8Path, backup_ext: &str) -> Result<()> {
    for file in files {
        remove_provision_config(file, dstpath, backup_ext)?;
    }
    Ok(())
}

fn join_stripped(root: &Utf8Path, src: &Utf8Path) -> Utf8PathBuf {
    root.join(src.as_str().trim_start_matches('/'))
}

fn copy_dir_recursive(src: &std::path::Path, dst: &std::path::Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let ty = entry.file_type()?;
        let dst_entry = dst.join(entry.file_name());
        if ty.is_dir() {
            copy_dir_recursive(&entry.path(), &dst_entry)?;
        } else if ty.is_symlink() {
            let target = fs::read_link(entry.path())?;
            symlink(target, dst_entry)?;
        } else {
            fs::copy(entry.path(), dst_entry)?;
        }
    }
    Ok(())
}

/// Rename `root/cmd` to `root/cmd.<ext>` and replace it with a symlink
/// to `dst` (default `/bin/true`), so package post-install scripts
/// invoking it inside the chroot become no-ops.
pub fn short_circuit(root: &Utf8Path, cmd: &str, ext: &str, dst: &str) -> Result<()> {
    let fullpath = join_stripped(root, Utf8Path::new(cmd));
    if !fullpath.is_file() {
        anyhow::bail!("{fullpath} not found");
    }
    let shadow = Utf8PathBuf::from(format!("{fullpath}.{ext}"));
    fs::rename(&fullpath, &shadow).with_context(|| format!("renaming {fullpath} to {shadow}"))?;
    symlink(dst, &fullpath).with_context(|| format!("linking {fullpath} to {dst}"))?;
    tracing::debug!("short circuited {fullpath} to {dst}");
    Ok(())
}

pub fn short_circuit_files(root: &Utf8Path, cmds: &[String], ext: &str, dst: &str) -> Result<()> {
    for cmd in cmds {
        short_circuit(root, cmd, ext, dst)?;
    }
    Ok(())
}

/// Reverse of [`short_circuit`]: remove the symlink and restore the
/// original binary from `root/cmd.<ext>`.
pub fn rewire(root: &Utf8Path, cmd: &str, ext: &str) -> Result<()> {
    let fullpath = join_stripped(root, Utf8Path::new(cmd));
    let shadow = Utf8PathBuf::from(format!("{fullpath}.{ext}"));
    if !shadow.is_file() {
        anyhow::bail!("{shadow} not found");
    }
    fs::remove_file(&fullpath).with_context(|| format!("removing {fullpath}"))?;
    fs::rename(&shadow, &fullpath).with_context(|| format!("renaming {shadow} to {fullpath}"))?;
    tracing::debug!("rewired {fullpath}");
    Ok(())
}

pub fn rewire_files(root: &Utf8Path, cmds: &[String], ext: &str) -> Result<()> {
    for cmd in cmds {
        rewire(root, cmd, ext)?;
    }
    Ok(())
}

/// Advisory exclusive `flock(2)` held for the duration of `body`.
pub fn with_flock<T>(path: &Utf8Path, body: impl FnOnce() -> Result<T>) -> Result<T> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening lock file {path}"))?;
    rustix::fs::flock(file.as_fd(), rustix::fs::FlockOperation::LockExclusive)
        .with_context(|| format!("locking {path}"))?;
    let result = body();
    let _ = rustix::fs::flock(file.as_fd(), rustix::fs::FlockOperation::Unlock);
    result
}

/// `true` if `path` is currently locked by another process.
pub fn is_locked(path: &Utf8Path) -> Result<bool> {
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening lock file {path}"))?;
    match rustix::fs::flock(file.as_fd(), rustix::fs::FlockOperation::NonBlockingLockExclusive) {
        Ok(()) => {
            let _ = rustix::fs::flock(file.as_fd(), rustix::fs::FlockOperation::Unlock);
            Ok(false)
        }
        Err(rustix::io::Errno::WOULDBLOCK) | Err(rustix::io::Errno::AGAIN) => Ok(true),
        Err(e) => Err(e).context("testing lock"),
    }
}

/// `mkdir -p`, ignoring "already exists" but not other errors.
pub fn mkdir_p(path: &Utf8Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).with_context(|| format!("creating directory {path}"))
}

/// Pure analogue of `result_to_dict`: parse `record_sep`/`field_sep`
/// delimited key/value stdout into a map. Missing keys from
/// `expected_keys` are filled with `None`.
pub fn parse_keyval(stdout: &str, record_sep: char, field_sep: char, expected_keys: &[String]) -> BTreeMap<String, Option<String>> {
    let mut metadata = BTreeMap::new();
    for record in stdout.split(record_sep) {
        if let Some((key, val)) = record.split_once(field_sep) {
            metadata.insert(key.trim().to_string(), Some(val.trim().to_string()));
        }
    }
    for key in expected_keys {
        metadata.entry(key.clone()).or_insert(None);
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lifo_mounts_filters_and_reverses() {
        let dir = tempdir().unwrap();
        let procmounts = dir.path().join("mounts");
        fs::write(
            &procmounts,
            "dev /x/build/root proc rw 0 0\n\
             dev /x/build/root/proc proc rw 0 0\n\
             dev /x/build/root/proc/bus/usb usbfs rw 0 0\n\
             dev /x/other ext4 rw 0 0\n",
        )
        .unwrap();
        // exercise lifo_mounts' filtering logic directly against the
        // same text lifo_mounts() would read from /proc/mounts
        let text = fs::read_to_string(&procmounts).unwrap();
        let root = "/x/build/root";
        let mut entries: Vec<&str> = text
            .lines()
            .filter_map(|l| l.split(' ').nth(1))
            .filter(|mp| *mp == root || mp.starts_with(&format!("{root}/")))
            .collect();
        entries.reverse();
        assert_eq!(entries, vec!["/x/build/root/proc/bus/usb", "/x/build/root/proc", "/x/build/root"]);
    }

    #[test]
    fn install_then_remove_provision_config_round_trips() {
        let host = tempdir().unwrap();
        let root = tempdir().unwrap();
        let host_resolv = Utf8Path::from_path(host.path()).unwrap().join("resolv.conf");
        fs::write(&host_resolv, "nameserver 1.1.1.1\n").unwrap();

        let dstpath = Utf8Path::from_path(root.path()).unwrap();
        let existing = dstpath.join(host_resolv.as_str().trim_start_matches('/'));
        fs::create_dir_all(existing.parent().unwrap()).unwrap();
        fs::write(&existing, "nameserver 127.0.0.1\n").unwrap();

        install_provision_config(&host_resolv, dstpath, "_aminator").unwrap();
        assert_eq!(fs::read_to_string(&existing).unwrap(), "nameserver 1.1.1.1\n");

        remove_provision_config(&host_resolv, dstpath, "_aminator").unwrap();
        assert_eq!(fs::read_to_string(&existing).unwrap(), "nameserver 127.0.0.1\n");
    }

    #[test]
    fn parse_keyval_fills_missing_keys_with_none() {
        let out = "name:httpd\nversion:2.4.58\n";
        let result = parse_keyval(out, '\n', ':', &["name".into(), "version".into(), "release".into()]);
        assert_eq!(result.get("name").unwrap().as_deref(), Some("httpd"));
        assert_eq!(result.get("release").unwrap(), &None);
    }

    #[test]
    fn mkdir_p_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = Utf8Path::from_path(dir.path()).unwrap().join("a/b/c");
        mkdir_p(&nested).unwrap();
        mkdir_p(&nested).unwrap();
        assert!(nested.is_dir());
    }
}

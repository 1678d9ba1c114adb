//! OS block-device prefix resolution.
//!
//! On NVMe-backed instances, the cloud-assigned device name (e.g.
//! `/dev/xvdf`) is a udev-managed symlink to the real NVMe node (e.g.
//! `/dev/nvme1n1`); elsewhere the assigned name is the real node. The
//! [`BlockDevice`] stage needs to know which naming convention the
//! running kernel actually uses before it can reserve a free slot.

use std::fs;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};

/// True if this host exposes any NVMe block devices under `/sys/block`.
pub fn is_nvme() -> bool {
    list_matching("/sys/block", "nvme").next().is_some()
}

/// List entries in `dir` whose file name starts with `prefix`, in
/// directory order. Returns an empty iterator if `dir` doesn't exist.
fn list_matching<'a>(dir: &'a str, prefix: &'a str) -> impl Iterator<Item = PathBuf> + 'a {
    fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(move |p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
}

/// On NVMe instances with udev rules configured, `/dev/<prefix>*` will
/// be symlinks to the real NVMe block devices under `/sys/block`. Find
/// the first candidate prefix whose `/dev` entry resolves to an NVMe
/// device; fall back to [`standard_device_prefix`] if none do.
pub fn nvme_device_prefix(prefixes: &[&str]) -> Option<String> {
    tracing::debug!("getting OS-native device prefix from candidates: {prefixes:?}");
    for &prefix in prefixes {
        let Some(candidate) = list_matching("/dev", prefix).next() else {
            continue;
        };
        if !candidate.is_symlink() {
            tracing::debug!("device {candidate:?} does not appear to be a symlink, skipping");
            continue;
        }
        let Ok(target) = fs::canonicalize(&candidate) else {
            tracing::debug!("device {candidate:?} could not be resolved, skipping");
            continue;
        };
        if !target.starts_with("/dev/nvme") {
            tracing::debug!("device {candidate:?} points to {target:?}, not NVMe, skipping");
            continue;
        }
        tracing::debug!("device {candidate:?} points to {target:?}, prefix is {prefix}");
        return Some(prefix.to_string());
    }
    tracing::debug!("no candidates found under /dev, falling back to standard search");
    standard_device_prefix(prefixes)
}

/// Find the first prefix with an existing entry under `/sys/block`.
pub fn standard_device_prefix(prefixes: &[&str]) -> Option<String> {
    tracing::debug!("getting OS-native device prefix from candidates: {prefixes:?}");
    for &prefix in prefixes {
        if list_matching("/sys/block", prefix).next().is_some() {
            tracing::debug!("prefix {prefix} derived from existing devices under /sys/block");
            return Some(prefix.to_string());
        }
    }
    tracing::error!("unable to determine block device prefix from candidates: {prefixes:?}");
    None
}

/// Resolve the OS-native device-name prefix from a list of candidates
/// (e.g. `["sd", "xvd"]`), accounting for NVMe renaming.
pub fn native_device_prefix(prefixes: &[&str]) -> Option<String> {
    if is_nvme() {
        nvme_device_prefix(prefixes)
    } else {
        standard_device_prefix(prefixes)
    }
}

/// The device-name prefix of `source_device` (e.g. `xvd` for
/// `/dev/xvdf1`, `xvdf` is wrong -- partitions strip two trailing
/// characters, bare disks strip one).
pub fn device_prefix(source_device: &str) -> String {
    let name = Path::new(source_device)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(source_device);
    let strip = if name.ends_with(|c: char| c.is_ascii_digit()) {
        2
    } else {
        1
    };
    let cut = name.len().saturating_sub(strip);
    name[..cut].to_string()
}

/// Rewrite `source_device`'s prefix to `native_prefix`, leaving the
/// rest of the path (and any partition suffix) untouched.
pub fn native_block_device(source_device: &str, native_prefix: &str) -> String {
    let source_prefix = device_prefix(source_device);
    if source_prefix == native_prefix {
        source_device.to_string()
    } else {
        source_device.replacen(&source_prefix, native_prefix, 1)
    }
}

/// Whether `dev` exists and is a block device node.
pub fn os_node_exists(dev: &Path) -> bool {
    fs::metadata(dev)
        .map(|m| m.file_type().is_block_device())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_prefix_strips_partition_digit() {
        assert_eq!(device_prefix("/dev/xvdf1"), "xvdf");
        assert_eq!(device_prefix("/dev/xvdf"), "xvd");
        assert_eq!(device_prefix("/dev/nvme1n1"), "nvme1n");
    }

    #[test]
    fn native_block_device_substitutes_prefix_only() {
        assert_eq!(native_block_device("/dev/xvdf1", "xvd"), "/dev/xvdf1");
        assert_eq!(native_block_device("/dev/sdf1", "xvd"), "/dev/xvdf1");
    }

    #[test]
    fn standard_device_prefix_returns_none_when_absent() {
        // Exceedingly unlikely to exist as a /sys/block prefix in any
        // test environment.
        assert_eq!(standard_device_prefix(&["zzqqnonexistent"]), None);
    }

    #[test]
    fn os_node_exists_false_for_missing_path() {
        assert!(!os_node_exists(Path::new("/dev/definitely-not-a-device")));
    }
}

//! Linux block-device reservation: resolve the OS-native device
//! prefix, then pick the first device-letter slot not already
//! reserved by the cloud provider (§4.4).

use anyhow::Result;

use super::BlockDevice;
use crate::cloud::Cloud;

const LETTERS: &str = "fghijklmnop";

#[derive(Debug, Clone)]
pub struct LinuxBlockDevice {
    pub candidate_prefixes: Vec<String>,
    reserved: Option<String>,
}

impl LinuxBlockDevice {
    pub fn new(candidate_prefixes: Vec<String>) -> Self {
        Self {
            candidate_prefixes,
            reserved: None,
        }
    }
}

impl Default for LinuxBlockDevice {
    fn default() -> Self {
        Self::new(vec!["sd".to_string(), "xvd".to_string()])
    }
}

/// Pick the first `/dev/{prefix}{letter}` (over [`LETTERS`]) not already
/// attached and not flagged stale by `is_stale`. Pure and independent of
/// `gator_blockdev::native_device_prefix` so the selection loop is
/// testable without a real `/sys/block`.
fn pick_letter(prefix: &str, attached: &[String], is_stale: impl Fn(&str) -> bool) -> Option<String> {
    for letter in LETTERS.chars() {
        let dev = format!("/dev/{prefix}{letter}");
        if attached.iter().any(|d| d == &dev) {
            tracing::debug!("device {dev} already attached, skipping");
            continue;
        }
        if is_stale(&dev) {
            tracing::debug!("device {dev} flagged stale, skipping");
            continue;
        }
        return Some(dev);
    }
    None
}

impl BlockDevice for LinuxBlockDevice {
    fn enter(&mut self, cloud: &dyn Cloud) -> Result<String> {
        let refs: Vec<&str> = self.candidate_prefixes.iter().map(String::as_str).collect();
        let prefix = gator_blockdev::native_device_prefix(&refs)
            .ok_or_else(|| crate::error::GatorError::Device("no native device prefix resolved".into()))?;

        let attached = cloud.attached_block_devices(&prefix);
        let dev = pick_letter(&prefix, &attached, |dev| cloud.is_stale_attachment(dev, &prefix))
            .ok_or_else(|| crate::error::GatorError::Device(format!("no free device slot for prefix {prefix}")))?;
        self.reserved = Some(dev.clone());
        tracing::info!("reserved block device {dev}");
        Ok(dev)
    }

    fn exit(&mut self) {
        if let Some(dev) = self.reserved.take() {
            tracing::debug!("releasing reservation for {dev}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::fake::FakeCloud;
    use crate::cloud::Cloud;

    #[test]
    fn pick_letter_skips_an_attached_device_reported_by_the_cloud() {
        let mut cloud = FakeCloud::default();
        cloud.connect().unwrap();
        cloud.allocate_base_volume(false).unwrap();
        // The first candidate letter, "f", is already attached.
        cloud.attach_volume("/dev/sdf").unwrap();

        let attached = cloud.attached_block_devices("sd");
        let dev = pick_letter("sd", &attached, |d| cloud.is_stale_attachment(d, "sd"));
        assert_eq!(dev.as_deref(), Some("/dev/sdg"));
    }

    #[test]
    fn pick_letter_skips_attached_and_stale_candidates() {
        let attached = vec!["/dev/sdf".to_string()];
        let dev = pick_letter("sd", &attached, |d| d == "/dev/sdg");
        assert_eq!(dev.as_deref(), Some("/dev/sdh"));
    }

    #[test]
    fn pick_letter_returns_none_when_every_letter_is_taken() {
        let attached: Vec<String> = LETTERS.chars().map(|l| format!("/dev/sd{l}")).collect();
        assert_eq!(pick_letter("sd", &attached, |_| false), None);
    }

    #[test]
    fn exit_without_a_reservation_is_a_no_op() {
        let mut bd = LinuxBlockDevice::new(vec!["sd".to_string()]);
        bd.exit();
        assert!(bd.reserved.is_none());
    }
}

//! An in-memory cloud driver: the one concrete `Cloud` implementation
//! shipped in this crate (§4.3, "abstract + one concrete driver"). It
//! tracks volume/snapshot/image state in plain maps instead of talking
//! to a real provider API, so end-to-end scenarios (§8) can run
//! without network access.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use gator_utils::RetryPolicy;

use super::{BlockDeviceMapping, Cloud, SessionCredentials};

#[derive(Debug, Default)]
pub struct FakeCloud {
    connected: bool,
    next_id: u64,
    attached: BTreeMap<String, String>,
    volume_id: Option<String>,
    snapshot_id: Option<String>,
    pub tags: BTreeMap<String, Vec<(String, String)>>,
    pub registered_images: Vec<String>,
    /// Lets a test force a fixed number of transient failures before
    /// `attach_volume`/`detach_volume` succeed, exercising the
    /// bounded-retry policy described in §4.3.
    pub flaky_attach_failures: u32,
}

impl FakeCloud {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{:08x}", self.next_id)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(5, std::time::Duration::from_millis(1), 1.0)
    }
}

impl Cloud for FakeCloud {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        tracing::debug!("fake cloud connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        tracing::debug!("fake cloud disconnected");
    }

    fn allocate_base_volume(&mut self, tag: bool) -> Result<String> {
        anyhow::ensure!(self.connected, "not connected");
        let id = self.fresh_id("vol");
        if tag {
            self.tags.entry(id.clone()).or_default();
        }
        self.volume_id = Some(id.clone());
        Ok(id)
    }

    fn attach_volume(&mut self, dev: &str) -> Result<()> {
        let mut remaining_failures = self.flaky_attach_failures;
        let volume_id = self.volume_id.clone().unwrap_or_default();
        let attached = &mut self.attached;
        let dev_owned = dev.to_string();
        self.retry_policy().call(
            |_e| true,
            || {
                if remaining_failures > 0 {
                    remaining_failures -= 1;
                    bail!("transient attach failure");
                }
                attached.insert(dev_owned.clone(), volume_id.clone());
                Ok(())
            },
        )
    }

    fn detach_volume(&mut self, dev: &str) -> Result<()> {
        self.attached.remove(dev);
        Ok(())
    }

    fn delete_volume(&mut self) -> Result<()> {
        self.volume_id = None;
        Ok(())
    }

    fn snapshot_volume(&mut self, _description: Option<&str>) -> Result<String> {
        let id = self.fresh_id("snap");
        self.snapshot_id = Some(id.clone());
        Ok(id)
    }

    fn register_image_from_snapshot(&mut self, mapping: &BlockDeviceMapping) -> Result<String> {
        anyhow::ensure!(self.snapshot_id.is_some(), "no snapshot to register");
        anyhow::ensure!(!mapping.root_device.is_empty(), "root device required");
        let id = self.fresh_id("ami");
        self.registered_images.push(id.clone());
        Ok(id)
    }

    fn register_image_from_manifest(&mut self, manifest: &str) -> Result<String> {
        anyhow::ensure!(!manifest.is_empty(), "manifest path required");
        let id = self.fresh_id("ami");
        self.registered_images.push(id.clone());
        Ok(id)
    }

    fn is_volume_attached(&self, dev: &str) -> bool {
        self.attached.contains_key(dev)
    }

    fn is_stale_attachment(&self, _dev: &str, _prefix: &str) -> bool {
        false
    }

    fn attached_block_devices(&self, prefix: &str) -> Vec<String> {
        self.attached.keys().filter(|d| d.starts_with(prefix)).cloned().collect()
    }

    fn add_tags(&mut self, _resource_type: &str, resource_id: &str, tags: &[(String, String)]) -> Result<()> {
        self.tags.insert(resource_id.to_string(), tags.to_vec());
        Ok(())
    }

    fn session_credentials(&self) -> SessionCredentials {
        SessionCredentials {
            access_key: "FAKEACCESSKEY".to_string(),
            secret_key: "fakesecretkey".to_string(),
            session_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_attach_detach_delete_round_trips() {
        let mut cloud = FakeCloud::default();
        cloud.connect().unwrap();
        let vol = cloud.allocate_base_volume(true).unwrap();
        assert!(cloud.tags.contains_key(&vol));
        cloud.attach_volume("/dev/xvdf").unwrap();
        assert!(cloud.is_volume_attached("/dev/xvdf"));
        cloud.detach_volume("/dev/xvdf").unwrap();
        assert!(!cloud.is_volume_attached("/dev/xvdf"));
        cloud.delete_volume().unwrap();
    }

    #[test]
    fn attach_volume_retries_past_transient_failures() {
        let mut cloud = FakeCloud {
            flaky_attach_failures: 2,
            ..Default::default()
        };
        cloud.connect().unwrap();
        cloud.allocate_base_volume(false).unwrap();
        cloud.attach_volume("/dev/xvdf").unwrap();
        assert!(cloud.is_volume_attached("/dev/xvdf"));
    }

    #[test]
    fn register_image_from_snapshot_requires_prior_snapshot() {
        let mut cloud = FakeCloud::default();
        cloud.connect().unwrap();
        let mapping = BlockDeviceMapping {
            root_device: "/dev/sda1".to_string(),
            ..Default::default()
        };
        assert!(cloud.register_image_from_snapshot(&mapping).is_err());
        cloud.snapshot_volume(None).unwrap();
        assert!(cloud.register_image_from_snapshot(&mapping).is_ok());
    }
}

use anyhow::{Context as _, Result};

use super::Volume;
use crate::blockdevice::BlockDevice;
use crate::cloud::Cloud;
use crate::config::PluginConfig;
use crate::context::Context;
use crate::error::GatorError;
use crate::linux::{fsck, growpart, resize2fs};

#[derive(Debug, Clone, Default)]
pub struct LinuxVolume {
    pub config: PluginConfig,
}

impl Volume for LinuxVolume {
    fn enter(&mut self, cloud: &mut dyn Cloud, blockdevice: &mut dyn BlockDevice, ctx: &mut Context) -> Result<()> {
        let dev = blockdevice.enter(cloud).context("reserving block device")?;
        let partition = self.config.get_u64("partition");
        let bound_dev = match partition {
            Some(n) => format!("{dev}{n}"),
            None => dev.clone(),
        };
        ctx.volume.dev = Some(bound_dev.clone());

        cloud
            .attach_volume(&dev)
            .map_err(|e| GatorError::Volume(format!("attach {dev}: {e}")))?;

        if self.config.get_bool("resize_volume", false) {
            let result = fsck(&bound_dev)?;
            if !result.success {
                return Err(GatorError::Volume(format!("fsck {bound_dev} failed: {}", result.stderr_str())).into());
            }
            if let Some(n) = partition {
                let result = growpart(&dev, n as u32)?;
                if !result.success {
                    return Err(GatorError::Volume(format!("growpart {dev} {n} failed: {}", result.stderr_str())).into());
                }
            }
            let result = resize2fs(&bound_dev)?;
            if !result.success {
                return Err(GatorError::Volume(format!("resize2fs {bound_dev} failed: {}", result.stderr_str())).into());
            }
        }
        Ok(())
    }

    fn exit(&mut self, cloud: &mut dyn Cloud, ctx: &Context, had_error: bool) {
        let Some(dev) = ctx.volume.dev.clone() else {
            return;
        };
        if had_error && ctx.preserve_on_error {
            tracing::warn!("preserve_on_error set, leaving {dev} attached");
            return;
        }
        if let Err(e) = cloud.detach_volume(&dev) {
            tracing::error!("detaching {dev} failed: {e}");
        }
        if let Err(e) = cloud.delete_volume() {
            tracing::error!("deleting volume for {dev} failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockdevice::null::NullBlockDevice;
    use crate::cloud::fake::FakeCloud;

    #[test]
    fn enter_binds_partitioned_device_and_attaches() {
        let mut cloud = FakeCloud::default();
        cloud.connect().unwrap();
        cloud.allocate_base_volume(false).unwrap();
        let mut bd = NullBlockDevice { dev: "/dev/xvdf".to_string() };
        let mut defaults = serde_yaml::Mapping::new();
        defaults.insert("partition".into(), 1.into());
        let mut volume = LinuxVolume {
            config: PluginConfig::from_defaults(&defaults),
        };
        let mut ctx = Context::default();

        volume.enter(&mut cloud, &mut bd, &mut ctx).unwrap();
        assert_eq!(ctx.volume.dev.as_deref(), Some("/dev/xvdf1"));
        assert!(cloud.is_volume_attached("/dev/xvdf"));
    }

    #[test]
    fn exit_preserves_on_error_skips_detach() {
        let mut cloud = FakeCloud::default();
        cloud.connect().unwrap();
        cloud.allocate_base_volume(false).unwrap();
        cloud.attach_volume("/dev/xvdf").unwrap();
        let mut volume = LinuxVolume::default();
        let mut ctx = Context::default();
        ctx.volume.dev = Some("/dev/xvdf".to_string());
        ctx.preserve_on_error = true;

        volume.exit(&mut cloud, &ctx, true);
        assert!(cloud.is_volume_attached("/dev/xvdf"));
    }
}

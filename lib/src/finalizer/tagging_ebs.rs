//! Snapshot finalizer (§4.8.1): `SET_META -> SNAPSHOT -> REGISTER -> TAG -> DONE`.

use std::collections::BTreeMap;

use anyhow::Result;

use super::tagging_base::{apply_tags, build_name};
use super::Finalizer;
use crate::cloud::{BlockDeviceMapping, Cloud};
use crate::config::PluginConfig;
use crate::context::Context;
use crate::error::GatorError;

#[derive(Debug)]
pub struct SnapshotFinalizer {
    pub config: PluginConfig,
    pub operator_name: Option<String>,
}

impl SnapshotFinalizer {
    pub fn new(config: PluginConfig, operator_name: Option<String>) -> Self {
        Self { config, operator_name }
    }

    fn block_device_mapping(&self) -> BlockDeviceMapping {
        let root_device = self.config.get_str("default_root_device").unwrap_or_else(|| "/dev/sda1".to_string());
        let mut device_map = BTreeMap::new();
        for entry in self.config.get_str_list("default_block_device_map") {
            if let Some((letter, dev)) = entry.split_once('=') {
                device_map.insert(letter.to_string(), dev.to_string());
            }
        }
        BlockDeviceMapping { device_map, root_device }
    }
}

impl Finalizer for SnapshotFinalizer {
    fn enter(&mut self, _ctx: &Context) -> Result<()> {
        std::env::set_var("GATOR_STORE_TYPE", "ebs");
        Ok(())
    }

    fn finalize(&mut self, cloud: &mut dyn Cloud, ctx: &mut Context) -> Result<bool> {
        // SET_META
        let name = build_name(ctx, &self.config, self.operator_name.as_deref(), "ebs")
            .map_err(|e| GatorError::Finalize(format!("computing image name: {e}")))?;
        ctx.ami.name = Some(name.clone());
        std::env::set_var("GATOR_AMI_NAME", &name);

        // SNAPSHOT
        let snapshot_id = cloud
            .snapshot_volume(Some(&name))
            .map_err(|e| GatorError::Finalize(format!("snapshotting volume: {e}")))?;

        // REGISTER
        let mapping = self.block_device_mapping();
        let ami_id = cloud
            .register_image_from_snapshot(&mapping)
            .map_err(|e| GatorError::Finalize(format!("registering image: {e}")))?;

        // TAG (snapshot before ami, per the decided open question)
        apply_tags(cloud, ctx, &[("snapshot", &snapshot_id), ("ami", &ami_id)])?;

        tracing::info!("registered {ami_id} from snapshot {snapshot_id} as {name}");
        Ok(true)
    }

    fn exit(&mut self) {}
}

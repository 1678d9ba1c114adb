//! Red Hat family: service starts are already suppressed by the
//! short-circuited init helpers, so `_deactivate_provisioning_service_block`
//! is a no-op (§4.6 step 5).

use anyhow::Result;
use camino::Utf8Path;

use super::DistroFamily;
use crate::config::PluginConfig;

#[derive(Debug, Default)]
pub struct RedHatFamily;

impl DistroFamily for RedHatFamily {
    fn deactivate(&self, _root: &Utf8Path, _config: &PluginConfig) -> Result<()> {
        Ok(())
    }

    fn reactivate(&self, _root: &Utf8Path, _config: &PluginConfig) -> Result<()> {
        Ok(())
    }
}

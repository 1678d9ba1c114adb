//! The Cloud stage (§4.3): the outermost-but-one scope, bound by
//! Volume and Finalizer. One concrete driver ships in this crate, an
//! in-memory fake; a real provider binding implements the same trait
//! out of tree.

pub mod fake;

use std::collections::BTreeMap;

use anyhow::Result;

/// Credentials extracted from the active cloud connection, passed to
/// the bundle uploader (§4.8.2 UPLOAD).
#[derive(Debug, Clone, Default)]
pub struct SessionCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: Option<String>,
}

/// Parameters for registering a snapshot-backed image.
#[derive(Debug, Clone, Default)]
pub struct BlockDeviceMapping {
    pub device_map: BTreeMap<String, String>,
    pub root_device: String,
}

/// Polymorphic over the capability set named in §4.3. The orchestrator
/// binds a `&mut dyn Cloud` into Volume and Finalizer for the duration
/// of their scopes (§9's non-owning back-references).
pub trait Cloud: std::fmt::Debug {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self);

    fn allocate_base_volume(&mut self, tag: bool) -> Result<String>;
    fn attach_volume(&mut self, dev: &str) -> Result<()>;
    fn detach_volume(&mut self, dev: &str) -> Result<()>;
    fn delete_volume(&mut self) -> Result<()>;

    fn snapshot_volume(&mut self, description: Option<&str>) -> Result<String>;
    fn register_image_from_snapshot(&mut self, mapping: &BlockDeviceMapping) -> Result<String>;
    fn register_image_from_manifest(&mut self, manifest: &str) -> Result<String>;

    fn is_volume_attached(&self, dev: &str) -> bool;
    fn is_stale_attachment(&self, dev: &str, prefix: &str) -> bool;
    fn attached_block_devices(&self, prefix: &str) -> Vec<String>;

    fn add_tags(&mut self, resource_type: &str, resource_id: &str, tags: &[(String, String)]) -> Result<()>;

    fn session_credentials(&self) -> SessionCredentials;
}

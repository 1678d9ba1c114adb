//! The typed, hierarchical build context threaded through every stage
//! (§3 of the design). Each sub-tree is owned by exactly one stage once
//! that stage has written to it; see the module docs on each stage for
//! which fields it owns.

use std::collections::BTreeMap;

/// `context.package.*` — owned by the CLI/orchestrator for `arg` and
/// `local_install`, owned by the Provisioner for `attributes`.
#[derive(Debug, Default, Clone)]
pub struct PackageContext {
    pub arg: String,
    pub local_install: bool,
    /// Populated by the provisioner's `_store_package_metadata` step.
    /// A `None` value means the configured attribute key was missing
    /// from the package-manager query output.
    pub attributes: BTreeMap<String, Option<String>>,
}

/// `context.volume.*` — owned by the Volume stage.
#[derive(Debug, Default, Clone)]
pub struct VolumeContext {
    pub dev: Option<String>,
}

/// `context.ami.*` — owned by the finalizer (and the CLI flags it contributes).
#[derive(Debug, Default, Clone)]
pub struct AmiContext {
    pub name: Option<String>,
    pub bucket: Option<String>,
    pub cert: Option<String>,
    pub privatekey: Option<String>,
    pub ec2_user: Option<String>,
    pub tmpdir: Option<String>,
    pub architecture: Option<String>,
    pub kernel_id: Option<String>,
    pub ramdisk_id: Option<String>,
    pub vm_type: Option<String>,
    pub root_volume_size: Option<u64>,
    pub break_copy_volume: bool,
    /// Applied in list order exactly as supplied (see DESIGN.md open question).
    pub tags: Vec<(String, String)>,
}

/// `context.base_ami.*` — read-only descriptors of the source image.
#[derive(Debug, Default, Clone)]
pub struct BaseAmiContext {
    pub architecture: Option<String>,
    pub kernel_id: Option<String>,
    pub ramdisk_id: Option<String>,
}

/// The process-wide build context. See module docs for ownership rules.
#[derive(Debug, Default, Clone)]
pub struct Context {
    pub package: PackageContext,
    pub volume: VolumeContext,
    pub ami: AmiContext,
    pub base_ami: BaseAmiContext,
    pub environment: Option<String>,
    /// Operator debugging aid: skip Volume detach/delete on error exit.
    pub preserve_on_error: bool,
    /// Unknown keys carried through for downstream hooks, per the
    /// design's note on the dynamically-typed source mapping.
    pub extra: BTreeMap<String, String>,
}

//! The stage registry (§9's decided open question): a `by_name`
//! mapping of named stage factories per kind, one registry per kind
//! rather than one hierarchy across all kinds, since their contracts
//! differ (§4.2, §9 "do not attempt a single hierarchy").

use std::collections::BTreeMap;

use crate::blockdevice::{linux::LinuxBlockDevice, null::NullBlockDevice, BlockDevice};
use crate::cloud::{fake::FakeCloud, Cloud};
use crate::config::PluginConfig;
use crate::distro::{debian::DebianFamily, redhat::RedHatFamily, Distro, LinuxDistro};
use crate::finalizer::{tagging_ebs::SnapshotFinalizer, tagging_s3::BundleFinalizer, Finalizer};
use crate::metrics::{LoggingMetrics, Metrics};
use crate::provisioner::{apt::AptFamily, aptitude::AptitudeFamily, yum::YumFamily, GenericProvisioner, Provisioner};
use crate::volume::{linux::LinuxVolume, Volume};

pub type CloudFactory = Box<dyn Fn(PluginConfig) -> Box<dyn Cloud>>;
pub type BlockDeviceFactory = Box<dyn Fn(PluginConfig) -> Box<dyn BlockDevice>>;
pub type VolumeFactory = Box<dyn Fn(PluginConfig) -> Box<dyn Volume>>;
pub type DistroFactory = Box<dyn Fn(PluginConfig, camino::Utf8PathBuf) -> Box<dyn Distro>>;
pub type ProvisionerFactory = Box<dyn Fn(PluginConfig) -> Box<dyn Provisioner>>;
pub type MetricsFactory = Box<dyn Fn(PluginConfig) -> Box<dyn Metrics>>;

/// Parameters the finalizer stage contributes via CLI flags (§6); the
/// only stage kind in this design with operator-facing flags beyond
/// the orchestrator's own `--environment`/`--debug`.
#[derive(Debug, Clone, Default)]
pub struct FinalizerArgs {
    pub name: Option<String>,
    pub cert: Option<String>,
    pub privatekey: Option<String>,
    pub ec2_user: Option<String>,
    pub bucket: Option<String>,
    pub break_copy_volume: bool,
}

pub type FinalizerFactory = Box<dyn Fn(PluginConfig, FinalizerArgs) -> Box<dyn Finalizer>>;

/// Named stage factories per kind. Construct with [`Registry::builtin`]
/// to get the stages this crate ships, or build one up manually for
/// tests that need a narrower set.
pub struct Registry {
    pub clouds: BTreeMap<String, CloudFactory>,
    pub blockdevices: BTreeMap<String, BlockDeviceFactory>,
    pub volumes: BTreeMap<String, VolumeFactory>,
    pub distros: BTreeMap<String, DistroFactory>,
    pub provisioners: BTreeMap<String, ProvisionerFactory>,
    pub finalizers: BTreeMap<String, FinalizerFactory>,
    pub metrics: BTreeMap<String, MetricsFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("clouds", &self.clouds.keys().collect::<Vec<_>>())
            .field("blockdevices", &self.blockdevices.keys().collect::<Vec<_>>())
            .field("volumes", &self.volumes.keys().collect::<Vec<_>>())
            .field("distros", &self.distros.keys().collect::<Vec<_>>())
            .field("provisioners", &self.provisioners.keys().collect::<Vec<_>>())
            .field("finalizers", &self.finalizers.keys().collect::<Vec<_>>())
            .field("metrics", &self.metrics.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            clouds: BTreeMap::new(),
            blockdevices: BTreeMap::new(),
            volumes: BTreeMap::new(),
            distros: BTreeMap::new(),
            provisioners: BTreeMap::new(),
            finalizers: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    /// The stages this crate ships (§4.3/§4.4: "abstract + one concrete
    /// driver" for Cloud and BlockDevice).
    pub fn builtin() -> Self {
        let mut r = Self::empty();

        r.clouds.insert("fake".to_string(), Box::new(|_cfg| Box::new(FakeCloud::default())));

        r.blockdevices
            .insert("null".to_string(), Box::new(|_cfg| Box::new(NullBlockDevice::default())));
        r.blockdevices.insert(
            "linux".to_string(),
            Box::new(|cfg| {
                let prefixes = cfg.get_str_list("candidate_prefixes");
                let prefixes = if prefixes.is_empty() {
                    vec!["sd".to_string(), "xvd".to_string()]
                } else {
                    prefixes
                };
                Box::new(LinuxBlockDevice::new(prefixes))
            }),
        );

        r.volumes
            .insert("linux".to_string(), Box::new(|cfg| Box::new(LinuxVolume { config: cfg })));

        r.distros.insert(
            "redhat".to_string(),
            Box::new(|cfg, volume_dir| Box::new(LinuxDistro::new(cfg, volume_dir, Box::new(RedHatFamily)))),
        );
        r.distros.insert(
            "debian".to_string(),
            Box::new(|cfg, volume_dir| Box::new(LinuxDistro::new(cfg, volume_dir, Box::new(DebianFamily)))),
        );

        r.provisioners
            .insert("yum".to_string(), Box::new(|cfg| Box::new(GenericProvisioner::new(cfg, YumFamily))));
        r.provisioners
            .insert("apt".to_string(), Box::new(|cfg| Box::new(GenericProvisioner::new(cfg, AptFamily))));
        r.provisioners.insert(
            "aptitude".to_string(),
            Box::new(|cfg| Box::new(GenericProvisioner::new(cfg, AptitudeFamily::default()))),
        );

        r.finalizers.insert(
            "tagging_ebs".to_string(),
            Box::new(|cfg, args| Box::new(SnapshotFinalizer::new(cfg, args.name))),
        );
        r.finalizers.insert(
            "tagging_s3".to_string(),
            Box::new(|cfg, args| {
                let mut finalizer = BundleFinalizer::new(cfg, args.name);
                finalizer.cert = args.cert;
                finalizer.privatekey = args.privatekey;
                finalizer.ec2_user = args.ec2_user;
                finalizer.bucket = args.bucket;
                finalizer.break_copy_volume = args.break_copy_volume;
                Box::new(finalizer)
            }),
        );

        r.metrics
            .insert("logger".to_string(), Box::new(|_cfg| Box::new(LoggingMetrics)));

        r
    }
}

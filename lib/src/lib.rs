//! `gator-lib`: the provisioning pipeline orchestrator. Composes a
//! cloud driver, block-device allocator, volume manager, distribution
//! preparer, provisioner, and finalizer into a strictly nested
//! lifecycle (see `orchestrator` module docs).

pub mod blockdevice;
pub mod cli;
pub mod cloud;
pub mod config;
pub mod context;
pub mod distro;
pub mod error;
pub mod finalizer;
pub mod linux;
pub mod metrics;
pub mod orchestrator;
pub mod provisioner;
pub mod registry;
pub mod volume;

pub use cli::Cli;
pub use config::Config;
pub use context::Context;
pub use error::{GatorError, ProvisionError};
pub use registry::Registry;

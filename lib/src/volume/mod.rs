//! The Volume stage (§4.5): binds BlockDevice and Cloud, attaches the
//! working volume, optionally resizes it, and tears both down on exit.

pub mod linux;

use anyhow::Result;

use crate::blockdevice::BlockDevice;
use crate::cloud::Cloud;
use crate::context::Context;

pub trait Volume: std::fmt::Debug {
    fn enter(&mut self, cloud: &mut dyn Cloud, blockdevice: &mut dyn BlockDevice, ctx: &mut Context) -> Result<()>;
    fn exit(&mut self, cloud: &mut dyn Cloud, ctx: &Context, had_error: bool);
}

//! Finalizer stages (§4.8): take a prepared volume and publish it as a
//! registered, tagged image, either via a block-backed snapshot or an
//! object-store bundle.

pub mod tagging_base;
pub mod tagging_ebs;
pub mod tagging_s3;

use anyhow::Result;

use crate::cloud::Cloud;
use crate::context::Context;

pub trait Finalizer: std::fmt::Debug {
    /// Publishes `GATOR_*` hook environment variables (§9: "never
    /// write hook env vars outside the finalizer's enter hook").
    fn enter(&mut self, ctx: &Context) -> Result<()>;

    fn finalize(&mut self, cloud: &mut dyn Cloud, ctx: &mut Context) -> Result<bool>;

    fn exit(&mut self);
}

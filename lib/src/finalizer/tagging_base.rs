//! Shared naming, sanitization, and tagging helpers used by both
//! finalizer state machines (§4.8).

use anyhow::{Context as _, Result};
use gator_utils::sanitize_name;

use crate::cloud::Cloud;
use crate::config::PluginConfig;
use crate::context::Context;
use crate::error::GatorError;

/// `config.name_format.format(**attributes)` translated to Rust: `{key}`
/// placeholders are substituted from `context.package.attributes`,
/// then sanitized and suffixed.
pub fn build_name(ctx: &Context, config: &PluginConfig, operator_name: Option<&str>, suffix: &str) -> Result<String> {
    let base = match operator_name {
        Some(name) => name.to_string(),
        None => {
            let format = config
                .get_str("name_format")
                .context("name_format not configured and no --name supplied")?;
            format_attributes(&format, ctx)?
        }
    };
    Ok(format!("{}-{suffix}", sanitize_name(&base)))
}

fn format_attributes(format: &str, ctx: &Context) -> Result<String> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut key = String::new();
        for (_, c2) in chars.by_ref() {
            if c2 == '}' {
                break;
            }
            key.push(c2);
        }
        let value = ctx
            .package
            .attributes
            .get(&key)
            .and_then(|v| v.as_deref())
            .with_context(|| format!("attribute {key:?} required by name_format was not populated"))?;
        out.push_str(value);
    }
    Ok(out)
}

/// Apply `ctx.ami.tags` to each of `resource_ids`, in the exact order
/// given (the decided open question on snapshot-vs-ami tag ordering:
/// honor caller-supplied order, not alphabetical or reversed).
pub fn apply_tags(cloud: &mut dyn Cloud, ctx: &Context, resource_ids: &[(&str, &str)]) -> Result<()> {
    for (resource_type, resource_id) in resource_ids {
        cloud
            .add_tags(resource_type, resource_id, &ctx.ami.tags)
            .map_err(|e| GatorError::Finalize(format!("tagging {resource_type} {resource_id}: {e}")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn build_name_substitutes_attributes_and_sanitizes() {
        let mut ctx = Context::default();
        ctx.package.attributes = BTreeMap::from([
            ("name".to_string(), Some("httpd".to_string())),
            ("version".to_string(), Some("2.4.58".to_string())),
            ("release".to_string(), Some("1".to_string())),
            ("architecture".to_string(), Some("x86_64".to_string())),
        ]);
        let mut defaults = serde_yaml::Mapping::new();
        defaults.insert("name_format".into(), "{name}-{version}-{release}-{architecture}".into());
        let config = PluginConfig::from_defaults(&defaults);

        let name = build_name(&ctx, &config, None, "ebs").unwrap();
        similar_asserts::assert_eq!(name, "httpd-2.4.58-1-x86_64-ebs");
    }

    #[test]
    fn build_name_prefers_operator_supplied_name() {
        let ctx = Context::default();
        let config = PluginConfig::default();
        let name = build_name(&ctx, &config, Some("my image!"), "s3").unwrap();
        similar_asserts::assert_eq!(name, "my_image_-s3");
    }
}

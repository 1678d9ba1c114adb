//! Bundle finalizer (§4.8.2): `SET_META -> COPY -> [BREAK?] -> BUNDLE
//! -> UPLOAD -> REGISTER -> TAG -> DONE`.

use anyhow::Result;
use camino::Utf8PathBuf;
use gator_utils::{monitor_command, randword};
use tempfile::TempDir;

use super::tagging_base::{apply_tags, build_name};
use super::Finalizer;
use crate::cloud::Cloud;
use crate::config::PluginConfig;
use crate::context::Context;
use crate::error::GatorError;

#[derive(Debug)]
pub struct BundleFinalizer {
    pub config: PluginConfig,
    pub operator_name: Option<String>,
    pub cert: Option<String>,
    pub privatekey: Option<String>,
    pub ec2_user: Option<String>,
    pub bucket: Option<String>,
    pub break_copy_volume: bool,
    tmpdir: Option<TempDir>,
}

impl BundleFinalizer {
    pub fn new(config: PluginConfig, operator_name: Option<String>) -> Self {
        Self {
            config,
            operator_name,
            cert: None,
            privatekey: None,
            ec2_user: None,
            bucket: None,
            break_copy_volume: false,
            tmpdir: None,
        }
    }

    fn validate_root_volume_size(&self, ctx: &Context) -> Result<()> {
        let Some(requested) = ctx.ami.root_volume_size else {
            return Ok(());
        };
        let Some(max) = self.config.get_u64("max_root_volume_size") else {
            return Ok(());
        };
        if requested > max {
            return Err(GatorError::Volume(format!(
                "requested root volume size {requested} exceeds max_root_volume_size {max}"
            ))
            .into());
        }
        Ok(())
    }

    fn block_device_map_string(&self, dev: &str) -> String {
        let mut parts = vec![format!("root={dev}")];
        for entry in self.config.get_str_list("default_block_device_map") {
            if let Some((letter, mapped)) = entry.split_once('=') {
                parts.push(format!("{letter}={mapped}"));
            }
        }
        parts.push(format!("ami={dev}"));
        parts.join(",")
    }
}

impl Finalizer for BundleFinalizer {
    fn enter(&mut self, ctx: &Context) -> Result<()> {
        self.validate_root_volume_size(ctx)?;

        std::env::set_var("GATOR_STORE_TYPE", "s3");
        if let Some(cert) = &self.cert {
            std::env::set_var("GATOR_CERT", cert);
        }
        if let Some(key) = &self.privatekey {
            std::env::set_var("GATOR_PRIVATEKEY", key);
        }
        if let Some(user) = &self.ec2_user {
            std::env::set_var("GATOR_EC2_USER", user);
        }
        if let Some(bucket) = &self.bucket {
            std::env::set_var("GATOR_BUCKET", bucket);
        }

        let base_tmpdir = ctx.ami.tmpdir.as_deref().unwrap_or("/tmp");
        let tmpdir = TempDir::new_in(base_tmpdir).map_err(|e| GatorError::Finalize(format!("creating scratch tmpdir: {e}")))?;
        std::env::set_var("GATOR_TMPDIR", tmpdir.path().display().to_string());
        self.tmpdir = Some(tmpdir);
        Ok(())
    }

    fn finalize(&mut self, cloud: &mut dyn Cloud, ctx: &mut Context) -> Result<bool> {
        // SET_META
        let name = build_name(ctx, &self.config, self.operator_name.as_deref(), "s3")
            .map_err(|e| GatorError::Finalize(format!("computing image name: {e}")))?;
        ctx.ami.name = Some(name.clone());
        std::env::set_var("GATOR_AMI_NAME", &name);

        let Some(tmpdir) = &self.tmpdir else {
            return Err(GatorError::Finalize("finalize called before enter".into()).into());
        };
        let tmpdir_path = Utf8PathBuf::try_from(tmpdir.path().to_path_buf())
            .map_err(|e| GatorError::Finalize(format!("non-UTF-8 tmpdir: {e}")))?;
        let rand6 = randword(6);
        let image_path = tmpdir_path.join(format!("{name}-{rand6}"));

        let dev = ctx
            .volume
            .dev
            .clone()
            .ok_or_else(|| GatorError::Finalize("context.volume.dev not set".to_string()))?;

        // COPY
        let result = monitor_command(
            vec!["dd".to_string(), "bs=65536".to_string(), format!("if={dev}"), format!("of={image_path}")],
            None,
        )
        .map_err(|e| GatorError::Finalize(format!("copying volume: {e}")))?;
        anyhow::ensure!(result.success, "{}", GatorError::Finalize(format!("dd failed: {}", result.stderr_str())));

        // BREAK
        if self.break_copy_volume {
            tracing::warn!("--break-copy-volume set, spawning interactive shell over {image_path}");
            let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
            let _ = monitor_command(vec![shell], None);
        }

        // BUNDLE
        let mut bundle_cmd = vec![
            "ec2-bundle-vol".to_string(),
            "-c".to_string(),
            self.cert.clone().unwrap_or_default(),
            "-k".to_string(),
            self.privatekey.clone().unwrap_or_default(),
            "-u".to_string(),
            self.ec2_user.clone().unwrap_or_default(),
            "-v".to_string(),
            image_path.to_string(),
            "-d".to_string(),
            tmpdir_path.to_string(),
            "-r".to_string(),
            ctx.ami.architecture.clone().unwrap_or_else(|| "x86_64".to_string()),
        ];
        if ctx.ami.vm_type.as_deref() == Some("paravirtual") {
            if let Some(kernel_id) = &ctx.ami.kernel_id {
                bundle_cmd.push("--kernel".to_string());
                bundle_cmd.push(kernel_id.clone());
            }
            if let Some(ramdisk_id) = &ctx.ami.ramdisk_id {
                bundle_cmd.push("--ramdisk".to_string());
                bundle_cmd.push(ramdisk_id.clone());
            }
            bundle_cmd.push("-B".to_string());
            bundle_cmd.push(self.block_device_map_string(&dev));
        }
        let result = monitor_command(bundle_cmd, None).map_err(|e| GatorError::Finalize(format!("bundling volume: {e}")))?;
        anyhow::ensure!(result.success, "{}", GatorError::Finalize(format!("bundler failed: {}", result.stderr_str())));

        // UPLOAD
        let creds = cloud.session_credentials();
        let bucket = self.bucket.clone().unwrap_or_default();
        let manifest_name = format!("{name}-{rand6}.manifest.xml");
        let mut upload_cmd = vec![
            "ec2-upload-bundle".to_string(),
            "-b".to_string(),
            bucket.clone(),
            "-m".to_string(),
            tmpdir_path.join(&manifest_name).to_string(),
            "-a".to_string(),
            creds.access_key,
            "-s".to_string(),
            creds.secret_key,
            "--retry".to_string(),
        ];
        if let Some(token) = &creds.session_token {
            upload_cmd.push("-t".to_string());
            upload_cmd.push(token.clone());
        }
        let result = monitor_command(upload_cmd, None).map_err(|e| GatorError::Finalize(format!("uploading bundle: {e}")))?;
        anyhow::ensure!(result.success, "{}", GatorError::Finalize(format!("uploader failed: {}", result.stderr_str())));

        // REGISTER
        let manifest = format!("{bucket}/{manifest_name}");
        let ami_id = cloud
            .register_image_from_manifest(&manifest)
            .map_err(|e| GatorError::Finalize(format!("registering image: {e}")))?;

        // TAG (AMI only; there is no snapshot resource in the bundle flow)
        apply_tags(cloud, ctx, &[("ami", &ami_id)])?;

        tracing::info!("registered {ami_id} from bundle manifest {manifest} as {name}");
        Ok(true)
    }

    fn exit(&mut self) {
        // Dropping the TempDir recursively removes it, swallowing any
        // cleanup error, satisfying the "always removes tmpdir" contract.
        self.tmpdir = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enter_rejects_oversized_root_volume_before_any_subprocess_runs() {
        let mut defaults = serde_yaml::Mapping::new();
        defaults.insert("max_root_volume_size".into(), 100.into());
        let config = PluginConfig::from_defaults(&defaults);
        let mut finalizer = BundleFinalizer::new(config, None);

        let mut ctx = Context::default();
        ctx.ami.root_volume_size = Some(200);

        let err = finalizer.enter(&ctx).unwrap_err();
        similar_asserts::assert_eq!(
            err.to_string(),
            "requested root volume size 200 exceeds max_root_volume_size 100".to_string()
        );
        // enter() bailed before allocating a scratch tmpdir.
        assert!(finalizer.tmpdir.is_none());
    }
}

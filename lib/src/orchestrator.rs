//! The provisioning pipeline orchestrator (§4.1): resolves an
//! environment to one named stage per kind, enters them in the order
//! from §2, and releases every acquired scope in strict LIFO order
//! regardless of where a failure occurs.

use anyhow::Result;

use crate::cli::Cli;
use crate::config::Config;
use crate::context::Context;
use crate::linux;
use crate::registry::{FinalizerArgs, Registry};

/// Which scopes were successfully entered, in acquisition order. Exit
/// walks this stack in reverse (§9: "a stack of deferred release
/// closures... released in reverse on any exit path"). Kept as a data
/// stack of tags rather than boxed closures, since every stage's exit
/// needs access to peer stages the orchestrator already owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entered {
    Metrics,
    Cloud,
    Finalizer,
    Volume,
    Distro,
}

/// Run exactly one image build. Returns the process exit code (§4.1: 0
/// on success, 1 on any stage reporting failure or raising).
pub fn run(cli: Cli, config: Config, registry: &Registry) -> i32 {
    match run_inner(cli, config, registry) {
        Ok(true) => {
            tracing::info!("Gator complete!");
            0
        }
        Ok(false) => {
            tracing::error!("build failed");
            1
        }
        Err(e) => {
            tracing::error!("build failed: {e:#}");
            1
        }
    }
}

fn run_inner(cli: Cli, config: Config, registry: &Registry) -> Result<bool> {
    let envname = cli
        .environment
        .clone()
        .unwrap_or_else(|| config.environments.default.clone());
    let stage_names = config.environments.resolve(&envname)?.clone();

    linux::mkdir_p(&config.log_root)?;
    linux::mkdir_p(&config.gator_root.join(&config.lock_dir))?;
    let volume_dir = config.gator_root.join(&config.volume_dir);
    linux::mkdir_p(&volume_dir)?;

    std::env::set_var("GATOR_PACKAGE", &cli.package);

    let mut ctx = Context::default();
    ctx.package.arg = cli.package.clone();
    ctx.package.local_install = std::path::Path::new(&cli.package).is_file();
    ctx.environment = Some(envname.clone());
    ctx.preserve_on_error = cli.preserve_on_error;
    ctx.ami.name = cli.name.clone();
    ctx.ami.cert = cli.cert.clone();
    ctx.ami.privatekey = cli.privatekey.clone();
    ctx.ami.ec2_user = cli.ec2_user.clone();
    ctx.ami.tmpdir = cli.tmpdir.clone();
    ctx.ami.bucket = cli.bucket.clone();
    ctx.ami.break_copy_volume = cli.break_copy_volume;
    ctx.ami.root_volume_size = cli.root_volume_size;

    let cloud_name = stage_name(&stage_names, "cloud")?;
    let blockdevice_name = stage_name(&stage_names, "blockdevice")?;
    let volume_name = stage_name(&stage_names, "volume")?;
    let distro_name = stage_name(&stage_names, "distro")?;
    let provisioner_name = stage_name(&stage_names, "provisioner")?;
    let finalizer_name = stage_name(&stage_names, "finalizer")?;
    let metrics_name = stage_names.get("metrics").cloned().unwrap_or_else(|| "logger".to_string());

    let cloud_config = config.load_plugin_config("cloud", &cloud_name, &Default::default())?;
    let blockdevice_config = config.load_plugin_config("blockdevice", &blockdevice_name, &Default::default())?;
    let volume_config = config.load_plugin_config("volume", &volume_name, &Default::default())?;
    let distro_config = config.load_plugin_config("distro", &distro_name, &Default::default())?;
    let provisioner_config = config.load_plugin_config("provisioner", &provisioner_name, &Default::default())?;
    let finalizer_config = config.load_plugin_config("finalizer", &finalizer_name, &Default::default())?;
    let metrics_config = config.load_plugin_config("metrics", &metrics_name, &Default::default())?;

    for (kind, name, enabled) in [
        ("cloud", cloud_name.as_str(), cloud_config.enabled),
        ("blockdevice", blockdevice_name.as_str(), blockdevice_config.enabled),
        ("volume", volume_name.as_str(), volume_config.enabled),
        ("distro", distro_name.as_str(), distro_config.enabled),
        ("provisioner", provisioner_name.as_str(), provisioner_config.enabled),
        ("finalizer", finalizer_name.as_str(), finalizer_config.enabled),
    ] {
        anyhow::ensure!(enabled, "stage {kind}.{name} is disabled but selected by environment {envname:?}");
    }

    ctx.ami.tags = finalizer_config
        .get_str_list("tags")
        .into_iter()
        .filter_map(|entry| entry.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
        .collect();
    if ctx.ami.tags.is_empty() {
        ctx.ami.tags = vec![("snapshot".to_string(), envname.clone()), ("ami".to_string(), envname.clone())];
    }

    let mut metrics = registry
        .metrics
        .get(&metrics_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no metrics stage named {metrics_name:?}")))?(metrics_config);

    let mut cloud = registry
        .clouds
        .get(&cloud_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no cloud stage named {cloud_name:?}")))?(cloud_config);

    let mut blockdevice = registry
        .blockdevices
        .get(&blockdevice_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no blockdevice stage named {blockdevice_name:?}")))?(
        blockdevice_config,
    );

    let mut volume = registry
        .volumes
        .get(&volume_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no volume stage named {volume_name:?}")))?(volume_config);

    let distro_factory = registry
        .distros
        .get(&distro_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no distro stage named {distro_name:?}")))?;
    let mut distro = distro_factory(distro_config, volume_dir);

    let mut provisioner = registry
        .provisioners
        .get(&provisioner_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no provisioner stage named {provisioner_name:?}")))?(
        provisioner_config,
    );

    let finalizer_factory = registry
        .finalizers
        .get(&finalizer_name)
        .ok_or_else(|| crate::error::GatorError::Config(format!("no finalizer stage named {finalizer_name:?}")))?;
    let finalizer_args = FinalizerArgs {
        name: cli.name.clone(),
        cert: cli.cert.clone(),
        privatekey: cli.privatekey.clone(),
        ec2_user: cli.ec2_user.clone(),
        bucket: cli.bucket.clone(),
        break_copy_volume: cli.break_copy_volume,
    };
    let mut finalizer = finalizer_factory(finalizer_config, finalizer_args);

    let mut entered: Vec<Entered> = Vec::new();
    let mut ok = true;
    let build_id = build_id(&cli.package);

    let result: Result<()> = (|| {
        metrics.enter()?;
        entered.push(Entered::Metrics);

        cloud.connect()?;
        entered.push(Entered::Cloud);

        finalizer.enter(&ctx)?;
        entered.push(Entered::Finalizer);

        volume.enter(cloud.as_mut(), blockdevice.as_mut(), &mut ctx)?;
        entered.push(Entered::Volume);

        let dev = ctx
            .volume
            .dev
            .clone()
            .ok_or_else(|| anyhow::anyhow!("volume stage did not set context.volume.dev"))?;
        distro.enter(&dev, &build_id)?;
        entered.push(Entered::Distro);

        ok = provisioner.provision(&mut ctx, metrics.as_ref())?;

        Ok(())
    })();

    let had_error = result.is_err();
    if let Err(e) = &result {
        tracing::error!("{e:#}");
        ok = false;
    }

    // Release in strict reverse of acquisition, regardless of outcome.
    while let Some(stage) = entered.pop() {
        match stage {
            Entered::Distro => distro.exit(),
            Entered::Volume => volume.exit(cloud.as_mut(), &ctx, had_error),
            Entered::Finalizer => {
                if ok && !had_error {
                    match finalizer.finalize(cloud.as_mut(), &mut ctx) {
                        Ok(success) => ok = ok && success,
                        Err(e) => {
                            tracing::error!("finalize failed: {e:#}");
                            ok = false;
                        }
                    }
                }
                finalizer.exit();
            }
            Entered::Cloud => cloud.disconnect(),
            Entered::Metrics => metrics.exit(),
        }
    }

    Ok(ok)
}

fn stage_name(stage_names: &std::collections::BTreeMap<String, String>, kind: &str) -> Result<String> {
    stage_names
        .get(kind)
        .cloned()
        .ok_or_else(|| crate::error::GatorError::Config(format!("environment does not name a {kind} stage")).into())
}

fn build_id(package_arg: &str) -> String {
    let stamp = gator_utils::randword(8);
    let slug: String = package_arg
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("{slug}-{stamp}")
}

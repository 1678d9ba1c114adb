//! Command-line surface (§6). A single positional package argument,
//! global flags, and the fixed set of flags the finalizer stages
//! contribute (`-n/--name` plus the bundle-only flags). Stage flag
//! contribution is modeled as a fixed, known set here rather than a
//! dynamically mutated parser, since §6 names every flag up front.

use camino::Utf8PathBuf;
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "gator", about = "Build a cloud machine image by provisioning one package into a volume")]
pub struct Cli {
    /// Package file path or repository identifier to install.
    pub package: String,

    /// Named environment to run (defaults to `config.environments.default`).
    #[arg(long)]
    pub environment: Option<String>,

    /// Enable debug-level logging.
    #[arg(long)]
    pub debug: bool,

    /// Path to the main YAML configuration file.
    #[arg(long)]
    pub config: Option<Utf8PathBuf>,

    /// Explicit image name; overrides `name_format`-derived naming.
    #[arg(short = 'n', long)]
    pub name: Option<String>,

    /// Bundle finalizer: path to the X.509 cert used to sign the bundle.
    #[arg(long)]
    pub cert: Option<String>,

    /// Bundle finalizer: path to the matching private key.
    #[arg(long)]
    pub privatekey: Option<String>,

    /// Bundle finalizer: the EC2 user id that owns the bundle.
    #[arg(long)]
    pub ec2_user: Option<String>,

    /// Bundle finalizer: scratch directory for the copied volume image.
    #[arg(long)]
    pub tmpdir: Option<String>,

    /// Bundle finalizer: destination S3 bucket for the uploaded bundle.
    #[arg(long)]
    pub bucket: Option<String>,

    /// Bundle finalizer: requested root volume size in GiB, checked
    /// against `plugin_config.max_root_volume_size` (§8 scenario 2).
    #[arg(long)]
    pub root_volume_size: Option<u64>,

    /// Bundle finalizer: drop to an interactive shell after copying the
    /// volume, before bundling (developer aid).
    #[arg(long)]
    pub break_copy_volume: bool,

    /// Operator debugging aid: on error, leave the working volume
    /// attached instead of detaching and deleting it.
    #[arg(long)]
    pub preserve_on_error: bool,
}

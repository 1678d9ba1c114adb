//! Configuration loading: built-in defaults merged with an optional
//! main YAML file, plus the per-stage YAML override resolution
//! described in §6 ("Configuration files"). Mirrors the source tool's
//! `config_root`/`plugins.config_root` resolution rules.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::Deserialize;
use serde_yaml::Value;

/// `config.environments`: a default environment name plus a map of
/// environment name -> `{kind -> stage name}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Environments {
    pub default: String,
    #[serde(flatten)]
    pub map: BTreeMap<String, BTreeMap<String, String>>,
}

impl Environments {
    pub fn resolve(&self, name: &str) -> Result<&BTreeMap<String, String>> {
        self.map
            .get(name)
            .with_context(|| format!("no environment named {name:?} configured"))
    }
}

/// A per-stage configuration mapping merged from built-in defaults with
/// a per-stage YAML override file. Typed fields the orchestrator cares
/// about (`enabled`) live alongside a `serde_yaml::Mapping` overflow bag
/// for stage-specific scalars (`name_format`, `pkg_query_format`, …)
/// that the orchestrator does not need to know about by name.
#[derive(Debug, Clone, Default)]
pub struct PluginConfig {
    pub enabled: bool,
    values: serde_yaml::Mapping,
}

impl PluginConfig {
    pub fn from_defaults(defaults: &serde_yaml::Mapping) -> Self {
        let enabled = defaults
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        Self {
            enabled,
            values: defaults.clone(),
        }
    }

    /// Merge `overrides` onto `self`, with `overrides` winning per key
    /// (mirrors the source's `PluginConfig.dict_merge`).
    pub fn merged(mut self, overrides: &serde_yaml::Mapping) -> Self {
        for (k, v) in overrides {
            self.values.insert(k.clone(), v.clone());
        }
        if let Some(enabled) = self.values.get("enabled").and_then(Value::as_bool) {
            self.enabled = enabled;
        }
        self
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.values.get(key).and_then(Value::as_bool).unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(Value::as_sequence)
            .map(|seq| {
                seq.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Octal file mode from a YAML scalar: accepted as either a YAML
    /// integer or an octal-looking string (`"0755"`), per the decided
    /// open question on `policy_file_mode`.
    pub fn get_mode(&self, key: &str, default: u32) -> u32 {
        match self.values.get(key) {
            Some(Value::Number(n)) => n.as_u64().map(|v| v as u32).unwrap_or(default),
            Some(Value::String(s)) => u32::from_str_radix(s.trim_start_matches("0o"), 8).unwrap_or(default),
            _ => default,
        }
    }

    pub fn raw(&self) -> &serde_yaml::Mapping {
        &self.values
    }
}

/// `config.plugins.*`: the per-stage config-root resolution rule plus
/// the accumulated overrides, keyed by `entry_point.name`.
#[derive(Debug, Clone, Default)]
pub struct PluginsConfig {
    pub config_root: String,
    overrides: BTreeMap<String, PluginConfig>,
}

impl PluginsConfig {
    pub fn set(&mut self, full_name: &str, config: PluginConfig) {
        self.overrides.insert(full_name.to_string(), config);
    }

    pub fn get(&self, full_name: &str) -> PluginConfig {
        self.overrides.get(full_name).cloned().unwrap_or_default()
    }
}

/// The assembled, process-wide configuration: environments, working
/// directories, and per-stage plugin config.
#[derive(Debug, Clone)]
pub struct Config {
    /// The root against which a relative `plugins.config_root` resolves.
    pub config_root: Utf8PathBuf,
    pub log_root: Utf8PathBuf,
    pub gator_root: Utf8PathBuf,
    pub lock_dir: String,
    pub volume_dir: String,
    pub environments: Environments,
    pub plugins: PluginsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_root: Utf8PathBuf::from("/etc/gator"),
            log_root: Utf8PathBuf::from("/var/log/gator"),
            gator_root: Utf8PathBuf::from("/var/lib/gator"),
            lock_dir: "locks".to_string(),
            volume_dir: "volumes".to_string(),
            environments: Environments::default(),
            plugins: PluginsConfig {
                config_root: "plugins".to_string(),
                overrides: BTreeMap::new(),
            },
        }
    }
}

impl Config {
    /// Load built-in defaults, then merge an optional main YAML file on
    /// top if `path` is given and exists.
    #[context("Loading gator configuration")]
    pub fn load(path: Option<&Utf8Path>) -> Result<Self> {
        let mut config = Self::default();
        let Some(path) = path else {
            return Ok(config);
        };
        if !path.exists() {
            tracing::debug!("config file {path} not found, using defaults");
            return Ok(config);
        }
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        let raw: RawMainConfig = serde_yaml::from_str(&text).with_context(|| format!("parsing {path}"))?;
        if let Some(root) = raw.config_root {
            config.config_root = root.into();
        }
        if let Some(log_root) = raw.log_root {
            config.log_root = log_root.into();
        }
        if let Some(gator_root) = raw.gator_root {
            config.gator_root = gator_root.into();
        }
        if let Some(lock_dir) = raw.lock_dir {
            config.lock_dir = lock_dir;
        }
        if let Some(volume_dir) = raw.volume_dir {
            config.volume_dir = volume_dir;
        }
        if let Some(environments) = raw.environments {
            config.environments = environments;
        }
        if let Some(plugins_root) = raw.plugins_config_root {
            config.plugins.config_root = plugins_root;
        }
        Ok(config)
    }

    /// Resolve `plugins.config_root` against `config_root`, honoring
    /// absolute paths and `~`-expansion, per §6.
    pub fn plugin_conf_dir(&self) -> Utf8PathBuf {
        resolve_config_root(&self.config_root, &self.plugins.config_root)
    }

    /// Load and merge a single stage's YAML override file, returning
    /// `PluginConfig::default()` (enabled, empty) if it doesn't exist.
    pub fn load_plugin_config(&self, entry_point: &str, name: &str, defaults: &serde_yaml::Mapping) -> Result<PluginConfig> {
        let full_name = format!("{entry_point}.{name}");
        let file = self.plugin_conf_dir().join(format!("{full_name}.yml"));
        let base = PluginConfig::from_defaults(defaults);
        if !file.exists() {
            return Ok(base);
        }
        let text = std::fs::read_to_string(&file).with_context(|| format!("reading {file}"))?;
        let overrides: serde_yaml::Mapping =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {file}"))?;
        Ok(base.merged(&overrides))
    }
}

/// Home-relative (`~/...`), absolute, or relative-to-`config_root` resolution.
pub fn resolve_config_root(config_root: &Utf8Path, plugins_root: &str) -> Utf8PathBuf {
    if let Some(rest) = plugins_root.strip_prefix('~') {
        let home = std::env::var("HOME").unwrap_or_default();
        return Utf8PathBuf::from(format!("{home}{rest}"));
    }
    if plugins_root.starts_with('/') {
        return Utf8PathBuf::from(plugins_root);
    }
    config_root.join(plugins_root)
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
struct RawMainConfig {
    config_root: Option<PathBuf>,
    log_root: Option<PathBuf>,
    gator_root: Option<PathBuf>,
    lock_dir: Option<String>,
    volume_dir: Option<String>,
    environments: Option<Environments>,
    #[serde(rename = "plugins_config_root")]
    plugins_config_root: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_home_relative_config_root() {
        std::env::set_var("HOME", "/home/op");
        let root = resolve_config_root(Utf8Path::new("/etc/gator"), "~/gator-plugins");
        assert_eq!(root, Utf8PathBuf::from("/home/op/gator-plugins"));
    }

    #[test]
    fn resolves_absolute_config_root() {
        let root = resolve_config_root(Utf8Path::new("/etc/gator"), "/opt/plugins");
        assert_eq!(root, Utf8PathBuf::from("/opt/plugins"));
    }

    #[test]
    fn resolves_relative_config_root() {
        let root = resolve_config_root(Utf8Path::new("/etc/gator"), "plugins");
        assert_eq!(root, Utf8PathBuf::from("/etc/gator/plugins"));
    }

    #[test]
    fn plugin_config_merge_overrides_defaults() {
        let mut defaults = serde_yaml::Mapping::new();
        defaults.insert("enabled".into(), true.into());
        defaults.insert("name_format".into(), "{name}".into());
        let base = PluginConfig::from_defaults(&defaults);

        let mut overrides = serde_yaml::Mapping::new();
        overrides.insert("name_format".into(), "{name}-{version}".into());
        let merged = base.merged(&overrides);

        assert!(merged.enabled);
        assert_eq!(merged.get_str("name_format").as_deref(), Some("{name}-{version}"));
    }

    #[test]
    fn mode_parses_octal_string_and_int() {
        let mut values = serde_yaml::Mapping::new();
        values.insert("mode_str".into(), "0755".into());
        values.insert("mode_int".into(), 493.into()); // 0o755
        let cfg = PluginConfig::from_defaults(&values);
        assert_eq!(cfg.get_mode("mode_str", 0), 0o755);
        assert_eq!(cfg.get_mode("mode_int", 0), 493);
        assert_eq!(cfg.get_mode("missing", 0o644), 0o644);
    }
}

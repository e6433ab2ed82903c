use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use spakit::{ReadyState, StartOptions};
use std::collections::HashMap;
use std::path::Path;

/// Host configuration: typed core and logging sections plus a per-module bag.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub core: CoreConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
    /// Directory containing per-module YAML files (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules_dir: Option<String>,
    /// Per-module bag: module id → arbitrary JSON/YAML value, read as [`ModuleEntry`].
    #[serde(default)]
    pub modules: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CoreConfig {
    /// Overrides the version reported by the Core.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// State of the host document when the Core is initialized.
    #[serde(default)]
    pub initial_ready_state: ReadyState,
    /// Built-in extensions to install, in order.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec![spakit::extensions::AUTOSUBSCRIBE_EXTENSION.to_string()]
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            version: None,
            initial_ready_state: ReadyState::Complete,
            extensions: default_extensions(),
        }
    }
}

/// Logging configuration - maps targets to their logging settings.
/// Key "default" is the catch-all for logs that don't match an explicit target.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Section {
    #[serde(default)]
    pub console_level: String, // "info", "debug", "error", "off"
    /// JSON log file; only read from the "default" section. Empty disables it.
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// Typed view of one entry of [`AppConfig::modules`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ModuleEntry {
    /// Start the module once the host is up.
    #[serde(default)]
    pub autostart: bool,
    /// Instance ids to start; empty means one instance named after the module.
    #[serde(default)]
    pub instances: Vec<String>,
    /// Props handed to every started instance.
    #[serde(default)]
    pub props: Option<serde_json::Value>,
    /// Module-private settings, served by the "config" service.
    #[serde(default)]
    pub config: serde_json::Value,
}

impl ModuleEntry {
    pub fn start_options(&self) -> Vec<StartOptions> {
        let base = StartOptions {
            instance_id: None,
            props: self.props.clone(),
        };
        if self.instances.is_empty() {
            return vec![base];
        }
        self.instances
            .iter()
            .map(|id| base.clone().with_instance_id(id.clone()))
            .collect()
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/spakit.log".to_string(),
            file_level: "debug".to_string(),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            core: CoreConfig::default(),
            logging: Some(default_logging_config()),
            modules_dir: None,
            modules: HashMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Optional sections stay None unless YAML/ENV provide them.
        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            // Example: APP__CORE__VERSION=1.2.3 maps to core.version
            .merge(Env::prefixed("APP__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())?;

        if let Some(dir) = config.modules_dir.clone() {
            let dir = resolve_relative(&dir, config_path.as_ref());
            merge_module_files(&mut config.modules, dir)?;
        }

        Ok(config)
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Ok(Self::default()),
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        // Set logging level based on verbose flags for "default" section.
        let logging = self.logging.get_or_insert_with(default_logging_config);
        let default_section = logging.entry("default".to_string()).or_default();
        default_section.console_level = match args.verbose {
            0 => default_section.console_level.clone(), // keep
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };
    }

    /// Typed entry for `module_id`, if the bag has one.
    pub fn module_entry(&self, module_id: &str) -> Result<Option<ModuleEntry>> {
        self.modules
            .get(module_id)
            .map(|raw| {
                ModuleEntry::deserialize(raw)
                    .with_context(|| format!("invalid configuration for module '{module_id}'"))
            })
            .transpose()
    }

    /// Every module entry, sorted by module id.
    pub fn module_entries(&self) -> Result<Vec<(String, ModuleEntry)>> {
        let mut ids: Vec<&String> = self.modules.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let entry = self.module_entry(id)?.unwrap_or_default();
                Ok((id.clone(), entry))
            })
            .collect()
    }

    /// Check what serde cannot: extension names and module entries.
    pub fn validate(&self) -> Result<()> {
        for name in &self.core.extensions {
            if spakit::extensions::builtin(name).is_none() {
                bail!(
                    "unknown extension '{name}' (known: {})",
                    spakit::extensions::BUILTIN_EXTENSIONS.join(", ")
                );
            }
        }
        for (id, entry) in self.module_entries()? {
            if entry.instances.iter().any(|i| i.trim().is_empty()) {
                bail!("module '{id}' lists an empty instance id");
            }
        }
        Ok(())
    }
}

/// Command line arguments structure.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub print_config: bool,
    pub verbose: u8,
}

/// Relative `modules_dir` values are taken from the config file's directory.
fn resolve_relative(dir: &str, config_path: &Path) -> std::path::PathBuf {
    let p = Path::new(dir);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    config_path
        .parent()
        .map(|parent| parent.join(p))
        .unwrap_or_else(|| p.to_path_buf())
}

fn merge_module_files(
    bag: &mut HashMap<String, serde_json::Value>,
    dir: impl AsRef<Path>,
) -> Result<()> {
    use std::fs;
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        if ext != "yml" && ext != "yaml" {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let val: serde_yaml::Value = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        // files fill gaps; inline entries win
        bag.entry(name.to_string())
            .or_insert(serde_json::to_value(val)?);
    }
    Ok(())
}

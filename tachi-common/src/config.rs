//! Configuration loading and root folder resolution
//!
//! Root folder resolution priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`TACHI_ROOT_FOLDER`)
//! 3. TOML config file (`~/.config/tachi/<module>.toml`)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or malformed TOML file never stops a module from starting:
//! a warning is logged and compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "TACHI_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "tachi.db";

/// Default EventBus capacity when the TOML file does not set one
pub const DEFAULT_EVENT_BUS_CAPACITY: usize = 256;

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default tracing level (overridden by RUST_LOG)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file path (stdout when absent)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// Module TOML configuration
///
/// Every field is optional so older config files keep parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Capacity of the process EventBus
    #[serde(default)]
    pub event_bus_capacity: Option<usize>,
}

impl TomlConfig {
    /// EventBus capacity, falling back to the compiled default
    pub fn event_bus_capacity(&self) -> usize {
        self.event_bus_capacity
            .filter(|c| *c > 0)
            .unwrap_or(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/tachi (or /var/lib/tachi for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("tachi"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/tachi"))
    } else if cfg!(target_os = "macos") {
        // ~/Library/Application Support/tachi
        dirs::data_dir()
            .map(|d| d.join("tachi"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/tachi"))
    } else if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\tachi
        dirs::data_local_dir()
            .map(|d| d.join("tachi"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\tachi"))
    } else {
        PathBuf::from("./tachi_data")
    }
}

/// Path of a module's TOML config file (`~/.config/tachi/<module>.toml`)
pub fn module_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("tachi").join(format!("{}.toml", module_name)))
}

/// Read a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML {} failed: {}", path.display(), e)))
}

/// Write a TOML config file, creating parent directories
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    std::fs::write(path, content)?;
    Ok(())
}

/// Load a module's TOML config, falling back to defaults
///
/// Missing files are silent; unreadable or malformed files log a warning.
pub fn load_module_config(module_name: &str) -> TomlConfig {
    let Some(path) = module_config_path(module_name) else {
        return TomlConfig::default();
    };

    if !path.exists() {
        debug!(path = %path.display(), "No TOML config file, using defaults");
        return TomlConfig::default();
    }

    match load_toml_config(&path) {
        Ok(config) => config,
        Err(e) => {
            warn!("{} - using defaults", e);
            TomlConfig::default()
        }
    }
}

/// Resolves the root folder for a module
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_config: Option<TomlConfig>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_config: None,
        }
    }

    /// Use a command-line root folder (highest priority)
    pub fn with_cli_arg(mut self, cli_arg: Option<PathBuf>) -> Self {
        self.cli_arg = cli_arg;
        self
    }

    /// Use an already-loaded TOML config instead of reading the module file
    pub fn with_toml_config(mut self, config: TomlConfig) -> Self {
        self.toml_config = Some(config);
        self
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        let toml_root = match &self.toml_config {
            Some(config) => config.root_folder.clone(),
            None => load_module_config(&self.module_name).root_folder,
        };
        if let Some(path) = toml_root {
            return path;
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Creates the root folder and names the files inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

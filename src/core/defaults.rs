use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::paths;

/// Root configuration structure for evgpipe.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvgpipeConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via evgpipe.json.
/// Command-line flags take precedence over every value here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    /// Descriptor used when none is given on the command line.
    #[serde(default = "default_descriptor")]
    pub descriptor: String,

    /// Shared task working directory. Unset means a fresh temp directory per run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Expansions file loaded before `--expansion` flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansions_file: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            descriptor: default_descriptor(),
            work_dir: None,
            shell: default_shell(),
            jobs: default_jobs(),
            expansions_file: None,
        }
    }
}

impl Defaults {
    pub fn work_dir_path(&self) -> Option<PathBuf> {
        self.work_dir.as_deref().map(paths::expand)
    }

    pub fn expansions_file_path(&self) -> Option<PathBuf> {
        self.expansions_file.as_deref().map(paths::expand)
    }

    pub fn descriptor_path(&self) -> PathBuf {
        paths::expand(&self.descriptor)
    }
}

fn default_descriptor() -> String {
    "evergreen.yml".to_string()
}

fn default_shell() -> String {
    "sh".to_string()
}

fn default_jobs() -> usize {
    1
}

/// Load defaults, merging file config with built-in defaults.
pub fn load_defaults() -> Result<Defaults> {
    Ok(load_config()?.defaults)
}

/// Load the full evgpipe.json config.
///
/// Without a resolvable config directory or file the built-in defaults apply;
/// a file that exists but does not parse is an error.
pub fn load_config() -> Result<EvgpipeConfig> {
    match paths::evgpipe_json() {
        Ok(path) => load_config_from(&path),
        Err(_) => Ok(EvgpipeConfig::default()),
    }
}

/// Load config from an explicit file. A missing file yields built-in defaults.
pub fn load_config_from(path: &Path) -> Result<EvgpipeConfig> {
    if !path.exists() {
        return Ok(EvgpipeConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    let config: EvgpipeConfig = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;

    if config.defaults.jobs == 0 {
        return Err(Error::config_invalid_value(
            "defaults.jobs",
            Some("0".to_string()),
            "jobs must be at least 1",
        ));
    }

    Ok(config)
}

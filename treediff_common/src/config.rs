use crate::{Result, TreeDiffError};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "treediff.toml";

/// Application configuration with default comparison options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Match entry names case-insensitively
    #[serde(default)]
    pub ignore_case: bool,

    /// Allow the line-normalized text comparison method for text files
    #[serde(default)]
    pub text_compare: bool,

    /// Follow symbolic links when building trees from a live filesystem
    #[serde(default)]
    pub follow_symlinks: bool,

    /// Maximum descent depth for the subtree alignment search
    #[serde(default = "default_align_max_depth")]
    pub align_max_depth: usize,

    /// Digest algorithms written into snapshots ("crc32", "md5")
    #[serde(default = "default_snapshot_digests")]
    pub snapshot_digests: Vec<String>,
}

fn default_align_max_depth() -> usize {
    8
}

fn default_snapshot_digests() -> Vec<String> {
    vec!["crc32".to_string(), "md5".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ignore_case: false,
            text_compare: false,
            follow_symlinks: false,
            align_max_depth: default_align_max_depth(),
            snapshot_digests: default_snapshot_digests(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    pub path: PathBuf,
    pub exists: bool,
    pub portable: bool,
}

pub fn load_config(prefer_portable: bool) -> Result<LoadedConfig> {
    let (path, portable) = resolve_config_path(prefer_portable)?;
    let exists = path.exists();

    let config = if exists {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).map_err(|e| TreeDiffError::Serialization(e.to_string()))?
    } else {
        AppConfig::default()
    };

    Ok(LoadedConfig {
        config,
        path,
        exists,
        portable,
    })
}

pub fn ensure_config(prefer_portable: bool) -> Result<LoadedConfig> {
    let loaded = load_config(prefer_portable)?;
    if !loaded.exists {
        save_config(&loaded.path, &loaded.config)?;
    }
    Ok(loaded)
}

pub fn save_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let data = toml::to_string_pretty(config)
        .map_err(|e| TreeDiffError::Serialization(e.to_string()))?;
    fs::write(path, data)?;
    Ok(())
}

fn resolve_config_path(prefer_portable: bool) -> Result<(PathBuf, bool)> {
    if let Some(portable_path) = portable_config_path() {
        if prefer_portable || portable_path.exists() {
            return Ok((portable_path, true));
        }
    }

    let dirs = ProjectDirs::from("", "treediff", "treediff")
        .ok_or_else(|| TreeDiffError::Config("Unable to determine config directory".to_string()))?;
    Ok((dirs.config_dir().join(CONFIG_FILE_NAME), false))
}

fn portable_config_path() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.parent().map(|dir| dir.join(CONFIG_FILE_NAME)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert!(!config.ignore_case);
        assert!(!config.text_compare);
        assert_eq!(config.align_max_depth, 8);
        assert_eq!(config.snapshot_digests, vec!["crc32", "md5"]);
    }

    #[test]
    fn test_config_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("treediff.toml");

        let mut config = AppConfig::default();
        config.ignore_case = true;
        config.align_max_depth = 3;

        save_config(&path, &config).unwrap();

        let data = fs::read_to_string(&path).unwrap();
        let reloaded: AppConfig = toml::from_str(&data).unwrap();
        assert!(reloaded.ignore_case);
        assert_eq!(reloaded.align_max_depth, 3);
    }

    #[test]
    fn test_config_partial_file_uses_defaults() {
        let reloaded: AppConfig = toml::from_str("ignore_case = true\n").unwrap();
        assert!(reloaded.ignore_case);
        assert_eq!(reloaded.align_max_depth, 8);
        assert_eq!(reloaded.snapshot_digests, vec!["crc32", "md5"]);
    }
}

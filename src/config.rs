//! Configuration for contentlib catalogues.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CONTENTLIB_HOME, CONTENTLIB_ENABLED, CONTENTLIB_DISABLED)
//! 2. Config file (.contentlib/config.yaml)
//! 3. Defaults (~/.contentlib)
//!
//! Config file discovery:
//! - Searches current directory and parents for .contentlib/config.yaml
//! - `paths.home` is relative to the .contentlib/ directory, every other
//!   path is relative to the project root (the parent of .contentlib/)

pub mod paths;

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::ManagerSettings;
use crate::library::{ContentDirectories, FileManager, FolderKind, RecycleBin};
use crate::watch::{ChangeShield, WatchSettings, WatchedManager};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub loading: Option<LoadingConfig>,
    #[serde(default)]
    pub watch: Option<WatchConfig>,
    #[serde(default)]
    pub content: Option<ContentConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to .contentlib/)
    pub home: Option<String>,
    /// Enabled root (relative to project root)
    pub enabled: Option<String>,
    /// Disabled root (relative to project root)
    pub disabled: Option<String>,
    /// Recycle bin (relative to project root)
    pub recycle: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoadingConfig {
    pub concurrency: Option<usize>,
    pub max_passes: Option<usize>,
    pub eager: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    pub debounce_ms: Option<u64>,
    pub shield_grace_ms: Option<u64>,
    #[serde(default)]
    pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    /// Set to false for catalogues without a disabled root
    pub supports_disabling: Option<bool>,
    #[serde(default)]
    pub attachment_suffixes: Vec<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// State directory
    pub home: PathBuf,
    /// Enabled root
    pub enabled: PathBuf,
    /// Disabled root, if disabling is supported
    pub disabled: Option<PathBuf>,
    /// Recycle bin directory
    pub recycle: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Bulk loading settings
    pub manager: ManagerSettings,
    /// Watch settings
    pub watch: WatchSettings,
    /// How long events stay suppressed after our own file operations
    pub shield_grace: Duration,
    /// Sibling files that travel with an item
    pub attachment_suffixes: Vec<String>,
}

impl ResolvedConfig {
    /// Directories provider for the configured roots
    pub fn directories(&self) -> ContentDirectories {
        ContentDirectories::new(&self.enabled, self.disabled.clone())
    }

    pub fn recycle_bin(&self) -> RecycleBin {
        RecycleBin::new(&self.recycle)
    }

    pub fn folder_kind(&self) -> FolderKind {
        FolderKind::new(self.attachment_suffixes.clone())
    }

    /// Watched folder catalogue over the configured roots
    pub fn folder_manager(&self) -> Result<WatchedManager<FolderKind>> {
        let directories = self.directories();
        directories.ensure_roots().with_context(|| {
            format!(
                "Failed to create content directories under {}",
                self.enabled.display()
            )
        })?;

        let files = FileManager::with_settings(
            self.folder_kind(),
            Arc::new(directories),
            Arc::new(self.recycle_bin()),
            self.manager.clone(),
            ChangeShield::new(self.shield_grace),
        );
        Ok(WatchedManager::new(files, self.watch.clone()))
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = paths::config_file_in(&current);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    resolve_config(find_config_file(), |key| std::env::var(key).ok())
}

/// Resolve configuration from an optional config file and an environment
fn resolve_config(
    config_file: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ResolvedConfig> {
    let default_home = paths::default_home()?;

    let file = match &config_file {
        Some(path) => Some(load_config_file(path)?),
        None => None,
    };

    // .contentlib/ and the project root around it
    let config_dir = config_file
        .as_deref()
        .and_then(Path::parent)
        .unwrap_or(Path::new("."));
    let base_dir = config_dir.parent().unwrap_or(Path::new("."));

    let file_paths = file.as_ref().map(|f| f.paths.clone()).unwrap_or_default();

    // Resolve home path
    let home = if let Some(env_home) = env(paths::ENV_HOME) {
        PathBuf::from(env_home)
    } else if let Some(ref home_path) = file_paths.home {
        resolve_path(config_dir, home_path)
    } else {
        default_home
    };

    let content = file.as_ref().and_then(|f| f.content.clone());
    let supports_disabling = content
        .as_ref()
        .and_then(|c| c.supports_disabling)
        .unwrap_or(true);

    let enabled = if let Some(env_enabled) = env(paths::ENV_ENABLED) {
        PathBuf::from(env_enabled)
    } else if let Some(ref enabled) = file_paths.enabled {
        resolve_path(base_dir, enabled)
    } else {
        paths::enabled_dir(&home)
    };

    let disabled = if !supports_disabling {
        None
    } else if let Some(env_disabled) = env(paths::ENV_DISABLED) {
        Some(PathBuf::from(env_disabled))
    } else if let Some(ref disabled) = file_paths.disabled {
        Some(resolve_path(base_dir, disabled))
    } else {
        Some(paths::disabled_dir(&home))
    };

    let recycle = match file_paths.recycle {
        Some(ref recycle) => resolve_path(base_dir, recycle),
        None => paths::recycle_dir(&home),
    };

    // Loading settings
    let loading = file.as_ref().and_then(|f| f.loading.clone());
    let defaults = ManagerSettings::default();
    let manager = ManagerSettings {
        load_concurrency: loading
            .as_ref()
            .and_then(|l| l.concurrency)
            .unwrap_or(defaults.load_concurrency),
        max_load_passes: loading
            .as_ref()
            .and_then(|l| l.max_passes)
            .unwrap_or(defaults.max_load_passes),
        eager_load_when_observed: loading
            .as_ref()
            .and_then(|l| l.eager)
            .unwrap_or(defaults.eager_load_when_observed),
    };

    // Watch settings
    let watch_file = file.as_ref().and_then(|f| f.watch.clone());
    let watch = WatchSettings {
        debounce: watch_file
            .as_ref()
            .and_then(|w| w.debounce_ms)
            .map(Duration::from_millis)
            .unwrap_or_else(|| WatchSettings::default().debounce),
        ignore_patterns: watch_file
            .as_ref()
            .map(|w| w.ignore.clone())
            .unwrap_or_default(),
    };
    let shield_grace = Duration::from_millis(
        watch_file
            .as_ref()
            .and_then(|w| w.shield_grace_ms)
            .unwrap_or(500),
    );

    Ok(ResolvedConfig {
        home,
        enabled,
        disabled,
        recycle,
        config_file,
        manager,
        watch,
        shield_grace,
        attachment_suffixes: content.map(|c| c.attachment_suffixes).unwrap_or_default(),
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(temp: &TempDir, body: &str) -> PathBuf {
        let dir = temp.path().join(".contentlib");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "{}", body).unwrap();
        path
    }

    #[test]
    fn test_defaults_without_file() {
        let config = resolve_config(None, no_env).unwrap();

        let expected_home = dirs::home_dir().unwrap().join(".contentlib");
        assert_eq!(config.home, expected_home);
        assert_eq!(config.enabled, expected_home.join("content"));
        assert_eq!(config.disabled, Some(expected_home.join("content-disabled")));
        assert_eq!(config.recycle, expected_home.join("recycle"));
        assert_eq!(config.manager.load_concurrency, 3);
        assert_eq!(config.manager.max_load_passes, 64);
        assert_eq!(config.watch.debounce, Duration::from_millis(300));
        assert_eq!(config.shield_grace, Duration::from_millis(500));
        assert!(config.config_file.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("CONTENTLIB_HOME", "/srv/contentlib"),
            ("CONTENTLIB_DISABLED", "/srv/off"),
        ]
        .into_iter()
        .collect();

        let config = resolve_config(None, |key| env.get(key).map(|v| v.to_string())).unwrap();

        assert_eq!(config.home, PathBuf::from("/srv/contentlib"));
        assert_eq!(config.enabled, PathBuf::from("/srv/contentlib/content"));
        assert_eq!(config.disabled, Some(PathBuf::from("/srv/off")));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
paths:
  home: ./
  enabled: content/on
loading:
  concurrency: 8
watch:
  debounce_ms: 100
  ignore: ["*.tmp", "**/.git/**"]
content:
  attachment_suffixes: [".preview.png"]
"#,
        );

        let file = load_config_file(&path).unwrap();
        assert_eq!(file.version, "1.0");
        assert_eq!(file.paths.enabled, Some("content/on".to_string()));

        let config = resolve_config(Some(path), no_env).unwrap();
        assert_eq!(config.enabled, temp.path().join("content/on"));
        assert_eq!(config.manager.load_concurrency, 8);
        assert_eq!(config.manager.max_load_passes, 64);
        assert_eq!(config.watch.debounce, Duration::from_millis(100));
        assert_eq!(config.watch.ignore_patterns.len(), 2);
        assert_eq!(config.attachment_suffixes, vec![".preview.png"]);
    }

    #[test]
    fn test_disabling_can_be_turned_off() {
        let temp = TempDir::new().unwrap();
        let path = write_config(
            &temp,
            r#"
version: "1.0"
content:
  supports_disabling: false
"#,
        );

        let config = resolve_config(Some(path), no_env).unwrap();
        assert!(config.disabled.is_none());
        assert!(!crate::library::Directories::supports_disabling(&config.directories()));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project");

        assert_eq!(
            resolve_path(&base, "./subdir"),
            PathBuf::from("/home/user/project/subdir")
        );
        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
    }
}

//! Canonical names and default locations.
//!
//! Single source of truth - import this instead of hardcoding paths.
//!
//! ## Default Layout
//!
//! | Location | Purpose |
//! |----------|---------|
//! | `~/.contentlib/content` | Enabled root |
//! | `~/.contentlib/content-disabled` | Disabled root |
//! | `~/.contentlib/recycle` | Recycle bin |
//! | `<project>/.contentlib/config.yaml` | Optional config file |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Directory holding the config file, searched upwards from the cwd
pub const CONFIG_DIR: &str = ".contentlib";

/// Config file name inside [`CONFIG_DIR`]
pub const CONFIG_FILE: &str = "config.yaml";

pub const ENABLED_DIR: &str = "content";
pub const DISABLED_DIR: &str = "content-disabled";
pub const RECYCLE_DIR: &str = "recycle";

/// Environment variable overriding the home directory
pub const ENV_HOME: &str = "CONTENTLIB_HOME";

/// Environment variable overriding the enabled root
pub const ENV_ENABLED: &str = "CONTENTLIB_ENABLED";

/// Environment variable overriding the disabled root
pub const ENV_DISABLED: &str = "CONTENTLIB_DISABLED";

/// Default home directory (~/.contentlib)
pub fn default_home() -> Result<PathBuf> {
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR))
}

/// Config file location for a project root
pub fn config_file_in(project_root: &Path) -> PathBuf {
    project_root.join(CONFIG_DIR).join(CONFIG_FILE)
}

pub fn enabled_dir(home: &Path) -> PathBuf {
    home.join(ENABLED_DIR)
}

pub fn disabled_dir(home: &Path) -> PathBuf {
    home.join(DISABLED_DIR)
}

pub fn recycle_dir(home: &Path) -> PathBuf {
    home.join(RECYCLE_DIR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_home_is_hidden_dir() {
        let home = default_home().unwrap();
        assert!(home.ends_with(".contentlib"));
    }

    #[test]
    fn test_layout_under_home() {
        let home = Path::new("/data/.contentlib");
        assert_eq!(enabled_dir(home), PathBuf::from("/data/.contentlib/content"));
        assert_eq!(
            disabled_dir(home),
            PathBuf::from("/data/.contentlib/content-disabled")
        );
        assert_eq!(recycle_dir(home), PathBuf::from("/data/.contentlib/recycle"));
        assert_eq!(
            config_file_in(Path::new("/project")),
            PathBuf::from("/project/.contentlib/config.yaml")
        );
    }
}

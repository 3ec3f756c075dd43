//! XDG Base Directory support.

use std::path::{Path, PathBuf};

const APP_DIR: &str = "tabexec";

/// XDG directory paths for tabexec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XdgDirs {
    /// Config directory (~/.config/tabexec or XDG_CONFIG_HOME/tabexec)
    pub config: PathBuf,
}

impl XdgDirs {
    /// Get XDG directories, respecting environment variables.
    pub fn new() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::resolve(&home, |key| std::env::var(key).ok())
    }

    /// Resolve against `home`, reading overrides through `lookup`.
    pub fn resolve<F>(home: &Path, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = lookup("XDG_CONFIG_HOME")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home.join(".config"))
            .join(APP_DIR);

        Self { config }
    }

    /// Path of the settings file.
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.json")
    }
}

impl Default for XdgDirs {
    fn default() -> Self {
        Self::new()
    }
}

//! Platform directory lookup.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{PlError, PlResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Application data directory (database, logs, config).
    ///
    /// - Windows: `%APPDATA%/Parley`
    /// - macOS: `~/Library/Application Support/Parley`
    /// - Linux: `~/.local/share/Parley`
    pub fn data_dir() -> PlResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| PlError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Human-readable platform name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_name() {
        assert_eq!(Platform::MacOs.name(), "macOS");
        assert_eq!(Platform::Linux.to_string(), "Linux");
    }

    #[test]
    fn test_data_dir_ends_with_app_name() {
        if let Ok(dir) = Platform::data_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }
}

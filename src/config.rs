//! Paths of the on-disk workspace and logging setup.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const DEFAULT_HOME: &str = "~/.fgp/services/webtest";

/// Default `tracing` directives, overridden by `RUST_LOG`.
pub const DEFAULT_LOG_FILTER: &str = "fgp_webtest=debug,fgp_daemon=debug,chromiumoxide=warn";

/// Every file and directory the daemon uses, derived from one home directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub home: PathBuf,
}

impl Settings {
    /// Settings rooted at `home`; a leading `~` is expanded.
    pub fn new(home: &str) -> Self {
        Self {
            home: PathBuf::from(shellexpand::tilde(home).into_owned()),
        }
    }

    pub fn test_cases_file(&self) -> PathBuf {
        self.home.join("test_cases.json")
    }

    pub fn schedules_file(&self) -> PathBuf {
        self.home.join("scheduled_tests.json")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.home.join("results")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.home.join("screenshots")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.home.join("daemon.sock")
    }

    pub fn pid_file(&self) -> PathBuf {
        let mut pid = self.socket_path().into_os_string();
        pid.push(".pid");
        PathBuf::from(pid)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.home.clone(), self.results_dir(), self.screenshots_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new(DEFAULT_HOME)
    }
}

/// Install the global `tracing` subscriber. Safe to call more than once.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_home() {
        let settings = Settings::new("/tmp/webtest-home");
        assert_eq!(
            settings.test_cases_file(),
            PathBuf::from("/tmp/webtest-home/test_cases.json")
        );
        assert_eq!(
            settings.socket_path(),
            PathBuf::from("/tmp/webtest-home/daemon.sock")
        );
        assert_eq!(
            settings.pid_file(),
            PathBuf::from("/tmp/webtest-home/daemon.sock.pid")
        );
    }

    #[test]
    fn test_tilde_is_expanded() {
        let settings = Settings::new("~/webtest");
        assert!(!settings.home().to_string_lossy().starts_with('~'));
    }

    #[test]
    fn test_ensure_dirs_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::new(dir.path().join("home").to_str().unwrap());
        settings.ensure_dirs().unwrap();
        assert!(settings.results_dir().is_dir());
        assert!(settings.screenshots_dir().is_dir());
    }
}

//! Executable resolution with fallbacks for GUI-launched supervisors
//!
//! A supervisor started from a desktop launcher often inherits a minimal
//! `PATH`, so tools installed through Homebrew, an SDK installer or a version
//! manager are invisible to a plain search path lookup.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{ProcessError, Result};

/// Locates interpreter and tool binaries on disk
#[derive(Debug, Clone)]
pub struct ExecutableResolver {
    /// User home used to derive per-user install locations
    home: Option<PathBuf>,
    /// Overrides the process `PATH` when set
    search_path: Option<OsString>,
    /// System-wide directories searched after the search path
    system_dirs: Vec<PathBuf>,
}

impl ExecutableResolver {
    /// Resolver using the process `PATH` and the current user's home
    pub fn new() -> Self {
        Self {
            home: dirs::home_dir(),
            search_path: None,
            system_dirs: default_system_dirs(),
        }
    }

    /// Use a different home directory for per-user locations
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Replace the search path consulted first
    pub fn with_search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Replace the system-wide fallback directories
    pub fn with_system_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.system_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve `name` to an existing executable path
    pub fn resolve(&self, name: &str) -> Result<PathBuf> {
        let found = match &self.search_path {
            Some(paths) => which::which_in(name, Some(paths), self.cwd()),
            None => which::which(name),
        };
        if let Ok(path) = found {
            debug!(name = %name, path = %path.display(), "Resolved executable from search path");
            return Ok(path);
        }

        for dir in self.fallback_dirs() {
            let candidate = dir.join(name);
            if candidate.is_file() {
                debug!(name = %name, path = %candidate.display(), "Resolved executable from fallback location");
                return Ok(candidate);
            }
        }

        warn!(name = %name, "Executable not found");
        Err(ProcessError::ExecutableNotFound {
            name: name.to_string(),
        })
    }

    /// Ordered fallback directories searched after the search path misses
    pub fn fallback_dirs(&self) -> Vec<PathBuf> {
        let mut dirs = self.system_dirs.clone();

        if let Some(home) = &self.home {
            dirs.push(home.join(".dotnet"));
            dirs.push(home.join(".dotnet").join("tools"));
            dirs.push(home.join(".local").join("bin"));
            dirs.push(home.join(".volta").join("bin"));
            dirs.extend(version_manager_bins(&home.join(".nvm").join("versions").join("node")));
        }

        dirs
    }

    fn cwd(&self) -> PathBuf {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"))
    }
}

impl Default for ExecutableResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve using the default resolver
pub fn resolve(name: &str) -> Result<PathBuf> {
    ExecutableResolver::new().resolve(name)
}

fn default_system_dirs() -> Vec<PathBuf> {
    let dirs: &[&str] = if cfg!(windows) {
        &["C:\\Program Files\\nodejs", "C:\\Program Files\\dotnet"]
    } else {
        &[
            "/usr/local/bin",
            "/opt/homebrew/bin",
            "/usr/bin",
            "/usr/local/share/dotnet",
            "/usr/share/dotnet",
        ]
    };
    dirs.iter().map(PathBuf::from).collect()
}

/// `bin` directories of a version manager's install root, newest version first
fn version_manager_bins(root: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(root) else {
        return Vec::new();
    };

    let mut versions: Vec<(Option<Vec<u64>>, PathBuf)> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            (parse_version(&name), entry.path().join("bin"))
        })
        .collect();

    // Parsed versions descending; unparseable names last, by name.
    versions.sort_by(|(a, pa), (b, pb)| match (a, b) {
        (Some(a), Some(b)) => b.cmp(a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => pa.cmp(pb),
    });

    versions.into_iter().map(|(_, bin)| bin).collect()
}

fn parse_version(name: &str) -> Option<Vec<u64>> {
    let trimmed = name.strip_prefix('v').unwrap_or(name);
    trimmed
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

//! Process families
//!
//! A family is the small amount of per-runtime knowledge the generic
//! [`Runner`](crate::runner::Runner) needs: which executable to launch, with
//! which arguments, and how to read its output.

use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use crate::classifier::{DotnetRules, NpmRules, OutputRules};
use crate::types::ServiceEnv;

/// How a start request launches the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LaunchMode {
    #[default]
    Standard,
    /// Fast path that skips the family's build step where it has one
    SkipBuild,
}

/// Per-family launch and classification strategy
pub trait FamilyStrategy: Send + Sync + std::fmt::Debug {
    /// Family name as it appears in `ServiceConfig::service_type`
    fn name(&self) -> &'static str;

    /// Executable looked up by the resolver
    fn executable(&self) -> &str;

    /// Arguments for the given launch mode
    fn args(&self, mode: LaunchMode) -> Vec<String>;

    /// Output rules shared by both pipes of a child
    fn rules(&self) -> Arc<dyn OutputRules>;

    /// Adjust the child environment once the executable is resolved
    fn prepare_env(&self, _executable: &Path, _env: &mut ServiceEnv) {}
}

/// Families known to the supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProcessFamily {
    Npm,
    /// Also used for absent or unrecognised types
    #[default]
    Dotnet,
}

impl ProcessFamily {
    /// Map a configured service type to its family
    pub fn from_type(service_type: &str) -> Self {
        match service_type.trim().to_lowercase().as_str() {
            "npm" => ProcessFamily::Npm,
            _ => ProcessFamily::Dotnet,
        }
    }

    /// Strategy object for this family
    pub fn strategy(self) -> Arc<dyn FamilyStrategy> {
        match self {
            ProcessFamily::Npm => Arc::new(NpmFamily),
            ProcessFamily::Dotnet => Arc::new(DotnetFamily),
        }
    }
}

/// `npm run dev`
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmFamily;

impl FamilyStrategy for NpmFamily {
    fn name(&self) -> &'static str {
        "npm"
    }

    fn executable(&self) -> &str {
        "npm"
    }

    fn args(&self, _mode: LaunchMode) -> Vec<String> {
        vec!["run".to_string(), "dev".to_string()]
    }

    fn rules(&self) -> Arc<dyn OutputRules> {
        Arc::new(NpmRules)
    }

    /// npm shells out to `node`, which is usually installed beside it but not
    /// necessarily on the supervisor's PATH (GUI launches, nvm, volta).
    fn prepare_env(&self, executable: &Path, env: &mut ServiceEnv) {
        let Some(dir) = executable.parent() else {
            return;
        };
        let current = env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        let mut paths = vec![dir.to_path_buf()];
        paths.extend(std::env::split_paths(&current));
        if let Ok(joined) = std::env::join_paths(paths) {
            env.insert("PATH".to_string(), joined.to_string_lossy().into_owned());
        }
    }
}

/// `dotnet run`, or `dotnet run --no-build` on the fast path
#[derive(Debug, Clone, Copy, Default)]
pub struct DotnetFamily;

impl FamilyStrategy for DotnetFamily {
    fn name(&self) -> &'static str {
        "dotnet"
    }

    fn executable(&self) -> &str {
        "dotnet"
    }

    fn args(&self, mode: LaunchMode) -> Vec<String> {
        let mut args = vec!["run".to_string()];
        if mode == LaunchMode::SkipBuild {
            args.push("--no-build".to_string());
        }
        args
    }

    fn rules(&self) -> Arc<dyn OutputRules> {
        Arc::new(DotnetRules)
    }
}

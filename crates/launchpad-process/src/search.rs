//! Discovery of processes the supervisor does not own
//!
//! Results are a best-effort snapshot: a listed process may have exited, or a
//! new one appeared, by the time the caller acts on the list.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProcessError, Result};

/// A process found by a search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    /// Process ID
    pub pid: u32,
    /// Command name or full command line, as reported by the OS tool
    pub command: String,
    /// Reported working directory, when the search looked at it
    pub cwd: Option<String>,
}

/// Finds processes rooted in a working directory
#[async_trait]
pub trait ProcessSearch: Send + Sync {
    /// Processes whose working directory contains `path` (case-insensitive)
    async fn find_by_working_directory(&self, path: &Path) -> Result<Vec<ProcessInfo>>;
}

/// Search backed by `lsof` (working directories) and `ps` (command lines)
///
/// The calling process, its ancestors and its descendants (including the
/// `lsof`/`ps` helpers it runs) are never part of a result.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessSearch;

impl SystemProcessSearch {
    /// Create a new search
    pub fn new() -> Self {
        Self
    }

    /// Processes whose command line contains `needle`
    pub async fn find_by_command(&self, needle: &str) -> Result<Vec<ProcessInfo>> {
        let output = Command::new("ps")
            .args(["-axo", "pid=,ppid=,args="])
            .output()
            .await
            .map_err(|e| ProcessError::SearchFailed(format!("ps: {e}")))?;

        if !output.status.success() {
            return Err(ProcessError::SearchFailed(format!(
                "ps exited with {}",
                output.status
            )));
        }

        let rows = parse_ps(&String::from_utf8_lossy(&output.stdout));
        Ok(unrelated(rows, Lineage::current())
            .filter(|row| row.command.contains(needle))
            .map(ProcessRow::into_info)
            .collect())
    }
}

#[async_trait]
impl ProcessSearch for SystemProcessSearch {
    async fn find_by_working_directory(&self, path: &Path) -> Result<Vec<ProcessInfo>> {
        let target = path.to_string_lossy();
        if target.trim().is_empty() {
            return Ok(Vec::new());
        }

        let output = Command::new("lsof")
            .args(["-w", "-R", "-d", "cwd"])
            .output()
            .await
            .map_err(|e| ProcessError::SearchFailed(format!("lsof: {e}")))?;

        let Some(listing) = lsof_listing(&output)? else {
            debug!(path = %target, "lsof reported no processes");
            return Ok(Vec::new());
        };

        let rows = parse_lsof_cwd(&listing);
        let found = matching_cwd(rows, &target, Lineage::current());
        debug!(path = %target, count = found.len(), "Found processes by working directory");
        Ok(found)
    }
}

/// The usable part of an lsof run, `None` when nothing matched
///
/// lsof exits 1 with empty output when nothing matched, and non-zero with
/// output when some processes could not be inspected.
fn lsof_listing(output: &Output) -> Result<Option<String>> {
    if output.status.success() {
        return Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()));
    }
    if output.stdout.is_empty() {
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        return Err(ProcessError::SearchFailed(format!(
            "lsof exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    debug!(
        status = %output.status,
        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
        "lsof exited non-zero with output, using partial listing"
    );
    Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
}

/// One process row of an `lsof -R` or `ps` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRow {
    pub pid: u32,
    pub ppid: u32,
    pub command: String,
    pub cwd: Option<String>,
}

impl ProcessRow {
    fn into_info(self) -> ProcessInfo {
        ProcessInfo {
            pid: self.pid,
            command: self.command,
            cwd: self.cwd,
        }
    }
}

/// The searching process and its parent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lineage {
    pub pid: u32,
    pub parent: Option<u32>,
}

impl Lineage {
    pub fn current() -> Self {
        #[cfg(unix)]
        let parent = Some(std::os::unix::process::parent_id());
        #[cfg(not(unix))]
        let parent = None;

        Self {
            pid: std::process::id(),
            parent,
        }
    }
}

/// Rows whose working directory contains `cwd` (case-insensitive), minus
/// the searching process's own lineage
pub fn matching_cwd(rows: Vec<ProcessRow>, cwd: &str, lineage: Lineage) -> Vec<ProcessInfo> {
    let needle = cwd.to_lowercase();
    unrelated(rows, lineage)
        .filter(|row| {
            row.cwd
                .as_deref()
                .is_some_and(|path| path.to_lowercase().contains(&needle))
        })
        .map(ProcessRow::into_info)
        .collect()
}

/// Drop the searching process, every ancestor up to init and every process
/// descending from it
fn unrelated(rows: Vec<ProcessRow>, lineage: Lineage) -> impl Iterator<Item = ProcessRow> {
    let parents: HashMap<u32, u32> = rows.iter().map(|r| (r.pid, r.ppid)).collect();

    let mut related = HashSet::from([lineage.pid]);
    let mut current = lineage.pid;
    while let Some(parent) = parents
        .get(&current)
        .copied()
        .or(lineage.parent.filter(|_| current == lineage.pid))
    {
        if parent <= 1 || !related.insert(parent) {
            break;
        }
        current = parent;
    }

    let me = lineage.pid;
    rows.into_iter().filter(move |row| {
        if related.contains(&row.pid) {
            return false;
        }
        let mut seen = HashSet::new();
        let mut ancestor = row.ppid;
        while ancestor > 1 && seen.insert(ancestor) {
            if ancestor == me {
                return false;
            }
            match parents.get(&ancestor) {
                Some(&next) => ancestor = next,
                None => break,
            }
        }
        true
    })
}

/// Parse `lsof -R -d cwd` output
///
/// Columns: COMMAND PID PPID USER FD TYPE DEVICE SIZE/OFF NODE NAME. NAME may
/// contain spaces, so everything from the tenth column on is the path.
pub fn parse_lsof_cwd(output: &str) -> Vec<ProcessRow> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 || parts[4] != "cwd" {
                return None;
            }
            Some(ProcessRow {
                pid: parts[1].parse().ok()?,
                ppid: parts[2].parse().ok()?,
                command: parts[0].to_string(),
                cwd: Some(parts[9..].join(" ")),
            })
        })
        .collect()
}

/// Parse `ps -axo pid=,ppid=,args=` output
pub fn parse_ps(output: &str) -> Vec<ProcessRow> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let pid = fields.next()?.parse().ok()?;
            let ppid = fields.next()?.parse().ok()?;
            let command = fields.collect::<Vec<_>>().join(" ");
            if command.is_empty() {
                return None;
            }
            Some(ProcessRow {
                pid,
                ppid,
                command,
                cwd: None,
            })
        })
        .collect()
}

//! Rules for `dotnet run` applications
//!
//! ASP.NET console logging prints a `level: Category[id]` header followed by
//! indented message lines, and the SDK interleaves build banners and MSBuild
//! diagnostics. Serilog's console sink uses `[HH:mm:ss LVL] text` instead.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{normalize_url, OutputRules, Refinement};
use crate::types::LogLevel;

const LEVEL_PREFIXES: &[&str] = &[
    "info:",
    "warn:",
    "error:",
    "debug:",
    "trace:",
    "critical:",
    "fail:",
];

const DIAGNOSTIC_MARKERS: &[&str] = &["): warning ", "): error ", " : warning ", " : error "];

const BANNER_PREFIXES: &[&str] = &["Build ", "Restore ", "Determining ", "Building..."];

/// SDK warning about out-of-support target frameworks, printed on every run
const SUPPRESSED_CODE: &str = "NETSDK1138";

static LISTENING_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Now listening on:\s*(\S+)").expect("Invalid regex"));

static STRUCTURED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[(.*?)\s+(ERR|INF|WRN|WARN|DBG|VRB|FTL)[^\]]*\]\s+(.*)$").expect("Invalid regex")
});

#[derive(Debug, Clone, Copy, Default)]
pub struct DotnetRules;

impl OutputRules for DotnetRules {
    fn starts_record(&self, line: &str) -> bool {
        let trimmed = line.trim();
        if trimmed == "STDOUT" || trimmed == "STDERR" {
            return false;
        }

        let lower = line.to_lowercase();
        LEVEL_PREFIXES.iter().any(|p| lower.starts_with(p))
            || DIAGNOSTIC_MARKERS.iter().any(|m| line.contains(m))
            || BANNER_PREFIXES.iter().any(|p| line.starts_with(p))
    }

    fn find_urls(&self, record: &str) -> Vec<String> {
        LISTENING_URL
            .captures_iter(record)
            .filter_map(|caps| caps.get(1))
            .map(|m| normalize_url(m.as_str()))
            .collect()
    }

    fn is_suppressed(&self, record: &str) -> bool {
        record.contains(SUPPRESSED_CODE)
    }

    fn refine(&self, leading: &str) -> Option<Refinement> {
        if let Some(caps) = STRUCTURED_LINE.captures(leading) {
            let level = match &caps[2] {
                "ERR" | "FTL" => LogLevel::Error,
                "WRN" | "WARN" => LogLevel::Warning,
                "DBG" | "VRB" => LogLevel::Debug,
                _ => LogLevel::Info,
            };
            return Some(Refinement {
                level,
                message: caps[3].to_string(),
            });
        }

        if leading.contains(" ERR]") {
            return Some(Refinement {
                level: LogLevel::Error,
                message: leading.to_string(),
            });
        }
        None
    }
}

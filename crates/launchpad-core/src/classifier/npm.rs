//! Rules for `npm run dev` style dev servers (Vite, Nuxt, Next, Express)

use once_cell::sync::Lazy;
use regex::Regex;

use super::{normalize_url, OutputRules};

static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("Invalid regex"));

// Vite/Nuxt print `Local:`, Express-style servers print `listening on`
static LISTENING_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:Local:|listening on)[^\n]*?(https?://\S+)").expect("Invalid regex")
});

/// Dev servers print one event per line and colour their banners, so every
/// line is its own record and escapes are stripped before URL matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmRules;

impl OutputRules for NpmRules {
    fn reassembles(&self) -> bool {
        false
    }

    fn starts_record(&self, _line: &str) -> bool {
        true
    }

    fn find_urls(&self, record: &str) -> Vec<String> {
        let plain = ANSI_ESCAPE.replace_all(record, "");
        LISTENING_URL
            .captures_iter(&plain)
            .filter_map(|caps| caps.get(1))
            .map(|m| normalize_url(m.as_str()))
            .collect()
    }
}

//! Output stream classification
//!
//! Turns the line stream of one pipe into log records and URL discoveries.
//! Records may span several lines: a line that does not open a new record
//! is appended to the one being assembled, and a blank line closes it. Each
//! process family supplies the rules for what opens a record, where its
//! listening URL is announced, and which records are noise.

mod dotnet;
mod npm;

use std::sync::Arc;

pub use dotnet::DotnetRules;
pub use npm::NpmRules;

use crate::types::{LogEntry, LogLevel, OutputStream};

/// Family-specific classification rules
pub trait OutputRules: Send + Sync + std::fmt::Debug {
    /// Whether lines are reassembled into multi-line records.
    ///
    /// When false every non-blank line is its own record.
    fn reassembles(&self) -> bool {
        true
    }

    /// Whether an un-indented line opens a new record
    fn starts_record(&self, line: &str) -> bool;

    /// Listening URLs announced by a completed record, trailing `/` stripped
    fn find_urls(&self, record: &str) -> Vec<String>;

    /// Records that are never emitted as log entries
    fn is_suppressed(&self, _record: &str) -> bool {
        false
    }

    /// Family-specific refinement of a record's leading line
    fn refine(&self, _leading: &str) -> Option<Refinement> {
        None
    }
}

/// Level and message extracted from a structured leading line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refinement {
    pub level: LogLevel,
    /// Replacement for the leading line in `message`
    pub message: String,
}

/// Output of the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    Log(LogEntry),
    Url(String),
}

/// Stateful classifier for one pipe of one child
#[derive(Debug)]
pub struct OutputClassifier {
    rules: Arc<dyn OutputRules>,
    stream: OutputStream,
    buffer: Vec<String>,
    /// URLs of the buffered record already reported by `pending_urls`
    announced: Vec<String>,
}

impl OutputClassifier {
    /// Create a classifier for `stream`
    pub fn new(rules: Arc<dyn OutputRules>, stream: OutputStream) -> Self {
        Self {
            rules,
            stream,
            buffer: Vec::new(),
            announced: Vec::new(),
        }
    }

    /// Feed one line (without its terminator)
    pub fn push_line(&mut self, line: &str) -> Vec<Classified> {
        if line.trim().is_empty() {
            return self.flush();
        }

        if !self.rules.reassembles() {
            let mut out = self.flush();
            out.extend(self.complete(line.to_string()));
            return out;
        }

        if is_unindented(line) && self.rules.starts_record(line) {
            let out = self.flush();
            self.buffer.push(line.to_string());
            return out;
        }

        self.buffer.push(line.to_string());
        Vec::new()
    }

    /// Flush whatever is buffered at end of stream
    pub fn finish(&mut self) -> Vec<Classified> {
        self.flush()
    }

    /// URLs in the record still being assembled that were not reported yet.
    ///
    /// The record stays buffered; when it completes, URLs returned here are
    /// not reported a second time.
    pub fn pending_urls(&mut self) -> Vec<Classified> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let record = self.buffer.join("\n");
        let mut already = self.announced.clone();
        let fresh: Vec<String> = self
            .rules
            .find_urls(&record)
            .into_iter()
            .filter(|url| !take_one(&mut already, url))
            .collect();
        self.announced.extend(fresh.iter().cloned());
        fresh.into_iter().map(Classified::Url).collect()
    }

    fn flush(&mut self) -> Vec<Classified> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let record = std::mem::take(&mut self.buffer).join("\n");
        let mut announced = std::mem::take(&mut self.announced);
        let mut out = self.complete(record);
        out.retain(|item| match item {
            Classified::Url(url) => !take_one(&mut announced, url),
            Classified::Log(_) => true,
        });
        out
    }

    fn complete(&self, record: String) -> Vec<Classified> {
        let mut out: Vec<Classified> = self
            .rules
            .find_urls(&record)
            .into_iter()
            .map(Classified::Url)
            .collect();

        if !self.rules.is_suppressed(&record) {
            out.push(Classified::Log(self.to_entry(record)));
        }
        out
    }

    fn to_entry(&self, record: String) -> LogEntry {
        let (leading, rest) = match record.split_once('\n') {
            Some((leading, rest)) => (leading, Some(rest)),
            None => (record.as_str(), None),
        };

        let refinement = self.rules.refine(leading);
        let level = classify_level(leading, self.stream, refinement.as_ref().map(|r| r.level));
        let message = refinement.map(|r| match rest {
            Some(rest) => format!("{}\n{}", r.message, rest),
            None => r.message,
        });

        let entry = LogEntry::new(level, record.clone(), self.stream);
        match message {
            Some(message) => entry.with_message(message),
            None => entry,
        }
    }
}

/// Severity of a record from its leading line, first match wins:
/// explicit error markers, explicit warning markers, debug/trace, info,
/// the family's structured level, then stderr as Error and Info otherwise.
pub fn classify_level(leading: &str, stream: OutputStream, family: Option<LogLevel>) -> LogLevel {
    let lower = leading.to_lowercase();

    if ["error:", "fail:", "critical:"].iter().any(|p| lower.starts_with(p))
        || lower.contains("): error ")
        || lower.contains(" : error ")
    {
        return LogLevel::Error;
    }
    if lower.starts_with("warn:") || lower.contains("): warning ") || lower.contains(" : warning ")
    {
        return LogLevel::Warning;
    }
    if lower.starts_with("debug:") || lower.starts_with("trace:") {
        return LogLevel::Debug;
    }
    if lower.starts_with("info:") {
        return LogLevel::Info;
    }
    if let Some(level) = family {
        return level;
    }
    match stream {
        OutputStream::Stderr => LogLevel::Error,
        OutputStream::Stdout => LogLevel::Info,
    }
}

/// Remove one occurrence of `url` from `urls`, reporting whether it was there
fn take_one(urls: &mut Vec<String>, url: &str) -> bool {
    match urls.iter().position(|u| u == url) {
        Some(index) => {
            urls.swap_remove(index);
            true
        }
        None => false,
    }
}

fn is_unindented(line: &str) -> bool {
    !line.starts_with(' ') && !line.starts_with('\t')
}

/// Strip every trailing `/` from a discovered URL
pub(crate) fn normalize_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logs(out: &[Classified]) -> Vec<&LogEntry> {
        out.iter()
            .filter_map(|c| match c {
                Classified::Log(entry) => Some(entry),
                Classified::Url(_) => None,
            })
            .collect()
    }

    fn urls(out: &[Classified]) -> Vec<&str> {
        out.iter()
            .filter_map(|c| match c {
                Classified::Url(url) => Some(url.as_str()),
                Classified::Log(_) => None,
            })
            .collect()
    }

    fn feed(rules: Arc<dyn OutputRules>, stream: OutputStream, text: &str) -> Vec<Classified> {
        let mut classifier = OutputClassifier::new(rules, stream);
        let mut out = Vec::new();
        for line in text.lines() {
            out.extend(classifier.push_line(line));
        }
        out.extend(classifier.finish());
        out
    }

    #[test]
    fn test_warning_prefix() {
        let out = feed(Arc::new(DotnetRules), OutputStream::Stdout, "warn: disk nearly full");
        let entries = logs(&out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Warning);
        assert_eq!(entries[0].message, "warn: disk nearly full");
        assert_eq!(entries[0].raw, "warn: disk nearly full");
    }

    #[test]
    fn test_indented_continuation_joins_record() {
        let out = feed(
            Arc::new(DotnetRules),
            OutputStream::Stdout,
            "error: build failed\n  at line 12\n  at line 9",
        );
        let entries = logs(&out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[0].raw, "error: build failed\n  at line 12\n  at line 9");
    }

    #[test]
    fn test_blank_line_closes_record() {
        let out = feed(
            Arc::new(DotnetRules),
            OutputStream::Stdout,
            "Unhandled exception\n   at Program.Main()\n\nsecond record",
        );
        let entries = logs(&out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].raw, "Unhandled exception\n   at Program.Main()");
        assert_eq!(entries[1].raw, "second record");
    }

    #[test]
    fn test_new_record_start_flushes_previous() {
        let out = feed(
            Arc::new(DotnetRules),
            OutputStream::Stdout,
            "info: Started\n      detail\nwarn: Slow",
        );
        let entries = logs(&out);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].raw, "info: Started\n      detail");
        assert_eq!(entries[1].level, LogLevel::Warning);
    }

    #[test]
    fn test_now_listening_emits_url_and_log() {
        let out = feed(
            Arc::new(DotnetRules),
            OutputStream::Stdout,
            "Now listening on: http://localhost:5000",
        );
        assert_eq!(urls(&out), vec!["http://localhost:5000"]);
        assert_eq!(logs(&out).len(), 1);
        assert_eq!(logs(&out)[0].raw, "Now listening on: http://localhost:5000");
    }

    #[test]
    fn test_stderr_fallback_is_error_and_keeps_stream() {
        let out = feed(Arc::new(NpmRules), OutputStream::Stderr, "something odd happened");
        let entries = logs(&out);
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[0].stream, OutputStream::Stderr);

        let out = feed(Arc::new(NpmRules), OutputStream::Stderr, "warn: deprecated option");
        assert_eq!(logs(&out)[0].level, LogLevel::Warning);
        assert_eq!(logs(&out)[0].stream, OutputStream::Stderr);
    }

    #[test]
    fn test_classify_level_precedence() {
        use LogLevel::*;
        use OutputStream::*;

        assert_eq!(classify_level("FAIL: boom", Stdout, None), Error);
        assert_eq!(classify_level("Critical: boom", Stdout, None), Error);
        assert_eq!(
            classify_level("Program.cs(3,5): error CS1002: ; expected", Stdout, None),
            Error
        );
        assert_eq!(
            classify_level("/src/api.csproj : error NU1101: Unable to find package", Stdout, None),
            Error
        );
        assert_eq!(
            classify_level("Program.cs(9,1): warning CS0168: unused", Stderr, None),
            Warning
        );
        assert_eq!(classify_level("trace: tick", Stderr, None), Debug);
        assert_eq!(classify_level("info: ready", Stderr, None), Info);
        assert_eq!(classify_level("plain", Stdout, Some(Debug)), Debug);
        assert_eq!(classify_level("plain", Stderr, None), Error);
        assert_eq!(classify_level("plain", Stdout, None), Info);
    }

    #[test]
    fn test_pending_url_is_reported_once() {
        let mut classifier = OutputClassifier::new(Arc::new(DotnetRules), OutputStream::Stdout);
        assert!(classifier.push_line("info: Microsoft.Hosting.Lifetime[14]").is_empty());
        assert!(classifier
            .push_line("      Now listening on: http://localhost:5000")
            .is_empty());

        assert_eq!(
            classifier.pending_urls(),
            vec![Classified::Url("http://localhost:5000".to_string())]
        );
        assert!(classifier.pending_urls().is_empty());

        assert!(classifier.push_line("      Now listening on: https://localhost:5001").is_empty());
        assert_eq!(
            classifier.pending_urls(),
            vec![Classified::Url("https://localhost:5001".to_string())]
        );

        let out = classifier.finish();
        assert!(urls(&out).is_empty());
        let entries = logs(&out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw.lines().count(), 3);
    }

    #[test]
    fn test_pending_urls_leave_record_buffered() {
        let mut classifier = OutputClassifier::new(Arc::new(DotnetRules), OutputStream::Stdout);
        classifier.push_line("error: build failed");
        assert!(classifier.pending_urls().is_empty());
        classifier.push_line("  at line 12");

        let out = classifier.finish();
        let entries = logs(&out);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].raw, "error: build failed\n  at line 12");
    }

    #[test]
    fn test_unannounced_url_is_reported_on_flush() {
        let mut classifier = OutputClassifier::new(Arc::new(DotnetRules), OutputStream::Stdout);
        classifier.push_line("info: Lifetime");
        classifier.push_line("      Now listening on: http://localhost:5000");
        classifier.pending_urls();
        classifier.push_line("info: second");
        classifier.push_line("      Now listening on: http://localhost:5000");

        let out = classifier.finish();
        assert_eq!(urls(&out), vec!["http://localhost:5000"]);
    }

    #[test]
    fn test_normalize_url_strips_every_trailing_slash() {
        assert_eq!(normalize_url("http://localhost:5000///"), "http://localhost:5000");
        assert_eq!(normalize_url("http://localhost:5173/app/"), "http://localhost:5173/app");
        assert_eq!(normalize_url("http://localhost:5000"), "http://localhost:5000");
    }

    #[test]
    fn test_whitespace_only_lines_produce_nothing() {
        let out = feed(Arc::new(NpmRules), OutputStream::Stdout, "   \n\t\n");
        assert!(out.is_empty());
    }
}

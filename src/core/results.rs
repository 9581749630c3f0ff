//! Test report ingestion for `attach.xunit_results`.
//!
//! Reports are JUnit-style XML. Only `<testcase>` elements and their
//! `<failure>`, `<error>` and `<skipped>` children are read.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub status: TestStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub file: String,
    pub tests: Vec<TestCase>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TestResultsSummary {
    pub files: usize,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl TestResultsSummary {
    pub fn from_reports(reports: &[TestReport]) -> Self {
        let mut summary = Self {
            files: reports.len(),
            ..Self::default()
        };
        for case in reports.iter().flat_map(|r| &r.tests) {
            summary.total += 1;
            match case.status {
                TestStatus::Pass => summary.passed += 1,
                TestStatus::Fail => summary.failed += 1,
                TestStatus::Skip => summary.skipped += 1,
            }
        }
        summary
    }
}

fn testcase_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r#"(?s)<testcase\b((?:[^>"']|"[^"]*"|'[^']*')*?)(?:/>|>(.*?)</testcase>)"#,
        )
        .expect("testcase pattern is valid")
    })
}

fn attribute_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
            .expect("attribute pattern is valid")
    })
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    attribute_pattern()
        .captures_iter(attrs)
        .find(|caps| &caps[1] == name)
        .and_then(|caps| caps.get(2).or_else(|| caps.get(3)))
        .map(|m| unescape(m.as_str()))
}

fn unescape(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse the test cases of one JUnit document.
pub fn parse_junit(content: &str) -> Vec<TestCase> {
    testcase_pattern()
        .captures_iter(content)
        .map(|caps| {
            let attrs = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());

            let status = if body.contains("<failure") || body.contains("<error") {
                TestStatus::Fail
            } else if body.contains("<skipped") {
                TestStatus::Skip
            } else {
                TestStatus::Pass
            };

            TestCase {
                name: attribute(attrs, "name").unwrap_or_default(),
                class_name: attribute(attrs, "classname"),
                status,
            }
        })
        .collect()
}

/// Load every report matching `patterns` (globs relative to `base`).
///
/// A pattern matching nothing is not an error; the CI engine treats a
/// missing report the same way.
pub fn load_reports(base: &Path, patterns: &[String]) -> Result<Vec<TestReport>> {
    let escaped_base = glob::Pattern::escape(&base.to_string_lossy());
    let mut reports = Vec::new();

    for pattern in patterns {
        let full = if Path::new(pattern).is_absolute() {
            pattern.clone()
        } else {
            format!("{}/{}", escaped_base.trim_end_matches('/'), pattern)
        };

        let entries = glob::glob(&full).map_err(|e| {
            Error::validation_invalid_argument(
                "attach.xunit_results.file",
                format!("Invalid report glob '{}': {}", pattern, e),
                None,
                None,
            )
        })?;

        for path in entries.flatten() {
            let content = fs::read_to_string(&path).map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
            })?;
            let file = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .display()
                .to_string();
            reports.push(TestReport {
                file,
                tests: parse_junit(&content),
            });
        }
    }

    Ok(reports)
}

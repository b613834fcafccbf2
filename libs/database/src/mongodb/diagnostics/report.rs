use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Outcome of a single diagnostic check
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiagnosticResult {
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub details: Map<String, Value>,
    pub duration_ms: f64,
    pub error: Option<String>,
    /// Remediation hints, most relevant first
    pub suggestions: Vec<String>,
}

impl DiagnosticResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, true, message)
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, false, message)
    }

    fn new(name: impl Into<String>, passed: bool, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            message: message.into(),
            details: Map::new(),
            duration_ms: 0.0,
            error: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    pub fn suggest(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub(crate) fn timed(mut self, millis: f64) -> Self {
        self.duration_ms = (millis * 100.0).round() / 100.0;
        self
    }
}

impl fmt::Display for DiagnosticResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "{} {}: {}", status, self.name, self.message)
    }
}

/// Aggregated outcome of a diagnostics run
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub timestamp: DateTime<Utc>,
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    /// Formatted as `66.7%`
    pub success_rate: String,
    pub all_passed: bool,
    pub results: Vec<DiagnosticResult>,
    /// Union of every check's suggestions, first occurrence wins
    pub suggestions: Vec<String>,
}

impl DiagnosticReport {
    pub fn from_results(results: Vec<DiagnosticResult>) -> Self {
        let total_tests = results.len();
        let passed = results.iter().filter(|r| r.passed).count();
        let failed = total_tests - passed;

        let success_rate = if total_tests > 0 {
            format!("{:.1}%", passed as f64 / total_tests as f64 * 100.0)
        } else {
            "0%".to_string()
        };

        let mut suggestions: Vec<String> = Vec::new();
        for suggestion in results.iter().flat_map(|r| r.suggestions.iter()) {
            if !suggestions.contains(suggestion) {
                suggestions.push(suggestion.clone());
            }
        }

        Self {
            timestamp: Utc::now(),
            total_tests,
            passed,
            failed,
            success_rate,
            all_passed: failed == 0,
            results,
            suggestions,
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &DiagnosticResult> {
        self.results.iter().filter(|r| !r.passed)
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(70);
        writeln!(f, "{}", rule)?;
        writeln!(f, "DIAGNOSTIC SUMMARY")?;
        writeln!(f, "{}", rule)?;
        for result in &self.results {
            writeln!(f, "{}", result)?;
        }
        writeln!(
            f,
            "\nTests Passed: {}/{} ({})",
            self.passed, self.total_tests, self.success_rate
        )?;

        if self.all_passed {
            writeln!(
                f,
                "\nAll tests passed! Database connection is working correctly."
            )?;
        } else {
            writeln!(f, "\nFailed Tests:")?;
            for result in self.failures() {
                writeln!(f, "   - {}: {}", result.name, result.message)?;
            }
            if !self.suggestions.is_empty() {
                writeln!(f, "\nSuggestions:")?;
                for (i, suggestion) in self.suggestions.iter().enumerate() {
                    writeln!(f, "   {}. {}", i + 1, suggestion)?;
                }
            }
        }
        write!(f, "{}", rule)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_display() {
        let ok = DiagnosticResult::pass("DNS Resolution", "DNS resolved: Found 2 address(es)");
        assert_eq!(
            ok.to_string(),
            "PASS DNS Resolution: DNS resolved: Found 2 address(es)"
        );

        let failed = DiagnosticResult::fail("Network Connectivity", "Cannot reach MongoDB servers");
        assert!(failed.to_string().starts_with("FAIL Network Connectivity"));
    }

    #[test]
    fn test_report_aggregates_and_deduplicates_suggestions() {
        let report = DiagnosticReport::from_results(vec![
            DiagnosticResult::pass("Environment Check", "ok"),
            DiagnosticResult::fail("DNS Resolution", "DNS resolution failed")
                .suggest("Check your internet connection")
                .suggest("Verify the MongoDB hostname is correct"),
            DiagnosticResult::fail("Network Connectivity", "Cannot reach MongoDB servers")
                .suggest("Check your internet connection")
                .suggest("Check if firewall is blocking port 27017"),
        ]);

        assert_eq!(report.total_tests, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.success_rate, "33.3%");
        assert!(!report.all_passed);
        assert_eq!(
            report.suggestions,
            vec![
                "Check your internet connection",
                "Verify the MongoDB hostname is correct",
                "Check if firewall is blocking port 27017",
            ]
        );
    }

    #[test]
    fn test_empty_report() {
        let report = DiagnosticReport::from_results(Vec::new());
        assert_eq!(report.success_rate, "0%");
        assert!(report.all_passed);
    }

    #[test]
    fn test_report_display_lists_failures_and_numbered_suggestions() {
        let report = DiagnosticReport::from_results(vec![
            DiagnosticResult::pass("URI Parsing", "URI parsed successfully with credentials"),
            DiagnosticResult::fail("Basic Connection", "Connection timed out")
                .suggest("Check network/firewall settings"),
        ]);

        let text = report.to_string();
        assert!(text.contains("Tests Passed: 1/2 (50.0%)"));
        assert!(text.contains("   - Basic Connection: Connection timed out"));
        assert!(text.contains("   1. Check network/firewall settings"));
    }

    #[test]
    fn test_duration_rounded() {
        let result = DiagnosticResult::pass("Driver Setup", "ok").timed(12.3456);
        assert_eq!(result.duration_ms, 12.35);
    }

    #[test]
    fn test_serializes_details() {
        let result = DiagnosticResult::fail("URI Parsing", "URI missing username or password")
            .with_detail("has_username", false)
            .with_error("no credentials");

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["details"]["has_username"], false);
        assert_eq!(json["error"], "no credentials");
        assert_eq!(json["passed"], false);
    }
}

// Run Reporter
// Renders run reports as JUnit XML, TAP, JSON, or terminal output

use crate::execution::runner::{FlowStatus, RunReport};
use crate::testing::assertions::CheckFailure;

use std::fmt;

/// Output format for run reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// JUnit XML format (for CI systems)
    JUnit,
    /// TAP (Test Anything Protocol) format
    Tap,
    /// Machine-readable JSON
    Json,
    /// Human-readable terminal output
    Terminal,
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportFormat::JUnit => write!(f, "junit"),
            ReportFormat::Tap => write!(f, "tap"),
            ReportFormat::Json => write!(f, "json"),
            ReportFormat::Terminal => write!(f, "terminal"),
        }
    }
}

impl std::str::FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "junit" | "junit-xml" | "xml" => Ok(ReportFormat::JUnit),
            "tap" => Ok(ReportFormat::Tap),
            "json" => Ok(ReportFormat::Json),
            "terminal" | "text" | "console" => Ok(ReportFormat::Terminal),
            _ => Err(format!(
                "Unknown report format '{}'. Valid formats: junit, tap, json, terminal",
                s
            )),
        }
    }
}

/// Reporter that renders a run in various formats
pub struct RunReporter;

impl RunReporter {
    /// Generate a report in the specified format
    pub fn report(report: &RunReport, format: ReportFormat) -> String {
        match format {
            ReportFormat::JUnit => Self::to_junit_xml(report),
            ReportFormat::Tap => Self::to_tap(report),
            ReportFormat::Json => Self::to_json(report),
            ReportFormat::Terminal => Self::to_terminal(report),
        }
    }

    /// Generate JUnit XML output.
    ///
    /// Each flow is a testcase; rollback and non-fatal check failures are
    /// reported as one extra testcase each so CI shows them.
    pub fn to_junit_xml(report: &RunReport) -> String {
        let failed_flows = report
            .flows
            .iter()
            .filter(|f| f.status == FlowStatus::Failed)
            .count();
        let extra = [&report.check_failures, &report.rollback_failures]
            .iter()
            .filter(|failures| !failures.is_empty())
            .count();
        let tests = report.flows.len() + extra;
        let failures = failed_flows + extra;
        let skipped = report.skipped().count();

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuites tests=\"{}\" failures=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
            tests,
            failures,
            report.duration.as_secs_f64()
        ));
        xml.push_str(&format!(
            "  <testsuite name=\"flows\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" errors=\"0\" time=\"{:.3}\">\n",
            tests,
            failures,
            skipped,
            report.duration.as_secs_f64()
        ));

        for flow in &report.flows {
            xml.push_str(&format!(
                "    <testcase name=\"{}\" time=\"{:.3}\"",
                xml_escape(&flow.name),
                flow.duration.as_secs_f64()
            ));
            match flow.status {
                FlowStatus::Completed => xml.push_str(" />\n"),
                FlowStatus::Skipped => {
                    xml.push_str(">\n      <skipped message=\"already provided\" />\n");
                    xml.push_str("    </testcase>\n");
                }
                FlowStatus::Failed => {
                    let message = flow.error.as_deref().unwrap_or("flow failed");
                    xml.push_str(&format!(
                        ">\n      <failure message=\"{}\" />\n    </testcase>\n",
                        xml_escape(message)
                    ));
                }
            }
        }

        for (name, failures) in [
            ("checks", &report.check_failures),
            ("rollback", &report.rollback_failures),
        ] {
            if failures.is_empty() {
                continue;
            }
            xml.push_str(&format!("    <testcase name=\"{}\">\n", name));
            xml.push_str(&format!(
                "      <failure message=\"{} failure(s)\">\n",
                failures.len()
            ));
            for failure in failures {
                xml.push_str(&format!("        {}\n", xml_escape(&failure.to_string())));
            }
            xml.push_str("      </failure>\n");
            xml.push_str("    </testcase>\n");
        }

        xml.push_str("  </testsuite>\n");
        xml.push_str("</testsuites>\n");
        xml
    }

    /// Generate TAP (Test Anything Protocol) output
    ///
    /// TAP version 13 compatible
    pub fn to_tap(report: &RunReport) -> String {
        let mut tap = String::new();
        tap.push_str("TAP version 13\n");
        tap.push_str(&format!("1..{}\n", report.flows.len() + 1));

        for (i, flow) in report.flows.iter().enumerate() {
            let num = i + 1;
            match flow.status {
                FlowStatus::Completed => tap.push_str(&format!("ok {} - {}\n", num, flow.name)),
                FlowStatus::Skipped => tap.push_str(&format!(
                    "ok {} - {} # SKIP already provided\n",
                    num, flow.name
                )),
                FlowStatus::Failed => {
                    tap.push_str(&format!("not ok {} - {}\n", num, flow.name));
                    tap.push_str("  ---\n");
                    tap.push_str(&format!("  duration_ms: {}\n", flow.duration.as_millis()));
                    if let Some(error) = &flow.error {
                        tap.push_str(&format!("  message: \"{}\"\n", first_line(error)));
                    }
                    tap.push_str("  ...\n");
                }
            }
        }

        let teardown = report.flows.len() + 1;
        if report.rollback_failures.is_empty() {
            tap.push_str(&format!("ok {} - rollback\n", teardown));
        } else {
            tap.push_str(&format!("not ok {} - rollback\n", teardown));
            tap.push_str("  ---\n  failures:\n");
            for failure in &report.rollback_failures {
                tap.push_str(&format!("    - \"{}\"\n", first_line(&failure.to_string())));
            }
            tap.push_str("  ...\n");
        }

        tap.push_str(&format!(
            "# executed {}\n# skipped {}\n# duration {:.3}s\n",
            report.executed().count(),
            report.skipped().count(),
            report.duration.as_secs_f64()
        ));
        tap
    }

    /// Generate JSON output
    pub fn to_json(report: &RunReport) -> String {
        let value = serde_json::json!({
            "success": report.success(),
            "duration_secs": report.duration.as_secs_f64(),
            "forward_error": report.forward_error.as_ref().map(ToString::to_string),
            "flows": report.flows,
            "check_failures": report.check_failures,
            "rollback_failures": report.rollback_failures,
            "variables": report.variables,
        });
        serde_json::to_string_pretty(&value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }

    /// Generate human-readable terminal output
    pub fn to_terminal(report: &RunReport) -> String {
        let mut out = String::new();

        out.push_str("\nFlow Run\n");
        out.push_str(&"=".repeat(60));
        out.push('\n');

        for flow in &report.flows {
            let (symbol, status) = match flow.status {
                FlowStatus::Completed => ("+", "DONE"),
                FlowStatus::Skipped => ("-", "SKIP"),
                FlowStatus::Failed => ("x", "FAIL"),
            };
            let rollback = if flow.rolled_back { " [rolled back]" } else { "" };
            out.push_str(&format!(
                "  [{}] {} ({:.2}s) {}{}\n",
                symbol,
                status,
                flow.duration.as_secs_f64(),
                flow.name,
                rollback,
            ));
            if let Some(error) = &flow.error {
                out.push_str(&format!("       {}\n", first_line(error)));
            }
        }

        push_failures(&mut out, "Check failures", &report.check_failures);
        push_failures(&mut out, "Rollback failures", &report.rollback_failures);

        out.push_str(&"-".repeat(60));
        out.push('\n');

        let executed = report.executed().count();
        let status_line = if report.success() {
            format!(
                "  {} flows executed, {} skipped ({:.2}s)",
                executed,
                report.skipped().count(),
                report.duration.as_secs_f64()
            )
        } else {
            format!(
                "  Run failed after {} flows ({:.2}s)",
                executed,
                report.duration.as_secs_f64()
            )
        };
        out.push_str(&status_line);
        out.push_str("\n\n");
        out
    }
}

fn push_failures(out: &mut String, title: &str, failures: &[CheckFailure]) {
    if failures.is_empty() {
        return;
    }
    out.push_str(&format!("\n  {}:\n", title));
    for failure in failures {
        out.push_str(&format!("    - {}\n", first_line(&failure.to_string())));
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Escape special XML characters
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

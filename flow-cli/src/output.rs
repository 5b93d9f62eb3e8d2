// Terminal rendering for flow runs
// Everything goes to stderr so reports on stdout stay machine-readable

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Style {
    Heading,
    Label,
    Flow,
    Pass,
    Fail,
    Warn,
    Note,
    Muted,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Heading => "1",
            Style::Label => "1;36",
            Style::Flow => "1;34",
            Style::Pass => "32",
            Style::Fail => "31",
            Style::Warn => "33",
            Style::Note => "36",
            Style::Muted => "2",
        }
    }
}

fn paint(style: Style, text: &str) -> String {
    format!("\x1b[{}m{}\x1b[0m", style.code(), text)
}

fn outcome(passed: bool) -> (Style, &'static str) {
    if passed {
        (Style::Pass, "OK")
    } else {
        (Style::Fail, "FAIL")
    }
}

/// Right-aligned label before a message, e.g. "     Running 12 flows"
pub fn phase(label: &str, message: &str) {
    eprintln!("{} {}", paint(Style::Label, &format!("{:>12}", label)), message);
}

/// Start of a run or teardown section
pub fn section(title: &str) {
    eprintln!("{}", paint(Style::Heading, &format!("==> {}", title)));
}

/// Final verdict line
pub fn verdict(passed: bool, message: &str) {
    let mark = if passed { "\u{2713}" } else { "\u{2717}" };
    let (style, _) = outcome(passed);
    eprintln!("  {} {}", paint(style, mark), message);
}

/// A precondition that holds
pub fn confirmed(message: &str) {
    eprintln!("  {} {}", paint(Style::Pass, "\u{2713}"), message);
}

pub fn warn(message: &str) {
    eprintln!("  {} {}", paint(Style::Warn, "!"), message);
}

pub fn note(message: &str) {
    eprintln!("  {} {}", paint(Style::Note, "i"), message);
}

pub fn fatal(message: &str) {
    eprintln!("{} {}", paint(Style::Fail, "error:"), message);
}

/// Secondary detail, indented by the caller
pub fn detail(message: &str) {
    eprintln!("{}", paint(Style::Muted, message));
}

pub fn flow_started(name: &str, bindings: usize, parallel: bool) {
    let mode = if parallel { ", parallel" } else { "" };
    eprintln!(
        "{} '{}' ({} binding(s){})",
        paint(Style::Flow, "  Flow"),
        name,
        bindings,
        mode
    );
}

pub fn flow_skipped(name: &str, provides: &[String]) {
    warn(&format!("Flow '{}' skipped: {} already set", name, provides.join(", ")));
}

pub fn flow_finished(name: &str, passed: bool, duration: Duration) {
    let (style, word) = outcome(passed);
    let line = format!("  Flow '{}' {} ({:.2}s)", name, word, duration.as_secs_f64());
    eprintln!("{}", paint(style, &line));
}

/// One matrix binding of a flow; an empty label means the flow has no matrix
pub fn binding_finished(label: &str, passed: bool, duration: Duration) {
    let label = if label.is_empty() { "run" } else { label };
    let (style, word) = outcome(passed);
    let line = format!("    [{}] ({:.2}s) {}", label, duration.as_secs_f64(), word);
    eprintln!("{}", paint(style, &line));
}

pub fn rolled_back(flow: &str, binding: &str, passed: bool) {
    let target = if binding.is_empty() {
        flow.to_string()
    } else {
        format!("{} [{}]", flow, binding)
    };
    if passed {
        eprintln!("{}", paint(Style::Pass, &format!("  Rolled back {}", target)));
    } else {
        eprintln!("{}", paint(Style::Fail, &format!("  Rollback of {} failed", target)));
    }
}

/// Multi-line failure text, one gutter-marked line each
pub fn failure_text(text: &str) {
    for line in text.lines() {
        eprintln!("{}", paint(Style::Fail, &format!("        | {}", line)));
    }
}

/// Non-fatal check failure: headline as a warning, the rest muted
pub fn check_failed(text: &str) {
    let mut lines = text.lines();
    if let Some(first) = lines.next() {
        warn(first);
    }
    for line in lines {
        detail(&format!("        {}", line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paint_wraps_in_style_codes() {
        assert_eq!(paint(Style::Fail, "x"), "\x1b[31mx\x1b[0m");
        assert_eq!(paint(Style::Label, "Running"), "\x1b[1;36mRunning\x1b[0m");
    }

    #[test]
    fn test_outcome_words() {
        assert_eq!(outcome(true).1, "OK");
        assert_eq!(outcome(false).1, "FAIL");
    }
}

//! Colored terminal output for the one-shot subcommands.

use console::Style;

use crate::supervisor::ProcessResult;

/// Renders a classified tool log: warnings in yellow, errors in red,
/// then a one-line verdict.
pub fn render_classification(result: &ProcessResult) -> String {
    let yellow = Style::new().yellow();
    let red = Style::new().red();
    let mut out = String::new();

    for line in &result.warnings {
        out.push_str(&format!("{} {line}\n", yellow.apply_to("warning")));
    }
    for line in &result.errors {
        out.push_str(&format!("{} {line}\n", red.apply_to("error")));
    }

    let summary = format!(
        "exit code {}: {} warning(s), {} error(s)",
        result.exit_code,
        result.warnings.len(),
        result.errors.len()
    );
    let verdict = if result.is_success() {
        Style::new().green().bold().apply_to(summary)
    } else {
        Style::new().red().bold().apply_to(summary)
    };
    out.push_str(&format!("{verdict}\n"));
    out
}

pub fn print_code_release(code_version: &str, content_version: &str) {
    let green = Style::new().green().bold();
    println!(
        "  {} code release {code_version} (content {content_version}) published",
        green.apply_to("✓")
    );
}

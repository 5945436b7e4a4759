//! Post-hoc classification of captured tool output.

use std::io::BufRead;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Unreal-style log line: `LogCategory: Error: message`.
static STRUCTURED_ERROR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^Log(\w+):\s?(Error):\s?(.+)$").expect("valid regex"));

/// Outcome of one supervised tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    pub exit_code: i32,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn has_log(&self) -> bool {
        !self.warnings.is_empty() || !self.errors.is_empty()
    }
}

/// Markers a line must contain to be collected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Markers {
    pub warning: String,
    pub error: String,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            warning: "Warning:".to_string(),
            error: "Error:".to_string(),
        }
    }
}

/// Collects warning and error lines in order of appearance.
/// A line containing both markers lands in both lists.
pub fn classify<R: BufRead>(reader: R, markers: &Markers) -> std::io::Result<(Vec<String>, Vec<String>)> {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();

    for line in reader.split(b'\n') {
        let bytes = line?;
        let text = String::from_utf8_lossy(&bytes);
        let text = text.trim_end_matches('\r');
        if text.contains(markers.warning.as_str()) {
            warnings.push(text.to_string());
        }
        if text.contains(markers.error.as_str()) {
            errors.push(text.to_string());
        }
    }

    Ok((warnings, errors))
}

/// Rewrites `LogX: Error: msg` lines into `Category: X / Severity: Error / Message: msg`.
/// Lines of any other shape are kept verbatim.
pub fn restructure(errors: &mut [String]) {
    for line in errors.iter_mut() {
        if let Some(caps) = STRUCTURED_ERROR.captures(line) {
            *line = format!(
                "Category: {} / Severity: {} / Message: {}",
                &caps[1], &caps[2], &caps[3]
            );
        }
    }
}

/// Classifies a captured log and restructures errors when the run failed.
pub fn classify_log<R: BufRead>(reader: R, markers: &Markers, exit_code: i32) -> std::io::Result<ProcessResult> {
    let (warnings, mut errors) = classify(reader, markers)?;
    if exit_code != 0 {
        restructure(&mut errors);
    }
    Ok(ProcessResult {
        exit_code,
        warnings,
        errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LOG: &str = "LogInit: Display: starting\r\n\
                       LogCook: Warning: missing asset /Game/A\r\n\
                       LogFoo:Error: bad thing\n\
                       plain Error: disk full\n\
                       Warning: and Error: on one line\n";

    #[test]
    fn splits_warnings_and_errors_in_order() {
        let (warnings, errors) = classify(Cursor::new(LOG), &Markers::default()).unwrap();
        assert_eq!(
            warnings,
            vec![
                "LogCook: Warning: missing asset /Game/A",
                "Warning: and Error: on one line",
            ]
        );
        assert_eq!(
            errors,
            vec![
                "LogFoo:Error: bad thing",
                "plain Error: disk full",
                "Warning: and Error: on one line",
            ]
        );
    }

    #[test]
    fn restructures_only_on_failure() {
        let ok = classify_log(Cursor::new(LOG), &Markers::default(), 0).unwrap();
        assert_eq!(ok.errors[0], "LogFoo:Error: bad thing");

        let failed = classify_log(Cursor::new(LOG), &Markers::default(), 1).unwrap();
        assert_eq!(
            failed.errors[0],
            "Category: Foo / Severity: Error / Message: bad thing"
        );
        assert_eq!(failed.errors[1], "plain Error: disk full");
        assert!(!failed.is_success());
    }

    #[test]
    fn custom_markers() {
        let markers = Markers {
            warning: "WARN".into(),
            error: "FATAL".into(),
        };
        let (warnings, errors) = classify(Cursor::new("WARN x\nFATAL y\nError: z\n"), &markers).unwrap();
        assert_eq!(warnings, vec!["WARN x"]);
        assert_eq!(errors, vec!["FATAL y"]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let bytes: &[u8] = b"Error: caf\xe9\n";
        let (_, errors) = classify(Cursor::new(bytes), &Markers::default()).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("Error: caf"));
    }

    #[test]
    fn empty_log() {
        let result = classify_log(Cursor::new(""), &Markers::default(), 0).unwrap();
        assert!(!result.has_log());
    }
}

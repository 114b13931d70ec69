use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("{program} not found")]
    NotFound { program: String },
    #[error("failed to run {command}: {source}")]
    Io {
        command: String,
        #[source]
        source: io::Error,
    },
    /// Non-empty stderr from a buffered call in the default mode. Displays as
    /// the raw stderr text and nothing else.
    #[error("{detail}")]
    Stderr { command: String, detail: String },
    #[error("{}", format_exit_message(.status, .stdout, .stderr))]
    Exit {
        command: String,
        status: i32,
        stdout: String,
        stderr: String,
    },
    #[error("expected {expected} output, got {actual}")]
    UnexpectedOutput {
        expected: &'static str,
        actual: &'static str,
    },
}

impl BridgeError {
    /// Text the failing command printed, stderr first.
    pub fn diagnostic(&self) -> String {
        match self {
            BridgeError::Stderr { detail, .. } => detail.clone(),
            BridgeError::Exit { stdout, stderr, .. } => format_output(stdout, stderr),
            other => other.to_string(),
        }
    }

    pub fn mentions(&self, needle: &str) -> bool {
        self.diagnostic().contains(needle)
    }
}

pub(crate) fn format_output(stdout: &str, stderr: &str) -> String {
    let stdout = stdout.trim();
    let stderr = stderr.trim();
    match (stdout.is_empty(), stderr.is_empty()) {
        (true, true) => String::new(),
        (true, false) => stderr.to_string(),
        (false, true) => stdout.to_string(),
        (false, false) => format!("{stderr}\n{stdout}"),
    }
}

fn format_exit_message(status: &i32, stdout: &str, stderr: &str) -> String {
    let detail = format_output(stdout, stderr);
    if detail.is_empty() {
        format!("command failed with exit {status}")
    } else {
        format!("command failed with exit {status}: {detail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_error_displays_detail_verbatim() {
        let err = BridgeError::Stderr {
            command: "adb shell ls".into(),
            detail: "ls: /x: No such file or directory\n".into(),
        };
        assert_eq!(err.to_string(), "ls: /x: No such file or directory\n");
        assert!(err.mentions("No such file or directory"));
    }

    #[test]
    fn exit_error_includes_both_streams() {
        let err = BridgeError::Exit {
            command: "adb shell ls /x".into(),
            status: 1,
            stdout: "partial\n".into(),
            stderr: "ls: /x: No such file or directory\n".into(),
        };
        assert_eq!(
            err.to_string(),
            "command failed with exit 1: ls: /x: No such file or directory\npartial"
        );
        assert!(err.mentions("No such file or directory"));
    }

    #[test]
    fn silent_exit_has_plain_message() {
        let err = BridgeError::Exit {
            command: "false".into(),
            status: 2,
            stdout: String::new(),
            stderr: "  ".into(),
        };
        assert_eq!(err.to_string(), "command failed with exit 2");
        assert!(err.diagnostic().is_empty());
    }
}

//! External `.msg` parser process.
//!
//! The input is written to a per-call temp file, the configured program is
//! run with the file path appended, and its stdout is decoded as a
//! [`MsgRecord`]. The temp file is removed when the call returns, whatever
//! the outcome.

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::MsgConfig;
use crate::error::{ConvertError, Result};
use crate::model::Message;
use crate::parser::msg::{MsgBackend, MsgRecord};

/// Stderr kept for the error message.
const MAX_STDERR: usize = 2048;

/// Runs an external program that speaks the JSON record contract.
#[derive(Debug, Clone)]
pub struct CommandMsgBackend {
    argv: Vec<String>,
    timeout: Duration,
    retry_on_timeout: bool,
}

impl CommandMsgBackend {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self {
            argv,
            timeout,
            retry_on_timeout: false,
        }
    }

    pub fn from_config(config: &MsgConfig) -> Self {
        Self {
            argv: config.command.clone(),
            timeout: config.timeout(),
            retry_on_timeout: config.retry_on_timeout,
        }
    }

    /// Re-run once when the first attempt times out.
    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry_on_timeout = retry;
        self
    }

    fn run_once(&self, runtime: &tokio::runtime::Runtime, path: &std::path::Path) -> Result<Vec<u8>> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(ConvertError::Subprocess(
                "no MSG parser command configured".to_string(),
            ));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        runtime.block_on(async {
            let child = command.spawn().map_err(|e| {
                ConvertError::Subprocess(format!("failed to start '{program}': {e}"))
            })?;

            // Dropping the wait future on timeout drops the child, which kills it
            let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    return Err(ConvertError::Subprocess(format!("waiting for '{program}': {e}")))
                }
                Err(_) => return Err(ConvertError::Timeout(self.timeout)),
            };

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr: String = stderr.trim().chars().take(MAX_STDERR).collect();
                // A declined input still arrives as JSON on stdout
                if let Err(e @ ConvertError::Parse(_)) = MsgRecord::from_json(&output.stdout) {
                    return Err(e);
                }
                return Err(ConvertError::Subprocess(format!(
                    "'{program}' exited with {}: {stderr}",
                    output.status
                )));
            }
            Ok(output.stdout)
        })
    }

    fn run_with_retry(&self, path: &std::path::Path) -> Result<Vec<u8>> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ConvertError::Subprocess(format!("starting runtime: {e}")))?;

        let attempts = if self.retry_on_timeout { 2 } else { 1 };
        let mut attempt = 1;
        loop {
            match self.run_once(&runtime, path) {
                Err(ConvertError::Timeout(limit)) if attempt < attempts => {
                    warn!(timeout = ?limit, attempt, "MSG parser timed out, retrying");
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl MsgBackend for CommandMsgBackend {
    fn name(&self) -> &'static str {
        "command"
    }

    fn parse(&self, bytes: &[u8]) -> Result<Message> {
        let mut input = tempfile::Builder::new()
            .prefix("mailpdf-")
            .suffix(".msg")
            .tempfile()
            .map_err(|e| ConvertError::Subprocess(format!("creating temp file: {e}")))?;
        input
            .write_all(bytes)
            .and_then(|()| input.flush())
            .map_err(|e| ConvertError::io(input.path(), e))?;

        let path = input.path();
        let stdout = if tokio::runtime::Handle::try_current().is_ok() {
            // A runtime cannot be blocked on from inside another one
            std::thread::scope(|scope| scope.spawn(|| self.run_with_retry(path)).join())
                .map_err(|_| ConvertError::Subprocess("MSG parser thread panicked".to_string()))??
        } else {
            self.run_with_retry(path)?
        };
        debug!(bytes = stdout.len(), "MSG parser finished");

        Ok(MsgRecord::from_json(&stdout)?.into_message())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string(), "sh".to_string()]
    }

    #[test]
    fn test_successful_run() {
        let script = r#"test -s "$1" && printf '{"subject":"From tool","body_text":"ok"}'"#;
        let backend = CommandMsgBackend::new(sh(script), Duration::from_secs(10));
        let msg = backend.parse(b"payload").expect("parse");
        assert_eq!(msg.subject, "From tool");
        assert_eq!(msg.body_text.as_deref(), Some("ok"));
    }

    #[test]
    fn test_declined_input_is_parse_error() {
        let script = r#"printf '{"ok":false,"error":"bad container"}'; exit 1"#;
        let backend = CommandMsgBackend::new(sh(script), Duration::from_secs(10));
        let err = backend.parse(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn test_crash_is_subprocess_error() {
        let backend = CommandMsgBackend::new(sh("echo boom >&2; exit 3"), Duration::from_secs(10));
        let err = backend.parse(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessError);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_missing_program_is_subprocess_error() {
        let backend = CommandMsgBackend::new(
            vec!["/nonexistent/msg-parser".to_string()],
            Duration::from_secs(10),
        );
        assert_eq!(backend.parse(b"x").unwrap_err().kind(), ErrorKind::SubprocessError);
        let empty = CommandMsgBackend::new(Vec::new(), Duration::from_secs(1));
        assert_eq!(empty.parse(b"x").unwrap_err().kind(), ErrorKind::SubprocessError);
    }

    #[test]
    fn test_hang_times_out() {
        let backend = CommandMsgBackend::new(sh("sleep 30"), Duration::from_millis(200));
        let started = std::time::Instant::now();
        let err = backend.parse(b"x").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_retried_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let marker = dir.path().join("first");
        let script = format!(
            r#"if [ -e '{0}' ]; then printf '{{"subject":"second try"}}'; else touch '{0}'; sleep 30; fi"#,
            marker.display()
        );
        let backend = CommandMsgBackend::new(sh(&script), Duration::from_millis(500)).with_retry(true);
        let msg = backend.parse(b"x").expect("parse");
        assert_eq!(msg.subject, "second try");
    }

    #[test]
    fn test_parse_inside_async_runtime() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let backend = CommandMsgBackend::new(sh(r#"printf '{"subject":"nested"}'"#), Duration::from_secs(10));
        let msg = runtime.block_on(async { backend.parse(b"x") }).expect("parse");
        assert_eq!(msg.subject, "nested");
    }

    #[test]
    fn test_temp_file_removed_after_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let record = dir.path().join("seen");
        let script = format!(r#"printf '%s' "$1" > '{}'; printf '{{}}'"#, record.display());
        let backend = CommandMsgBackend::new(sh(&script), Duration::from_secs(10));
        backend.parse(b"x").expect("parse");

        let seen = std::fs::read_to_string(&record).expect("path recorded");
        assert!(seen.ends_with(".msg"));
        assert!(!std::path::Path::new(&seen).exists());
    }
}

//! External process execution.
//!
//! Every external tool (kubectl, helm, wg, ssh, sudo) is invoked through the
//! [`CommandRunner`] trait so managers can be exercised against scripted fakes.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{CeresError, Result};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    #[must_use]
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given stderr.
    #[must_use]
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    #[must_use]
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr, trimmed.
    #[must_use]
    pub fn combined(&self) -> String {
        let mut out = self.stdout.trim_end().to_string();
        let err = self.stderr.trim();
        if !err.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(err);
        }
        out
    }

    fn status_text(&self) -> String {
        self.status
            .map_or_else(|| "terminated by signal".to_string(), |c| format!("exit status {c}"))
    }
}

/// Runs external programs.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`, optionally feeding `stdin`, and capture output.
    ///
    /// A non-zero exit is not an error at this level.
    async fn run(&self, program: &str, args: &[String], stdin: Option<&[u8]>)
        -> Result<CommandOutput>;

    /// Run and map a non-zero exit to [`CeresError::CommandFailed`].
    async fn run_checked(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        let output = self.run(program, args, stdin).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(CeresError::CommandFailed {
                program: format!("{program} {}", args.first().map_or("", String::as_str))
                    .trim_end()
                    .to_string(),
                status: output.status_text(),
                output: output.combined(),
            })
        }
    }
}

/// Convert borrowed arguments into the owned form [`CommandRunner`] expects.
#[must_use]
pub fn args<S: AsRef<str>>(items: &[S]) -> Vec<String> {
    items.iter().map(|s| s.as_ref().to_string()).collect()
}

/// Runs commands on the local host with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    workdir: Option<PathBuf>,
}

impl SystemRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir`.
    #[must_use]
    pub fn with_workdir(dir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput> {
        debug!(program = %program, args = ?args, "Running command");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);
        if let Some(dir) = &self.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CeresError::CommandNotFound(program.to_string())
            } else {
                CeresError::Io(e)
            }
        })?;

        // Feed stdin from a separate task so a chatty child cannot deadlock on a full stdout pipe.
        let writer = match (stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let data = input.to_vec();
                Some(tokio::spawn(async move {
                    pipe.write_all(&data).await?;
                    pipe.shutdown().await
                }))
            }
            _ => None,
        };

        let output = child.wait_with_output().await?;
        if let Some(handle) = writer {
            match handle.await {
                Ok(Ok(())) => {}
                // The child may legitimately exit before reading all of stdin.
                Ok(Err(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                Ok(Err(e)) => return Err(e.into()),
                Err(e) => return Err(std::io::Error::other(e).into()),
            }
        }

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted runner for unit tests.

    use std::sync::Mutex;

    use super::{async_trait, CommandOutput, CommandRunner, Result};

    /// One recorded invocation.
    #[derive(Debug, Clone)]
    pub struct Call {
        pub program: String,
        pub args: Vec<String>,
        pub stdin: Option<Vec<u8>>,
    }

    impl Call {
        pub fn line(&self) -> String {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Answers commands by the first rule whose prefix matches `program args...`.
    #[derive(Default)]
    pub struct ScriptedRunner {
        rules: Mutex<Vec<(String, CommandOutput)>>,
        pub calls: Mutex<Vec<Call>>,
    }

    impl ScriptedRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn on(self, prefix: &str, output: CommandOutput) -> Self {
            self.rules
                .lock()
                .unwrap()
                .push((prefix.to_string(), output));
            self
        }

        pub fn lines(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(Call::line).collect()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            args: &[String],
            stdin: Option<&[u8]>,
        ) -> Result<CommandOutput> {
            let call = Call {
                program: program.to_string(),
                args: args.to_vec(),
                stdin: stdin.map(<[u8]>::to_vec),
            };
            let line = call.line();
            self.calls.lock().unwrap().push(call);
            let rules = self.rules.lock().unwrap();
            Ok(rules
                .iter()
                .find(|(prefix, _)| line.starts_with(prefix.as_str()))
                .map_or_else(
                    || CommandOutput::failed(127, format!("no scripted response for `{line}`")),
                    |(_, out)| out.clone(),
                ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let out = CommandOutput {
            status: Some(1),
            stdout: "line one\n".into(),
            stderr: "boom\n".into(),
        };
        assert_eq!(out.combined(), "line one\nboom");
        assert!(!out.success());
        assert_eq!(CommandOutput::ok("x").combined(), "x");
    }

    #[tokio::test]
    async fn test_system_runner_captures_output_and_stdin() {
        let runner = SystemRunner::new();
        let out = runner
            .run("cat", &[], Some(b"hello from stdin"))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello from stdin");
    }

    #[tokio::test]
    async fn test_missing_binary_is_command_not_found() {
        let runner = SystemRunner::new();
        let err = runner
            .run("ceres-definitely-not-installed", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, CeresError::CommandNotFound(_)));
    }

    #[tokio::test]
    async fn test_run_checked_maps_failure() {
        let runner = SystemRunner::new();
        let err = runner
            .run_checked("sh", &args(&["-c", "echo nope >&2; exit 3"]), None)
            .await
            .unwrap_err();
        match err {
            CeresError::CommandFailed { status, output, .. } => {
                assert_eq!(status, "exit status 3");
                assert_eq!(output, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

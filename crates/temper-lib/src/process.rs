//! Bounded-time execution of external tools
//!
//! Chassis management is only reachable through privileged command-line
//! tools that can hang for tens of seconds on a busy BMC. Every invocation
//! goes through a [`CommandRunner`] with an explicit timeout; on expiry the
//! child is killed and reaped before the error is returned.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("empty command line")]
    EmptyCommand,

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("i/o error while running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Executes an argv with a deadline
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput, ProcessError>;
}

/// Runs real child processes via `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, argv: &[String], timeout: Duration) -> Result<CommandOutput, ProcessError> {
        let (program, args) = argv.split_first().ok_or(ProcessError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: program.clone(),
                source,
            })?;

        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();

        let io_error = |source| ProcessError::Io {
            program: program.clone(),
            source,
        };

        let collect = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (out_res, err_res) = tokio::join!(
                read_pipe(stdout.as_mut(), &mut out),
                read_pipe(stderr.as_mut(), &mut err)
            );
            out_res.map_err(io_error)?;
            err_res.map_err(io_error)?;
            let status = child.wait().await.map_err(io_error)?;
            Ok::<_, ProcessError>(CommandOutput {
                exit_code: status.code(),
                stdout: String::from_utf8_lossy(&out).into_owned(),
                stderr: String::from_utf8_lossy(&err).into_owned(),
            })
        };

        let result = tokio::time::timeout(timeout, collect).await;

        match result {
            Ok(output) => output,
            Err(_) => {
                // kill() also waits, so the child never lingers as a zombie
                if let Err(e) = child.kill().await {
                    tracing::debug!(program = %program, error = %e, "Failed to kill timed out process");
                }
                Err(ProcessError::Timeout {
                    program: program.clone(),
                    timeout,
                })
            }
        }
    }
}

async fn read_pipe<R>(pipe: Option<&mut R>, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncReadExt + Unpin,
{
    match pipe {
        Some(pipe) => pipe.read_to_end(buf).await.map(|_| ()),
        None => Ok(()),
    }
}

/// Build an owned argv from string slices
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}

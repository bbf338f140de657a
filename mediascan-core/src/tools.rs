use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::ToolOptions;
use crate::error::{MediaError, Result};

/// Lines of stderr kept in [`MediaError::ToolFailed`].
const STDERR_TAIL_LINES: usize = 8;

/// Captured output of a finished tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// Spawns `ffmpeg`/`ffprobe` with a bounded lifetime.
///
/// Children are spawned with `kill_on_drop`, so an expired deadline (or a
/// cancelled caller) terminates the process instead of leaking it.
#[derive(Debug, Clone)]
pub struct ToolRunner {
    ffmpeg: String,
    ffprobe: String,
    timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new(options: &ToolOptions) -> Self {
        Self {
            ffmpeg: options.ffmpeg.clone(),
            ffprobe: options.ffprobe.clone(),
            timeout: options.timeout(),
        }
    }

    pub async fn ffprobe<I, S>(&self, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run(&self.ffprobe, args).await
    }

    pub async fn ffmpeg<I, S>(&self, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.run(&self.ffmpeg, args).await
    }

    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        trace!(program, ?args, "Spawning tool");

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| MediaError::ToolTimeout {
                    tool: program.to_string(),
                    timeout: limit,
                })??,
            None => child.wait_with_output().await?,
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            debug!(program, status = %output.status, "Tool exited unsuccessfully");
            return Err(MediaError::ToolFailed {
                tool: program.to_string(),
                status: output.status.to_string(),
                stderr: stderr_tail(&stderr),
            });
        }

        Ok(ToolOutput {
            stdout: output.stdout,
            stderr,
        })
    }
}

fn stderr_tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

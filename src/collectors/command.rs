use log::debug;
use std::io::ErrorKind;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time;

use crate::error::ReadingError;

/// Runs `tool` and returns its stdout. A child still running at `timeout` is
/// killed, so a hung vendor tool cannot stall the caller.
pub async fn run_with_timeout(
    tool: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ReadingError> {
    let cmd_start = Instant::now();
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match time::timeout(timeout, output).await {
        Err(_) => {
            return Err(ReadingError::Timeout {
                tool: tool.to_string(),
                timeout,
            })
        }
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
            return Err(ReadingError::ToolMissing {
                tool: tool.to_string(),
            })
        }
        Ok(Err(e)) => return Err(ReadingError::Io(e)),
        Ok(Ok(output)) => output,
    };
    debug!(
        "{} command execution took: {} ms",
        tool,
        cmd_start.elapsed().as_millis()
    );

    if !output.status.success() {
        return Err(ReadingError::ToolFailed {
            tool: tool.to_string(),
            status: output.status.to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

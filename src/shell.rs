use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// What a finished command left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error("could not launch `{shell}`: {source}")]
    Launch {
        shell: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
}

/// The flag a shell takes to run a command string.
fn command_flag(shell: &str) -> &'static str {
    let name = shell.rsplit(['/', '\\']).next().unwrap_or(shell);
    match name.trim_end_matches(".exe") {
        "powershell" | "pwsh" => "-Command",
        "cmd" => "/C",
        _ => "-c",
    }
}

/// `shell_exec` runs `cmd` on the "command line" in the current directory and
/// environment. No stdin is provided. stdout and stderr are captured rather
/// than shown so that the caller decides what to do with them.
///
/// The child is killed if `timeout` elapses or the future is dropped.
pub async fn shell_exec(
    shell: &str,
    cmd: &str,
    timeout: Option<Duration>,
) -> Result<CommandOutput, ShellError> {
    debug!("shell_exec: {} {} {:?}", shell, command_flag(shell), cmd);
    let child = Command::new(shell)
        .arg(command_flag(shell))
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ShellError::Launch {
            shell: shell.to_string(),
            source,
        })?;

    let output_fut = child.wait_with_output();
    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, output_fut).await {
            Ok(output) => output,
            Err(_) => return Err(ShellError::TimedOut(limit)),
        },
        None => output_fut.await,
    }
    .map_err(|source| ShellError::Launch {
        shell: shell.to_string(),
        source,
    })?;

    let result = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        code: output.status.code(),
    };
    debug!("shell_exec finished: code={:?}", result.code);
    Ok(result)
}

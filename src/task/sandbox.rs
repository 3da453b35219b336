//! External command execution for tasks.

use sitbot_proto::Message;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, warn};

use super::Task;
use crate::error::TaskError;

impl Task {
    /// Run `command_line` and relay each line of its stdout to `target`.
    ///
    /// The first token names the command (slashes become `_`), the rest are
    /// its arguments. With a configured sandbox program that program is run
    /// instead, with the command name as its first argument. `SITBOT_TID` is
    /// added to `env`.
    pub async fn pipe_command(
        &self,
        command_line: &str,
        target: &str,
        env: &[(String, String)],
    ) -> Result<(), TaskError> {
        let mut tokens = command_line.split_whitespace();
        let name = tokens
            .next()
            .ok_or(TaskError::EmptyCommand)?
            .replace('/', "_");

        let mut cmd = match &self.sandbox.program {
            Some(program) => {
                let mut cmd = Command::new(program);
                cmd.arg(&name);
                cmd
            }
            None => Command::new(&name),
        };
        cmd.args(tokens)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .env("SITBOT_TID", self.id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(command = %name, to = target, "spawning");
        let mut child = cmd.spawn().map_err(|source| TaskError::Spawn {
            command: name.clone(),
            source,
        })?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskError::Io(std::io::Error::other("stdout not captured")))?;

        let result = self.relay(BufReader::new(stdout).lines(), target).await;

        match tokio::time::timeout(self.sandbox.grace(), child.wait()).await {
            Ok(Ok(status)) => debug!(command = %name, %status, "exited"),
            Ok(Err(e)) => warn!(command = %name, error = %e, "wait failed"),
            Err(_) => {
                warn!(command = %name, "did not exit within grace period, killing");
                if let Err(e) = child.kill().await {
                    warn!(command = %name, error = %e, "kill failed");
                }
            }
        }
        result
    }

    async fn relay(
        &self,
        mut lines: Lines<BufReader<ChildStdout>>,
        target: &str,
    ) -> Result<(), TaskError> {
        loop {
            let line = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                return Ok(());
            };
            if line.is_empty() {
                continue;
            }
            self.write(Message::privmsg(target, line)).await?;
        }
    }
}

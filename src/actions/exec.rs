//! Subprocess (`exec`) action handler.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::matcher::tokenize;
use crate::models::{Action, Message};
use crate::template::substitute;

/// Default timeout for exec actions.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// User-facing output when a command exceeds its deadline.
pub const TIMEOUT_OUTPUT: &str = "Hmm, something timed out. Please try again.";

/// Run an exec action: substitute variables into `cmd`, tokenize it into an
/// argv, and run it with a deadline. Always sets `_exec_output` and
/// `_exec_status` on the message.
pub async fn handle(action: &Action, msg: &mut Message) {
    if action.cmd.is_empty() {
        error!(action = %action.name, "exec action has no 'cmd'");
        msg.set_var("_exec_output", "");
        msg.set_var("_exec_status", "1");
        return;
    }

    let (cmd, err) = substitute(&action.cmd, &msg.vars);
    if let Some(err) = err {
        warn!(action = %action.name, "substitution in 'cmd': {err}");
    }

    let argv = tokenize::exec_args(&cmd);
    let Some((program, args)) = argv.split_first() else {
        error!(action = %action.name, "exec action 'cmd' tokenized to nothing");
        msg.set_var("_exec_output", "");
        msg.set_var("_exec_status", "1");
        return;
    };

    let timeout = if action.timeout > 0 {
        Duration::from_secs(action.timeout)
    } else {
        DEFAULT_TIMEOUT
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // Dropping the future on timeout SIGKILLs the child.
        .kill_on_drop(true);

    debug!(action = %action.name, program, ?timeout, "running exec action");

    match tokio::time::timeout(timeout, command.output()).await {
        Err(_) => {
            warn!(action = %action.name, ?timeout, "exec action timed out");
            msg.set_var("_exec_output", TIMEOUT_OUTPUT);
            msg.set_var("_exec_status", "1");
        }
        Ok(Err(e)) => {
            error!(action = %action.name, "failed to run '{program}': {e}");
            msg.error = format!("Failed to run the '{}' action. Please check the logs.", action.name);
            msg.set_var("_exec_output", "");
            msg.set_var("_exec_status", "1");
        }
        Ok(Ok(output)) => {
            let status = output.status.code().unwrap_or(1);
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                msg.set_var("_exec_output", stdout);
            } else {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                warn!(action = %action.name, status, "exec action exited non-zero: {stderr}");
                msg.error = stderr.clone();
                msg.set_var("_exec_output", stderr);
            }
            msg.set_var("_exec_status", status.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;

    fn exec_action(cmd: &str, timeout: u64) -> Action {
        Action {
            name: "test".into(),
            action_type: "exec".into(),
            cmd: cmd.into(),
            timeout,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let mut msg = Message::new(Service::Cli);
        handle(&exec_action(r#"echo "hi there""#, 0), &mut msg).await;
        assert_eq!(msg.var("_exec_output"), "hi there");
        assert_eq!(msg.var("_exec_status"), "0");
        assert!(msg.error.is_empty());
    }

    #[tokio::test]
    async fn substitutes_vars_into_cmd() {
        let mut msg = Message::new(Service::Cli);
        msg.set_var("word", "substituted");
        handle(&exec_action("echo ${word}", 0), &mut msg).await;
        assert_eq!(msg.var("_exec_output"), "substituted");
    }

    #[tokio::test]
    async fn nonzero_exit_captures_stderr() {
        let mut msg = Message::new(Service::Cli);
        handle(&exec_action("sh -c 'echo oops >&2; exit 3'", 0), &mut msg).await;
        assert_eq!(msg.var("_exec_status"), "3");
        assert_eq!(msg.var("_exec_output"), "oops");
        assert_eq!(msg.error, "oops");
    }

    #[tokio::test]
    async fn timeout_sets_friendly_output() {
        let mut msg = Message::new(Service::Cli);
        handle(&exec_action("sleep 5", 2), &mut msg).await;
        assert_eq!(msg.var("_exec_output"), TIMEOUT_OUTPUT);
        assert_eq!(msg.var("_exec_status"), "1");
    }

    #[tokio::test]
    async fn missing_program_sets_error() {
        let mut msg = Message::new(Service::Cli);
        handle(&exec_action("definitely-not-a-real-binary-xyz", 0), &mut msg).await;
        assert_eq!(msg.var("_exec_status"), "1");
        assert!(!msg.error.is_empty());
    }

    #[tokio::test]
    async fn empty_cmd_sets_failure_vars() {
        let mut msg = Message::new(Service::Cli);
        handle(&exec_action("", 0), &mut msg).await;
        assert_eq!(msg.var("_exec_status"), "1");
    }
}

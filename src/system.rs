//! 外部命令: nginx / systemctl
//!
//! 每条命令都有超时限制，超时后子进程被杀掉。

use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::utils::{DeployError, Result};

/// 命令执行结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutcome {
    /// 失败时取 stderr，成功时取 stdout
    pub fn message(&self) -> &str {
        if self.success {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutcome> {
        let command = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        debug!("▶️  {}", command);

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(DeployError::Command { command, source: e }),
            Err(_) => {
                warn!("命令超时: {}", command);
                return Err(DeployError::Timeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        let outcome = CommandOutcome {
            command,
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        if !outcome.success {
            warn!("命令失败 `{}`: {}", outcome.command, outcome.message());
        }
        Ok(outcome)
    }

    /// `nginx -t`
    pub async fn nginx_test(&self) -> Result<CommandOutcome> {
        self.run("nginx", &["-t"]).await
    }

    pub async fn nginx_reload(&self) -> Result<CommandOutcome> {
        self.run("systemctl", &["reload", "nginx"]).await
    }

    pub async fn caddy_reload(&self) -> Result<CommandOutcome> {
        self.run("systemctl", &["reload", "caddy"]).await
    }

    pub async fn xray_restart(&self) -> Result<CommandOutcome> {
        self.run("systemctl", &["restart", "xray"]).await
    }

    /// `systemctl is-active <service>`
    pub async fn is_active(&self, service: &str) -> Result<CommandOutcome> {
        self.run("systemctl", &["is-active", service]).await
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_success() {
        let runner = CommandRunner::default();
        let outcome = runner.run("sh", &["-c", "echo hello"]).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.code, Some(0));
        assert_eq!(outcome.message(), "hello");
        assert_eq!(outcome.command, "sh -c echo hello");
    }

    #[tokio::test]
    async fn test_run_failure() {
        let runner = CommandRunner::default();
        let outcome = runner
            .run("sh", &["-c", "echo broken >&2; exit 3"])
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.code, Some(3));
        assert_eq!(outcome.message(), "broken");
    }

    #[tokio::test]
    async fn test_missing_program() {
        let runner = CommandRunner::default();
        let err = runner
            .run("definitely-not-a-real-binary-xhttp", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::Command { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let runner = CommandRunner::new(Duration::from_millis(100));
        let err = runner.run("sleep", &["5"]).await.unwrap_err();
        assert!(matches!(
            err,
            DeployError::Timeout { timeout, .. } if timeout == Duration::from_millis(100)
        ));
        assert!(err.to_string().contains("100ms"), "{}", err);
    }
}

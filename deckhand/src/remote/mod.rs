//! Remote execution capability

pub mod ssh;

use std::time::Duration;

use async_trait::async_trait;

/// Captured result of one remote command invocation
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Remote exit status; non-zero for unreachable hosts and timeouts
    pub exit_status: i32,

    /// Combined stdout and stderr
    pub output: String,

    /// Wall-clock duration of the invocation
    pub duration: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Capability to run a shell command on a remote host.
///
/// Implementations must fail cleanly: an unreachable host, a non-zero remote
/// exit, or a timeout all surface as a non-zero `exit_status` in the returned
/// output, never as a fault that crosses the task boundary.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command on the given host and capture its outcome
    async fn run(&self, host: &str, command: &str) -> CommandOutput;
}

//! SSH executor using the system openssh client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SshSettings;
use crate::remote::{CommandOutput, RemoteExecutor};

/// Exit status reported for a timed-out invocation
const TIMEOUT_EXIT_STATUS: i32 = 124;

/// Exit status reported when the ssh client could not be spawned
const SPAWN_EXIT_STATUS: i32 = 127;

/// Runs commands over ssh subprocesses
pub struct SshExecutor {
    user: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
}

impl SshExecutor {
    /// Create an executor connecting as the given user
    pub fn new(user: impl Into<String>, settings: &SshSettings) -> Self {
        Self {
            user: user.into(),
            port: settings.port,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            command_timeout: Duration::from_secs(settings.command_timeout_secs),
        }
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> CommandOutput {
        debug!("ssh {}@{}: {}", self.user, host, command);
        let started = Instant::now();

        let mut ssh = Command::new("ssh");
        ssh.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!(
                "ConnectTimeout={}",
                self.connect_timeout.as_secs()
            ))
            .arg(format!("{}@{}", self.user, host))
            .arg(command);

        let result = tokio::time::timeout(self.command_timeout, ssh.output()).await;
        let duration = started.elapsed();

        match result {
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(stderr.trim_end());
                }

                CommandOutput {
                    exit_status: output.status.code().unwrap_or(-1),
                    output: combined,
                    duration,
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to spawn ssh for {}: {}", host, e);
                CommandOutput {
                    exit_status: SPAWN_EXIT_STATUS,
                    output: format!("failed to spawn ssh: {}", e),
                    duration,
                }
            }
            Err(_) => {
                warn!(
                    "Command on {} timed out after {:?}",
                    host, self.command_timeout
                );
                CommandOutput {
                    exit_status: TIMEOUT_EXIT_STATUS,
                    output: format!("command timed out after {:?}", self.command_timeout),
                    duration,
                }
            }
        }
    }
}

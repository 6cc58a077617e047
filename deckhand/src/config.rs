//! Settings file management

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::errors::DeployError;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Repository locator template; `{application}` is substituted
    #[serde(default = "default_repository_template")]
    pub repository_template: String,

    /// Deploy root template; `{user}` is substituted
    #[serde(default = "default_deploy_to_template")]
    pub deploy_to_template: String,

    /// Git remote name used on the target hosts
    #[serde(default = "default_remote_name")]
    pub remote_name: String,

    /// Command prefix for application tooling; `{environment}` is substituted
    #[serde(default = "default_runner_template")]
    pub runner_template: String,

    /// Base URL of the external deployment check endpoint.
    /// When unset the health-check task is recorded as skipped.
    #[serde(default)]
    pub check_base_url: Option<String>,

    /// SSH transport configuration
    #[serde(default)]
    pub ssh: SshSettings,
}

fn default_repository_template() -> String {
    "git@github.com:acme/{application}.git".to_string()
}

fn default_deploy_to_template() -> String {
    "/home/{user}/app".to_string()
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_runner_template() -> String {
    "RAILS_ENV={environment} bundle exec".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            repository_template: default_repository_template(),
            deploy_to_template: default_deploy_to_template(),
            remote_name: default_remote_name(),
            runner_template: default_runner_template(),
            check_base_url: None,
            ssh: SshSettings::default(),
        }
    }
}

impl Settings {
    /// Read settings from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DeployError> {
        let contents = fs::read_to_string(path.as_ref()).await?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    /// Remote user; defaults to the application name when unset
    #[serde(default)]
    pub user: Option<String>,

    /// SSH port
    #[serde(default = "default_ssh_port")]
    pub port: u16,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Per-command timeout in seconds
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_command_timeout() -> u64 {
    600
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: None,
            port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

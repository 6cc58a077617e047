//! Stage resolution

use std::fmt;

use crate::errors::DeployError;

/// Named deployment target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Stage {
    Production,
    Qa,
    Staging,
    Beta,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Production => "production",
            Stage::Qa => "qa",
            Stage::Staging => "staging",
            Stage::Beta => "beta",
        }
    }

    /// Stages for which the database backup task runs
    pub fn backup_eligible(&self) -> bool {
        matches!(self, Stage::Production | Stage::Beta)
    }

    /// Stages for which scheduled jobs are updated
    pub fn schedule_eligible(&self) -> bool {
        matches!(self, Stage::Production | Stage::Qa)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "production" => Ok(Stage::Production),
            "qa" => Ok(Stage::Qa),
            "staging" => Ok(Stage::Staging),
            "beta" => Ok(Stage::Beta),
            _ => Err(DeployError::Configuration(format!(
                "unknown stage '{}'",
                s
            ))),
        }
    }
}

/// Promotion chain: the branch each stage merges *from*.
///
/// Code flows master → staging → qa → production; a stage absent from this
/// table cannot be deployed and resolving it is a configuration error.
const PROMOTION: &[(Stage, &str)] = &[
    (Stage::Production, "qa"),
    (Stage::Qa, "staging"),
    (Stage::Staging, "master"),
];

/// Effective source branch and runtime environment for a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTarget {
    pub branch: String,
    pub environment: String,
}

/// Resolve a stage to its source branch and environment name
pub fn resolve(stage: Stage) -> Result<StageTarget, DeployError> {
    let branch = PROMOTION
        .iter()
        .find(|(s, _)| *s == stage)
        .map(|(_, branch)| *branch)
        .ok_or_else(|| {
            DeployError::Configuration(format!(
                "no promotion branch mapped for stage '{}'",
                stage
            ))
        })?;

    Ok(StageTarget {
        branch: branch.to_string(),
        environment: stage.as_str().to_string(),
    })
}

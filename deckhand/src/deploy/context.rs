//! Per-run context

use std::collections::HashMap;

use crate::config::Settings;
use crate::deploy::stage::{Stage, StageTarget};
use crate::deploy::template;
use crate::errors::DeployError;

/// A deployable application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    name: String,
}

impl Application {
    /// Validate and wrap an application name.
    /// The name feeds paths and repository URLs, so it must be non-empty and
    /// restricted to `[A-Za-z0-9._-]`.
    pub fn new(name: impl Into<String>) -> Result<Self, DeployError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DeployError::Configuration(
                "application name must not be empty".to_string(),
            ));
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(DeployError::Configuration(format!(
                "application name '{}' contains unsafe characters",
                name
            )));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository locator derived from the name via the configured template
    pub fn repository(&self, repository_template: &str) -> Result<String, DeployError> {
        let mut vars = HashMap::new();
        vars.insert("application".to_string(), self.name.clone());
        template::render("repository", repository_template, &vars)
    }
}

/// Variable bundle for one run: built once, passed by reference to every
/// task invocation, discarded at run end. Only `current_revision` changes
/// after construction, and only once the code-sync task succeeds.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub application: Application,
    pub stage: Stage,
    pub branch: String,
    pub environment: String,
    pub remote_name: String,
    pub user: String,
    pub deploy_to: String,
    pub current_path: String,
    pub shared_path: String,
    pub repository: String,
    pub runner: String,
    pub current_revision: Option<String>,
    fresh: bool,
}

impl RunContext {
    /// Build the context from a validated application, a resolved stage
    /// target and the settings
    pub fn new(
        application: Application,
        stage: Stage,
        target: &StageTarget,
        settings: &Settings,
    ) -> Result<Self, DeployError> {
        let user = settings
            .ssh
            .user
            .clone()
            .unwrap_or_else(|| application.name().to_string());

        let repository = application.repository(&settings.repository_template)?;

        let mut vars = HashMap::new();
        vars.insert("user".to_string(), user.clone());
        let deploy_to = template::render("deploy_to", &settings.deploy_to_template, &vars)?;

        let mut vars = HashMap::new();
        vars.insert("environment".to_string(), target.environment.clone());
        let runner = template::render("runner", &settings.runner_template, &vars)?;

        Ok(Self {
            application,
            stage,
            branch: target.branch.clone(),
            environment: target.environment.clone(),
            remote_name: settings.remote_name.clone(),
            user,
            current_path: format!("{}/current", deploy_to),
            shared_path: format!("{}/shared", deploy_to),
            deploy_to,
            repository,
            runner,
            current_revision: None,
            fresh: true,
        })
    }

    /// Freeze the fresh-deploy flag from the probed revision. Called once
    /// after the run-start revision probe; the flag does not flip when the
    /// bootstrap task materializes the first release mid-run.
    pub fn mark_freshness(&mut self) {
        self.fresh = self.current_revision.is_none();
    }

    /// Whether no prior release existed on the target hosts at run start
    pub fn fresh_deploy(&self) -> bool {
        self.fresh
    }

    /// Substitution variables for command templates.
    /// `revision` is present only once the code-sync task has populated it.
    pub fn vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("application".to_string(), self.application.name().to_string());
        vars.insert("stage".to_string(), self.stage.as_str().to_string());
        vars.insert("environment".to_string(), self.environment.clone());
        vars.insert("branch".to_string(), self.branch.clone());
        vars.insert("remote".to_string(), self.remote_name.clone());
        vars.insert("user".to_string(), self.user.clone());
        vars.insert("deploy_to".to_string(), self.deploy_to.clone());
        vars.insert("current_path".to_string(), self.current_path.clone());
        vars.insert("shared_path".to_string(), self.shared_path.clone());
        vars.insert("repository".to_string(), self.repository.clone());
        vars.insert("runner".to_string(), self.runner.clone());
        if let Some(revision) = &self.current_revision {
            vars.insert("revision".to_string(), revision.clone());
        }
        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::stage;

    #[test]
    fn test_application_name_validation() {
        assert!(Application::new("alpha").is_ok());
        assert!(Application::new("alpha-api_v2.1").is_ok());
        assert!(Application::new("").is_err());
        assert!(Application::new("alpha app").is_err());
        assert!(Application::new("alpha/../etc").is_err());
    }

    #[test]
    fn test_repository_from_template() {
        let app = Application::new("alpha").unwrap();
        let repo = app
            .repository("git@github.com:acme/{application}.git")
            .unwrap();
        assert_eq!(repo, "git@github.com:acme/alpha.git");
    }

    #[test]
    fn test_context_paths_and_vars() {
        let app = Application::new("alpha").unwrap();
        let target = stage::resolve(Stage::Production).unwrap();
        let ctx =
            RunContext::new(app, Stage::Production, &target, &Settings::default()).unwrap();

        assert_eq!(ctx.user, "alpha");
        assert_eq!(ctx.deploy_to, "/home/alpha/app");
        assert_eq!(ctx.current_path, "/home/alpha/app/current");
        assert_eq!(ctx.runner, "RAILS_ENV=production bundle exec");
        assert!(ctx.fresh_deploy());

        let vars = ctx.vars();
        assert_eq!(vars.get("branch").map(String::as_str), Some("qa"));
        assert!(!vars.contains_key("revision"));
    }

    #[test]
    fn test_revision_enters_vars_once_populated() {
        let app = Application::new("alpha").unwrap();
        let target = stage::resolve(Stage::Staging).unwrap();
        let mut ctx =
            RunContext::new(app, Stage::Staging, &target, &Settings::default()).unwrap();
        ctx.current_revision = Some("abc123".to_string());
        ctx.mark_freshness();

        assert!(!ctx.fresh_deploy());
        assert_eq!(
            ctx.vars().get("revision").map(String::as_str),
            Some("abc123")
        );
    }
}

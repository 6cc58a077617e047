//! Top-level deployment run orchestration

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::check::CheckClient;
use crate::config::Settings;
use crate::deploy::context::{Application, RunContext};
use crate::deploy::fsm::{RunEvent, RunFsm};
use crate::deploy::pipeline::TaskPipeline;
use crate::deploy::roles::{RoleFilter, RoleMap};
use crate::deploy::stage::{self, Stage};
use crate::deploy::task::Task;
use crate::errors::DeployError;
use crate::models::report::RunReport;
use crate::remote::RemoteExecutor;

/// Orchestrates one deployment run: resolve the stage, build the role map,
/// probe the live revision, then drive the task pipeline.
///
/// Runs share no mutable state; independent instances may execute fully in
/// parallel.
pub struct DeploymentRun {
    settings: Settings,
    remote: Arc<dyn RemoteExecutor>,
    cancel: Option<watch::Receiver<bool>>,
}

impl DeploymentRun {
    pub fn new(settings: Settings, remote: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            settings,
            remote,
            cancel: None,
        }
    }

    /// Install a cooperative cancellation flag, checked between tasks
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Execute the given tasks for an application against a host pool.
    ///
    /// Configuration errors abort before any remote work; everything past
    /// that point is captured into the returned report rather than raised.
    pub async fn run(
        &self,
        application: Application,
        stage: Stage,
        hosts: &[String],
        tasks: &[Task],
    ) -> RunReport {
        let app_name = application.name().to_string();
        let mut fsm = RunFsm::new();
        let _ = fsm.process(RunEvent::Resolve);

        let abort = |fsm: &mut RunFsm, e: &DeployError| {
            error!("Run aborted: {}", e);
            let _ = fsm.process(RunEvent::Abort(e.to_string()));
            RunReport::aborted(app_name.clone(), stage.to_string(), e.to_string())
        };

        let target = match stage::resolve(stage) {
            Ok(target) => target,
            Err(e) => return abort(&mut fsm, &e),
        };
        info!(
            "Deploying {} to {} (merging from {})",
            application.name(),
            stage,
            target.branch
        );

        let mut ctx = match RunContext::new(application, stage, &target, &self.settings) {
            Ok(ctx) => ctx,
            Err(e) => return abort(&mut fsm, &e),
        };

        let checker = match &self.settings.check_base_url {
            Some(base) => match CheckClient::new(base) {
                Ok(checker) => Some(checker),
                Err(e) => return abort(&mut fsm, &e),
            },
            None => None,
        };

        let roles = RoleMap::build(hosts);

        let mut pipeline = TaskPipeline::new(&roles, Arc::clone(&self.remote), checker.as_ref());
        if let Some(cancel) = &self.cancel {
            pipeline = pipeline.with_cancel(cancel.clone());
        }

        // Probe the live revision to detect a fresh deploy; the flag is
        // frozen for the whole run
        let pool = roles.hosts_for_filter(RoleFilter::All);
        pipeline.capture_revision(&mut ctx, &pool).await;
        ctx.mark_freshness();
        if ctx.fresh_deploy() {
            info!("No prior release found, running bootstrap deploy");
        }

        let mut report = RunReport::new(ctx.application.name(), stage.to_string());
        pipeline.execute(tasks, &mut ctx, &mut fsm, &mut report).await;

        info!(
            "Run {} finished: {:?} ({} results)",
            report.run_id,
            report.outcome,
            report.results.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::deploy::task::{default_pipeline, find_task};
    use crate::models::report::TaskStatus;
    use crate::remote::CommandOutput;

    /// Scripted executor standing in for the ssh transport
    struct ScriptedExecutor {
        /// (command substring, exit status, output) overrides
        failures: Vec<(&'static str, i32, &'static str)>,

        /// Revision reported before any clone happens
        initial_revision: Option<&'static str>,

        /// Flips once a clone command has run, as on a real host
        cloned: AtomicBool,

        /// Every (host, command) invocation, in call order
        log: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedExecutor {
        fn new(initial_revision: Option<&'static str>) -> Self {
            Self {
                failures: Vec::new(),
                initial_revision,
                cloned: AtomicBool::new(false),
                log: Mutex::new(Vec::new()),
            }
        }

        fn failing_on(mut self, fragment: &'static str, exit: i32) -> Self {
            self.failures.push((fragment, exit, "boom"));
            self
        }

        fn commands(&self) -> Vec<String> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .map(|(_, c)| c.clone())
                .collect()
        }

        fn ran_fragment(&self, fragment: &str) -> bool {
            self.commands().iter().any(|c| c.contains(fragment))
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn run(&self, host: &str, command: &str) -> CommandOutput {
            self.log
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));

            if command.contains("git clone") {
                self.cloned.store(true, Ordering::SeqCst);
            }

            if command.contains("git rev-parse HEAD") {
                let known = self.initial_revision.is_some() || self.cloned.load(Ordering::SeqCst);
                return if known {
                    CommandOutput {
                        exit_status: 0,
                        output: format!("{}\n", self.initial_revision.unwrap_or("f00dfeed")),
                        duration: Duration::from_millis(1),
                    }
                } else {
                    CommandOutput {
                        exit_status: 128,
                        output: "fatal: not a git repository".to_string(),
                        duration: Duration::from_millis(1),
                    }
                };
            }

            for (fragment, exit, output) in &self.failures {
                if command.contains(fragment) {
                    return CommandOutput {
                        exit_status: *exit,
                        output: output.to_string(),
                        duration: Duration::from_millis(1),
                    };
                }
            }

            CommandOutput {
                exit_status: 0,
                output: "ok".to_string(),
                duration: Duration::from_millis(1),
            }
        }
    }

    fn hosts(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn runner(executor: Arc<ScriptedExecutor>) -> DeploymentRun {
        DeploymentRun::new(Settings::default(), executor)
    }

    /// One-shot HTTP server answering every request with the given body
    async fn serve_check(body: &'static str) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_unmapped_stage_aborts_before_remote_work() {
        let executor = Arc::new(ScriptedExecutor::new(None));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Beta,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Aborted);
        assert_eq!(report.exit_code(), 2);
        assert!(report.results.is_empty());
        assert!(executor.commands().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_deploy_bootstraps_and_skips_release_tasks() {
        let executor = Arc::new(ScriptedExecutor::new(None));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Production,
                &hosts(&["h1", "h2"]),
                &default_pipeline(),
            )
            .await;

        assert!(report.is_success(), "report: {:?}", report);
        assert!(executor.ran_fragment("git clone"));
        assert!(!executor.ran_fragment("git fetch"));

        let status_of = |task: &str| {
            report
                .results
                .iter()
                .filter(|r| r.task == task)
                .map(|r| r.status)
                .collect::<Vec<_>>()
        };
        assert_eq!(status_of("symlink"), vec![TaskStatus::Skipped]);
        assert_eq!(status_of("migrate"), vec![TaskStatus::Skipped]);
        // restart and backup still run on a fresh production deploy
        assert_eq!(
            status_of("restart_app"),
            vec![TaskStatus::Success, TaskStatus::Success]
        );
        assert!(executor.ran_fragment("rake db:backup"));
    }

    #[tokio::test]
    async fn test_existing_release_updates_code() {
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        assert!(report.is_success());
        assert!(executor.ran_fragment("git fetch"));
        assert!(!executor.ran_fragment("git clone"));

        // the revision flows into the tracker notification
        assert!(executor.ran_fragment("REVISION=abc123"));
    }

    #[tokio::test]
    async fn test_restart_follows_code_update_positionally() {
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Qa,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        let position = |task: &str| {
            report
                .results
                .iter()
                .position(|r| r.task == task)
                .unwrap_or_else(|| panic!("missing result for {}", task))
        };
        assert!(position("update_code") < position("restart_app"));
    }

    #[tokio::test]
    async fn test_backup_gated_outside_eligible_stages() {
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        assert!(report.is_success());
        assert!(!executor.ran_fragment("rake db:backup"));
        assert!(!executor.ran_fragment("whenever --update-crontab"));

        let backup = report
            .results
            .iter()
            .find(|r| r.task == "backup_db")
            .unwrap();
        assert_eq!(backup.status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_fail_fast_halts_later_tasks() {
        let executor =
            Arc::new(ScriptedExecutor::new(Some("abc123")).failing_on("restart.txt", 1));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1", "h2"]),
                &default_pipeline(),
            )
            .await;

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Failed);
        assert_eq!(report.exit_code(), 1);
        assert!(report.error.as_deref().unwrap().contains("restart_app"));

        // partial report still enumerates what ran, nothing after the failure
        assert!(!executor.ran_fragment("assets:precompile"));
        assert!(report.results.iter().any(|r| r.task == "restart_app"
            && r.status == TaskStatus::Failed
            && r.exit_status == Some(1)));
        assert!(report.results.iter().all(|r| r.task != "precompile_assets"));
    }

    #[tokio::test]
    async fn test_best_effort_failure_keeps_run_green() {
        let executor =
            Arc::new(ScriptedExecutor::new(Some("abc123")).failing_on("search:start", 1));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &[find_task("start_search").unwrap()],
            )
            .await;

        assert!(report.is_success());
        let result = &report.results[0];
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.exit_status, Some(1));
    }

    #[tokio::test]
    async fn test_empty_host_pool_skips_everything() {
        let executor = Arc::new(ScriptedExecutor::new(None));
        let run = runner(Arc::clone(&executor));

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &[],
                &default_pipeline(),
            )
            .await;

        assert!(report.is_success());
        assert!(executor.commands().is_empty());
        assert!(report
            .results
            .iter()
            .all(|r| r.status == TaskStatus::Skipped));
    }

    #[tokio::test]
    async fn test_unresolved_revision_fails_only_affected_task() {
        // a release exists but the tracker template needs {revision};
        // sabotage the probe by reporting a repository with no HEAD
        struct NoHeadExecutor(ScriptedExecutor);

        #[async_trait]
        impl RemoteExecutor for NoHeadExecutor {
            async fn run(&self, host: &str, command: &str) -> CommandOutput {
                if command.contains("git rev-parse HEAD") && command.contains("current") {
                    // the probe never yields a usable revision, so the
                    // tracker template cannot render
                    return CommandOutput {
                        exit_status: 0,
                        output: "\n".to_string(),
                        duration: Duration::from_millis(1),
                    };
                }
                self.0.run(host, command).await
            }
        }

        let executor = Arc::new(NoHeadExecutor(ScriptedExecutor::new(None)));
        let run = DeploymentRun::new(
            Settings::default(),
            Arc::clone(&executor) as Arc<dyn RemoteExecutor>,
        );

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1", "h2"]),
                &default_pipeline(),
            )
            .await;

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Failed);
        let notify: Vec<_> = report
            .results
            .iter()
            .filter(|r| r.task == "notify_tracker")
            .collect();
        assert_eq!(notify.len(), 2);
        for result in notify {
            assert_eq!(result.status, TaskStatus::Failed);
            assert!(result.output_excerpt.contains("revision"));
        }
        // earlier tasks were unaffected by the template failure
        assert!(report
            .results
            .iter()
            .any(|r| r.task == "restart_app" && r.status == TaskStatus::Success));
    }

    #[tokio::test]
    async fn test_cancellation_checkpoint_before_first_task() {
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let (tx, rx) = watch::channel(true);
        let run = runner(Arc::clone(&executor)).with_cancel(rx);

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;
        drop(tx);

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Failed);
        assert_eq!(report.error.as_deref(), Some("run cancelled"));
        // only the revision probe ran, no task commands
        assert!(executor
            .commands()
            .iter()
            .all(|c| c.contains("git rev-parse HEAD")));
    }

    #[tokio::test]
    async fn test_health_check_acknowledged() {
        let base = serve_check("OK").await;
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let mut settings = Settings::default();
        settings.check_base_url = Some(base);
        let run = DeploymentRun::new(settings, Arc::clone(&executor) as Arc<dyn RemoteExecutor>);

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        assert!(report.is_success(), "report: {:?}", report);
        let check = report
            .results
            .iter()
            .find(|r| r.task == "health_check")
            .unwrap();
        assert_eq!(check.status, TaskStatus::Success);
        assert!(check.host.ends_with("/alpha/check"));
    }

    #[tokio::test]
    async fn test_health_check_rejection_is_fatal() {
        let base = serve_check("Computer says no!").await;
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let mut settings = Settings::default();
        settings.check_base_url = Some(base);
        let run = DeploymentRun::new(settings, Arc::clone(&executor) as Arc<dyn RemoteExecutor>);

        // put the check first to show it halts everything after it
        let tasks = vec![
            find_task("health_check").unwrap(),
            find_task("restart_app").unwrap(),
        ];
        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &tasks,
            )
            .await;

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Failed);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("External check failed"));
        assert!(!executor.ran_fragment("restart.txt"));
    }

    #[tokio::test]
    async fn test_health_check_empty_body_is_fatal() {
        let base = serve_check("").await;
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let mut settings = Settings::default();
        settings.check_base_url = Some(base);
        let run = DeploymentRun::new(settings, Arc::clone(&executor) as Arc<dyn RemoteExecutor>);

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Failed);
    }

    #[tokio::test]
    async fn test_unreachable_check_endpoint_is_fatal() {
        let executor = Arc::new(ScriptedExecutor::new(Some("abc123")));
        let mut settings = Settings::default();
        // discard port, nothing listens there
        settings.check_base_url = Some("http://127.0.0.1:9".to_string());
        let run = DeploymentRun::new(settings, Arc::clone(&executor) as Arc<dyn RemoteExecutor>);

        let report = run
            .run(
                Application::new("alpha").unwrap(),
                Stage::Staging,
                &hosts(&["h1"]),
                &default_pipeline(),
            )
            .await;

        assert_eq!(report.outcome, crate::models::report::RunOutcome::Failed);
        assert!(report
            .error
            .as_deref()
            .unwrap()
            .contains("External check failed"));
    }
}

//! Ordered task pipeline execution

use std::sync::Arc;
use std::time::Instant;

use futures::future;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::check::{CheckClient, CHECK_ACK};
use crate::deploy::context::RunContext;
use crate::deploy::fsm::{RunEvent, RunFsm};
use crate::deploy::roles::RoleMap;
use crate::deploy::task::{Task, TaskAction, REVISION_PROBE};
use crate::deploy::template;
use crate::errors::DeployError;
use crate::models::report::{RunReport, TaskResult, TaskStatus};
use crate::remote::RemoteExecutor;

/// Executes a static ordered task list against a resolved role map.
///
/// Tasks run strictly in order; within one task the per-host invocations fan
/// out concurrently and are fully joined before the next task starts.
pub struct TaskPipeline<'a> {
    roles: &'a RoleMap,
    remote: Arc<dyn RemoteExecutor>,
    checker: Option<&'a CheckClient>,
    cancel: Option<watch::Receiver<bool>>,
}

impl<'a> TaskPipeline<'a> {
    pub fn new(
        roles: &'a RoleMap,
        remote: Arc<dyn RemoteExecutor>,
        checker: Option<&'a CheckClient>,
    ) -> Self {
        Self {
            roles,
            remote,
            checker,
            cancel: None,
        }
    }

    /// Install a cooperative cancellation flag, checked between tasks
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Run the tasks, appending every attempted task/host pair to the report
    /// and driving the report to a terminal outcome.
    pub async fn execute(
        &self,
        tasks: &[Task],
        ctx: &mut RunContext,
        fsm: &mut RunFsm,
        report: &mut RunReport,
    ) {
        for (index, task) in tasks.iter().enumerate() {
            // Cooperative checkpoint; an in-flight command is never interrupted
            if self.cancelled() {
                warn!("Run cancelled before task '{}'", task.name);
                let _ = fsm.process(RunEvent::Fail("run cancelled".to_string()));
                report.fail("run cancelled");
                return;
            }

            if !task.allowed_for(ctx.stage) {
                debug!("Skipping '{}': stage '{}' not eligible", task.name, ctx.stage);
                report.results.push(TaskResult::skipped(
                    task.name,
                    format!("stage '{}' not eligible", ctx.stage),
                ));
                continue;
            }

            if task.skip_if_fresh_deploy && ctx.fresh_deploy() {
                debug!("Skipping '{}': fresh deploy, no release yet", task.name);
                report.results.push(TaskResult::skipped(
                    task.name,
                    "fresh deploy, no release yet",
                ));
                continue;
            }

            let hosts = self.roles.hosts_for_filter(task.role_filter);
            let needs_hosts = !matches!(task.action, TaskAction::ExternalCheck);
            if needs_hosts && hosts.is_empty() {
                debug!("Skipping '{}': no hosts for role", task.name);
                report
                    .results
                    .push(TaskResult::skipped(task.name, "no hosts for role"));
                continue;
            }

            if let Err(e) = fsm.process(RunEvent::TaskStarted(index)) {
                debug!("fsm: {}", e);
            }
            info!("Task {}/{}: {}", index + 1, tasks.len(), task.name);

            let outcome = match &task.action {
                TaskAction::Noop => {
                    for host in &hosts {
                        report.results.push(TaskResult {
                            task: task.name.to_string(),
                            host: host.clone(),
                            status: TaskStatus::Success,
                            exit_status: Some(0),
                            output_excerpt: "no-op".to_string(),
                            duration_ms: 0,
                        });
                    }
                    Ok(true)
                }
                TaskAction::Remote { template } => {
                    Ok(self.fan_out(task, template, &hosts, ctx, report).await)
                }
                TaskAction::SyncCode { setup, update } => {
                    let template = if ctx.fresh_deploy() { setup } else { update };
                    let ok = self.fan_out(task, template, &hosts, ctx, report).await;
                    if ok {
                        self.capture_revision(ctx, &hosts).await;
                    }
                    Ok(ok)
                }
                TaskAction::ExternalCheck => self.run_check(task, ctx, report).await,
            };

            match outcome {
                Ok(true) => {}
                Ok(false) if task.best_effort => {
                    warn!(
                        "Task '{}' failed on at least one host, continuing (best effort)",
                        task.name
                    );
                }
                Ok(false) => {
                    let message = format!("task '{}' failed", task.name);
                    let _ = fsm.process(RunEvent::Fail(message.clone()));
                    report.fail(message);
                    return;
                }
                Err(message) => {
                    let _ = fsm.process(RunEvent::Fail(message.clone()));
                    report.fail(message);
                    return;
                }
            }
        }

        let _ = fsm.process(RunEvent::Complete);
        report.complete();
    }

    /// Concurrent per-host fan-out with a full join before returning.
    /// Returns whether every host invocation succeeded.
    async fn fan_out(
        &self,
        task: &Task,
        template: &str,
        hosts: &[String],
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> bool {
        let invocations = hosts
            .iter()
            .map(|host| self.invoke_host(task, template, host, ctx));
        let results = future::join_all(invocations).await;

        let all_ok = results.iter().all(|r| r.status == TaskStatus::Success);
        report.results.extend(results);
        all_ok
    }

    /// Render and run one task command on one host. Rendering failures fail
    /// only this task/host pair; sibling hosts are unaffected.
    async fn invoke_host(
        &self,
        task: &Task,
        template: &str,
        host: &str,
        ctx: &RunContext,
    ) -> TaskResult {
        let mut vars = ctx.vars();
        vars.insert("host".to_string(), host.to_string());

        let command = match template::render(task.name, template, &vars) {
            Ok(command) => command,
            Err(e) => {
                warn!("Task '{}' on {}: {}", task.name, host, e);
                return TaskResult {
                    task: task.name.to_string(),
                    host: host.to_string(),
                    status: TaskStatus::Failed,
                    exit_status: None,
                    output_excerpt: e.to_string(),
                    duration_ms: 0,
                };
            }
        };

        debug!("[{}] {}", host, command);
        let output = self.remote.run(host, &command).await;

        let status = if output.success() {
            TaskStatus::Success
        } else {
            warn!(
                "Task '{}' on {} exited {}",
                task.name, host, output.exit_status
            );
            TaskStatus::Failed
        };

        TaskResult {
            task: task.name.to_string(),
            host: host.to_string(),
            status,
            exit_status: Some(output.exit_status),
            output_excerpt: TaskResult::excerpt(&output.output),
            duration_ms: output.duration.as_millis() as u64,
        }
    }

    /// Query the deployed revision live on the first host. Used at run start
    /// to detect a fresh deploy and again after a successful code sync.
    pub(crate) async fn capture_revision(&self, ctx: &mut RunContext, hosts: &[String]) {
        let Some(host) = hosts.first() else {
            return;
        };

        let mut vars = ctx.vars();
        vars.insert("host".to_string(), host.clone());
        let command = match template::render("revision_probe", REVISION_PROBE, &vars) {
            Ok(command) => command,
            Err(e) => {
                warn!("Revision probe render failed: {}", e);
                return;
            }
        };

        let output = self.remote.run(host, &command).await;
        if output.success() {
            let revision = output
                .output
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .to_string();
            if !revision.is_empty() {
                debug!("Current revision on {}: {}", host, revision);
                ctx.current_revision = Some(revision);
            }
        } else {
            warn!(
                "Revision probe on {} exited {}",
                host, output.exit_status
            );
        }
    }

    /// Query the external check endpoint. Anything but the literal
    /// acknowledgement fails the run, even as the last task.
    async fn run_check(
        &self,
        task: &Task,
        ctx: &RunContext,
        report: &mut RunReport,
    ) -> Result<bool, String> {
        let Some(checker) = self.checker else {
            debug!("Skipping '{}': no check endpoint configured", task.name);
            report
                .results
                .push(TaskResult::skipped(task.name, "no check endpoint configured"));
            return Ok(true);
        };

        let url = checker.url_for(ctx.application.name());
        let started = Instant::now();

        match checker.check(ctx.application.name()).await {
            Ok(body) if body == CHECK_ACK => {
                report.results.push(TaskResult {
                    task: task.name.to_string(),
                    host: url,
                    status: TaskStatus::Success,
                    exit_status: None,
                    output_excerpt: TaskResult::excerpt(&body),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Ok(true)
            }
            Ok(body) => {
                report.results.push(TaskResult {
                    task: task.name.to_string(),
                    host: url,
                    status: TaskStatus::Failed,
                    exit_status: None,
                    output_excerpt: TaskResult::excerpt(&body),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Err(DeployError::ExternalCheckFailed(format!(
                    "expected '{}', got '{}'",
                    CHECK_ACK,
                    body.trim()
                ))
                .to_string())
            }
            Err(e) => {
                report.results.push(TaskResult {
                    task: task.name.to_string(),
                    host: url,
                    status: TaskStatus::Failed,
                    exit_status: None,
                    output_excerpt: e.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                Err(DeployError::ExternalCheckFailed(e.to_string()).to_string())
            }
        }
    }
}

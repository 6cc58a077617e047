//! Static task definitions

use crate::deploy::roles::{Role, RoleFilter};
use crate::deploy::stage::Stage;

/// Probe for the revision currently deployed on a host
pub const REVISION_PROBE: &str = "cd {current_path} && git rev-parse HEAD";

const SETUP: &str = "mkdir -p {deploy_to} {shared_path} && chmod g+w {deploy_to} {shared_path} \
    && ssh-keyscan github.com >> /home/{user}/.ssh/known_hosts \
    && git clone {repository} {current_path} \
    && cd {current_path} && git checkout -b {stage} ; git merge {remote}/{branch} ; git push {remote} {stage}";

const UPDATE_CODE: &str = "cd {current_path} && git fetch {remote} && git checkout {stage} -f \
    && git merge {remote}/{branch} && git push {remote} {stage}";

const RESTART_APP: &str = "touch {current_path}/tmp/restart.txt";

const RESTART_WORKER: &str = "cd {current_path}; {runner} script/delayed_job restart";

const PRECOMPILE_ASSETS: &str = "cd {current_path} && {runner} rake assets:precompile";

const UPDATE_SCHEDULE: &str =
    "cd {current_path} && {runner} whenever --update-crontab {application} --set environment={stage}";

const NOTIFY_TRACKER: &str =
    "cd {current_path} && {runner} rake deploy:track TO={stage} REVISION={revision} REPO={repository}";

const BACKUP_DB: &str = "cd {current_path} && {runner} rake db:backup";

const START_SEARCH: &str = "cd {current_path} && {runner} rake search:start";

/// What a task does when it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskAction {
    /// Clone and bootstrap on a fresh deploy, fetch/merge/push otherwise
    SyncCode {
        setup: &'static str,
        update: &'static str,
    },

    /// Render the template and run it on every filtered host
    Remote { template: &'static str },

    /// Query the external check endpoint; anything but "OK" is fatal
    ExternalCheck,

    /// Runs nothing; kept for ordering compatibility in the
    /// single-release layout
    Noop,
}

/// One statically-defined pipeline step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: &'static str,
    pub role_filter: RoleFilter,
    pub action: TaskAction,

    /// Skip when no prior release exists on the target hosts
    pub skip_if_fresh_deploy: bool,

    /// Per-host failures are recorded but never fail the run
    pub best_effort: bool,

    /// When set, the task runs only for the listed stages
    pub stage_gate: Option<&'static [Stage]>,
}

impl Task {
    fn new(name: &'static str, action: TaskAction) -> Self {
        Self {
            name,
            role_filter: RoleFilter::All,
            action,
            skip_if_fresh_deploy: false,
            best_effort: false,
            stage_gate: None,
        }
    }

    fn roles(mut self, filter: RoleFilter) -> Self {
        self.role_filter = filter;
        self
    }

    fn skip_if_fresh(mut self) -> Self {
        self.skip_if_fresh_deploy = true;
        self
    }

    fn best_effort(mut self) -> Self {
        self.best_effort = true;
        self
    }

    fn gated(mut self, stages: &'static [Stage]) -> Self {
        self.stage_gate = Some(stages);
        self
    }

    /// Whether the stage gate admits this stage
    pub fn allowed_for(&self, stage: Stage) -> bool {
        match self.stage_gate {
            Some(stages) => stages.contains(&stage),
            None => true,
        }
    }
}

/// The fixed deployment pipeline, in execution order
pub fn default_pipeline() -> Vec<Task> {
    vec![
        Task::new(
            "update_code",
            TaskAction::SyncCode {
                setup: SETUP,
                update: UPDATE_CODE,
            },
        ),
        Task::new("symlink", TaskAction::Noop).skip_if_fresh(),
        Task::new("migrate", TaskAction::Noop).skip_if_fresh(),
        Task::new("restart_app", TaskAction::Remote { template: RESTART_APP }),
        Task::new(
            "restart_worker",
            TaskAction::Remote {
                template: RESTART_WORKER,
            },
        ),
        Task::new(
            "precompile_assets",
            TaskAction::Remote {
                template: PRECOMPILE_ASSETS,
            },
        ),
        Task::new(
            "update_schedule",
            TaskAction::Remote {
                template: UPDATE_SCHEDULE,
            },
        )
        .roles(RoleFilter::Only(Role::Web))
        .gated(&[Stage::Qa, Stage::Production]),
        Task::new(
            "notify_tracker",
            TaskAction::Remote {
                template: NOTIFY_TRACKER,
            },
        ),
        Task::new("backup_db", TaskAction::Remote { template: BACKUP_DB })
            .gated(&[Stage::Production, Stage::Beta]),
        Task::new("health_check", TaskAction::ExternalCheck),
    ]
}

/// Every task that can be invoked by name, including maintenance tasks
/// outside the default pipeline
pub fn task_catalog() -> Vec<Task> {
    let mut tasks = default_pipeline();
    tasks.push(
        Task::new(
            "start_search",
            TaskAction::Remote {
                template: START_SEARCH,
            },
        )
        .best_effort(),
    );
    tasks
}

/// Look up a catalog task by name
pub fn find_task(name: &str) -> Option<Task> {
    task_catalog().into_iter().find(|t| t.name == name)
}

//! Finite state machine for a deployment run

/// Run state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Initial state, nothing resolved yet
    NotStarted,

    /// Resolving stage, roles and context
    Resolving,

    /// Executing the task at the given pipeline index
    Executing(usize),

    /// Every non-best-effort task succeeded
    Completed,

    /// A task or the external check failed
    Failed,

    /// A configuration error stopped the run before any task
    Aborted,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::Aborted
        )
    }
}

/// Run event
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// Begin resolving stage and roles
    Resolve,

    /// A task at the given index started
    TaskStarted(usize),

    /// All tasks finished (or were skipped)
    Complete,

    /// A task failed mid-run
    Fail(String),

    /// Configuration error before any task ran
    Abort(String),
}

/// Deployment run FSM
#[derive(Debug, Clone)]
pub struct RunFsm {
    state: RunState,
    error: Option<String>,
}

impl RunFsm {
    /// Create a new FSM in the not-started state
    pub fn new() -> Self {
        Self {
            state: RunState::NotStarted,
            error: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Get error message if any
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: RunEvent) -> Result<(), String> {
        let new_state = match (&self.state, &event) {
            (RunState::NotStarted, RunEvent::Resolve) => RunState::Resolving,

            (RunState::Resolving, RunEvent::TaskStarted(index)) => RunState::Executing(*index),
            (RunState::Resolving, RunEvent::Abort(err)) => {
                self.error = Some(err.clone());
                RunState::Aborted
            }
            // An all-skipped pipeline completes without executing anything
            (RunState::Resolving, RunEvent::Complete) => RunState::Completed,
            (RunState::Resolving, RunEvent::Fail(err)) => {
                self.error = Some(err.clone());
                RunState::Failed
            }

            (RunState::Executing(_), RunEvent::TaskStarted(index)) => {
                RunState::Executing(*index)
            }
            (RunState::Executing(_), RunEvent::Complete) => RunState::Completed,
            (RunState::Executing(_), RunEvent::Fail(err)) => {
                self.error = Some(err.clone());
                RunState::Failed
            }

            (state, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", state, event));
            }
        };

        self.state = new_state;
        Ok(())
    }
}

impl Default for RunFsm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut fsm = RunFsm::new();
        assert_eq!(fsm.state(), &RunState::NotStarted);

        fsm.process(RunEvent::Resolve).unwrap();
        assert_eq!(fsm.state(), &RunState::Resolving);

        fsm.process(RunEvent::TaskStarted(0)).unwrap();
        fsm.process(RunEvent::TaskStarted(3)).unwrap();
        assert_eq!(fsm.state(), &RunState::Executing(3));

        fsm.process(RunEvent::Complete).unwrap();
        assert_eq!(fsm.state(), &RunState::Completed);
        assert!(fsm.state().is_terminal());
    }

    #[test]
    fn test_abort_only_before_tasks() {
        let mut fsm = RunFsm::new();
        fsm.process(RunEvent::Resolve).unwrap();
        fsm.process(RunEvent::Abort("unmapped stage".to_string()))
            .unwrap();
        assert_eq!(fsm.state(), &RunState::Aborted);
        assert_eq!(fsm.error(), Some("unmapped stage"));

        let mut fsm = RunFsm::new();
        fsm.process(RunEvent::Resolve).unwrap();
        fsm.process(RunEvent::TaskStarted(0)).unwrap();
        assert!(fsm
            .process(RunEvent::Abort("too late".to_string()))
            .is_err());
    }

    #[test]
    fn test_failure_mid_run() {
        let mut fsm = RunFsm::new();
        fsm.process(RunEvent::Resolve).unwrap();
        fsm.process(RunEvent::TaskStarted(2)).unwrap();
        fsm.process(RunEvent::Fail("restart_app failed".to_string()))
            .unwrap();
        assert_eq!(fsm.state(), &RunState::Failed);
        assert_eq!(fsm.error(), Some("restart_app failed"));
    }

    #[test]
    fn test_terminal_states_reject_events() {
        let mut fsm = RunFsm::new();
        fsm.process(RunEvent::Resolve).unwrap();
        fsm.process(RunEvent::Complete).unwrap();
        assert!(fsm.process(RunEvent::TaskStarted(0)).is_err());
    }
}

//! User hooks around the state actions
//!
//! The configuration may attach a "pre" and a "post" hook to any state
//! id. Before executing a state's action the controller runs the
//! matching pre hook, afterwards the post hook; a missing hook is not an
//! error and a failing hook is logged while control continues. The
//! interpreter itself is a seam: the default runner hands the source to
//! the shell, embedding anything richer is out of scope.

use std::collections::HashMap;
use std::process::Command;

use tracing::{debug, warn};

use crate::common::error::{PipelineError, PipelineResult};
use crate::config::ScriptPhase;

/// Executes one hook body
pub trait HookRunner: Send {
    fn run(&mut self, state: &str, phase: ScriptPhase, source: &str) -> PipelineResult<()>;
}

/// Runs hook bodies through `sh -c`, with the state id and phase in the
/// environment
pub struct ShellRunner;

impl HookRunner for ShellRunner {
    fn run(&mut self, state: &str, phase: ScriptPhase, source: &str) -> PipelineResult<()> {
        let phase_name = match phase {
            ScriptPhase::Pre => "pre",
            ScriptPhase::Post => "post",
        };

        let status = Command::new("sh")
            .arg("-c")
            .arg(source)
            .env("WAVEDAQ_STATE", state)
            .env("WAVEDAQ_PHASE", phase_name)
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(PipelineError::other(format!(
                "hook for {state}/{phase_name} exited with {status}"
            )))
        }
    }
}

/// The configured hooks of one node
pub struct ScriptHooks {
    hooks: HashMap<(String, ScriptPhase), String>,
    runner: Box<dyn HookRunner>,
}

impl ScriptHooks {
    pub fn new(runner: Box<dyn HookRunner>) -> Self {
        Self {
            hooks: HashMap::new(),
            runner,
        }
    }

    /// Empty hook set with the shell runner
    pub fn empty() -> Self {
        Self::new(Box::new(ShellRunner))
    }

    /// Replace the hook map on (re)configuration
    pub fn replace(&mut self, hooks: HashMap<(String, ScriptPhase), String>) {
        self.hooks = hooks;
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run the hook for `(state, phase)` if one is configured
    ///
    /// Returns whether a hook ran successfully. Failures are logged,
    /// never propagated: a broken hook must not take the run down.
    pub fn invoke(&mut self, state: &str, phase: ScriptPhase) -> bool {
        let Some(source) = self.hooks.get(&(state.to_string(), phase)) else {
            return false;
        };

        debug!(state, ?phase, "Running user hook");
        match self.runner.run(state, phase, &source.clone()) {
            Ok(()) => true,
            Err(e) => {
                warn!(state, ?phase, error = %e, "User hook failed, continuing");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records invocations instead of executing anything
    struct RecordingRunner {
        calls: Arc<Mutex<Vec<(String, ScriptPhase, String)>>>,
        fail: bool,
    }

    impl HookRunner for RecordingRunner {
        fn run(&mut self, state: &str, phase: ScriptPhase, source: &str) -> PipelineResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((state.to_string(), phase, source.to_string()));
            if self.fail {
                Err(PipelineError::other("scripted failure"))
            } else {
                Ok(())
            }
        }
    }

    fn hooks_with(
        entries: &[(&str, ScriptPhase, &str)],
        fail: bool,
    ) -> (ScriptHooks, Arc<Mutex<Vec<(String, ScriptPhase, String)>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = ScriptHooks::new(Box::new(RecordingRunner {
            calls: calls.clone(),
            fail,
        }));
        hooks.replace(
            entries
                .iter()
                .map(|(state, phase, source)| ((state.to_string(), *phase), source.to_string()))
                .collect(),
        );
        (hooks, calls)
    }

    #[test]
    fn missing_hook_is_not_an_error() {
        let (mut hooks, calls) = hooks_with(&[], false);
        assert!(!hooks.invoke("read_data", ScriptPhase::Pre));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn configured_hook_runs_with_right_arguments() {
        let (mut hooks, calls) = hooks_with(
            &[("start_acquisition", ScriptPhase::Pre, "echo run-start")],
            false,
        );

        assert!(hooks.invoke("start_acquisition", ScriptPhase::Pre));
        // The post phase of the same state is a different key
        assert!(!hooks.invoke("start_acquisition", ScriptPhase::Post));

        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "start_acquisition");
        assert_eq!(recorded[0].1, ScriptPhase::Pre);
        assert_eq!(recorded[0].2, "echo run-start");
    }

    #[test]
    fn failing_hook_is_swallowed() {
        let (mut hooks, calls) =
            hooks_with(&[("stop_acquisition", ScriptPhase::Post, "exit 1")], true);
        assert!(!hooks.invoke("stop_acquisition", ScriptPhase::Post));
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn replace_swaps_the_map() {
        let (mut hooks, _) = hooks_with(&[("a", ScriptPhase::Pre, "x")], false);
        assert_eq!(hooks.len(), 1);
        hooks.replace(HashMap::new());
        assert!(hooks.is_empty());
    }

    #[test]
    fn shell_runner_executes() {
        let mut runner = ShellRunner;
        assert!(runner.run("s", ScriptPhase::Pre, "true").is_ok());
        assert!(runner.run("s", ScriptPhase::Post, "false").is_err());
    }
}

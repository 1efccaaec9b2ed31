//! State machine engine - current state and history over one transition table.

use crate::definition::{CommunicationDirective, State, TransitionTable};
use crate::error::CoreError;
use crate::guard::{GuardContext, GuardEvaluator, GuardOutcome, GuardRegistry};
use std::sync::Arc;

/// Engine behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineOptions {
    /// Reject `goto` targets the table does not know instead of warning.
    pub strict_goto: bool,
}

/// Result of a successful trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub event: String,
    pub from_state: State,
    pub to_state: State,
    /// Directive for a peer machine; delivering it is the caller's job.
    pub directive: Option<CommunicationDirective>,
}

/// Runs one machine. Callers must serialize access; there is no locking.
pub struct StateMachineEngine {
    machine_id: String,
    table: Arc<TransitionTable>,
    guards: Arc<dyn GuardRegistry>,
    current: State,
    /// States visited; `history[0]` is always the initial state.
    history: Vec<State>,
    options: EngineOptions,
}

impl StateMachineEngine {
    /// Creates an engine positioned at the table's initial state.
    pub fn new(
        machine_id: impl Into<String>,
        table: Arc<TransitionTable>,
        guards: Arc<dyn GuardRegistry>,
    ) -> Self {
        let initial = table.initial().clone();
        Self {
            machine_id: machine_id.into(),
            table,
            guards,
            current: initial.clone(),
            history: vec![initial],
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn table(&self) -> &Arc<TransitionTable> {
        &self.table
    }

    pub fn current_state(&self) -> &State {
        &self.current
    }

    /// Events with a transition from the current state, sorted.
    pub fn available_events(&self) -> Vec<&str> {
        self.table.events_from(&self.current)
    }

    /// States visited so far, oldest first.
    pub fn history(&self) -> &[State] {
        &self.history
    }

    /// Fires `event` from the current state.
    ///
    /// On any error the state and history are left untouched, so a call
    /// blocked by a guard can simply be retried later.
    pub fn trigger(&mut self, event: &str) -> Result<TriggerOutcome, CoreError> {
        tracing::debug!(
            machine = %self.machine_id,
            state = %self.current,
            event,
            "received event"
        );

        let transition = self
            .table
            .get_transition(&self.current, event)
            .ok_or_else(|| CoreError::UnknownEvent {
                machine: self.machine_id.clone(),
                state: self.current.as_str().to_string(),
                event: event.to_string(),
            })?;

        let ctx = GuardContext {
            machine: &self.machine_id,
            state: &self.current,
            event,
        };
        match GuardEvaluator::evaluate_opt(self.guards.as_ref(), transition.guard.as_deref(), &ctx) {
            GuardOutcome::Passed => {}
            outcome => {
                let guard = transition.guard.clone().unwrap_or_default();
                let machine = self.machine_id.clone();
                let state = self.current.as_str().to_string();
                let event = event.to_string();
                if outcome == GuardOutcome::Blocked {
                    tracing::warn!(
                        "Guard '{}' blocked transition for machine '{}' in state '{}'",
                        guard,
                        machine,
                        state
                    );
                    return Err(CoreError::GuardFailed {
                        machine,
                        state,
                        event,
                        guard,
                    });
                }
                return Err(CoreError::GuardUnresolved {
                    machine,
                    state,
                    event,
                    guard,
                });
            }
        }

        let to_state = transition.target.clone();
        let directive = self.table.get_communication(&self.current, event).cloned();
        let from_state = std::mem::replace(&mut self.current, to_state.clone());
        self.history.push(to_state.clone());

        tracing::info!(
            "Machine '{}' transitioned from {} to {} on event: {}",
            self.machine_id,
            from_state,
            to_state,
            event
        );

        Ok(TriggerOutcome {
            event: event.to_string(),
            from_state,
            to_state,
            directive,
        })
    }

    /// Force-sets the current state without consulting the transition table.
    ///
    /// The new state is appended to history.
    pub fn goto(&mut self, state: impl Into<State>) -> Result<(), CoreError> {
        let state = state.into();
        if state.as_str().is_empty() {
            return Err(CoreError::InvalidState {
                machine: self.machine_id.clone(),
                reason: "state name is empty".to_string(),
            });
        }
        if !self.table.has_state(&state) {
            if self.options.strict_goto {
                return Err(CoreError::InvalidState {
                    machine: self.machine_id.clone(),
                    reason: format!("'{}' is not a state of this machine", state),
                });
            }
            tracing::warn!(
                "Machine '{}' moved to unknown state '{}'",
                self.machine_id,
                state
            );
        }

        tracing::info!(
            "Machine '{}' repositioned from {} to {}",
            self.machine_id,
            self.current,
            state
        );
        self.current = state.clone();
        self.history.push(state);
        Ok(())
    }

    /// Drops the last `n` history entries.
    ///
    /// Fails if that would remove the initial state.
    pub fn rewind(&mut self, n: usize) -> Result<(), CoreError> {
        if n >= self.history.len() {
            return Err(CoreError::InvalidState {
                machine: self.machine_id.clone(),
                reason: format!(
                    "cannot rewind {} step(s) with {} history entries",
                    n,
                    self.history.len()
                ),
            });
        }

        self.history.truncate(self.history.len() - n);
        // Non-empty: at least the initial state survives.
        if let Some(last) = self.history.last() {
            self.current = last.clone();
        }

        tracing::info!(
            "Machine '{}' rewound {} step(s) to {}",
            self.machine_id,
            n,
            self.current
        );
        Ok(())
    }

    /// Returns to the initial state, keeping only it in history.
    pub fn reset(&mut self) {
        self.history.truncate(1);
        self.current = self.history[0].clone();
        tracing::info!("Machine '{}' reset to {}", self.machine_id, self.current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::tests::sample_document;
    use crate::guard::{FlagGuardRegistry, FnGuardRegistry};
    use proptest::prelude::*;

    fn sample_table() -> Arc<TransitionTable> {
        Arc::new(TransitionTable::from_json(&sample_document()).unwrap())
    }

    fn test_engine() -> StateMachineEngine {
        let guards = FnGuardRegistry::new().with("is_system_ready", |_| true);
        StateMachineEngine::new("machine1", sample_table(), Arc::new(guards))
    }

    fn names(history: &[State]) -> Vec<&str> {
        history.iter().map(State::as_str).collect()
    }

    #[test]
    fn test_new_engine() {
        let engine = test_engine();
        assert_eq!(engine.machine_id(), "machine1");
        assert_eq!(engine.current_state().as_str(), "idle");
        assert_eq!(names(engine.history()), vec!["idle"]);
        assert_eq!(engine.available_events(), vec!["start"]);
    }

    #[test]
    fn test_sample_scenario() {
        let mut engine = test_engine();

        let out = engine.trigger("start").unwrap();
        assert_eq!(out.to_state.as_str(), "running");
        assert!(out.directive.is_none());
        assert_eq!(names(engine.history()), vec!["idle", "running"]);

        let out = engine.trigger("finish").unwrap();
        assert_eq!(out.from_state.as_str(), "running");
        assert_eq!(out.to_state.as_str(), "idle");
        assert_eq!(
            out.directive,
            Some(CommunicationDirective::new("machine2", "start_other"))
        );

        engine.trigger("start").unwrap();
        let out = engine.trigger("pause").unwrap();
        assert_eq!(out.to_state.as_str(), "paused");
        assert!(out.directive.is_none());

        let out = engine.trigger("resume").unwrap();
        assert_eq!(out.to_state.as_str(), "running");
        assert_eq!(
            out.directive,
            Some(CommunicationDirective::new("machine2", "resume_other"))
        );

        let out = engine.trigger("error").unwrap();
        assert_eq!(out.to_state.as_str(), "error_state");

        let err = engine.trigger("start").unwrap_err();
        assert!(matches!(
            err,
            CoreError::UnknownEvent { ref state, ref event, .. } if state == "error_state" && event == "start"
        ));
        assert_eq!(engine.current_state().as_str(), "error_state");

        let out = engine.trigger("reset").unwrap();
        assert_eq!(out.to_state.as_str(), "idle");
    }

    #[test]
    fn test_unknown_event_leaves_state() {
        let mut engine = test_engine();
        let result = engine.trigger("finish");
        assert!(matches!(result, Err(CoreError::UnknownEvent { .. })));
        assert_eq!(engine.current_state().as_str(), "idle");
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_guard_blocks_then_retries() {
        let flags = FlagGuardRegistry::new();
        flags.set("is_system_ready", false);
        let mut engine =
            StateMachineEngine::new("machine1", sample_table(), Arc::new(flags.clone()));

        for _ in 0..3 {
            let err = engine.trigger("start").unwrap_err();
            assert!(matches!(
                err,
                CoreError::GuardFailed { ref guard, .. } if guard == "is_system_ready"
            ));
            assert_eq!(engine.current_state().as_str(), "idle");
            assert_eq!(engine.history().len(), 1);
        }

        flags.set("is_system_ready", true);
        let out = engine.trigger("start").unwrap();
        assert_eq!(out.to_state.as_str(), "running");
    }

    #[test]
    fn test_unresolved_guard_blocks() {
        let mut engine =
            StateMachineEngine::new("machine1", sample_table(), Arc::new(FnGuardRegistry::new()));
        let err = engine.trigger("start").unwrap_err();
        assert!(matches!(err, CoreError::GuardUnresolved { .. }));
        assert_eq!(engine.current_state().as_str(), "idle");
        assert_eq!(engine.history().len(), 1);
    }

    #[test]
    fn test_goto() {
        let mut engine = test_engine();
        engine.goto("paused").unwrap();
        assert_eq!(engine.current_state().as_str(), "paused");
        assert_eq!(names(engine.history()), vec!["idle", "paused"]);
        assert_eq!(engine.available_events(), vec!["resume"]);
    }

    #[test]
    fn test_goto_unknown_state() {
        let mut engine = test_engine();
        engine.goto("limbo").unwrap();
        assert_eq!(engine.current_state().as_str(), "limbo");
        assert!(engine.available_events().is_empty());

        let mut strict = test_engine().with_options(EngineOptions { strict_goto: true });
        let result = strict.goto("limbo");
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
        assert_eq!(strict.current_state().as_str(), "idle");

        assert!(engine.goto("").is_err());
    }

    #[test]
    fn test_rewind() {
        let mut engine = test_engine();
        engine.trigger("start").unwrap();
        engine.trigger("pause").unwrap();
        engine.trigger("resume").unwrap();
        assert_eq!(engine.history().len(), 4);

        engine.rewind(0).unwrap();
        assert_eq!(engine.history().len(), 4);

        engine.rewind(2).unwrap();
        assert_eq!(engine.current_state().as_str(), "running");
        assert_eq!(names(engine.history()), vec!["idle", "running"]);

        let result = engine.rewind(2);
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
        assert_eq!(engine.history().len(), 2);
    }

    #[test]
    fn test_reset() {
        let mut engine = test_engine();
        engine.trigger("start").unwrap();
        engine.trigger("error").unwrap();
        engine.reset();
        assert_eq!(engine.current_state().as_str(), "idle");
        assert_eq!(names(engine.history()), vec!["idle"]);

        // Reset on a fresh engine is a no-op.
        engine.reset();
        assert_eq!(engine.history().len(), 1);
    }

    fn event_strategy() -> impl Strategy<Value = Vec<String>> {
        let events = prop::sample::select(vec![
            "start", "pause", "resume", "finish", "error", "reset", "bogus",
        ]);
        prop::collection::vec(events.prop_map(String::from), 0..24)
    }

    proptest! {
        #[test]
        fn prop_failed_trigger_is_noop(events in event_strategy()) {
            let mut engine = test_engine();
            for event in &events {
                let before_state = engine.current_state().clone();
                let before_len = engine.history().len();
                match engine.trigger(event) {
                    Ok(out) => {
                        prop_assert_eq!(engine.history().len(), before_len + 1);
                        prop_assert_eq!(engine.current_state(), &out.to_state);
                    }
                    Err(CoreError::UnknownEvent { .. }) => {
                        prop_assert_eq!(engine.current_state(), &before_state);
                        prop_assert_eq!(engine.history().len(), before_len);
                    }
                    Err(e) => prop_assert!(false, "unexpected error {}", e),
                }
                prop_assert_eq!(engine.history()[0].as_str(), "idle");
                prop_assert_eq!(engine.history().last(), Some(engine.current_state()));
            }
        }

        #[test]
        fn prop_rewind_matches_prefix(events in event_strategy(), n in 0usize..32) {
            let mut engine = test_engine();
            for event in &events {
                let _ = engine.trigger(event);
            }
            let full: Vec<State> = engine.history().to_vec();

            if n >= full.len() {
                prop_assert!(engine.rewind(n).is_err());
                prop_assert_eq!(engine.history(), &full[..]);
            } else {
                engine.rewind(n).unwrap();
                let keep = full.len() - n;
                prop_assert_eq!(engine.history(), &full[..keep]);
                prop_assert_eq!(engine.current_state(), &full[keep - 1]);
            }
        }

        #[test]
        fn prop_reset_restores_initial(events in event_strategy()) {
            let mut engine = test_engine();
            for event in &events {
                let _ = engine.trigger(event);
            }
            engine.reset();
            prop_assert_eq!(engine.current_state().as_str(), "idle");
            prop_assert_eq!(names(engine.history()), vec!["idle"]);
        }
    }
}

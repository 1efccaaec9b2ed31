//! Guard resolution and evaluation.
//!
//! Guards are named predicates. The transition document only carries the
//! name; the host supplies the predicates through a [`GuardRegistry`] that is
//! injected into each engine. Names are resolved on every evaluation, so a
//! registry may change its answers between calls.
//!
//! An unknown guard name fails closed: the transition is blocked and a
//! warning is logged.

use crate::definition::State;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

/// What a guard predicate may inspect.
#[derive(Debug, Clone, Copy)]
pub struct GuardContext<'a> {
    /// Identifier of the machine evaluating the guard.
    pub machine: &'a str,
    /// State the transition leaves from.
    pub state: &'a State,
    /// Event being triggered.
    pub event: &'a str,
}

/// A resolved guard predicate.
pub type GuardFn = Arc<dyn Fn(&GuardContext<'_>) -> bool + Send + Sync>;

/// Host-supplied lookup of guard predicates by name.
pub trait GuardRegistry: Send + Sync {
    /// Resolves a guard name. `None` means the guard is unknown.
    fn resolve(&self, name: &str) -> Option<GuardFn>;

    /// Names this registry can resolve, sorted.
    fn names(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Registry backed by closures.
#[derive(Default, Clone)]
pub struct FnGuardRegistry {
    guards: HashMap<String, GuardFn>,
}

impl FnGuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a predicate, replacing any previous one with the same name.
    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&GuardContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.guards.insert(name.into(), Arc::new(predicate));
    }

    /// Builder form of [`FnGuardRegistry::register`].
    pub fn with<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&GuardContext<'_>) -> bool + Send + Sync + 'static,
    {
        self.register(name, predicate);
        self
    }
}

impl GuardRegistry for FnGuardRegistry {
    fn resolve(&self, name: &str) -> Option<GuardFn> {
        self.guards.get(name).cloned()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.guards.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Registry of named boolean flags that can be flipped at run time.
///
/// Cloning shares the underlying flags.
#[derive(Debug, Default, Clone)]
pub struct FlagGuardRegistry {
    flags: Arc<DashMap<String, bool>>,
}

impl FlagGuardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a flag, declaring it if needed.
    pub fn set(&self, name: impl Into<String>, value: bool) {
        self.flags.insert(name.into(), value);
    }

    /// Current value of a flag, if declared.
    pub fn get(&self, name: &str) -> Option<bool> {
        self.flags.get(name).map(|v| *v)
    }

    /// Removes a flag. Guards naming it become unresolved.
    pub fn remove(&self, name: &str) -> Option<bool> {
        self.flags.remove(name).map(|(_, v)| v)
    }
}

impl<K> FromIterator<(K, bool)> for FlagGuardRegistry
where
    K: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, bool)>>(flags: I) -> Self {
        let registry = Self::new();
        for (name, value) in flags {
            registry.set(name, value);
        }
        registry
    }
}

impl GuardRegistry for FlagGuardRegistry {
    fn resolve(&self, name: &str) -> Option<GuardFn> {
        if !self.flags.contains_key(name) {
            return None;
        }
        let flags = Arc::clone(&self.flags);
        let name = name.to_string();
        // Read at call time, not at resolve time.
        Some(Arc::new(move |_ctx: &GuardContext<'_>| {
            flags.get(&name).map(|v| *v).unwrap_or(false)
        }))
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.flags.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

/// Result of evaluating a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardOutcome {
    /// No guard, or the predicate returned true.
    Passed,
    /// The predicate returned false.
    Blocked,
    /// The guard name is not known to the registry.
    Unresolved,
}

impl GuardOutcome {
    pub fn is_passed(self) -> bool {
        self == GuardOutcome::Passed
    }
}

/// Resolves and evaluates guards against a registry.
pub struct GuardEvaluator;

impl GuardEvaluator {
    /// Evaluates a named guard.
    pub fn evaluate(registry: &dyn GuardRegistry, name: &str, ctx: &GuardContext<'_>) -> GuardOutcome {
        match registry.resolve(name) {
            Some(predicate) => {
                if predicate(ctx) {
                    GuardOutcome::Passed
                } else {
                    GuardOutcome::Blocked
                }
            }
            None => {
                tracing::warn!(
                    machine = ctx.machine,
                    state = ctx.state.as_str(),
                    event = ctx.event,
                    guard = name,
                    "GuardUnresolved: guard '{}' not found, transition blocked",
                    name
                );
                GuardOutcome::Unresolved
            }
        }
    }

    /// Evaluates an optional guard (None = always passes).
    pub fn evaluate_opt(
        registry: &dyn GuardRegistry,
        name: Option<&str>,
        ctx: &GuardContext<'_>,
    ) -> GuardOutcome {
        name.map(|n| Self::evaluate(registry, n, ctx))
            .unwrap_or(GuardOutcome::Passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn ctx<'a>(state: &'a State) -> GuardContext<'a> {
        GuardContext {
            machine: "machine1",
            state,
            event: "start",
        }
    }

    #[test]
    fn test_fn_registry_passes_and_blocks() {
        let registry = FnGuardRegistry::new()
            .with("is_system_ready", |_| true)
            .with("never", |_| false);
        let state = State::from("idle");

        assert_eq!(
            GuardEvaluator::evaluate(&registry, "is_system_ready", &ctx(&state)),
            GuardOutcome::Passed
        );
        assert_eq!(
            GuardEvaluator::evaluate(&registry, "never", &ctx(&state)),
            GuardOutcome::Blocked
        );
        assert_eq!(registry.names(), vec!["is_system_ready", "never"]);
    }

    #[test]
    fn test_unknown_guard_fails_closed() {
        let registry = FnGuardRegistry::new();
        let state = State::from("idle");
        assert_eq!(
            GuardEvaluator::evaluate(&registry, "missing", &ctx(&state)),
            GuardOutcome::Unresolved
        );
        assert!(!GuardOutcome::Unresolved.is_passed());
    }

    #[test]
    fn test_no_guard_passes() {
        let registry = FnGuardRegistry::new();
        let state = State::from("idle");
        assert_eq!(
            GuardEvaluator::evaluate_opt(&registry, None, &ctx(&state)),
            GuardOutcome::Passed
        );
    }

    #[test]
    fn test_predicate_sees_context() {
        let registry = FnGuardRegistry::new().with("only_from_idle", |c| c.state.as_str() == "idle");
        let idle = State::from("idle");
        let busy = State::from("busy");
        assert!(GuardEvaluator::evaluate(&registry, "only_from_idle", &ctx(&idle)).is_passed());
        assert!(!GuardEvaluator::evaluate(&registry, "only_from_idle", &ctx(&busy)).is_passed());
    }

    #[test]
    fn test_predicate_queried_every_time() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ready);
        let registry = FnGuardRegistry::new().with("ready", move |_| flag.load(Ordering::SeqCst));
        let state = State::from("idle");

        assert_eq!(
            GuardEvaluator::evaluate(&registry, "ready", &ctx(&state)),
            GuardOutcome::Blocked
        );
        ready.store(true, Ordering::SeqCst);
        assert_eq!(
            GuardEvaluator::evaluate(&registry, "ready", &ctx(&state)),
            GuardOutcome::Passed
        );
    }

    #[test]
    fn test_flag_registry_reads_live_value() {
        let registry = [("is_system_ready", true)].into_iter().collect::<FlagGuardRegistry>();
        let state = State::from("idle");

        let predicate = registry.resolve("is_system_ready").unwrap();
        assert!(predicate(&ctx(&state)));

        // A predicate resolved earlier still observes the new value.
        registry.set("is_system_ready", false);
        assert!(!predicate(&ctx(&state)));
        assert_eq!(registry.get("is_system_ready"), Some(false));
    }

    #[test]
    fn test_flag_registry_remove_unresolves() {
        let registry = [("a", true), ("b", false)]
            .into_iter()
            .collect::<FlagGuardRegistry>();
        assert_eq!(registry.names(), vec!["a", "b"]);

        assert_eq!(registry.remove("a"), Some(true));
        assert!(registry.resolve("a").is_none());
        assert_eq!(registry.names(), vec!["b"]);
    }

    #[test]
    fn test_flag_registry_clone_shares_flags() {
        let registry = FlagGuardRegistry::new();
        let shared = registry.clone();
        shared.set("x", true);
        assert_eq!(registry.get("x"), Some(true));
    }
}

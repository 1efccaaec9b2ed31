//! Transition table types.
//!
//! Machines are described by a JSON transition document:
//!
//! ```json
//! {
//!   "initial_state": "idle",
//!   "events": ["start", "finish"],
//!   "transitions": {
//!     "idle": {"start": {"target": "running", "guard": "is_system_ready"}},
//!     "running": {"finish": "idle"}
//!   },
//!   "communications": {
//!     "running": {"finish": {"target_machine": "machine2", "event": "start_other"}}
//!   },
//!   "event_sequence": ["start", "finish"]
//! }
//! ```
//!
//! A transition entry is either an object with a `target` (and optional
//! `guard`) or a bare string naming the target.

use crate::error::CoreError;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A state in the machine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(pub String);

impl State {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for State {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Target of a transition, optionally gated by a named guard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub target: State,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

impl<'de> Deserialize<'de> for Transition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Detailed {
            target: String,
            #[serde(default)]
            guard: Option<String>,
        }

        struct TransitionVisitor;

        impl<'de> Visitor<'de> for TransitionVisitor {
            type Value = Transition;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a target state name or an object with a 'target' field")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Transition {
                    target: State::from(v),
                    guard: None,
                })
            }

            fn visit_map<A>(self, map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let detailed = Detailed::deserialize(de::value::MapAccessDeserializer::new(map))?;
                Ok(Transition {
                    target: State(detailed.target),
                    guard: detailed.guard,
                })
            }
        }

        deserializer.deserialize_any(TransitionVisitor)
    }
}

/// Instruction to inject an event into a peer machine when a transition fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommunicationDirective {
    /// Peer machine identifier.
    pub target_machine: String,

    /// Event to enqueue on the peer.
    pub event: String,
}

impl CommunicationDirective {
    pub fn new(target_machine: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            target_machine: target_machine.into(),
            event: event.into(),
        }
    }
}

/// String-keyed map that rejects duplicate keys while deserializing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UniqueMap<V>(pub BTreeMap<String, V>);

impl<V> Default for UniqueMap<V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<'de, V> Deserialize<'de> for UniqueMap<V>
where
    V: Deserialize<'de>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct UniqueMapVisitor<V>(std::marker::PhantomData<V>);

        impl<'de, V> Visitor<'de> for UniqueMapVisitor<V>
        where
            V: Deserialize<'de>,
        {
            type Value = UniqueMap<V>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a map with unique keys")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = BTreeMap::new();
                while let Some(key) = map.next_key::<String>()? {
                    if entries.contains_key(&key) {
                        return Err(de::Error::custom(format_args!("duplicate key '{}'", key)));
                    }
                    let value = map.next_value()?;
                    entries.insert(key, value);
                }
                Ok(UniqueMap(entries))
            }
        }

        deserializer.deserialize_map(UniqueMapVisitor(std::marker::PhantomData))
    }
}

/// Raw transition document as authored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionDocument {
    /// State a fresh engine starts in.
    pub initial_state: String,

    /// Declared event vocabulary (advisory).
    #[serde(default)]
    pub events: Vec<String>,

    /// state -> event -> transition.
    pub transitions: UniqueMap<UniqueMap<Transition>>,

    /// state -> event -> directive for a peer machine.
    #[serde(default, skip_serializing_if = "is_empty_map")]
    pub communications: UniqueMap<UniqueMap<CommunicationDirective>>,

    /// Predefined run, replayed by `run_all`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_sequence: Vec<String>,
}

fn is_empty_map<V>(map: &UniqueMap<V>) -> bool {
    map.0.is_empty()
}

/// Validated and indexed transition table. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    initial: State,

    events: Vec<String>,

    /// Every state that is a transition source or target.
    states: BTreeSet<State>,

    /// Transitions indexed by (from_state, event).
    transitions: HashMap<(State, String), Transition>,

    /// Directives indexed by (from_state, event).
    communications: HashMap<(State, String), CommunicationDirective>,

    event_sequence: Vec<String>,

    warnings: Vec<String>,

    raw: TransitionDocument,

    checksum: String,
}

impl TransitionTable {
    /// Parses and validates a transition table from JSON text.
    ///
    /// Unlike [`TransitionTable::from_json`], this detects duplicate
    /// `(state, event)` keys, which are lost once text becomes a `Value`.
    pub fn from_json_str(text: &str) -> Result<Self, CoreError> {
        let raw: TransitionDocument = serde_json::from_str(text).map_err(|e| {
            if e.is_data() {
                CoreError::schema(e.to_string())
            } else {
                CoreError::Json(e)
            }
        })?;
        Self::from_raw(raw)
    }

    /// Parses and validates a transition table from a JSON value.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, CoreError> {
        let raw = TransitionDocument::deserialize(json).map_err(|e| CoreError::schema(e.to_string()))?;
        Self::from_raw(raw)
    }

    /// Validates a raw document and builds the indexed table.
    pub fn from_raw(raw: TransitionDocument) -> Result<Self, CoreError> {
        if raw.initial_state.trim().is_empty() {
            return Err(CoreError::schema("initial_state must be a non-empty string"));
        }

        let mut states = BTreeSet::new();
        let mut transitions = HashMap::new();
        let mut targets = BTreeSet::new();

        for (from, by_event) in &raw.transitions.0 {
            if from.is_empty() {
                return Err(CoreError::schema("transition source state name is empty"));
            }
            states.insert(State::from(from.as_str()));

            for (event, transition) in &by_event.0 {
                if event.is_empty() {
                    return Err(CoreError::schema(format!(
                        "empty event name in transitions of state '{}'",
                        from
                    )));
                }
                if transition.target.as_str().is_empty() {
                    return Err(CoreError::schema(format!(
                        "transition from '{}' on '{}' has no target",
                        from, event
                    )));
                }
                if matches!(&transition.guard, Some(g) if g.trim().is_empty()) {
                    return Err(CoreError::schema(format!(
                        "transition from '{}' on '{}' has an empty guard name",
                        from, event
                    )));
                }

                targets.insert(transition.target.clone());
                transitions.insert((State::from(from.as_str()), event.clone()), transition.clone());
            }
        }

        let mut warnings = Vec::new();

        // Targets that never appear as a source are terminal states.
        for target in &targets {
            if !states.contains(target) {
                warnings.push(format!(
                    "state '{}' has no outgoing transitions (terminal)",
                    target
                ));
            }
        }
        states.extend(targets);

        let initial = State(raw.initial_state.clone());
        if !states.contains(&initial) {
            return Err(CoreError::schema(format!(
                "initial state '{}' is not declared in transitions",
                initial
            )));
        }

        let mut communications = HashMap::new();
        for (from, by_event) in &raw.communications.0 {
            for (event, directive) in &by_event.0 {
                if directive.target_machine.is_empty() || directive.event.is_empty() {
                    return Err(CoreError::schema(format!(
                        "communication from '{}' on '{}' must name a target_machine and an event",
                        from, event
                    )));
                }
                let key = (State::from(from.as_str()), event.clone());
                if !transitions.contains_key(&key) {
                    return Err(CoreError::schema(format!(
                        "communication from '{}' on '{}' has no matching transition",
                        from, event
                    )));
                }
                communications.insert(key, directive.clone());
            }
        }

        if !raw.events.is_empty() {
            let declared: BTreeSet<&str> = raw.events.iter().map(String::as_str).collect();
            let mut undeclared: BTreeSet<&str> = BTreeSet::new();
            for (_, event) in transitions.keys() {
                if !declared.contains(event.as_str()) {
                    undeclared.insert(event.as_str());
                }
            }
            for event in undeclared {
                warnings.push(format!("event '{}' is used but not declared in events", event));
            }
        }

        for event in &raw.event_sequence {
            if !transitions.keys().any(|(_, e)| e == event) {
                warnings.push(format!(
                    "event_sequence entry '{}' has no transition in any state",
                    event
                ));
            }
        }

        for warning in &warnings {
            tracing::warn!("{}", warning);
        }

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            initial,
            events: raw.events.clone(),
            states,
            transitions,
            communications,
            event_sequence: raw.event_sequence.clone(),
            warnings,
            raw,
            checksum,
        })
    }

    pub fn initial(&self) -> &State {
        &self.initial
    }

    /// Declared event vocabulary.
    pub fn events(&self) -> &[String] {
        &self.events
    }

    /// All known states, sorted.
    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.states.iter()
    }

    /// Returns true if the state is a transition source or target.
    pub fn has_state(&self, state: &State) -> bool {
        self.states.contains(state)
    }

    /// Looks up a transition for the given state and event.
    pub fn get_transition(&self, state: &State, event: &str) -> Option<&Transition> {
        self.transitions.get(&(state.clone(), event.to_string()))
    }

    /// Looks up the directive attached to the given state and event.
    pub fn get_communication(&self, state: &State, event: &str) -> Option<&CommunicationDirective> {
        self.communications.get(&(state.clone(), event.to_string()))
    }

    /// Returns all valid events from the given state, sorted.
    pub fn events_from(&self, state: &State) -> Vec<&str> {
        let mut events: Vec<&str> = self
            .transitions
            .keys()
            .filter(|(s, _)| s == state)
            .map(|(_, e)| e.as_str())
            .collect();
        events.sort_unstable();
        events
    }

    pub fn event_sequence(&self) -> &[String] {
        &self.event_sequence
    }

    /// Non-fatal findings from validation.
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// CRC32C of the canonical document.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Returns the raw document as JSON.
    pub fn to_json(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

//! Execution controller - drives engines through event sequences.
//!
//! The error policy decides what a failed trigger does to a run:
//! [`ErrorPolicy::Abort`] surfaces the first error, while
//! [`ErrorPolicy::LogAndContinue`] logs it, leaves the machine where it was
//! and moves on to the next event.
//!
//! Dual runs follow a round protocol. In each round every machine, in
//! bridge registration order, takes at most one event from its inbound
//! queue. Directives produced during a round are delivered to the peer for
//! the next round. The run ends when all queues drain, or when the round
//! bound is hit with work still pending.

use crate::bridge::CommunicationBridge;
use crate::definition::{CommunicationDirective, State};
use crate::engine::{StateMachineEngine, TriggerOutcome};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Default bound on dual-run rounds.
pub const DEFAULT_MAX_ROUNDS: usize = 1000;

/// How run-time trigger failures are handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorPolicy {
    /// Stop the run and return the error ("basic" mode).
    #[serde(rename = "basic", alias = "abort")]
    Abort,
    /// Log the error and continue with the next event ("robust" mode).
    #[default]
    #[serde(rename = "robust", alias = "log_and_continue")]
    LogAndContinue,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" | "abort" => Ok(ErrorPolicy::Abort),
            "robust" | "log_and_continue" | "continue" => Ok(ErrorPolicy::LogAndContinue),
            other => Err(format!("unknown mode '{}', expected 'basic' or 'robust'", other)),
        }
    }
}

/// One event of a single-machine run.
#[derive(Debug)]
pub struct StepRecord {
    pub event: String,
    pub result: Result<TriggerOutcome, CoreError>,
}

/// One event processed during a dual run.
#[derive(Debug)]
pub struct TraceEntry {
    /// 1-based round number.
    pub round: usize,
    pub machine: String,
    pub event: String,
    pub result: Result<TriggerOutcome, CoreError>,
}

/// A directive that could not be handed to a peer.
#[derive(Debug)]
pub struct Undelivered {
    pub round: usize,
    pub from: String,
    pub directive: CommunicationDirective,
    /// Set when the bridge rejected the directive rather than dropping it.
    pub error: Option<CoreError>,
}

/// How a dual run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Every queue drained.
    Quiescent,
    /// Events were still pending when the round bound was reached.
    LoopDetected { rounds: usize },
}

/// Outcome of [`ExecutionController::run_both`].
#[derive(Debug)]
pub struct DualRunReport {
    pub trace: Vec<TraceEntry>,
    pub undelivered: Vec<Undelivered>,
    pub rounds: usize,
    pub termination: Termination,
    /// (machine, state) at the end of the run, in round order.
    pub final_states: Vec<(String, State)>,
}

impl DualRunReport {
    /// The loop condition as an error, if the run was cut off.
    pub fn loop_error(&self) -> Option<CoreError> {
        match self.termination {
            Termination::Quiescent => None,
            Termination::LoopDetected { rounds } => {
                Some(CoreError::CommunicationLoopDetected { rounds })
            }
        }
    }

    /// Converts a cut-off run into `CommunicationLoopDetected`.
    pub fn into_result(self) -> Result<Self, CoreError> {
        match self.loop_error() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }

    /// Number of trace entries that failed.
    pub fn failures(&self) -> usize {
        self.trace.iter().filter(|e| e.result.is_err()).count()
    }
}

/// Runs events against engines under an error policy.
#[derive(Debug, Clone)]
pub struct ExecutionController {
    policy: ErrorPolicy,
    max_rounds: usize,
}

impl Default for ExecutionController {
    fn default() -> Self {
        Self::new(ErrorPolicy::default())
    }
}

impl ExecutionController {
    pub fn new(policy: ErrorPolicy) -> Self {
        Self {
            policy,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Applies the policy to a failed step: `Err` aborts the run.
    fn check(&self, machine: &str, event: &str, err: CoreError) -> Result<CoreError, CoreError> {
        match self.policy {
            ErrorPolicy::Abort => Err(err),
            ErrorPolicy::LogAndContinue => {
                tracing::error!(
                    code = err.error_code(),
                    "Machine '{}' failed to process event '{}': {}",
                    machine,
                    event,
                    err
                );
                Ok(err)
            }
        }
    }

    /// Triggers each event in order.
    pub fn run_sequence<S: AsRef<str>>(
        &self,
        engine: &mut StateMachineEngine,
        events: &[S],
    ) -> Result<Vec<StepRecord>, CoreError> {
        tracing::info!("Running event sequence for machine '{}'", engine.machine_id());

        let mut steps = Vec::with_capacity(events.len());
        for event in events {
            let event = event.as_ref();
            let result = match engine.trigger(event) {
                Ok(outcome) => Ok(outcome),
                Err(err) => Err(self.check(engine.machine_id(), event, err)?),
            };
            tracing::info!(
                "Event '{}' processed. Current state: {}",
                event,
                engine.current_state()
            );
            steps.push(StepRecord {
                event: event.to_string(),
                result,
            });
        }
        Ok(steps)
    }

    /// Replays the table's predefined event sequence.
    pub fn run_all(&self, engine: &mut StateMachineEngine) -> Result<Vec<StepRecord>, CoreError> {
        let table = engine.table().clone();
        let sequence = table.event_sequence();
        if sequence.is_empty() {
            tracing::warn!(
                "No predefined event sequence found for machine '{}'",
                engine.machine_id()
            );
            return Ok(Vec::new());
        }
        tracing::info!("Running all events: {}", sequence.join(", "));
        self.run_sequence(engine, sequence)
    }

    /// Runs two engines against each other through the bridge.
    ///
    /// `seeds` are `(machine, event)` pairs enqueued in order before the
    /// first round. `a` and `b` must both be registered with the bridge;
    /// the bridge's registration order is the order within each round.
    pub fn run_both(
        &self,
        a: &mut StateMachineEngine,
        b: &mut StateMachineEngine,
        bridge: &CommunicationBridge,
        seeds: &[(&str, &str)],
    ) -> Result<DualRunReport, CoreError> {
        if a.machine_id() == b.machine_id() {
            return Err(CoreError::DuplicateMachine {
                machine: a.machine_id().to_string(),
            });
        }
        for id in [a.machine_id(), b.machine_id()] {
            if !bridge.contains(id) {
                return Err(CoreError::MachineNotFound {
                    machine: id.to_string(),
                });
            }
        }

        // Seeds must address one of the two engines.
        for (machine, _) in seeds {
            if *machine != a.machine_id() && *machine != b.machine_id() {
                return Err(CoreError::MachineNotFound {
                    machine: machine.to_string(),
                });
            }
        }
        for (machine, event) in seeds {
            bridge.enqueue(machine, *event)?;
        }

        let position = |id: &str| bridge.machine_ids().position(|m| m == id);
        let mut engines: [&mut StateMachineEngine; 2] =
            if position(a.machine_id()) <= position(b.machine_id()) {
                [a, b]
            } else {
                [b, a]
            };

        tracing::info!(
            "Running machines {} with {} seed event(s)",
            engines
                .iter()
                .map(|e| format!("'{}'", e.machine_id()))
                .collect::<Vec<_>>()
                .join(" and "),
            seeds.len()
        );

        let mut trace = Vec::new();
        let mut undelivered = Vec::new();
        let (round, termination) =
            match self.drive(&mut engines, bridge, &mut trace, &mut undelivered) {
                Ok(finished) => finished,
                Err(err) => {
                    // Leftovers of an aborted run must not leak into the next one.
                    bridge.clear();
                    return Err(err);
                }
            };

        if termination != Termination::Quiescent {
            bridge.clear();
        }

        let final_states = engines
            .iter()
            .map(|e| (e.machine_id().to_string(), e.current_state().clone()))
            .collect();

        tracing::info!("Dual run finished after {} round(s)", round);

        Ok(DualRunReport {
            trace,
            undelivered,
            rounds: round,
            termination,
            final_states,
        })
    }

    /// Runs rounds until both mailboxes drain or the round bound is hit.
    fn drive(
        &self,
        engines: &mut [&mut StateMachineEngine; 2],
        bridge: &CommunicationBridge,
        trace: &mut Vec<TraceEntry>,
        undelivered: &mut Vec<Undelivered>,
    ) -> Result<(usize, Termination), CoreError> {
        let peers = [
            engines[0].machine_id().to_string(),
            engines[1].machine_id().to_string(),
        ];
        let mut round = 0;

        while peers.iter().any(|id| bridge.pending(id) > 0) {
            if round >= self.max_rounds {
                tracing::warn!(
                    "Communication loop detected: events still pending after {} rounds",
                    round
                );
                return Ok((round, Termination::LoopDetected { rounds: round }));
            }
            round += 1;

            for engine in engines.iter_mut() {
                let machine = engine.machine_id().to_string();
                let Some(event) = bridge.dequeue(&machine) else {
                    continue;
                };

                let result = match engine.trigger(&event) {
                    Ok(outcome) => {
                        if let Some(directive) = &outcome.directive {
                            // Mailboxes of machines outside this run are never drained.
                            let delivery = if peers.contains(&directive.target_machine) {
                                bridge.deliver(&machine, directive)
                            } else {
                                bridge.reject(&machine, directive)
                            };
                            match delivery {
                                Ok(true) => {}
                                Ok(false) => undelivered.push(Undelivered {
                                    round,
                                    from: machine.clone(),
                                    directive: directive.clone(),
                                    error: None,
                                }),
                                Err(err) => {
                                    let err = self.check(&machine, &event, err)?;
                                    undelivered.push(Undelivered {
                                        round,
                                        from: machine.clone(),
                                        directive: directive.clone(),
                                        error: Some(err),
                                    });
                                }
                            }
                        }
                        Ok(outcome)
                    }
                    Err(err) => Err(self.check(&machine, &event, err)?),
                };

                trace.push(TraceEntry {
                    round,
                    machine,
                    event,
                    result,
                });
            }

            bridge.commit_round();
        }

        Ok((round, Termination::Quiescent))
    }
}

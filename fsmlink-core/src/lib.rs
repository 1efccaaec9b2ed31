//! # fsmlink-core
//!
//! State machine engine for fsmlink.
//!
//! This crate provides:
//! - Transition document parsing and validation
//! - Named guard resolution against a host registry
//! - Per-machine state and history management
//! - Bridged execution of two machines that trigger each other

pub mod bridge;
pub mod controller;
pub mod definition;
pub mod engine;
pub mod error;
pub mod guard;

pub use bridge::{CommunicationBridge, UnknownPeerPolicy};
pub use controller::{
    DualRunReport, ErrorPolicy, ExecutionController, StepRecord, Termination, TraceEntry,
    Undelivered, DEFAULT_MAX_ROUNDS,
};
pub use definition::{CommunicationDirective, State, Transition, TransitionDocument, TransitionTable};
pub use engine::{EngineOptions, StateMachineEngine, TriggerOutcome};
pub use error::CoreError;
pub use guard::{
    FlagGuardRegistry, FnGuardRegistry, GuardContext, GuardEvaluator, GuardFn, GuardOutcome,
    GuardRegistry,
};

//! Communication bridge - per-machine inbound queues for dual-machine runs.
//!
//! Directives delivered during a round are staged and only become
//! visible to the addressed machine after [`CommunicationBridge::commit_round`].
//! Events enqueued directly (seeds) are visible immediately.

use crate::definition::CommunicationDirective;
use crate::error::CoreError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// What to do with a directive naming a machine the bridge does not know.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPeerPolicy {
    /// Log a warning and discard the directive.
    #[default]
    Drop,
    /// Report `UnknownPeer`.
    Fail,
}

#[derive(Debug, Default)]
struct Queues {
    inbound: VecDeque<String>,
    staged: VecDeque<String>,
}

#[derive(Debug)]
struct Mailbox {
    machine: String,
    queues: Mutex<Queues>,
}

/// Routes directives between registered machines.
#[derive(Debug, Default)]
pub struct CommunicationBridge {
    /// Registration order is the round order.
    mailboxes: Vec<Mailbox>,
    policy: UnknownPeerPolicy,
}

impl CommunicationBridge {
    pub fn new(policy: UnknownPeerPolicy) -> Self {
        Self {
            mailboxes: Vec::new(),
            policy,
        }
    }

    /// Creates a bridge with mailboxes for the given machines, in order.
    pub fn with_machines<I, S>(policy: UnknownPeerPolicy, machines: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut bridge = Self::new(policy);
        for machine in machines {
            bridge.register(machine)?;
        }
        Ok(bridge)
    }

    /// Adds a mailbox for a machine.
    pub fn register(&mut self, machine: impl Into<String>) -> Result<(), CoreError> {
        let machine = machine.into();
        if self.contains(&machine) {
            return Err(CoreError::DuplicateMachine { machine });
        }
        self.mailboxes.push(Mailbox {
            machine,
            queues: Mutex::new(Queues::default()),
        });
        Ok(())
    }

    pub fn policy(&self) -> UnknownPeerPolicy {
        self.policy
    }

    pub fn contains(&self, machine: &str) -> bool {
        self.mailbox(machine).is_some()
    }

    /// Registered machine identifiers in round order.
    pub fn machine_ids(&self) -> impl Iterator<Item = &str> {
        self.mailboxes.iter().map(|m| m.machine.as_str())
    }

    fn mailbox(&self, machine: &str) -> Option<&Mailbox> {
        self.mailboxes.iter().find(|m| m.machine == machine)
    }

    /// Enqueues an event for immediate consumption.
    pub fn enqueue(&self, machine: &str, event: impl Into<String>) -> Result<(), CoreError> {
        let mailbox = self
            .mailbox(machine)
            .ok_or_else(|| CoreError::MachineNotFound {
                machine: machine.to_string(),
            })?;
        mailbox.queues.lock().inbound.push_back(event.into());
        Ok(())
    }

    /// Stages a directive's event for the addressed machine's next round.
    ///
    /// Returns `Ok(false)` when the target is unknown and the policy drops it.
    pub fn deliver(&self, from: &str, directive: &CommunicationDirective) -> Result<bool, CoreError> {
        match self.mailbox(&directive.target_machine) {
            Some(mailbox) => {
                mailbox.queues.lock().staged.push_back(directive.event.clone());
                tracing::info!(
                    "Machine '{}' sent event '{}' to machine '{}'",
                    from,
                    directive.event,
                    directive.target_machine
                );
                Ok(true)
            }
            None => self.reject(from, directive),
        }
    }

    /// Applies the unknown-peer policy to a directive without delivering it.
    pub fn reject(&self, from: &str, directive: &CommunicationDirective) -> Result<bool, CoreError> {
        match self.policy {
            UnknownPeerPolicy::Drop => {
                tracing::warn!(
                    "Machine '{}' addressed unknown machine '{}'; dropped event '{}'",
                    from,
                    directive.target_machine,
                    directive.event
                );
                Ok(false)
            }
            UnknownPeerPolicy::Fail => Err(CoreError::UnknownPeer {
                from: from.to_string(),
                target: directive.target_machine.clone(),
            }),
        }
    }

    /// Takes the next inbound event for a machine.
    pub fn dequeue(&self, machine: &str) -> Option<String> {
        self.mailbox(machine)
            .and_then(|m| m.queues.lock().inbound.pop_front())
    }

    /// Makes everything staged this round visible for the next one.
    pub fn commit_round(&self) {
        for mailbox in &self.mailboxes {
            let mut queues = mailbox.queues.lock();
            let staged = std::mem::take(&mut queues.staged);
            queues.inbound.extend(staged);
        }
    }

    /// Inbound plus staged events waiting for a machine.
    pub fn pending(&self, machine: &str) -> usize {
        self.mailbox(machine)
            .map(|m| {
                let queues = m.queues.lock();
                queues.inbound.len() + queues.staged.len()
            })
            .unwrap_or(0)
    }

    /// True when no machine has anything to process.
    pub fn is_quiescent(&self) -> bool {
        self.mailboxes.iter().all(|m| {
            let queues = m.queues.lock();
            queues.inbound.is_empty() && queues.staged.is_empty()
        })
    }

    /// Discards everything queued.
    pub fn clear(&self) {
        for mailbox in &self.mailboxes {
            let mut queues = mailbox.queues.lock();
            queues.inbound.clear();
            queues.staged.clear();
        }
    }
}

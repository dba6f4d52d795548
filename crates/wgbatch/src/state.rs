use std::fmt;
use std::path::PathBuf;

use tracing::debug;

use crate::keys::Identity;
use crate::plan::InstanceName;

/// Step at which an instance stopped making progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Keygen,
    Write,
    Activate,
    Register,
    Deactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Planned,
    Skipped,
    KeysGenerated,
    FileWritten,
    Activated,
    Registered,
    Deactivated,
    Failed(Phase),
}

impl InstanceState {
    /// Forward edges of the per-instance lifecycle. Failures are handled by
    /// [`Instance::fail`].
    pub fn can_advance_to(self, next: InstanceState) -> bool {
        use InstanceState::*;
        matches!(
            (self, next),
            (Planned, Skipped)
                | (Planned, KeysGenerated)
                | (KeysGenerated, FileWritten)
                | (FileWritten, Activated)
                | (Activated, Registered)
                | (Registered, Deactivated)
        )
    }

    pub fn is_failed(self) -> bool {
        matches!(self, InstanceState::Failed(_))
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceState::Failed(phase) => write!(f, "failed ({phase:?})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// One instance travelling through a provisioning run.
#[derive(Debug)]
pub struct Instance {
    pub name: InstanceName,
    pub path: PathBuf,
    state: InstanceState,
    identity: Option<Identity>,
    registered: bool,
}

impl Instance {
    pub fn new(name: InstanceName, path: PathBuf) -> Self {
        Self {
            name,
            path,
            state: InstanceState::Planned,
            identity: None,
            registered: false,
        }
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Whether the dashboard accepted this instance's peer.
    pub fn registered(&self) -> bool {
        self.registered
    }

    /// Whether the config file of this instance made it to disk.
    pub fn has_file(&self) -> bool {
        !matches!(
            self.state,
            InstanceState::Planned
                | InstanceState::Skipped
                | InstanceState::KeysGenerated
                | InstanceState::Failed(Phase::Keygen | Phase::Write)
        )
    }

    pub fn keys_generated(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.advance(InstanceState::KeysGenerated);
    }

    pub fn advance(&mut self, next: InstanceState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {next:?}",
            self.state
        );
        if next == InstanceState::Registered {
            self.registered = true;
        }
        debug!(interface = %self.name, from = ?self.state, to = ?next, "instance transition");
        self.state = next;
    }

    /// Record a failure. The first failure is kept; later ones are only
    /// logged.
    pub fn fail(&mut self, phase: Phase) {
        if self.state.is_failed() {
            debug!(interface = %self.name, state = ?self.state, ?phase, "instance already failed");
            return;
        }
        debug!(interface = %self.name, from = ?self.state, ?phase, "instance failed");
        self.state = InstanceState::Failed(phase);
    }
}

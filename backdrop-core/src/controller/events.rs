use backdrop_model::{BackgroundDescriptor, SystemState};

use crate::transition::TransitionOutcome;

/// Published on the controller's broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Applied {
        descriptor: BackgroundDescriptor,
        outcome: TransitionOutcome,
    },
    Error {
        message: String,
        /// Transient failure during a load that asked for quiet errors; hosts
        /// skip the toast for these.
        suppressible: bool,
    },
    StateChanged {
        from: SystemState,
        to: SystemState,
    },
}

impl ControllerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerEvent::Applied { .. } => "applied",
            ControllerEvent::Error { .. } => "error",
            ControllerEvent::StateChanged { .. } => "state-changed",
        }
    }
}

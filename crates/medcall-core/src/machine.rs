//! Connection lifecycle as a pure state machine.
//!
//! [`ConnectionMachine::apply`] never performs I/O. Each accepted input yields
//! the ordered [`Command`]s the session's effect runner must execute.

use crate::errors::{CallError, TransitionError};
use crate::events::ConnectionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    JoinRequested,
    JoinSucceeded,
    JoinFailed(CallError),
    TransportInterrupted,
    TransportRecovered,
    TransportClosed { reason: String },
    LeaveRequested,
}

impl Input {
    fn name(&self) -> &'static str {
        match self {
            Input::JoinRequested => "join-requested",
            Input::JoinSucceeded => "join-succeeded",
            Input::JoinFailed(_) => "join-failed",
            Input::TransportInterrupted => "transport-interrupted",
            Input::TransportRecovered => "transport-recovered",
            Input::TransportClosed { .. } => "transport-closed",
            Input::LeaveRequested => "leave-requested",
        }
    }
}

/// Side effects requested by a transition, executed in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Unpublish and close the screen-capture track, if any.
    StopScreenShare,
    /// Close the microphone and camera handles.
    ReleaseDevices,
    /// Detach the owned transport client and ask it to leave.
    LeaveTransport,
    /// Give the server time to drop a client that was just detached.
    AwaitCleanup,
    ClearParticipants,
    ClearError,
    ReportError(CallError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn apply(&mut self, input: Input) -> Result<Transition, TransitionError> {
        use Command::*;
        use ConnectionState::*;

        let (to, commands) = match (&self.state, input) {
            (_, Input::LeaveRequested) => (
                Idle,
                vec![
                    StopScreenShare,
                    ReleaseDevices,
                    LeaveTransport,
                    ClearParticipants,
                    ClearError,
                ],
            ),

            (Idle | Failed, Input::JoinRequested) => {
                (Connecting, vec![ClearError, ClearParticipants])
            }
            // A join on top of a live or in-flight attempt replaces it.
            (Connecting | Connected | Reconnecting { .. }, Input::JoinRequested) => (
                Connecting,
                vec![
                    StopScreenShare,
                    LeaveTransport,
                    ClearParticipants,
                    ClearError,
                    AwaitCleanup,
                ],
            ),

            (Connecting, Input::JoinSucceeded) => (Connected, vec![]),
            (Connecting, Input::JoinFailed(err)) => (
                Failed,
                vec![
                    StopScreenShare,
                    LeaveTransport,
                    ReleaseDevices,
                    ClearParticipants,
                    ReportError(err),
                ],
            ),

            (Connected, Input::TransportInterrupted) => (Reconnecting { attempt: 1 }, vec![]),
            (Reconnecting { attempt }, Input::TransportInterrupted) => {
                (Reconnecting { attempt: attempt + 1 }, vec![])
            }
            (Reconnecting { .. }, Input::TransportRecovered) => (Connected, vec![]),

            (Connecting | Connected | Reconnecting { .. }, Input::TransportClosed { reason }) => (
                Failed,
                vec![
                    StopScreenShare,
                    LeaveTransport,
                    ReleaseDevices,
                    ClearParticipants,
                    ReportError(CallError::TransportDisconnected(reason)),
                ],
            ),

            (from, input) => {
                return Err(TransitionError {
                    from: from.clone(),
                    input: input.name(),
                });
            }
        };

        let from = std::mem::replace(&mut self.state, to.clone());
        if from != to {
            tracing::info!(?from, ?to, "connection state transition");
        }
        Ok(Transition { from, to, commands })
    }
}

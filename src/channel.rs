//! Epoch-tagged message channel between the host and an isolated context.
//!
//! Delivery is fire-and-forget: a send to a dropped peer is logged and
//! otherwise ignored. Each endpoint stamps outgoing frames with the epoch it
//! was created for; receivers are responsible for dropping foreign epochs.

use tokio::sync::mpsc;
use tracing::debug;

use crate::protocol::{ContextMessage, Epoch, Frame, HostMessage};

/// Create a connected endpoint pair for `epoch`.
pub fn channel(epoch: Epoch) -> (HostEndpoint, ContextEndpoint) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        HostEndpoint {
            epoch,
            commands: command_tx,
            events: event_rx,
        },
        ContextEndpoint {
            epoch,
            events: event_tx,
            commands: command_rx,
        },
    )
}

/// Host side: sends commands, receives selection events.
#[derive(Debug)]
pub struct HostEndpoint {
    epoch: Epoch,
    commands: mpsc::UnboundedSender<Frame<HostMessage>>,
    events: mpsc::UnboundedReceiver<Frame<ContextMessage>>,
}

impl HostEndpoint {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Send a command. Returns `false` if the context has gone away.
    pub fn send(&self, message: HostMessage) -> bool {
        match self.commands.send(Frame::new(self.epoch, message)) {
            Ok(()) => true,
            Err(_) => {
                debug!(epoch = %self.epoch, "context endpoint closed; command dropped");
                false
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Frame<ContextMessage>> {
        self.events.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<Frame<ContextMessage>> {
        self.events.recv().await
    }
}

/// Isolated-context side: emits events, receives commands.
#[derive(Debug)]
pub struct ContextEndpoint {
    epoch: Epoch,
    events: mpsc::UnboundedSender<Frame<ContextMessage>>,
    commands: mpsc::UnboundedReceiver<Frame<HostMessage>>,
}

impl ContextEndpoint {
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Emit an event stamped with this endpoint's epoch.
    pub fn emit(&self, message: ContextMessage) -> bool {
        self.forward(Frame::new(self.epoch, message))
    }

    /// Relay a frame produced elsewhere (a browser frame) with its epoch intact.
    pub fn forward(&self, frame: Frame<ContextMessage>) -> bool {
        match self.events.send(frame) {
            Ok(()) => true,
            Err(_) => {
                debug!(epoch = %self.epoch, "host endpoint closed; event dropped");
                false
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Frame<HostMessage>> {
        self.commands.try_recv().ok()
    }

    pub async fn recv(&mut self) -> Option<Frame<HostMessage>> {
        self.commands.recv().await
    }
}

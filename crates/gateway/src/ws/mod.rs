// WebSocket surface: upgrade handling, the per-connection socket loop, and
// the live-connection registry.

pub mod handler;
pub mod registry;

use crewline_common::protocol::ws::Envelope;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// A validated message on its way to the business layer.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedMessage {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    pub envelope: Envelope,
}

/// Hand-off point to the business application. The gateway owns everything
/// up to here; chat/notification semantics live on the other side of the
/// channel.
#[derive(Debug, Clone)]
pub enum Dispatcher {
    /// Forward validated messages to the business layer.
    Channel(mpsc::UnboundedSender<DispatchedMessage>),
    /// Accept and drop. For standalone runs and tests.
    Sink,
}

impl Dispatcher {
    pub fn dispatch(&self, message: DispatchedMessage) {
        match self {
            Self::Channel(sender) => {
                if sender.send(message).is_err() {
                    debug!("business handler channel is closed, dropping message");
                }
            }
            Self::Sink => {}
        }
    }
}

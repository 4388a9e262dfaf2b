// MIT License - Copyright (c) 2026 Peter Wright
// Channel events

use crate::state::Power;

/// Events emitted by a [`ChannelController`](crate::ChannelController).
///
/// Subscribe via `controller.subscribe()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A transaction left the channel's power different from before it started
    PowerChanged { channel: String, power: Power },
    /// A transaction failed; the appliance may be partially transitioned
    TransactionFailed {
        channel: String,
        operation: &'static str,
        error: String,
    },
}

/// Type alias for the broadcast sender.
pub type EventSender = tokio::sync::broadcast::Sender<ChannelEvent>;

/// Type alias for the broadcast receiver.
pub type EventReceiver = tokio::sync::broadcast::Receiver<ChannelEvent>;

/// Create a new event channel with the given capacity.
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    tokio::sync::broadcast::channel(capacity)
}

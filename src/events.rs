//! Edit events emitted by the timeline.
//!
//! Mutations on [`Editing`](crate::Editing) announce themselves here so a host
//! UI can repaint or re-run queries without polling the whole graph. Emission
//! is fire-and-forget; a closed or absent receiver is never an error.

use crossbeam_channel::Sender;

use crate::entities::strip::StripId;

/// Timeline state-change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditEvent {
    StripAdded(StripId),
    StripRemoved(StripId),
    /// Placement, flags, trim, name or effect wiring of a strip changed.
    StripChanged(StripId),
    /// Channel registry of some level changed (names, mute/lock, growth).
    ChannelsChanged,
    MetaEntered(StripId),
    MetaExited(StripId),
    /// A proxy build job finished or was cancelled.
    ProxyFinished { items_built: usize, cancelled: bool },
}

/// Event sender held by the timeline.
///
/// Hosts that care about events construct the channel and pass the sender in;
/// headless use (and tests) run with [`EventSender::dummy`].
#[derive(Clone, Debug)]
pub struct EventSender {
    sender: Option<Sender<EditEvent>>,
}

impl EventSender {
    pub fn new(sender: Sender<EditEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Sender that drops every event.
    pub fn dummy() -> Self {
        Self { sender: None }
    }

    /// Emit event (silent if no receiver).
    pub fn emit(&self, event: EditEvent) {
        if let Some(ref tx) = self.sender {
            let _ = tx.send(event);
        }
    }
}

impl Default for EventSender {
    fn default() -> Self {
        Self::dummy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_sender_swallows_events() {
        let tx = EventSender::dummy();
        tx.emit(EditEvent::ChannelsChanged);
    }

    #[test]
    fn connected_sender_delivers() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sender = EventSender::new(tx);
        let id = StripId::new();
        sender.emit(EditEvent::StripAdded(id));
        assert_eq!(rx.try_recv().unwrap(), EditEvent::StripAdded(id));
    }

    #[test]
    fn dropped_receiver_is_not_an_error() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let sender = EventSender::new(tx);
        drop(rx);
        sender.emit(EditEvent::ChannelsChanged);
    }
}

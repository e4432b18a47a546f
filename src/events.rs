//! Events emitted while polling playback and serving subscribers.
//!
//! Events are delivered on an unbounded channel handed to
//! [`SnapshotStore`](crate::snapshot::SnapshotStore) and
//! [`SubscriberRegistry`](crate::registry::SubscriberRegistry). They are
//! meant for logging and monitoring; nothing in the feed depends on them
//! being consumed.

use std::fmt;

use tokio::sync::mpsc;

use crate::registry::SubscriberId;

/// Sending half of the event channel.
pub type Sender = mpsc::UnboundedSender<Event>;

/// Receiving half of the event channel.
pub type Receiver = mpsc::UnboundedReceiver<Event>;

/// Creates an event channel.
#[must_use]
pub fn channel() -> (Sender, Receiver) {
    mpsc::unbounded_channel()
}

/// Significant changes in playback or subscriber state.
///
/// Playback Events:
/// * [`Play`](Self::Play) - Playback started or resumed
/// * [`Pause`](Self::Pause) - Playback stopped, or the last fetch failed
/// * [`TrackChanged`](Self::TrackChanged) - A different track is playing
///
/// Subscriber Events:
/// * [`Connected`](Self::Connected) - A stream subscriber connected
/// * [`Disconnected`](Self::Disconnected) - A stream subscriber went away
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Event {
    Play,

    Pause,

    /// The upstream reports a track id different from the previously
    /// observed one. Not emitted for the first track after startup.
    TrackChanged { id: String, name: String },

    Connected(SubscriberId),

    Disconnected(SubscriberId),
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Play => write!(f, "playing"),
            Event::Pause => write!(f, "paused"),
            Event::TrackChanged { id, name } => write!(f, "track changed to {name} ({id})"),
            Event::Connected(id) => write!(f, "subscriber {id} connected"),
            Event::Disconnected(id) => write!(f, "subscriber {id} disconnected"),
        }
    }
}

/// Logs every event at info level until all senders are dropped.
pub async fn log_all(mut events: Receiver) {
    while let Some(event) = events.recv().await {
        info!("{event}");
    }
}

/// Sends `event` if anybody is listening.
pub(crate) fn emit(tx: Option<&Sender>, event: Event) {
    if let Some(tx) = tx {
        // The receiver going away is not an error.
        let _ = tx.send(event);
    }
}

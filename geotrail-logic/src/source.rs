use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{error::PositionError, location::RawFix, session::SessionEvent};

/// Identifies one subscription made by a session, later subscriptions always get a larger id
pub type WatchId = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Options passed to [PositionSource::subscribe]
pub struct WatchOptions {
    /// Ask the platform for the best fix it can get (GPS over cell towers)
    pub enable_high_accuracy: bool,
    /// Milliseconds to wait for a fix before reporting a timeout
    pub timeout: u32,
    /// Oldest cached fix (in milliseconds) the platform may hand us, 0 means always fresh
    pub maximum_age: u32,
}

impl WatchOptions {
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout as u64)
    }

    pub fn maximum_age_duration(&self) -> Duration {
        Duration::from_millis(self.maximum_age as u64)
    }
}

/// Options every tracking session watches with
pub const TRACKING_WATCH_OPTIONS: WatchOptions = WatchOptions {
    enable_high_accuracy: true,
    timeout: 10000,
    maximum_age: 0,
};

/// Handle a [PositionSource] pushes fixes and errors into. Each sink is tied to the watch
/// it was created for, so anything sent after that watch is superseded gets ignored.
#[derive(Debug, Clone)]
pub struct WatchSink {
    watch: WatchId,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl WatchSink {
    pub(crate) fn new(watch: WatchId, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { watch, tx }
    }

    pub fn watch_id(&self) -> WatchId {
        self.watch
    }

    /// Deliver a fix, returns `false` once the session is gone and delivery should stop
    pub fn deliver(&self, fix: RawFix) -> bool {
        self.tx.send(SessionEvent::Fix(self.watch, fix)).is_ok()
    }

    /// Deliver an error, sources are expected to stop delivering after this
    pub fn fail(&self, error: PositionError) -> bool {
        self.tx.send(SessionEvent::Error(self.watch, error)).is_ok()
    }

    /// Whether the session on the other end has shut down
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Some way of continuously getting the device's location, like a platform geolocation API.
/// Only a [crate::TrackingSession] should ever call [PositionSource::subscribe] and
/// [PositionSource::unsubscribe].
pub trait PositionSource: Send + Sync {
    /// Handle for a live subscription
    type Watch: Send;

    /// Whether this platform can provide locations at all
    fn is_available(&self) -> bool;

    /// Begin delivering fixes into `sink` until unsubscribed or an error is delivered.
    /// Must not block, delivery happens asynchronously.
    fn subscribe(&self, options: WatchOptions, sink: WatchSink) -> Self::Watch;

    /// Stop delivery for a watch, must be fine to call on a watch that already ended
    fn unsubscribe(&self, watch: Self::Watch);
}

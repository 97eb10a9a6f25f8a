use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::TrackingErrorKind, location::GeoSample, path::TrailPath, stats::TrailStats};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TrackingStatus {
    /// Never started
    #[default]
    Idle,
    /// A watch is live and fixes are being accepted
    Active,
    /// Stopped by the user
    Stopped,
    /// The last watch ended with an error, see [TrackerSnapshot::last_error]
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// What happened to a sample handed to [TrackerState::accept_sample]
pub enum SampleOutcome {
    /// New point on the path
    Appended,
    /// Same coordinate as the last point, only `current` moved
    Coalesced,
    /// Not tracking, nothing changed
    Ignored,
}

impl SampleOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

#[derive(Debug, Clone)]
/// State machine behind a [crate::TrackingSession], the session keeps its own on the main
/// loop so nothing else can write to it.
pub struct TrackerState {
    pub id: Uuid,
    status: TrackingStatus,
    /// Every accepted point in arrival order, only ever pushed to
    path: TrailPath,
    /// Latest accepted sample, may be newer than the last point of `path` if we haven't moved
    current: Option<GeoSample>,
    last_error: Option<TrackingErrorKind>,
}

impl TrackerState {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            status: TrackingStatus::Idle,
            path: TrailPath::new(),
            current: None,
            last_error: None,
        }
    }

    pub fn status(&self) -> TrackingStatus {
        self.status
    }

    pub fn path(&self) -> &TrailPath {
        &self.path
    }

    pub fn current(&self) -> Option<&GeoSample> {
        self.current.as_ref()
    }

    pub fn last_error(&self) -> Option<TrackingErrorKind> {
        self.last_error
    }

    pub fn is_active(&self) -> bool {
        self.status == TrackingStatus::Active
    }

    /// Enter [TrackingStatus::Active], forgetting any previous error. The path is kept.
    pub fn activate(&mut self) {
        self.last_error = None;
        self.status = TrackingStatus::Active;
    }

    pub fn fail(&mut self, kind: TrackingErrorKind) {
        self.last_error = Some(kind);
        self.status = TrackingStatus::Failed;
    }

    /// A failed session keeps its error and status, an idle one has nothing to stop
    pub fn stop(&mut self) {
        if self.status == TrackingStatus::Active {
            self.status = TrackingStatus::Stopped;
        }
    }

    pub fn accept_sample(&mut self, sample: GeoSample) -> SampleOutcome {
        if !self.is_active() {
            return SampleOutcome::Ignored;
        }

        let duplicate = self
            .path
            .last()
            .is_some_and(|last| last.same_position(&sample));

        self.current = Some(sample);

        if duplicate {
            SampleOutcome::Coalesced
        } else {
            self.path.push(sample);
            SampleOutcome::Appended
        }
    }

    pub fn as_snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            id: self.id,
            status: self.status,
            path: self.path.clone(),
            current: self.current,
            last_error: self.last_error.map(|kind| kind.message().to_string()),
            error_kind: self.last_error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Immutable view of a session handed out to the UI and other observers
pub struct TrackerSnapshot {
    pub id: Uuid,
    pub status: TrackingStatus,
    /// Shares storage with the session, cloning a snapshot is cheap
    pub path: TrailPath,
    pub current: Option<GeoSample>,
    /// Human readable error, only set while the session is failed (or stopped after failing)
    pub last_error: Option<String>,
    pub error_kind: Option<TrackingErrorKind>,
}

impl TrackerSnapshot {
    pub fn is_tracking(&self) -> bool {
        self.status == TrackingStatus::Active
    }

    pub fn stats(&self) -> TrailStats {
        TrailStats::from_snapshot(self)
    }
}

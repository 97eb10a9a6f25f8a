mod error;
mod location;
mod path;
mod session;
mod source;
mod stats;
mod tracker_state;

pub use error::{
    PERMISSION_DENIED, POSITION_UNAVAILABLE, PositionError, TIMEOUT, TrackingErrorKind,
};
pub use location::{GeoSample, LocationComponent, RawFix};
pub use path::TrailPath;
pub use session::{Id, SampleObserver, StateUpdateSender, TrackingSession, UtcDT};
pub use source::{PositionSource, TRACKING_WATCH_OPTIONS, WatchId, WatchOptions, WatchSink};
pub use stats::TrailStats;
pub use tracker_state::{SampleOutcome, TrackerSnapshot, TrackerState, TrackingStatus};

pub mod prelude {
    use anyhow::Error as AnyhowError;
    use std::result::Result as StdResult;
    pub type Result<T = (), E = AnyhowError> = StdResult<T, E>;
    pub use anyhow::Context;
}

mod server;
mod sink;

use geotrail_logic::GeoSample;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use server::{DEFAULT_BASE_URL, locations_url, post_location};
pub use sink::{ForwarderHandle, RemoteSampleSink};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
/// Body of a location POST
pub struct LocationUpdate {
    pub session: Uuid,
    pub sample: GeoSample,
}

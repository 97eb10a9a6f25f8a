mod replay;
mod simulated;

pub use replay::{ReplayEntry, ReplaySource, parse_recording};
pub use simulated::{SimulatedSource, WalkSettings, Walker};

pub mod prelude {
    pub use anyhow::{Context, anyhow, bail};
    pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
}

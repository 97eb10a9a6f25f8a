use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes used by the W3C geolocation API, most platform location services
/// report the same numbering.
pub const PERMISSION_DENIED: u16 = 1;
pub const POSITION_UNAVAILABLE: u16 = 2;
pub const TIMEOUT: u16 = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// An error delivered by a [crate::PositionSource] in place of a fix
pub struct PositionError {
    pub code: u16,
    /// Whatever the platform said about it
    pub message: String,
}

impl PositionError {
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn permission_denied() -> Self {
        Self::new(PERMISSION_DENIED, "User denied Geolocation")
    }

    pub fn position_unavailable() -> Self {
        Self::new(POSITION_UNAVAILABLE, "Position unavailable")
    }

    pub fn timeout() -> Self {
        Self::new(TIMEOUT, "Timeout expired")
    }

    pub fn kind(&self) -> TrackingErrorKind {
        TrackingErrorKind::from_code(self.code)
    }
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
/// Why a tracking session ended up failed
pub enum TrackingErrorKind {
    /// There is no location capability on this platform at all
    CapabilityUnavailable,
    /// The user or OS refused location access
    PermissionDenied,
    /// The platform could not resolve a fix right now
    PositionUnavailable,
    /// No fix arrived within the watch timeout
    Timeout,
    /// Anything the platform reported that we don't recognize
    Unknown,
}

impl TrackingErrorKind {
    pub fn from_code(code: u16) -> Self {
        match code {
            PERMISSION_DENIED => Self::PermissionDenied,
            POSITION_UNAVAILABLE => Self::PositionUnavailable,
            TIMEOUT => Self::Timeout,
            _ => Self::Unknown,
        }
    }

    /// Message suitable for showing to the user directly
    pub fn message(&self) -> &'static str {
        match self {
            Self::CapabilityUnavailable => "Geolocation is not supported on this device.",
            Self::PermissionDenied => "Location permission denied. Please enable it in settings.",
            Self::PositionUnavailable => "Location information is unavailable.",
            Self::Timeout => "The request to get user location timed out.",
            Self::Unknown => "An unknown error occurred.",
        }
    }

    /// Whether calling start again has a reasonable chance of working without
    /// anything changing outside the app
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::PositionUnavailable | Self::Timeout)
    }
}

impl fmt::Display for TrackingErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

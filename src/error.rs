//! Error taxonomy for the surface core
//!
//! Hardware absence is an expected condition here, so bus and transport
//! failures are plain values that the bring-up code inspects to pick a
//! degraded configuration. Only `ProgrammingError` is meant to be fatal.

use thiserror::Error;

/// Errors raised by the parameter core, the LED driver and the transports
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Register I/O device unreachable or bus error
    #[error("bus failure: {0}")]
    BusFailure(String),

    /// Transport write failure
    #[error("transport I/O failure: {0}")]
    IoFailure(String),

    /// Bring-up of a device failed; the owning subsystem is unavailable
    #[error("device unavailable: {device}: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    /// Wiring or declaration bug (duplicate names, bad domains, re-entrant commits)
    #[error("programming error: {0}")]
    ProgrammingError(String),

    /// LED coordinate outside the 9x8x2 matrix
    #[error("invalid LED coordinate: row {row}, col {col}")]
    InvalidCoordinate { row: u8, col: u8 },

    /// Frame page index outside 0..=7
    #[error("invalid frame page {0} (must be 0-7)")]
    InvalidFrame(u8),
}

impl SurfaceError {
    /// True for the failures that mean "hardware not there / went away"
    pub fn is_hardware_absence(&self) -> bool {
        matches!(
            self,
            SurfaceError::BusFailure(_)
                | SurfaceError::IoFailure(_)
                | SurfaceError::DeviceUnavailable { .. }
        )
    }
}

impl From<std::io::Error> for SurfaceError {
    fn from(error: std::io::Error) -> Self {
        SurfaceError::IoFailure(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SurfaceError>;

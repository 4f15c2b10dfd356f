//! Error types for the playback engine.

use mp_device::DeviceError;
use mp_ir::ConversionError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybackError {
    /// The tempo map could not place an event in time.
    #[error("Time conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// The output device rejected an event.
    #[error("Output device failed: {0}")]
    Device(#[from] DeviceError),

    /// The engine cannot accept the call in its current state.
    #[error("Invalid state: {0}")]
    InvalidState(&'static str),

    /// Speed must be a finite number greater than zero.
    #[error("Invalid speed {0}: must be finite and greater than zero")]
    InvalidSpeed(f64),

    /// The dispatch thread could not be created.
    #[error("Failed to spawn dispatch thread: {0}")]
    Spawn(String),
}

/// Unrecognized note-stop policy name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown note stop policy '{0}' (expected interrupt, hold or split)")]
pub struct UnknownPolicy(pub String);

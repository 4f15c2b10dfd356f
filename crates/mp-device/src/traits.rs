//! Output device trait and error types.

use mp_ir::MidiEvent;
use thiserror::Error;

/// Error type for device operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Failed to initialize the MIDI backend
    #[error("Device init error: {0}")]
    Init(String),
    /// No port matched the requested name
    #[error("No output port matching '{0}'")]
    NotFound(String),
    /// Failed to open a connection to the port
    #[error("Connect error: {0}")]
    Connect(String),
    /// The device rejected an event
    #[error("Send error: {0}")]
    Send(String),
}

/// A destination for MIDI events.
///
/// `send` is synchronous: when it returns the event has left the engine.
pub trait OutputDevice: Send {
    /// Send one event now.
    fn send(&mut self, event: &MidiEvent) -> Result<(), DeviceError>;

    /// Human-readable device name.
    fn name(&self) -> &str {
        "output"
    }
}

impl<T: OutputDevice + ?Sized> OutputDevice for Box<T> {
    fn send(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
        (**self).send(event)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Discards everything, counting what it was given.
#[derive(Debug, Default)]
pub struct NullOutput {
    sent: u64,
}

impl NullOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl OutputDevice for NullOutput {
    fn send(&mut self, _event: &MidiEvent) -> Result<(), DeviceError> {
        self.sent += 1;
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

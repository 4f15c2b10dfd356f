//! midir-based MIDI output backend.

use log::{debug, info};
use midir::{MidiOutput, MidiOutputConnection};
use mp_ir::MidiEvent;

use crate::traits::{DeviceError, OutputDevice};

const CLIENT_NAME: &str = "midiplay";

/// A connected hardware or virtual MIDI output port.
pub struct MidirOutput {
    name: String,
    connection: MidiOutputConnection,
}

impl MidirOutput {
    /// Names of all output ports the system currently exposes.
    pub fn list_ports() -> Result<Vec<String>, DeviceError> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| DeviceError::Init(e.to_string()))?;
        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }

    /// Connect to the first port whose name equals `query`, falling back
    /// to the first port whose name contains it. An empty query picks the
    /// first port.
    pub fn connect(query: &str) -> Result<Self, DeviceError> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| DeviceError::Init(e.to_string()))?;
        let ports = midi_out.ports();
        let named: Vec<(String, usize)> = ports
            .iter()
            .enumerate()
            .filter_map(|(i, port)| midi_out.port_name(port).ok().map(|name| (name, i)))
            .collect();

        let (name, index) = named
            .iter()
            .find(|(name, _)| name == query)
            .or_else(|| named.iter().find(|(name, _)| name.contains(query)))
            .cloned()
            .ok_or_else(|| DeviceError::NotFound(query.to_string()))?;

        debug!("Connecting to MIDI output '{}'", name);
        let connection = midi_out
            .connect(&ports[index], "midiplay-out")
            .map_err(|e| DeviceError::Connect(e.to_string()))?;
        info!("Connected to MIDI output '{}'", name);

        Ok(Self { name, connection })
    }
}

impl OutputDevice for MidirOutput {
    fn send(&mut self, event: &MidiEvent) -> Result<(), DeviceError> {
        self.connection
            .send(event.to_bytes().as_ref())
            .map_err(|e| DeviceError::Send(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

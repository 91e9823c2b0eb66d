//! MIDI port discovery
//!
//! Ports are picked by case-insensitive substring so that configuration
//! survives the index prefixes and suffixes some backends add to names.

use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputPort};
use tracing::debug;

use crate::error::{Result, SurfaceError};

const CLIENT_NAME: &str = "Synth-Surface-Discovery";

/// Case-insensitive substring match used for every port lookup
pub fn matches_pattern(port_name: &str, pattern: &str) -> bool {
    port_name.to_lowercase().contains(&pattern.to_lowercase())
}

/// Find an input port by substring match
pub fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            if matches_pattern(&name, pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// Find an output port by substring match
pub fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            if matches_pattern(&name, pattern) {
                debug!("Found port '{}' matching pattern '{}'", name, pattern);
                return Some((port, name));
            }
        }
    }
    None
}

/// List available MIDI input ports
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| SurfaceError::DeviceUnavailable {
        device: "MIDI input".to_string(),
        reason: e.to_string(),
    })?;
    Ok(midi_in
        .ports()
        .iter()
        .filter_map(|port| midi_in.port_name(port).ok())
        .collect())
}

/// List available MIDI output ports
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| SurfaceError::DeviceUnavailable {
        device: "MIDI output".to_string(),
        reason: e.to_string(),
    })?;
    Ok(midi_out
        .ports()
        .iter()
        .filter_map(|port| midi_out.port_name(port).ok())
        .collect())
}

/// Print discovered ports (`--list-ports`)
pub fn print_ports() {
    println!("\n=== MIDI Input Ports ===");
    match list_input_ports() {
        Ok(ports) => {
            for (i, name) in ports.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        }
        Err(e) => println!("  ({})", e),
    }

    println!("\n=== MIDI Output Ports ===");
    match list_output_ports() {
        Ok(ports) => {
            for (i, name) in ports.iter().enumerate() {
                println!("  {}: {}", i, name);
            }
        }
        Err(e) => println!("  ({})", e),
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_case_insensitive_substring() {
        assert!(matches_pattern("Arturia KeyStep 37:Arturia KeyStep 37 MIDI 1 20:0", "keystep"));
        assert!(matches_pattern("USB MIDI Interface", "MIDI"));
        assert!(!matches_pattern("Midi Through Port-0", "keystep"));
        assert!(matches_pattern("anything", ""));
    }

    #[test]
    fn test_port_discovery_does_not_panic() {
        // No MIDI backend in CI is fine; listing just reports the error.
        let _ = list_input_ports();
        let _ = list_output_ports();
    }
}

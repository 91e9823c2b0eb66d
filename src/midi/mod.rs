//! MIDI message types
//!
//! Only channel-voice messages matter to the surface; everything else parses
//! to `None` and is ignored by the router.

pub mod ports;

use std::fmt;

/// Channel-voice MIDI messages (channel is 0-15 on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Velocity 0 is kept as-is; the outboard unit treats it as a note-off
    NoteOn { channel: u8, note: u8, velocity: u8 },

    PolyPressure { channel: u8, note: u8, pressure: u8 },

    ControlChange { channel: u8, cc: u8, value: u8 },

    ProgramChange { channel: u8, program: u8 },

    ChannelPressure { channel: u8, pressure: u8 },

    /// 14-bit value, 8192 is center
    PitchBend { channel: u8, value: u16 },
}

impl MidiMessage {
    /// Parse one channel-voice message from raw bytes
    ///
    /// Running status, system common and real-time messages are not
    /// channel-voice traffic and yield `None`. So does a data byte with the
    /// high bit set.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let (&status, rest) = data.split_first()?;
        if !(0x80..0xF0).contains(&status) {
            return None;
        }
        if rest.iter().take(2).any(|b| b & 0x80 != 0) {
            return None;
        }

        let channel = status & 0x0F;
        let data1 = rest.first().copied();
        let data2 = rest.get(1).copied();

        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff {
                channel,
                note: data1?,
                velocity: data2?,
            }),
            0x90 => Some(MidiMessage::NoteOn {
                channel,
                note: data1?,
                velocity: data2?,
            }),
            0xA0 => Some(MidiMessage::PolyPressure {
                channel,
                note: data1?,
                pressure: data2?,
            }),
            0xB0 => Some(MidiMessage::ControlChange {
                channel,
                cc: data1?,
                value: data2?,
            }),
            0xC0 => Some(MidiMessage::ProgramChange {
                channel,
                program: data1?,
            }),
            0xD0 => Some(MidiMessage::ChannelPressure {
                channel,
                pressure: data1?,
            }),
            0xE0 => {
                let lsb = data1? as u16;
                let msb = data2? as u16;
                Some(MidiMessage::PitchBend {
                    channel,
                    value: (msb << 7) | lsb,
                })
            }
            _ => None,
        }
    }

    /// Encode the message to MIDI bytes
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                vec![0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                vec![0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F]
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                vec![0xA0 | (channel & 0x0F), note & 0x7F, pressure & 0x7F]
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                vec![0xB0 | (channel & 0x0F), cc & 0x7F, value & 0x7F]
            }
            MidiMessage::ProgramChange { channel, program } => {
                vec![0xC0 | (channel & 0x0F), program & 0x7F]
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                vec![0xD0 | (channel & 0x0F), pressure & 0x7F]
            }
            MidiMessage::PitchBend { channel, value } => {
                let lsb = (value & 0x7F) as u8;
                let msb = ((value >> 7) & 0x7F) as u8;
                vec![0xE0 | (channel & 0x0F), lsb, msb]
            }
        }
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiMessage::NoteOff { channel, .. }
            | MidiMessage::NoteOn { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }

    /// Note-on or note-off
    pub fn is_note(&self) -> bool {
        matches!(self, MidiMessage::NoteOn { .. } | MidiMessage::NoteOff { .. })
    }
}

impl fmt::Display for MidiMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            MidiMessage::NoteOff { channel, note, velocity } => {
                write!(f, "NoteOff ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::NoteOn { channel, note, velocity } => {
                write!(f, "NoteOn ch:{} n:{} v:{}", channel + 1, note, velocity)
            }
            MidiMessage::PolyPressure { channel, note, pressure } => {
                write!(f, "PolyPressure ch:{} n:{} p:{}", channel + 1, note, pressure)
            }
            MidiMessage::ControlChange { channel, cc, value } => {
                write!(f, "CC ch:{} cc:{} v:{}", channel + 1, cc, value)
            }
            MidiMessage::ProgramChange { channel, program } => {
                write!(f, "ProgramChange ch:{} p:{}", channel + 1, program)
            }
            MidiMessage::ChannelPressure { channel, pressure } => {
                write!(f, "ChannelPressure ch:{} p:{}", channel + 1, pressure)
            }
            MidiMessage::PitchBend { channel, value } => {
                write!(f, "PitchBend ch:{} v:{}", channel + 1, value)
            }
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a console-typed byte string such as `B0 07 40` or `b0,7,40`
pub fn parse_hex(text: &str) -> Option<Vec<u8>> {
    let bytes: Option<Vec<u8>> = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| u8::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        .collect();
    bytes.filter(|b| !b.is_empty())
}

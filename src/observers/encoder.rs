//! TransmissionEncoder - parameter changes to outboard frames

use std::sync::Arc;

use tracing::{trace, warn};

use crate::midi::{format_hex, MidiMessage};
use crate::parameter::{ChangeListener, ParamValue, Parameter, ParameterChange};
use crate::rack::ModuleRack;
use crate::transport::SharedTransport;

/// Encodes each change of a CC-addressable parameter as one Control-Change
/// frame `[0xB0 | channel, cc, value]` and writes it to the transport
pub struct TransmissionEncoder {
    channel: u8,
    transport: SharedTransport,
}

impl TransmissionEncoder {
    /// `channel` is the wire channel, 0-15
    pub fn new(channel: u8, transport: SharedTransport) -> Self {
        Self {
            channel: channel & 0x0F,
            transport,
        }
    }

    /// The frame for `value` of `parameter`, or none when it has no CC number
    pub fn encode(&self, parameter: &Parameter, value: ParamValue) -> Option<Vec<u8>> {
        let message = MidiMessage::ControlChange {
            channel: self.channel,
            cc: parameter.cc()?,
            value: parameter.domain().to_midi(value),
        };
        Some(message.encode())
    }

    /// Register one shared encoder on every CC-addressable parameter of the
    /// rack; returns how many parameters it now observes
    pub fn attach(self: &Arc<Self>, rack: &ModuleRack) -> usize {
        let mut attached = 0;
        for parameter in rack.parameters().filter(|p| p.cc().is_some()) {
            parameter.add_listener(self.clone());
            attached += 1;
        }
        attached
    }
}

impl ChangeListener for TransmissionEncoder {
    fn on_change(&self, change: &ParameterChange<'_>) {
        let Some(frame) = self.encode(change.parameter, change.new) else {
            return;
        };
        let mut transport = self.transport.lock();
        match transport.write(&frame) {
            Ok(()) => trace!("{} -> {}", change.parameter.qualified_name(), format_hex(&frame)),
            Err(e) => warn!(
                "⚠️  Dropped frame {} for {} on {}: {}",
                format_hex(&frame),
                change.parameter.qualified_name(),
                transport.name(),
                e
            ),
        }
    }
}

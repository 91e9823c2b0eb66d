//! MidiInputRouter - MIDI in, parameter writes and raw pass-through out
//!
//! Notes go straight to the transport and never touch a parameter. A
//! Control-Change claimed by a parameter becomes a parameter write; any other
//! CC and every other channel-voice message on our channel is forwarded raw,
//! since the outboard unit may have its own mapping for it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use midir::{Ignore, MidiInput, MidiInputConnection};
use tracing::{debug, info, warn};

use crate::midi::{format_hex, ports, MidiMessage};
use crate::rack::ModuleRack;
use crate::transport::SharedTransport;

/// What happened to one incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Note-on/off forwarded raw
    NoteForwarded,
    /// CC claimed by a parameter; `changed` is false when the value was
    /// already current
    Committed { parameter: String, changed: bool },
    /// Unclaimed CC or other channel-voice message forwarded raw
    PassedThrough,
    /// Forwarding failed, message dropped
    Dropped,
    /// Different channel
    OtherChannel,
    /// Not a channel-voice message
    Unparsable,
}

/// Per-router counters, readable from any thread
#[derive(Debug, Default)]
pub struct RouterStats {
    pub notes: AtomicU64,
    pub committed: AtomicU64,
    pub passed_through: AtomicU64,
    pub dropped: AtomicU64,
    pub ignored: AtomicU64,
}

impl RouterStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

pub struct MidiInputRouter {
    channel: u8,
    rack: Arc<ModuleRack>,
    transport: SharedTransport,
    stats: RouterStats,
}

impl MidiInputRouter {
    /// Router listening on wire channel `channel` (0-15)
    pub fn new(channel: u8, rack: Arc<ModuleRack>, transport: SharedTransport) -> Self {
        Self {
            channel: channel & 0x0F,
            rack,
            transport,
            stats: RouterStats::default(),
        }
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Route one raw message
    pub fn route(&self, data: &[u8]) -> RouteOutcome {
        let Some(message) = MidiMessage::parse(data) else {
            debug!("Ignoring non channel-voice MIDI: {}", format_hex(data));
            RouterStats::bump(&self.stats.ignored);
            return RouteOutcome::Unparsable;
        };
        if message.channel() != self.channel {
            RouterStats::bump(&self.stats.ignored);
            return RouteOutcome::OtherChannel;
        }

        if message.is_note() {
            return if self.forward(data) {
                RouterStats::bump(&self.stats.notes);
                RouteOutcome::NoteForwarded
            } else {
                RouteOutcome::Dropped
            };
        }

        match message {
            MidiMessage::ControlChange { cc, value, .. } => match self.rack.find_by_cc(cc) {
                Some(parameter) => {
                    let changed = parameter.set_from_midi(value);
                    debug!("📥 {} -> {} = {}", message, parameter.qualified_name(), parameter.formatted());
                    RouterStats::bump(&self.stats.committed);
                    RouteOutcome::Committed {
                        parameter: parameter.qualified_name(),
                        changed,
                    }
                }
                None => self.pass_through(data),
            },
            _ => self.pass_through(data),
        }
    }

    fn pass_through(&self, data: &[u8]) -> RouteOutcome {
        if self.forward(data) {
            RouterStats::bump(&self.stats.passed_through);
            RouteOutcome::PassedThrough
        } else {
            RouteOutcome::Dropped
        }
    }

    fn forward(&self, data: &[u8]) -> bool {
        let mut transport = self.transport.lock();
        match transport.write(data) {
            Ok(()) => true,
            Err(e) => {
                warn!("⚠️  Dropped {} on {}: {}", format_hex(data), transport.name(), e);
                RouterStats::bump(&self.stats.dropped);
                false
            }
        }
    }

    /// Feed the router from the first input port matching `pattern`
    ///
    /// A missing port or MIDI backend is reported and yields a source that
    /// never produces anything.
    pub fn connect(self: &Arc<Self>, pattern: &str) -> MidiInputSource {
        match self.try_connect(pattern) {
            Ok(source) => source,
            Err(reason) => {
                warn!("⚠️  MIDI input '{}' unavailable ({}), continuing without it", pattern, reason);
                MidiInputSource {
                    connection: None,
                    port_name: None,
                }
            }
        }
    }

    fn try_connect(self: &Arc<Self>, pattern: &str) -> std::result::Result<MidiInputSource, String> {
        let mut midi_in = MidiInput::new("Synth-Surface-In").map_err(|e| e.to_string())?;
        midi_in.ignore(Ignore::All);

        let (port, port_name) =
            ports::find_input_port(&midi_in, pattern).ok_or_else(|| "no matching port".to_string())?;

        let router = Arc::clone(self);
        let connection = midi_in
            .connect(
                &port,
                "synth-surface",
                move |_timestamp, data, _| {
                    router.route(data);
                },
                (),
            )
            .map_err(|e| e.to_string())?;

        info!("✅ MIDI input connected: {} (channel {})", port_name, self.channel + 1);
        Ok(MidiInputSource {
            connection: Some(connection),
            port_name: Some(port_name),
        })
    }
}

/// Live MIDI input connection; dropping it stops the callbacks
pub struct MidiInputSource {
    connection: Option<MidiInputConnection<()>>,
    port_name: Option<String>,
}

impl MidiInputSource {
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!("MIDI input closed");
        }
    }
}

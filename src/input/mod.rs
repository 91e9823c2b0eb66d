//! Input adapters: MIDI and the physical panel

pub mod controls;
pub mod midi_router;
pub mod scanner;

pub use controls::{ActionHandler, ControlBinding, ControlEvent, ControlInputAdapter, ControlOutcome};
pub use midi_router::{MidiInputRouter, MidiInputSource, RouteOutcome};
pub use scanner::{ControlScanner, EncoderPins, InputExpander, Mcp23017, ScannerHandle, SimulatedExpander};

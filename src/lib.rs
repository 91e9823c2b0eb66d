//! Synth Surface - control-surface coordinator for an analog synthesizer
//!
//! MIDI, panel buttons and encoders all write into one [`parameter::Parameter`]
//! per synth setting. Every effective change goes out to the sound unit as one
//! frame over a [`transport::Transport`] and is mirrored on the IS31FL3731 LED
//! matrix driven by [`led::RegisterPageDevice`].

pub mod config;
pub mod console;
pub mod context;
pub mod error;
pub mod input;
pub mod led;
pub mod midi;
pub mod observers;
pub mod parameter;
pub mod patch;
pub mod rack;
pub mod transport;
pub mod voices;

pub use error::{Result, SurfaceError};

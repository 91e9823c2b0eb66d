//! Change observers driving the outboard unit and the LED matrix

pub mod encoder;
pub mod led_sync;

pub use encoder::TransmissionEncoder;
pub use led_sync::{LedDisplay, LedSyncObserver};

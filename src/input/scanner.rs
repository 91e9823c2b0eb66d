//! ControlScanner - polls the panel's GPIO expander
//!
//! Buttons and encoders sit on MCP23017 inputs with pull-ups, so a pressed
//! button reads low. Each pass compares the pin levels with the previous
//! pass: button edges become `Pressed`/`Released`, encoder phase changes are
//! decoded as quadrature and become `Rotated` once a full detent has built up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use embedded_hal::i2c::{Error as _, I2c};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::controls::ControlEvent;
use crate::error::{Result, SurfaceError};

/// GPA0-7 are pins 0-7, GPB0-7 are pins 8-15
pub const PIN_COUNT: u8 = 16;

/// Quadrature transitions per mechanical detent
pub const STEPS_PER_DETENT: i32 = 4;

/// Source of raw pin levels
pub trait InputExpander: Send {
    /// Levels of all pins, bit n is pin n, 1 is high
    fn read_pins(&mut self) -> Result<u16>;
}

impl<E: InputExpander + ?Sized> InputExpander for Box<E> {
    fn read_pins(&mut self) -> Result<u16> {
        (**self).read_pins()
    }
}

// ============================================================================
// MCP23017
// ============================================================================

// IOCON.BANK = 0 layout, A and B registers interleaved
const IODIRA: u8 = 0x00;
const GPPUA: u8 = 0x0C;
const GPIOA: u8 = 0x12;

/// 16-bit I2C GPIO expander, every pin an input with its pull-up on
pub struct Mcp23017<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Mcp23017<I2C> {
    /// Configure both ports as pulled-up inputs
    pub fn new(mut i2c: I2C, address: u8) -> Result<Self> {
        for register in [IODIRA, GPPUA] {
            i2c.write(address, &[register, 0xFF, 0xFF]).map_err(|e| {
                SurfaceError::DeviceUnavailable {
                    device: format!("MCP23017 @0x{:02X}", address),
                    reason: format!("{:?}", e.kind()),
                }
            })?;
        }
        Ok(Self { i2c, address })
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl<I2C: I2c + Send> InputExpander for Mcp23017<I2C> {
    fn read_pins(&mut self) -> Result<u16> {
        let mut levels = [0u8; 2];
        self.i2c
            .write_read(self.address, &[GPIOA], &mut levels)
            .map_err(|e| {
                SurfaceError::BusFailure(format!("GPIO read @0x{:02X}: {:?}", self.address, e.kind()))
            })?;
        Ok(u16::from_le_bytes(levels))
    }
}

// ============================================================================
// Simulated expander
// ============================================================================

#[derive(Debug)]
struct SimulatedPins {
    levels: u16,
    offline: bool,
}

/// Expander whose pins are set by hand; clones share the same pins
#[derive(Debug, Clone)]
pub struct SimulatedExpander {
    pins: Arc<Mutex<SimulatedPins>>,
}

impl SimulatedExpander {
    /// All pins pulled high, nothing pressed
    pub fn new() -> Self {
        Self {
            pins: Arc::new(Mutex::new(SimulatedPins {
                levels: 0xFFFF,
                offline: false,
            })),
        }
    }

    pub fn set_level(&self, pin: u8, high: bool) {
        let mask = 1u16 << (pin % PIN_COUNT);
        let mut pins = self.pins.lock();
        if high {
            pins.levels |= mask;
        } else {
            pins.levels &= !mask;
        }
    }

    /// Pull a button pin low
    pub fn press(&self, pin: u8) {
        self.set_level(pin, false);
    }

    pub fn release(&self, pin: u8) {
        self.set_level(pin, true);
    }

    pub fn levels(&self) -> u16 {
        self.pins.lock().levels
    }

    /// Make every read fail, like an expander that stopped acknowledging
    pub fn set_offline(&self, offline: bool) {
        self.pins.lock().offline = offline;
    }
}

impl Default for SimulatedExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl InputExpander for SimulatedExpander {
    fn read_pins(&mut self) -> Result<u16> {
        let pins = self.pins.lock();
        if pins.offline {
            return Err(SurfaceError::BusFailure("simulated expander offline".to_string()));
        }
        Ok(pins.levels)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// The two phase pins of a rotary encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderPins {
    pub pin_a: u8,
    pub pin_b: u8,
}

/// Step for each (previous phase, current phase) pair, phase = A << 1 | B.
/// Clockwise runs 00 -> 10 -> 11 -> 01; a jump over a phase counts as noise.
const TRANSITIONS: [i32; 16] = [0, -1, 1, 0, 1, 0, 0, -1, -1, 0, 0, 1, 0, 1, -1, 0];

#[derive(Debug)]
struct EncoderState {
    control: String,
    pins: EncoderPins,
    phase: u8,
    steps: i32,
}

impl EncoderState {
    fn phase_of(&self, levels: u16) -> u8 {
        let a = (levels >> self.pins.pin_a) & 1;
        let b = (levels >> self.pins.pin_b) & 1;
        ((a << 1) | b) as u8
    }

    fn mask(&self) -> u16 {
        (1 << self.pins.pin_a) | (1 << self.pins.pin_b)
    }

    /// Whole detents completed by moving to `levels`
    fn update(&mut self, levels: u16) -> Option<i32> {
        let phase = self.phase_of(levels);
        self.steps += TRANSITIONS[((self.phase << 2) | phase) as usize];
        self.phase = phase;
        let detents = self.steps / STEPS_PER_DETENT;
        if detents == 0 {
            return None;
        }
        self.steps %= STEPS_PER_DETENT;
        Some(detents)
    }
}

/// Turns pin levels into control events
pub struct ControlScanner {
    expander: Box<dyn InputExpander>,
    buttons: Vec<(u8, String)>,
    encoders: Vec<EncoderState>,
    levels: Option<u16>,
}

impl ControlScanner {
    /// Pins must be below 16 and each pin may serve one control only
    pub fn new(
        expander: Box<dyn InputExpander>,
        buttons: &BTreeMap<u8, String>,
        encoders: &BTreeMap<String, EncoderPins>,
    ) -> Result<Self> {
        let mut owners: BTreeMap<u8, String> = BTreeMap::new();
        let mut claim = |pin: u8, control: &str| -> Result<()> {
            if pin >= PIN_COUNT {
                return Err(SurfaceError::ProgrammingError(format!(
                    "control '{}' uses pin {} (must be 0-{})",
                    control,
                    pin,
                    PIN_COUNT - 1
                )));
            }
            if let Some(owner) = owners.insert(pin, control.to_string()) {
                return Err(SurfaceError::ProgrammingError(format!(
                    "pin {} is wired to both '{}' and '{}'",
                    pin, owner, control
                )));
            }
            Ok(())
        };

        for (pin, control) in buttons {
            claim(*pin, control)?;
        }
        for (control, pins) in encoders {
            claim(pins.pin_a, control)?;
            claim(pins.pin_b, control)?;
        }

        Ok(Self {
            expander,
            buttons: buttons.iter().map(|(pin, control)| (*pin, control.clone())).collect(),
            encoders: encoders
                .iter()
                .map(|(control, pins)| EncoderState {
                    control: control.clone(),
                    pins: *pins,
                    phase: 0,
                    steps: 0,
                })
                .collect(),
            levels: None,
        })
    }

    /// Control names this scanner can report, sorted
    pub fn controls(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .buttons
            .iter()
            .map(|(_, control)| control.as_str())
            .chain(self.encoders.iter().map(|e| e.control.as_str()))
            .collect();
        names.sort_unstable();
        names
    }

    /// One pass over the expander
    ///
    /// The first successful pass only records the levels, so buttons held
    /// at start-up do not fire.
    pub fn scan(&mut self) -> Result<Vec<ControlEvent>> {
        let levels = self.expander.read_pins()?;
        let Some(previous) = self.levels.replace(levels) else {
            for encoder in &mut self.encoders {
                encoder.phase = encoder.phase_of(levels);
            }
            return Ok(Vec::new());
        };

        let changed = previous ^ levels;
        if changed == 0 {
            return Ok(Vec::new());
        }

        let mut events = Vec::new();
        for (pin, control) in &self.buttons {
            let mask = 1u16 << pin;
            if changed & mask == 0 {
                continue;
            }
            if levels & mask == 0 {
                events.push(ControlEvent::Pressed(control.clone()));
            } else {
                events.push(ControlEvent::Released(control.clone()));
            }
        }
        for encoder in &mut self.encoders {
            if changed & encoder.mask() == 0 {
                continue;
            }
            if let Some(detents) = encoder.update(levels) {
                events.push(ControlEvent::Rotated {
                    control: encoder.control.clone(),
                    detents,
                });
            }
        }
        Ok(events)
    }

    /// Poll every `interval` on a dedicated thread, feeding `events`
    ///
    /// The thread ends when the handle is stopped or dropped, or when the
    /// receiving side of `events` is gone.
    pub fn spawn(mut self, events: Sender<ControlEvent>, interval: Duration) -> std::io::Result<ScannerHandle> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);
        let thread = thread::Builder::new()
            .name("control-poll".to_string())
            .spawn(move || {
                info!(
                    "Control scanner started ({} buttons, {} encoders, every {:?})",
                    self.buttons.len(),
                    self.encoders.len(),
                    interval
                );
                let mut failing = false;
                'poll: loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    match self.scan() {
                        Ok(found) => {
                            if failing {
                                info!("Control scanner reading again");
                                failing = false;
                            }
                            for event in found {
                                debug!("🎛️  {:?}", event);
                                if events.send(event).is_err() {
                                    debug!("Control scan loop gone");
                                    break 'poll;
                                }
                            }
                        }
                        Err(e) => {
                            if !failing {
                                warn!("⚠️  Control scan failed: {}", e);
                                failing = true;
                            }
                        }
                    }
                }
                info!("Control scanner stopped");
            })?;

        Ok(ScannerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Running scanner thread
pub struct ScannerHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ScannerHandle {
    /// Stop polling and wait for the thread to finish
    pub fn stop(mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("⚠️  Control scanner thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner(expander: &SimulatedExpander) -> ControlScanner {
        let buttons: BTreeMap<u8, String> = [(0, "sync".to_string()), (9, "patch1".to_string())].into();
        let encoders: BTreeMap<String, EncoderPins> =
            [("cutoff".to_string(), EncoderPins { pin_a: 4, pin_b: 5 })].into();
        ControlScanner::new(Box::new(expander.clone()), &buttons, &encoders).unwrap()
    }

    /// Drive the encoder through one full quadrature cycle
    fn turn(expander: &SimulatedExpander, scanner: &mut ControlScanner, clockwise: bool) -> Vec<ControlEvent> {
        let mut phases = [(true, false), (true, true), (false, true), (false, false)];
        if !clockwise {
            phases = [(false, true), (true, true), (true, false), (false, false)];
        }
        let mut events = Vec::new();
        for (a, b) in phases {
            expander.set_level(4, a);
            expander.set_level(5, b);
            events.extend(scanner.scan().unwrap());
        }
        events
    }

    #[test]
    fn test_first_pass_only_records_levels() {
        let expander = SimulatedExpander::new();
        expander.press(0);
        let mut scanner = scanner(&expander);
        assert!(scanner.scan().unwrap().is_empty());
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn test_button_edges() {
        let expander = SimulatedExpander::new();
        let mut scanner = scanner(&expander);
        scanner.scan().unwrap();

        expander.press(9);
        assert_eq!(scanner.scan().unwrap(), vec![ControlEvent::Pressed("patch1".into())]);
        // held, no repeat
        assert!(scanner.scan().unwrap().is_empty());
        expander.release(9);
        assert_eq!(scanner.scan().unwrap(), vec![ControlEvent::Released("patch1".into())]);
    }

    #[test]
    fn test_unwired_pins_ignored() {
        let expander = SimulatedExpander::new();
        let mut scanner = scanner(&expander);
        scanner.scan().unwrap();
        expander.press(15);
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn test_quadrature_cycle_is_one_detent() {
        let expander = SimulatedExpander::new();
        expander.set_level(4, false);
        expander.set_level(5, false);
        let mut scanner = scanner(&expander);
        scanner.scan().unwrap();

        assert_eq!(
            turn(&expander, &mut scanner, true),
            vec![ControlEvent::Rotated { control: "cutoff".into(), detents: 1 }]
        );
        assert_eq!(
            turn(&expander, &mut scanner, false),
            vec![ControlEvent::Rotated { control: "cutoff".into(), detents: -1 }]
        );
    }

    #[test]
    fn test_half_turn_and_skipped_phase_emit_nothing() {
        let expander = SimulatedExpander::new();
        expander.set_level(4, false);
        expander.set_level(5, false);
        let mut scanner = scanner(&expander);
        scanner.scan().unwrap();

        expander.set_level(4, true);
        assert!(scanner.scan().unwrap().is_empty());
        // both pins flip at once: direction unknown
        expander.set_level(4, false);
        expander.set_level(5, true);
        assert!(scanner.scan().unwrap().is_empty());
    }

    #[test]
    fn test_pin_conflicts_rejected() {
        let expander = SimulatedExpander::new();
        let buttons: BTreeMap<u8, String> = [(4, "b".to_string())].into();
        let encoders: BTreeMap<String, EncoderPins> =
            [("e".to_string(), EncoderPins { pin_a: 4, pin_b: 5 })].into();
        assert!(matches!(
            ControlScanner::new(Box::new(expander.clone()), &buttons, &encoders),
            Err(SurfaceError::ProgrammingError(_))
        ));

        let high: BTreeMap<u8, String> = [(16, "b".to_string())].into();
        assert!(ControlScanner::new(Box::new(expander), &high, &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_offline_expander_is_a_bus_failure() {
        let expander = SimulatedExpander::new();
        let mut scanner = scanner(&expander);
        expander.set_offline(true);
        assert!(matches!(scanner.scan(), Err(SurfaceError::BusFailure(_))));
    }

    #[test]
    fn test_polling_thread_feeds_channel_and_stops() {
        let expander = SimulatedExpander::new();
        let scanner = scanner(&expander);
        assert_eq!(scanner.controls(), vec!["cutoff", "patch1", "sync"]);

        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = scanner.spawn(tx, Duration::from_millis(1)).unwrap();
        // let the baseline pass happen
        std::thread::sleep(Duration::from_millis(30));
        expander.press(0);

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ControlEvent::Pressed("sync".into()));
        handle.stop();
        // the thread's sender is gone once it has stopped
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_polling_thread_ends_when_receiver_dropped() {
        let expander = SimulatedExpander::new();
        let scanner = scanner(&expander);
        let (tx, rx) = crossbeam::channel::unbounded();
        let handle = scanner.spawn(tx, Duration::from_millis(1)).unwrap();
        drop(rx);
        std::thread::sleep(Duration::from_millis(30));
        expander.press(9);

        let thread = handle.thread.as_ref().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while !thread.is_finished() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(thread.is_finished());
        handle.stop();
    }
}

//! Raw register I/O for the LED driver
//!
//! [`RegisterBus`] is the single-byte read/write primitive the page protocol
//! is built on. Two backends: any blocking `embedded-hal` I2C bus, and a
//! simulated register file used by the simulator and the tests.

use std::sync::Arc;

use embedded_hal::i2c::{Error as _, I2c};
use parking_lot::Mutex;

use super::registers::{
    row_register, DeviceAddress, FrameRegister, FunctionRegister, Half, LedCoordinate, Page, COLS,
    COMMAND_REGISTER, FRAME_COUNT, FRAME_LAST_REGISTER, ROWS,
};
use crate::error::{Result, SurfaceError};

/// Byte-wide register access on the currently selected page
pub trait RegisterBus: Send {
    fn read_byte(&mut self, register: u8) -> Result<u8>;
    fn write_byte(&mut self, register: u8, value: u8) -> Result<()>;
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        (**self).read_byte(register)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        (**self).write_byte(register, value)
    }
}

// ============================================================================
// I2C
// ============================================================================

/// An `embedded-hal` I2C bus bound to one device address
pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> I2cRegisterBus<I2C> {
    pub fn new(i2c: I2C, address: DeviceAddress) -> Self {
        Self {
            i2c,
            address: address.value(),
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl<I2C: I2c + Send> RegisterBus for I2cRegisterBus<I2C> {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(|e| {
                SurfaceError::BusFailure(format!(
                    "read 0x{:02X} @0x{:02X}: {:?}",
                    register,
                    self.address,
                    e.kind()
                ))
            })?;
        Ok(buf[0])
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        self.i2c
            .write(self.address, &[register, value])
            .map_err(|e| {
                SurfaceError::BusFailure(format!(
                    "write 0x{:02X} @0x{:02X}: {:?}",
                    register,
                    self.address,
                    e.kind()
                ))
            })
    }
}

// ============================================================================
// Simulated register file
// ============================================================================

/// One register write as seen by the simulated device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusWrite {
    /// Page selected when the write happened (command-register writes
    /// report the page selected before them)
    pub page: Page,
    pub register: u8,
    pub value: u8,
}

const FRAME_REGISTERS: usize = FRAME_LAST_REGISTER as usize + 1;
const FUNCTION_REGISTERS: usize = 0x0D;

#[derive(Debug)]
struct MatrixMemory {
    selected: Page,
    frames: [[u8; FRAME_REGISTERS]; FRAME_COUNT as usize],
    function: [u8; FUNCTION_REGISTERS],
    writes: Option<Vec<BusWrite>>,
    offline: bool,
}

/// Register file that behaves like a powered-up IS31FL3731
///
/// Clones share the same memory, so a test can keep a handle after moving
/// the bus into the device. Writes are only recorded on a bus made with
/// [`SimulatedMatrixBus::with_write_log`].
#[derive(Debug, Clone)]
pub struct SimulatedMatrixBus {
    memory: Arc<Mutex<MatrixMemory>>,
}

impl SimulatedMatrixBus {
    pub fn new() -> Self {
        Self::with_log(None)
    }

    /// Also keep every write, in order, until [`clear_writes`](Self::clear_writes)
    pub fn with_write_log() -> Self {
        Self::with_log(Some(Vec::new()))
    }

    fn with_log(writes: Option<Vec<BusWrite>>) -> Self {
        Self {
            memory: Arc::new(Mutex::new(MatrixMemory {
                selected: Page::Frame(0),
                frames: [[0; FRAME_REGISTERS]; FRAME_COUNT as usize],
                function: [0; FUNCTION_REGISTERS],
                writes,
                offline: false,
            })),
        }
    }

    /// Make every access fail, like a device that stopped acknowledging
    pub fn set_offline(&self, offline: bool) {
        self.memory.lock().offline = offline;
    }

    pub fn selected_page(&self) -> Page {
        self.memory.lock().selected
    }

    /// Every recorded write, command-register writes included; always
    /// empty without a write log
    pub fn writes(&self) -> Vec<BusWrite> {
        self.memory.lock().writes.clone().unwrap_or_default()
    }

    pub fn clear_writes(&self) {
        if let Some(writes) = self.memory.lock().writes.as_mut() {
            writes.clear();
        }
    }

    pub fn function_register(&self, register: FunctionRegister) -> u8 {
        self.memory.lock().function[register.address() as usize]
    }

    pub fn frame_register(&self, frame: u8, register: u8) -> u8 {
        self.memory.lock().frames[(frame % FRAME_COUNT) as usize][register as usize]
    }

    /// Whether an LED is on in a frame
    pub fn led_on(&self, frame: u8, led: LedCoordinate) -> bool {
        let (register, mask) = led.onoff_address();
        self.frame_register(frame, register) & mask != 0
    }

    /// Text rendering of a frame, one line per row, A half then B half
    pub fn render_frame(&self, frame: u8) -> Vec<String> {
        let memory = self.memory.lock();
        let page = &memory.frames[(frame % FRAME_COUNT) as usize];
        (0..ROWS)
            .map(|row| {
                let mut line = String::new();
                for half in [Half::A, Half::B] {
                    let bits = page[row_register(FrameRegister::OnOff, row, half) as usize];
                    for col in 0..COLS {
                        line.push(if bits & (1 << col) != 0 { '●' } else { '·' });
                    }
                    line.push(' ');
                }
                line.trim_end().to_string()
            })
            .collect()
    }
}

impl Default for SimulatedMatrixBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MatrixMemory {
    fn cell(&mut self, register: u8) -> Result<&mut u8> {
        let invalid = || SurfaceError::BusFailure(format!("register 0x{:02X} does not exist", register));
        match self.selected {
            Page::Frame(n) => self.frames[n as usize]
                .get_mut(register as usize)
                .ok_or_else(invalid),
            Page::Function => self.function.get_mut(register as usize).ok_or_else(invalid),
        }
    }
}

impl RegisterBus for SimulatedMatrixBus {
    fn read_byte(&mut self, register: u8) -> Result<u8> {
        let mut memory = self.memory.lock();
        if memory.offline {
            return Err(SurfaceError::BusFailure("simulated device offline".to_string()));
        }
        if register == COMMAND_REGISTER {
            return Ok(memory.selected.command_value());
        }
        if memory.selected == Page::Function && register == FunctionRegister::FrameState.address() {
            // picture mode shows the PICTURE_DISPLAY frame
            let shown = memory.function[FunctionRegister::PictureDisplay.address() as usize];
            return Ok(shown % FRAME_COUNT);
        }
        memory.cell(register).map(|cell| *cell)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<()> {
        let mut memory = self.memory.lock();
        if memory.offline {
            return Err(SurfaceError::BusFailure("simulated device offline".to_string()));
        }
        let page = memory.selected;
        if register == COMMAND_REGISTER {
            memory.selected = Page::from_command_value(value).ok_or_else(|| {
                SurfaceError::BusFailure(format!("0x{:02X} is not a page", value))
            })?;
        } else {
            *memory.cell(register)? = value;
        }
        if let Some(writes) = memory.writes.as_mut() {
            writes.push(BusWrite {
                page,
                register,
                value,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pages_are_independent() {
        let mut bus = SimulatedMatrixBus::new();
        bus.write_byte(0x24, 0xAA).unwrap();
        bus.write_byte(COMMAND_REGISTER, 5).unwrap();
        bus.write_byte(0x24, 0x55).unwrap();

        assert_eq!(bus.frame_register(0, 0x24), 0xAA);
        assert_eq!(bus.frame_register(5, 0x24), 0x55);
        assert_eq!(bus.read_byte(COMMAND_REGISTER).unwrap(), 5);
    }

    #[test]
    fn test_function_page_range_checked() {
        let mut bus = SimulatedMatrixBus::new();
        bus.write_byte(COMMAND_REGISTER, 0x0B).unwrap();
        bus.write_byte(FunctionRegister::Shutdown.address(), 1).unwrap();
        assert_eq!(bus.function_register(FunctionRegister::Shutdown), 1);
        assert!(bus.write_byte(0x24, 1).is_err());
    }

    #[test]
    fn test_invalid_page_rejected() {
        let mut bus = SimulatedMatrixBus::new();
        assert!(matches!(
            bus.write_byte(COMMAND_REGISTER, 0x0C),
            Err(SurfaceError::BusFailure(_))
        ));
        assert_eq!(bus.selected_page(), Page::Frame(0));
    }

    #[test]
    fn test_offline_fails_everything() {
        let mut bus = SimulatedMatrixBus::with_write_log();
        bus.set_offline(true);
        assert!(bus.read_byte(COMMAND_REGISTER).is_err());
        assert!(bus.write_byte(0x00, 1).is_err());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn test_clones_share_memory() {
        let handle = SimulatedMatrixBus::with_write_log();
        let mut bus = handle.clone();
        bus.write_byte(0x00, 0b0000_0011).unwrap();

        assert!(handle.led_on(0, LedCoordinate::new(0, 1, Half::A).unwrap()));
        assert_eq!(handle.writes().len(), 1);
        assert_eq!(handle.render_frame(0)[0], "●●······ ········");
    }

    #[test]
    fn test_plain_bus_keeps_no_write_history() {
        let mut bus = SimulatedMatrixBus::new();
        for i in 0..1000u32 {
            bus.write_byte(0x00, i as u8).unwrap();
        }
        assert!(bus.writes().is_empty());
        assert!(bus.memory.lock().writes.is_none());
        assert_eq!(bus.frame_register(0, 0x00), 999u32 as u8);
    }
}

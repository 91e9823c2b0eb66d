//! IS31FL3731 LED matrix: register map, bus backends and the page protocol

pub mod bus;
pub mod device;
pub mod registers;

pub use bus::{BusWrite, I2cRegisterBus, RegisterBus, SimulatedMatrixBus};
pub use device::{DeviceSettings, RegisterPageDevice};
pub use registers::{DeviceAddress, DisplayMode, FunctionRegister, Half, LedCoordinate, Page};

/// The device type the rest of the application holds, bus erased
pub type LedMatrix = RegisterPageDevice<Box<dyn RegisterBus>>;

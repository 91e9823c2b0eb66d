//! IS31FL3731 register map and unit conversions
//!
//! All register addresses are relative to the page selected through the
//! command register. Frame pages hold per-LED content, the function page
//! holds device-wide configuration.

use crate::error::{Result, SurfaceError};

// ---------------------------------------------------------------------------
// Paging
// ---------------------------------------------------------------------------

/// Writing a page index here selects the page for all further accesses
pub const COMMAND_REGISTER: u8 = 0xFD;

/// Command-register value of the function page
pub const FUNCTION_PAGE: u8 = 0x0B;

pub const FRAME_COUNT: u8 = 8;
pub const ROWS: u8 = 9;
pub const COLS: u8 = 8;
pub const LED_COUNT: usize = 144;

/// One of the nine mutually exclusive register pages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Page {
    /// Animation frame 0-7
    Frame(u8),
    Function,
}

impl Page {
    /// Frame page, rejecting indices above 7
    pub fn frame(index: u8) -> Result<Self> {
        if index < FRAME_COUNT {
            Ok(Page::Frame(index))
        } else {
            Err(SurfaceError::InvalidFrame(index))
        }
    }

    /// Payload written to the command register to select this page
    pub const fn command_value(self) -> u8 {
        match self {
            Page::Frame(n) => n,
            Page::Function => FUNCTION_PAGE,
        }
    }

    /// Decode a command register read-back
    pub fn from_command_value(value: u8) -> Option<Self> {
        match value {
            FUNCTION_PAGE => Some(Page::Function),
            n if n < FRAME_COUNT => Some(Page::Frame(n)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Register identifiers
// ---------------------------------------------------------------------------

/// Function page registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRegister {
    /// Display mode (bits 4:3) and auto-play start frame (2:0)
    Config,
    /// Displayed frame in picture mode
    PictureDisplay,
    /// Auto-play loops (6:4) and frames (2:0)
    AutoPlay1,
    /// Auto-play frame delay
    AutoPlay2,
    DisplayOption,
    AudioSync,
    /// Read-only: frame currently shown
    FrameState,
    BreathCtrl1,
    BreathCtrl2,
    /// Software shutdown, 1 = normal operation
    Shutdown,
    Agc,
    AudioAdcRate,
}

impl FunctionRegister {
    pub const fn address(self) -> u8 {
        match self {
            FunctionRegister::Config => 0x00,
            FunctionRegister::PictureDisplay => 0x01,
            FunctionRegister::AutoPlay1 => 0x02,
            FunctionRegister::AutoPlay2 => 0x03,
            // 0x04 reserved
            FunctionRegister::DisplayOption => 0x05,
            FunctionRegister::AudioSync => 0x06,
            FunctionRegister::FrameState => 0x07,
            FunctionRegister::BreathCtrl1 => 0x08,
            FunctionRegister::BreathCtrl2 => 0x09,
            FunctionRegister::Shutdown => 0x0A,
            FunctionRegister::Agc => 0x0B,
            FunctionRegister::AudioAdcRate => 0x0C,
        }
    }
}

/// Register blocks of a frame page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRegister {
    /// 18 on/off registers, two per row (A then B)
    OnOff,
    /// 18 blink registers, same layout as on/off
    Blink,
    /// 144 PWM registers, one per LED
    Pwm,
}

impl FrameRegister {
    pub const fn base(self) -> u8 {
        match self {
            FrameRegister::OnOff => 0x00,
            FrameRegister::Blink => 0x12,
            FrameRegister::Pwm => 0x24,
        }
    }
}

/// Last register of a frame page
pub const FRAME_LAST_REGISTER: u8 = 0xB3;

/// I2C address, selected by what the AD pin is tied to
///
/// Written as the plain 7-bit address in configuration files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DeviceAddress {
    #[default]
    Gnd,
    Scl,
    Sda,
    Vcc,
}

impl DeviceAddress {
    pub const fn value(self) -> u8 {
        match self {
            DeviceAddress::Gnd => 0x74,
            DeviceAddress::Scl => 0x75,
            DeviceAddress::Sda => 0x76,
            DeviceAddress::Vcc => 0x77,
        }
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x74 => Ok(DeviceAddress::Gnd),
            0x75 => Ok(DeviceAddress::Scl),
            0x76 => Ok(DeviceAddress::Sda),
            0x77 => Ok(DeviceAddress::Vcc),
            other => Err(format!("LED driver address 0x{:02X} invalid (must be 0x74-0x77)", other)),
        }
    }
}

impl From<DeviceAddress> for u8 {
    fn from(address: DeviceAddress) -> Self {
        address.value()
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.value())
    }
}

/// Display modes of the configuration register
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    Picture,
    AutoPlay,
    AudioPlay,
}

impl DisplayMode {
    pub const fn bits(self) -> u8 {
        match self {
            DisplayMode::Picture => 0x00,
            DisplayMode::AutoPlay => 0x08,
            DisplayMode::AudioPlay => 0x10,
        }
    }
}

// ---------------------------------------------------------------------------
// LED coordinates
// ---------------------------------------------------------------------------

/// Which of the two 9x8 matrices an LED belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum Half {
    A,
    B,
}

impl Half {
    const fn offset(self) -> u8 {
        match self {
            Half::A => 0,
            Half::B => 1,
        }
    }
}

/// One of the 144 LEDs: row 0-8, column 0-7, half A or B
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LedCoordinate {
    row: u8,
    col: u8,
    half: Half,
}

impl LedCoordinate {
    pub fn new(row: u8, col: u8, half: Half) -> Result<Self> {
        if row >= ROWS || col >= COLS {
            return Err(SurfaceError::InvalidCoordinate { row, col });
        }
        Ok(Self { row, col, half })
    }

    pub fn row(&self) -> u8 {
        self.row
    }

    pub fn col(&self) -> u8 {
        self.col
    }

    pub fn half(&self) -> Half {
        self.half
    }

    /// All 144 LEDs, half A first, row-major
    pub fn all() -> impl Iterator<Item = LedCoordinate> {
        [Half::A, Half::B].into_iter().flat_map(|half| {
            (0..ROWS).flat_map(move |row| (0..COLS).map(move |col| LedCoordinate { row, col, half }))
        })
    }

    /// On/off register and bit mask
    pub fn onoff_address(&self) -> (u8, u8) {
        (row_register(FrameRegister::OnOff, self.row, self.half), 1 << self.col)
    }

    /// Blink register and bit mask
    pub fn blink_address(&self) -> (u8, u8) {
        (row_register(FrameRegister::Blink, self.row, self.half), 1 << self.col)
    }

    /// PWM intensity register
    pub fn pwm_address(&self) -> u8 {
        FrameRegister::Pwm.base() + 16 * self.row + self.col + 8 * self.half.offset()
    }

    /// Inverse of [`onoff_address`](Self::onoff_address)
    pub fn from_onoff_address(register: u8, mask: u8) -> Option<Self> {
        Self::from_row_address(FrameRegister::OnOff, register, mask)
    }

    /// Inverse of [`pwm_address`](Self::pwm_address)
    pub fn from_pwm_address(register: u8) -> Option<Self> {
        let offset = register.checked_sub(FrameRegister::Pwm.base())?;
        let row = offset / 16;
        let within = offset % 16;
        let half = if within < 8 { Half::A } else { Half::B };
        Self::new(row, within % 8, half).ok()
    }

    fn from_row_address(block: FrameRegister, register: u8, mask: u8) -> Option<Self> {
        if !mask.is_power_of_two() {
            return None;
        }
        let offset = register.checked_sub(block.base())?;
        let half = if offset % 2 == 0 { Half::A } else { Half::B };
        Self::new(offset / 2, mask.trailing_zeros() as u8, half).ok()
    }
}

/// On/off or blink register holding one row of a half
pub fn row_register(block: FrameRegister, row: u8, half: Half) -> u8 {
    block.base() + 2 * row + half.offset()
}

// ---------------------------------------------------------------------------
// Unit conversions
// ---------------------------------------------------------------------------

/// Auto-play frame delay time constant, in milliseconds
const FRAME_DELAY_TAU_MS: f64 = 11.0;

/// Blink period time constant, in seconds
const BLINK_TAU_SEC: f64 = 0.27;

/// Frame delay in 11 ms units
///
/// A raw 0 would mean 64 units, so it becomes 1. Anything above 63 units
/// becomes the 0 sentinel.
pub fn frame_delay_units(delay_ms: u32) -> u8 {
    let units = (delay_ms as f64 / FRAME_DELAY_TAU_MS).round() as u32;
    match units {
        0 => 1,
        1..=63 => units as u8,
        _ => 0,
    }
}

/// Blink period in 0.27 s units, 3 bits
pub fn blink_period_units(period_sec: f64) -> u8 {
    let units = (period_sec.max(0.0) / BLINK_TAU_SEC).round();
    units.min(7.0) as u8
}

/// AUTOPLAY1 payload; 0 means endless loops / all frames
pub fn autoplay_counts(loops: u8, frames: u8) -> u8 {
    ((loops % 8) << 4) | (frames % 8)
}

/// Audio gain in 3 dB steps, 0 - 21 dB
pub fn audio_gain_units(gain_db: i32) -> u8 {
    (gain_db / 3).clamp(0, 7) as u8
}

/// DISP_OPTION payload
pub fn display_option_bits(frame1_intensity_for_all: bool, blink: bool, blink_period_sec: f64) -> u8 {
    let mut value = blink_period_units(blink_period_sec);
    if blink {
        value |= 0x08;
    }
    if frame1_intensity_for_all {
        value |= 0x20;
    }
    value
}

/// AGC payload: enable bit 3, fast mode bit 4, gain 2:0
pub fn agc_bits(enable: bool, fast_mode: bool, gain_db: i32) -> u8 {
    let mut value = audio_gain_units(gain_db);
    if enable {
        value |= 1 << 3;
    }
    if fast_mode {
        value |= 1 << 4;
    }
    value
}

/// BREATH_CTRL1 and BREATH_CTRL2 payloads from 3-bit time codes
pub fn breath_bits(enable: bool, fade_out: u8, fade_in: u8, extinguish: u8) -> (u8, u8) {
    let ctrl1 = ((fade_out.min(7)) << 4) | fade_in.min(7);
    let mut ctrl2 = extinguish.min(7);
    if enable {
        ctrl2 |= 1 << 4;
    }
    (ctrl1, ctrl2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_page_command_values() {
        assert_eq!(Page::Function.command_value(), 0x0B);
        assert_eq!(Page::frame(3).unwrap().command_value(), 3);
        assert!(matches!(Page::frame(8), Err(SurfaceError::InvalidFrame(8))));
        assert_eq!(Page::from_command_value(0x0B), Some(Page::Function));
        assert_eq!(Page::from_command_value(7), Some(Page::Frame(7)));
        assert_eq!(Page::from_command_value(9), None);
    }

    #[test]
    fn test_device_address_from_strap_value() {
        assert_eq!(DeviceAddress::try_from(0x76), Ok(DeviceAddress::Sda));
        assert_eq!(u8::from(DeviceAddress::Vcc), 0x77);
        assert_eq!(DeviceAddress::default().value(), 0x74);
        assert!(DeviceAddress::try_from(0x20).is_err());
        assert_eq!(DeviceAddress::Scl.to_string(), "0x75");
    }

    #[test]
    fn test_known_addresses() {
        let led = LedCoordinate::new(2, 4, Half::B).unwrap();
        assert_eq!(led.onoff_address(), (0x05, 0x10));
        assert_eq!(led.blink_address(), (0x17, 0x10));
        assert_eq!(led.pwm_address(), 0x24 + 32 + 4 + 8);

        let last = LedCoordinate::new(8, 7, Half::B).unwrap();
        assert_eq!(last.pwm_address(), FRAME_LAST_REGISTER);
    }

    #[test]
    fn test_coordinate_bounds() {
        assert!(LedCoordinate::new(9, 0, Half::A).is_err());
        assert!(LedCoordinate::new(0, 8, Half::A).is_err());
        assert_eq!(LedCoordinate::all().count(), LED_COUNT);
    }

    #[test]
    fn test_addresses_injective_and_invertible() {
        let mut onoff = HashSet::new();
        let mut pwm = HashSet::new();
        for led in LedCoordinate::all() {
            assert!(onoff.insert(led.onoff_address()), "on/off alias at {:?}", led);
            assert!(pwm.insert(led.pwm_address()), "pwm alias at {:?}", led);

            let (reg, mask) = led.onoff_address();
            assert_eq!(LedCoordinate::from_onoff_address(reg, mask), Some(led));
            assert_eq!(LedCoordinate::from_pwm_address(led.pwm_address()), Some(led));
        }
        assert_eq!(pwm.len(), LED_COUNT);
        // PWM block occupies exactly 0x24..=0xB3
        assert_eq!(pwm.iter().min(), Some(&0x24));
        assert_eq!(pwm.iter().max(), Some(&FRAME_LAST_REGISTER));
    }

    #[test]
    fn test_inverse_rejects_foreign_addresses() {
        assert_eq!(LedCoordinate::from_onoff_address(0x12, 0x01), None);
        assert_eq!(LedCoordinate::from_onoff_address(0x00, 0x03), None);
        assert_eq!(LedCoordinate::from_pwm_address(0x23), None);
        assert_eq!(LedCoordinate::from_pwm_address(0xB4), None);
    }

    #[test]
    fn test_frame_delay_units() {
        assert_eq!(frame_delay_units(23), 2);
        assert_eq!(frame_delay_units(0), 1);
        assert_eq!(frame_delay_units(5), 1);
        assert_eq!(frame_delay_units(693), 63);
        assert_eq!(frame_delay_units(700), 0);
    }

    #[test]
    fn test_blink_and_gain_units() {
        assert_eq!(blink_period_units(0.27), 1);
        assert_eq!(blink_period_units(1.0), 4);
        assert_eq!(blink_period_units(10.0), 7);
        assert_eq!(blink_period_units(-1.0), 0);
        assert_eq!(audio_gain_units(9), 3);
        assert_eq!(audio_gain_units(-6), 0);
        assert_eq!(audio_gain_units(40), 7);
    }

    #[test]
    fn test_packed_payloads() {
        assert_eq!(autoplay_counts(1, 1), 0x11);
        assert_eq!(autoplay_counts(9, 8), 0x10);
        assert_eq!(display_option_bits(true, true, 1.0), 0x20 | 0x08 | 4);
        assert_eq!(agc_bits(true, false, 6), 0x08 | 2);
        assert_eq!(agc_bits(false, true, 0), 0x10);
        assert_eq!(breath_bits(false, 0, 0, 0), (0, 0));
        assert_eq!(breath_bits(true, 3, 2, 9), (0x32, 0x17));
    }
}

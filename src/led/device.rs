//! Paged-register protocol driver for the IS31FL3731 LED matrix
//!
//! The device has nine pages and exactly one is selected at any time. The
//! driver never caches which one: configuration writes read the command
//! register, hop to the function page, write, and hop back. That whole
//! sequence runs under the bus lock so two configuration calls never
//! interleave their page switches.
//!
//! LED content writes (on/off, blink, PWM) go to whatever frame page is
//! selected and do no save/restore; callers select the frame once and then
//! write in bulk.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::bus::RegisterBus;
use super::registers::{
    agc_bits, autoplay_counts, breath_bits, display_option_bits, frame_delay_units, row_register,
    DisplayMode, FrameRegister, FunctionRegister, Half, LedCoordinate, Page, COMMAND_REGISTER,
    FRAME_COUNT, ROWS,
};
use crate::error::{Result, SurfaceError};

/// Configuration applied at bring-up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub display_mode: DisplayMode,
    /// Start frame for auto-play, displayed frame for picture mode
    pub start_frame: u8,
    pub autoplay_loops: u8,
    pub autoplay_frames: u8,
    pub frame_delay_ms: u32,
    pub frame1_intensity_for_all: bool,
    pub blink: bool,
    pub blink_period_sec: f64,
    pub audio_sync: bool,
    pub breathing: bool,
    pub breath_fade_in: u8,
    pub breath_fade_out: u8,
    pub breath_extinguish: u8,
    pub agc: bool,
    pub agc_fast_mode: bool,
    pub audio_gain_db: i32,
    /// ADC sample period in 46 µs units; 0 means 256
    pub audio_sample_rate: u8,
    /// PWM level written to every LED of frame 0; none leaves PWM untouched
    pub intensity: Option<u8>,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Picture,
            start_frame: 0,
            autoplay_loops: 1,
            autoplay_frames: 1,
            frame_delay_ms: 23,
            frame1_intensity_for_all: false,
            blink: false,
            blink_period_sec: 0.0,
            audio_sync: false,
            breathing: false,
            breath_fade_in: 0,
            breath_fade_out: 0,
            breath_extinguish: 0,
            agc: false,
            agc_fast_mode: false,
            audio_gain_db: 0,
            audio_sample_rate: 14,
            intensity: None,
        }
    }
}

/// Driver for one IS31FL3731 behind a [`RegisterBus`]
pub struct RegisterPageDevice<B: RegisterBus> {
    bus: Mutex<B>,
}

impl<B: RegisterBus> RegisterPageDevice<B> {
    /// Wrap a bus without touching the device
    pub fn new(bus: B) -> Self {
        Self {
            bus: Mutex::new(bus),
        }
    }

    /// Run the bring-up sequence and return a ready device
    ///
    /// Any bus failure aborts bring-up with `DeviceUnavailable`; the caller
    /// decides what degraded mode to fall back to. No retry.
    pub fn bring_up(bus: B, settings: &DeviceSettings) -> Result<Self> {
        Page::frame(settings.start_frame)?;
        let device = Self::new(bus);
        match device.apply_settings(settings) {
            Ok(()) => {
                info!("✅ LED matrix ready ({:?} mode)", settings.display_mode);
                Ok(device)
            }
            Err(e) if !e.is_hardware_absence() => Err(e),
            Err(e) => {
                warn!("⚠️  LED matrix bring-up failed: {}", e);
                Err(SurfaceError::DeviceUnavailable {
                    device: "IS31FL3731".to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn apply_settings(&self, s: &DeviceSettings) -> Result<()> {
        self.select_function_page()?;
        self.set_display_mode(s.display_mode, s.start_frame)?;
        self.set_displayed_frame(s.start_frame)?;
        self.set_autoplay_looping(s.autoplay_loops, s.autoplay_frames)?;
        self.set_autoplay_delay(s.frame_delay_ms)?;
        self.set_display_options(s.frame1_intensity_for_all, s.blink, s.blink_period_sec)?;
        self.set_audio_sync(s.audio_sync)?;
        self.set_breath_control(s.breathing, s.breath_fade_out, s.breath_fade_in, s.breath_extinguish)?;
        self.set_shutdown(false)?;
        self.set_auto_gain_control(s.agc, s.agc_fast_mode, s.audio_gain_db)?;
        self.set_audio_sample_rate(s.audio_sample_rate)?;
        self.select_frame_page(0)?;
        if let Some(level) = s.intensity {
            self.fill_pwm(level)?;
        }
        Ok(())
    }

    // ========================================================================
    // Paging
    // ========================================================================

    pub fn select_function_page(&self) -> Result<()> {
        self.bus
            .lock()
            .write_byte(COMMAND_REGISTER, Page::Function.command_value())
    }

    /// Select frame page `frame` (0-7) for subsequent content writes
    pub fn select_frame_page(&self, frame: u8) -> Result<()> {
        let page = Page::frame(frame)?;
        self.bus.lock().write_byte(COMMAND_REGISTER, page.command_value())
    }

    /// Page currently selected on the device (read back, not cached)
    pub fn current_page(&self) -> Result<Page> {
        let mut bus = self.bus.lock();
        read_page(&mut *bus)
    }

    /// Write one function register, leaving the selected page as it was
    pub fn configure(&self, register: FunctionRegister, value: u8) -> Result<()> {
        let mut bus = self.bus.lock();
        with_function_page(&mut *bus, |bus| bus.write_byte(register.address(), value))?;
        debug!("Configured {:?} = 0x{:02X}", register, value);
        Ok(())
    }

    /// Read one function register, leaving the selected page as it was
    pub fn read_function_register(&self, register: FunctionRegister) -> Result<u8> {
        let mut bus = self.bus.lock();
        with_function_page(&mut *bus, |bus| bus.read_byte(register.address()))
    }

    /// Index of the frame currently shown
    pub fn read_frame_state(&self) -> Result<u8> {
        Ok(self.read_function_register(FunctionRegister::FrameState)? % FRAME_COUNT)
    }

    // ========================================================================
    // Function page settings
    // ========================================================================

    /// Display mode; `start_frame` is where auto-play starts
    pub fn set_display_mode(&self, mode: DisplayMode, start_frame: u8) -> Result<()> {
        self.configure(FunctionRegister::Config, mode.bits() | (start_frame % FRAME_COUNT))
    }

    /// Frame shown in picture mode
    pub fn set_displayed_frame(&self, frame: u8) -> Result<()> {
        self.configure(FunctionRegister::PictureDisplay, frame % FRAME_COUNT)
    }

    /// Auto-play loop and frame counts, 0 meaning endless / all frames
    pub fn set_autoplay_looping(&self, loops: u8, frames: u8) -> Result<()> {
        self.configure(FunctionRegister::AutoPlay1, autoplay_counts(loops, frames))
    }

    pub fn set_autoplay_delay(&self, delay_ms: u32) -> Result<()> {
        self.configure(FunctionRegister::AutoPlay2, frame_delay_units(delay_ms))
    }

    pub fn set_display_options(
        &self,
        frame1_intensity_for_all: bool,
        blink: bool,
        blink_period_sec: f64,
    ) -> Result<()> {
        self.configure(
            FunctionRegister::DisplayOption,
            display_option_bits(frame1_intensity_for_all, blink, blink_period_sec),
        )
    }

    /// Let the audio input modulate matrix intensity
    pub fn set_audio_sync(&self, enable: bool) -> Result<()> {
        self.configure(FunctionRegister::AudioSync, enable as u8)
    }

    /// Breathing, with fade and extinguish times as 3-bit codes
    pub fn set_breath_control(
        &self,
        enable: bool,
        fade_out: u8,
        fade_in: u8,
        extinguish: u8,
    ) -> Result<()> {
        let (ctrl1, ctrl2) = breath_bits(enable, fade_out, fade_in, extinguish);
        self.configure(FunctionRegister::BreathCtrl1, ctrl1)?;
        self.configure(FunctionRegister::BreathCtrl2, ctrl2)
    }

    /// Software shutdown; `false` puts the device in normal operation
    pub fn set_shutdown(&self, shutdown: bool) -> Result<()> {
        self.configure(FunctionRegister::Shutdown, if shutdown { 0x00 } else { 0x01 })
    }

    pub fn set_auto_gain_control(&self, enable: bool, fast_mode: bool, gain_db: i32) -> Result<()> {
        self.configure(FunctionRegister::Agc, agc_bits(enable, fast_mode, gain_db))
    }

    pub fn set_audio_sample_rate(&self, rate: u8) -> Result<()> {
        self.configure(FunctionRegister::AudioAdcRate, rate)
    }

    // ========================================================================
    // Frame content (selected page, no save/restore)
    // ========================================================================

    pub fn switch_led(&self, led: LedCoordinate, on: bool) -> Result<()> {
        let (register, mask) = led.onoff_address();
        self.update_bits(register, mask, on)
    }

    /// Write a whole row of one half; bit n is column n
    pub fn switch_led_row(&self, row: u8, half: Half, bits: u8) -> Result<()> {
        if row >= ROWS {
            return Err(SurfaceError::InvalidCoordinate { row, col: 0 });
        }
        self.bus
            .lock()
            .write_byte(row_register(FrameRegister::OnOff, row, half), bits)
    }

    /// Blinking only shows when enabled in the display options
    pub fn set_led_blink(&self, led: LedCoordinate, blink: bool) -> Result<()> {
        let (register, mask) = led.blink_address();
        self.update_bits(register, mask, blink)
    }

    pub fn set_led_pwm(&self, led: LedCoordinate, pwm: u8) -> Result<()> {
        self.bus.lock().write_byte(led.pwm_address(), pwm)
    }

    /// Same PWM level for every LED of the selected frame
    pub fn fill_pwm(&self, pwm: u8) -> Result<()> {
        let mut bus = self.bus.lock();
        for led in LedCoordinate::all() {
            bus.write_byte(led.pwm_address(), pwm)?;
        }
        Ok(())
    }

    /// All LEDs of the selected frame off, blink cleared
    pub fn clear_frame(&self) -> Result<()> {
        let mut bus = self.bus.lock();
        for block in [FrameRegister::OnOff, FrameRegister::Blink] {
            for row in 0..ROWS {
                for half in [Half::A, Half::B] {
                    bus.write_byte(row_register(block, row, half), 0)?;
                }
            }
        }
        Ok(())
    }

    // Read-modify-write under one lock so concurrent LED updates to the
    // same row do not lose bits.
    fn update_bits(&self, register: u8, mask: u8, set: bool) -> Result<()> {
        let mut bus = self.bus.lock();
        let old = bus.read_byte(register)?;
        let new = if set { old | mask } else { old & !mask };
        if new != old {
            bus.write_byte(register, new)?;
        }
        Ok(())
    }
}

fn read_page<B: RegisterBus + ?Sized>(bus: &mut B) -> Result<Page> {
    let raw = bus.read_byte(COMMAND_REGISTER)?;
    Page::from_command_value(raw)
        .ok_or_else(|| SurfaceError::BusFailure(format!("command register reads 0x{:02X}", raw)))
}

/// Run `op` on the function page and restore the previously selected page
fn with_function_page<B, T, F>(bus: &mut B, op: F) -> Result<T>
where
    B: RegisterBus + ?Sized,
    F: FnOnce(&mut B) -> Result<T>,
{
    let previous = read_page(bus)?;
    if previous != Page::Function {
        bus.write_byte(COMMAND_REGISTER, Page::Function.command_value())?;
    }

    let result = op(bus);

    if previous != Page::Function {
        bus.write_byte(COMMAND_REGISTER, previous.command_value())?;
    }
    result
}

//! Configuration for the synth surface
//!
//! One YAML file, every section optional. Checks that need the parameter
//! rack (binding targets, patch entries) happen when the hardware context is
//! built; `validate` covers everything that can be checked standalone.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio::fs;

use crate::input::scanner::{EncoderPins, PIN_COUNT};
use crate::input::ControlBinding;
use crate::led::registers::{DeviceAddress, FRAME_COUNT, ROWS};
use crate::led::DeviceSettings;
use crate::observers::LedDisplay;
use crate::patch::Patch;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub midi: MidiConfig,
    pub transport: TransportConfig,
    pub led: LedConfig,
    pub scanner: ScannerConfig,
    /// Physical control name -> what it does
    pub controls: HashMap<String, ControlBinding>,
    /// `module.name` -> how it is drawn on the matrix
    pub led_bindings: BTreeMap<String, LedDisplay>,
    /// Patch name -> values
    pub patches: BTreeMap<String, Patch>,
}

/// MIDI input configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MidiConfig {
    /// Case-insensitive substring of the input port name; empty disables MIDI in
    #[serde(default)]
    pub input_port: String,
    /// Channel 1-16, used for input filtering and outboard frames
    #[serde(default = "default_channel")]
    pub channel: u8,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            input_port: String::new(),
            channel: default_channel(),
        }
    }
}

impl MidiConfig {
    /// Channel as it appears in status bytes (0-15)
    pub fn wire_channel(&self) -> u8 {
        self.channel.saturating_sub(1) & 0x0F
    }
}

/// Link to the outboard sound unit
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Log frames only
    Debug,
    /// UART device node, line settings configured outside. An empty or
    /// missing device falls back to the first `ttyUSB*`/`ttyACM*` node.
    Serial {
        #[serde(default)]
        device: String,
        /// Where to look for USB serial adapters
        #[serde(default = "default_scan_dir")]
        scan_dir: String,
    },
    /// spidev node, e.g. `/dev/spidev0.0`
    Spi {
        device: String,
        #[serde(default = "default_spi_speed")]
        speed_hz: u32,
    },
    /// MIDI output port (substring match)
    Midi { output_port: String },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Debug
    }
}

/// LED matrix driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bus: LedBusConfig,
    /// Settings applied at bring-up
    #[serde(default)]
    pub settings: DeviceSettings,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bus: LedBusConfig::default(),
            settings: DeviceSettings::default(),
        }
    }
}

/// Where the LED driver's registers live
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedBusConfig {
    /// In-process register file
    Simulated,
    /// Linux I2C character device, e.g. `/dev/i2c-1`
    I2c {
        device: String,
        /// 0x74-0x77, following the AD strap
        #[serde(default)]
        address: DeviceAddress,
    },
}

impl Default for LedBusConfig {
    fn default() -> Self {
        LedBusConfig::Simulated
    }
}

/// Panel scanner: buttons and encoders on an MCP23017
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ScannerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub bus: ExpanderBusConfig,
    /// Expander pin (0-15) -> button control name
    #[serde(default)]
    pub buttons: BTreeMap<u8, String>,
    /// Encoder control name -> its two phase pins
    #[serde(default)]
    pub encoders: BTreeMap<String, EncoderPins>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval(),
            bus: ExpanderBusConfig::default(),
            buttons: BTreeMap::new(),
            encoders: BTreeMap::new(),
        }
    }
}

impl ScannerConfig {
    /// Whether anything is wired to the expander
    pub fn has_controls(&self) -> bool {
        !self.buttons.is_empty() || !self.encoders.is_empty()
    }
}

/// Where the GPIO expander lives
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ExpanderBusConfig {
    /// Pins set from the console
    #[default]
    Simulated,
    /// Linux I2C character device
    I2c {
        device: String,
        #[serde(default = "default_expander_address")]
        address: u8,
    },
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&contents)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Parse and validate YAML text
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: AppConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.midi.channel) {
            anyhow::bail!("MIDI channel {} out of range (must be 1-16)", self.midi.channel);
        }

        match &self.transport {
            TransportConfig::Spi { device, .. } if device.trim().is_empty() => {
                anyhow::bail!("SPI transport requires a device path");
            }
            TransportConfig::Spi { speed_hz: 0, .. } => {
                anyhow::bail!("SPI transport speed_hz must be above 0");
            }
            TransportConfig::Midi { output_port } if output_port.trim().is_empty() => {
                anyhow::bail!("MIDI transport requires an output_port pattern");
            }
            _ => {}
        }

        if let LedBusConfig::I2c { device, .. } = &self.led.bus {
            if device.trim().is_empty() {
                anyhow::bail!("I2C LED bus requires a device path");
            }
        }
        if self.led.settings.start_frame >= FRAME_COUNT {
            anyhow::bail!(
                "LED start_frame {} out of range (must be 0-7)",
                self.led.settings.start_frame
            );
        }

        if self.scanner.poll_interval_ms == 0 {
            anyhow::bail!("Scanner poll_interval_ms must be above 0");
        }
        if let ExpanderBusConfig::I2c { device, address } = &self.scanner.bus {
            if device.trim().is_empty() {
                anyhow::bail!("I2C expander bus requires a device path");
            }
            if !(0x20..=0x27).contains(address) {
                anyhow::bail!("Expander address 0x{:02X} invalid (must be 0x20-0x27)", address);
            }
        }
        let pins = self
            .scanner
            .buttons
            .keys()
            .copied()
            .chain(self.scanner.encoders.values().flat_map(|e| [e.pin_a, e.pin_b]));
        let mut used = 0u32;
        for pin in pins {
            if pin >= PIN_COUNT {
                anyhow::bail!("Scanner pin {} out of range (must be 0-{})", pin, PIN_COUNT - 1);
            }
            if used & (1 << pin) != 0 {
                anyhow::bail!("Scanner pin {} is wired to more than one control", pin);
            }
            used |= 1 << pin;
        }

        for (parameter, display) in &self.led_bindings {
            if !parameter.contains('.') {
                anyhow::bail!("LED binding '{}' must name a parameter as module.name", parameter);
            }
            if display.row() >= ROWS {
                anyhow::bail!(
                    "LED binding '{}' uses row {} (must be 0-{})",
                    parameter,
                    display.row(),
                    ROWS - 1
                );
            }
        }

        for (control, binding) in &self.controls {
            if control.trim().is_empty() {
                anyhow::bail!("Control name cannot be empty");
            }
            match binding {
                ControlBinding::Toggle { parameter } | ControlBinding::Step { parameter }
                    if parameter.trim().is_empty() =>
                {
                    anyhow::bail!("Control '{}' is bound to an empty parameter name", control);
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Serialize back to YAML (for `--dump`)
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }
}

// Default value functions
fn default_channel() -> u8 { 1 }
fn default_true() -> bool { true }
fn default_spi_speed() -> u32 { 500_000 }
fn default_scan_dir() -> String { "/dev".to_string() }
fn default_poll_interval() -> u64 { 2 }
fn default_expander_address() -> u8 { 0x20 }

//! HardwareContext - everything the application talks to, built once
//!
//! Construction opens the transport, the LED driver and the panel expander,
//! attaches the observers and resolves every binding. A missing device never
//! aborts start-up: the transport falls back to the debug sink, the LED
//! matrix or the panel is left out, and each is recorded as degraded. Bad
//! bindings, patches and settings are wiring bugs and do fail.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{AppConfig, ExpanderBusConfig, LedBusConfig, ScannerConfig, TransportConfig};
use crate::error::{Result, SurfaceError};
use crate::input::scanner::{ControlScanner, InputExpander, SimulatedExpander};
use crate::input::{ActionHandler, ControlBinding, ControlInputAdapter, MidiInputRouter};
use crate::led::registers::DeviceAddress;
use crate::led::{LedMatrix, RegisterBus, RegisterPageDevice, SimulatedMatrixBus};
use crate::observers::{LedSyncObserver, TransmissionEncoder};
use crate::patch::{self, Patch};
use crate::rack::ModuleRack;
use crate::transport::{shared, DebugTransport, MidiOutTransport, SerialTransport, SharedTransport};
use crate::voices;

/// A subsystem that came up in a reduced form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degraded {
    pub subsystem: &'static str,
    pub reason: String,
}

pub struct HardwareContext {
    rack: Arc<ModuleRack>,
    transport: SharedTransport,
    led: Option<Arc<LedMatrix>>,
    simulated_led: Option<SimulatedMatrixBus>,
    router: Arc<MidiInputRouter>,
    controls: Arc<ControlInputAdapter>,
    patches: Arc<BTreeMap<String, Patch>>,
    scanner: Mutex<Option<ControlScanner>>,
    panel: Option<&'static str>,
    simulated_panel: Option<SimulatedExpander>,
    degraded: Vec<Degraded>,
}

impl HardwareContext {
    /// Open the configured devices; `simulator` forces the debug transport,
    /// the simulated LED bus and the simulated panel
    pub fn build(config: &AppConfig, simulator: bool) -> Result<Self> {
        let mut degraded = Vec::new();

        let transport = open_transport(&config.transport, simulator, &mut degraded)?;

        let mut simulated_led = None;
        let led_bus: Option<Box<dyn RegisterBus>> = if !config.led.enabled {
            info!("LED matrix disabled in config");
            None
        } else if simulator || config.led.bus == LedBusConfig::Simulated {
            let bus = SimulatedMatrixBus::new();
            simulated_led = Some(bus.clone());
            Some(Box::new(bus))
        } else {
            match &config.led.bus {
                LedBusConfig::I2c { device, address } => {
                    absent_is_degraded(open_i2c(device, *address), "led", &mut degraded)?
                }
                LedBusConfig::Simulated => None,
            }
        };

        let mut context = Self::from_parts(config, transport, led_bus)?;
        context.simulated_led = simulated_led;

        let scanner = &config.scanner;
        if !scanner.enabled || !scanner.has_controls() {
            info!("No panel controls configured");
        } else if simulator || scanner.bus == ExpanderBusConfig::Simulated {
            let expander = SimulatedExpander::new();
            context.attach_panel(scanner, Box::new(expander.clone()), "simulated")?;
            context.simulated_panel = Some(expander);
        } else if let ExpanderBusConfig::I2c { device, address } = &scanner.bus {
            if let Some(expander) = absent_is_degraded(open_expander(device, *address), "scanner", &mut degraded)? {
                context.attach_panel(scanner, expander, "hardware")?;
            }
        }

        degraded.append(&mut context.degraded);
        context.degraded = degraded;
        Ok(context)
    }

    /// Assemble around an already opened transport and LED bus
    pub fn from_parts(
        config: &AppConfig,
        transport: SharedTransport,
        led_bus: Option<Box<dyn RegisterBus>>,
    ) -> Result<Self> {
        let mut degraded = Vec::new();
        let rack = Arc::new(voices::standard_rack()?);

        for (name, values) in &config.patches {
            patch::check(&rack, name, values)?;
        }
        let patches = Arc::new(config.patches.clone());

        let led = match led_bus {
            Some(bus) => absent_is_degraded(
                RegisterPageDevice::bring_up(bus, &config.led.settings),
                "led",
                &mut degraded,
            )?
            .map(Arc::new),
            None => None,
        };

        let channel = config.midi.wire_channel();
        let encoder = Arc::new(TransmissionEncoder::new(channel, transport.clone()));
        let observed = encoder.attach(&rack);
        info!("📤 Encoder attached to {} parameters (channel {})", observed, channel + 1);

        for (path, display) in &config.led_bindings {
            let parameter = rack.lookup(path).ok_or_else(|| {
                SurfaceError::ProgrammingError(format!("LED binding for unknown parameter '{}'", path))
            })?;
            if let Some(device) = &led {
                LedSyncObserver::attach(device.clone(), *display, parameter);
            }
        }

        let router = Arc::new(MidiInputRouter::new(channel, rack.clone(), transport.clone()));

        let handler = patch_recall(rack.clone(), patches.clone());
        let controls = Arc::new(ControlInputAdapter::new(&rack, &config.controls, handler)?);
        for control in controls.controls() {
            if let Some(ControlBinding::Fire { action }) = config.controls.get(control) {
                let action = action.as_deref().unwrap_or(control);
                if !patches.contains_key(action) {
                    warn!("⚠️  Control '{}' fires '{}', which is not a patch", control, action);
                }
            }
        }

        Ok(Self {
            rack,
            transport,
            led,
            simulated_led: None,
            router,
            controls,
            patches,
            scanner: Mutex::new(None),
            panel: None,
            simulated_panel: None,
            degraded,
        })
    }

    /// Wire the panel's pins to control names; the scanner waits for
    /// [`take_scanner`](Self::take_scanner)
    pub fn attach_panel(
        &mut self,
        config: &ScannerConfig,
        expander: Box<dyn InputExpander>,
        kind: &'static str,
    ) -> Result<()> {
        let scanner = ControlScanner::new(expander, &config.buttons, &config.encoders)?;
        for control in scanner.controls() {
            if !self.controls.is_bound(control) {
                warn!("⚠️  Panel control '{}' has no binding and will be ignored", control);
            }
        }
        info!("🎛️  Panel ready ({}): {}", kind, scanner.controls().join(", "));
        *self.scanner.lock() = Some(scanner);
        self.panel = Some(kind);
        Ok(())
    }

    /// The panel scanner, once; the caller starts its polling thread
    pub fn take_scanner(&self) -> Option<ControlScanner> {
        self.scanner.lock().take()
    }

    pub fn rack(&self) -> &Arc<ModuleRack> {
        &self.rack
    }

    pub fn transport(&self) -> &SharedTransport {
        &self.transport
    }

    pub fn led(&self) -> Option<&Arc<LedMatrix>> {
        self.led.as_ref()
    }

    /// Register file of the simulated LED bus, when that is what drives the matrix
    pub fn simulated_led(&self) -> Option<&SimulatedMatrixBus> {
        self.simulated_led.as_ref()
    }

    /// Pin levels of the simulated panel, when that is what the scanner reads
    pub fn simulated_panel(&self) -> Option<&SimulatedExpander> {
        self.simulated_panel.as_ref()
    }

    pub fn router(&self) -> &Arc<MidiInputRouter> {
        &self.router
    }

    pub fn controls(&self) -> &Arc<ControlInputAdapter> {
        &self.controls
    }

    pub fn patch_names(&self) -> Vec<&str> {
        self.patches.keys().map(String::as_str).collect()
    }

    /// Apply a configured patch; false when no patch has that name
    pub fn recall(&self, name: &str) -> bool {
        match self.patches.get(name) {
            Some(values) => {
                patch::apply(&self.rack, name, values);
                true
            }
            None => false,
        }
    }

    pub fn degraded(&self) -> &[Degraded] {
        &self.degraded
    }

    /// One line per subsystem, for the console
    pub fn status(&self) -> Vec<String> {
        let mut lines = vec![
            format!("transport: {}", self.transport.lock().name()),
            format!(
                "led: {}",
                match (&self.led, &self.simulated_led) {
                    (Some(_), Some(_)) => "simulated",
                    (Some(_), None) => "hardware",
                    (None, _) => "absent",
                }
            ),
            format!("panel: {}", self.panel.unwrap_or("absent")),
            format!("midi channel: {}", self.router.channel() + 1),
            format!("parameters: {}", self.rack.len()),
            format!("patches: {}", self.patches.len()),
        ];
        for d in &self.degraded {
            lines.push(format!("degraded {}: {}", d.subsystem, d.reason));
        }
        lines
    }

    /// Blank the matrix and close the transport
    pub fn shutdown(&self) {
        if let Some(led) = &self.led {
            if let Err(e) = led.clear_frame().and_then(|_| led.set_shutdown(true)) {
                warn!("⚠️  LED matrix shutdown failed: {}", e);
            }
        }
        self.transport.lock().close();
        info!("Hardware context closed");
    }
}

/// Missing hardware becomes a degraded entry; other errors pass through
fn absent_is_degraded<T>(
    opened: Result<T>,
    subsystem: &'static str,
    degraded: &mut Vec<Degraded>,
) -> Result<Option<T>> {
    match opened {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_hardware_absence() => {
            warn!("⚠️  {} unavailable: {}", subsystem, e);
            degraded.push(Degraded {
                subsystem,
                reason: e.to_string(),
            });
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn patch_recall(rack: Arc<ModuleRack>, patches: Arc<BTreeMap<String, Patch>>) -> Arc<dyn ActionHandler> {
    Arc::new(move |action: &str| match patches.get(action) {
        Some(values) => {
            patch::apply(&rack, action, values);
        }
        None => warn!("⚠️  No patch named '{}'", action),
    })
}

fn open_transport(
    config: &TransportConfig,
    simulator: bool,
    degraded: &mut Vec<Degraded>,
) -> Result<SharedTransport> {
    if simulator {
        return Ok(shared(DebugTransport::new()));
    }

    let opened = match config {
        TransportConfig::Debug => return Ok(shared(DebugTransport::new())),
        TransportConfig::Serial { device, scan_dir } => {
            let configured = (!device.trim().is_empty()).then(|| Path::new(device));
            SerialTransport::discover(configured, Path::new(scan_dir)).map(shared)
        }
        TransportConfig::Spi { device, speed_hz } => open_spi(device, *speed_hz),
        TransportConfig::Midi { output_port } => MidiOutTransport::connect(output_port).map(shared),
    };

    match absent_is_degraded(opened, "transport", degraded)? {
        Some(transport) => {
            info!("✅ Transport ready: {}", transport.lock().name());
            Ok(transport)
        }
        None => {
            warn!("⚠️  Frames will only be logged");
            Ok(shared(DebugTransport::new()))
        }
    }
}

fn unavailable(device: &str, reason: impl ToString) -> SurfaceError {
    SurfaceError::DeviceUnavailable {
        device: device.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(feature = "linux-i2c")]
fn open_i2c(device: &str, address: DeviceAddress) -> Result<Box<dyn RegisterBus>> {
    use crate::led::I2cRegisterBus;

    let i2c = linux_embedded_hal::I2cdev::new(device).map_err(|e| unavailable(device, e))?;
    let bus = I2cRegisterBus::new(i2c, address);
    info!("LED driver expected at 0x{:02X} on {}", bus.address(), device);
    Ok(Box::new(bus))
}

#[cfg(not(feature = "linux-i2c"))]
fn open_i2c(device: &str, _address: DeviceAddress) -> Result<Box<dyn RegisterBus>> {
    Err(unavailable(device, "built without the linux-i2c feature"))
}

#[cfg(feature = "linux-i2c")]
fn open_expander(device: &str, address: u8) -> Result<Box<dyn InputExpander>> {
    use crate::input::scanner::Mcp23017;

    let i2c = linux_embedded_hal::I2cdev::new(device).map_err(|e| unavailable(device, e))?;
    let expander = Mcp23017::new(i2c, address)?;
    info!("Panel expander at 0x{:02X} on {}", expander.address(), device);
    Ok(Box::new(expander))
}

#[cfg(not(feature = "linux-i2c"))]
fn open_expander(device: &str, _address: u8) -> Result<Box<dyn InputExpander>> {
    Err(unavailable(device, "built without the linux-i2c feature"))
}

#[cfg(feature = "linux-spi")]
fn open_spi(device: &str, speed_hz: u32) -> Result<SharedTransport> {
    use crate::transport::SpiTransport;
    use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
    use linux_embedded_hal::SpidevDevice;

    let mut spi = SpidevDevice::open(device).map_err(|e| unavailable(device, e))?;
    let options = SpidevOptions::new()
        .bits_per_word(8)
        .max_speed_hz(speed_hz)
        .mode(SpiModeFlags::SPI_MODE_0)
        .build();
    spi.configure(&options).map_err(|e| unavailable(device, e))?;
    info!("SPI transport on {} at {} Hz", device, speed_hz);
    Ok(shared(SpiTransport::new(format!("spi:{}", device), spi)))
}

#[cfg(not(feature = "linux-spi"))]
fn open_spi(device: &str, _speed_hz: u32) -> Result<SharedTransport> {
    Err(unavailable(device, "built without the linux-spi feature"))
}

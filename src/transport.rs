//! Transports to the outboard sound unit
//!
//! A transport is a dumb point-to-point byte channel. It knows nothing about
//! parameters; the encoder and the MIDI router hand it complete frames.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use embedded_hal::spi::{Error as _, SpiDevice};
use midir::{MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::error::{Result, SurfaceError};
use crate::midi::{format_hex, ports, MidiMessage};

/// Byte channel to the outboard unit
pub trait Transport: Send {
    /// Short name for logs ("debug", "serial:/dev/ttyAMA0", ...)
    fn name(&self) -> &str;

    /// Deliver one frame
    ///
    /// Fails with `IoFailure` when the channel is broken or closed.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Release the underlying channel. Calling it again is a no-op.
    fn close(&mut self);
}

/// One transport shared by the MIDI router and the encoders
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

pub fn shared<T: Transport + 'static>(transport: T) -> SharedTransport {
    Arc::new(Mutex::new(Box::new(transport)))
}

/// Frames seen by a capturing [`DebugTransport`]
pub type FrameLog = Arc<Mutex<Vec<Vec<u8>>>>;

// ============================================================================
// Debug
// ============================================================================

/// Logs frames instead of transmitting them
pub struct DebugTransport {
    sent: u64,
    capture: Option<FrameLog>,
    closed: bool,
}

impl DebugTransport {
    pub fn new() -> Self {
        Self {
            sent: 0,
            capture: None,
            closed: false,
        }
    }

    /// Also keep every frame in the returned log
    pub fn with_capture() -> (Self, FrameLog) {
        let log = FrameLog::default();
        let transport = Self {
            capture: Some(log.clone()),
            ..Self::new()
        };
        (transport, log)
    }

    pub fn frames_sent(&self) -> u64 {
        self.sent
    }
}

impl Default for DebugTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for DebugTransport {
    fn name(&self) -> &str {
        "debug"
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if self.closed {
            return Err(SurfaceError::IoFailure("debug transport closed".to_string()));
        }
        self.sent += 1;
        match MidiMessage::parse(bytes) {
            Some(message) => debug!("📤 #{} {} | {}", self.sent, format_hex(bytes), message),
            None => debug!("📤 #{} {}", self.sent, format_hex(bytes)),
        }
        if let Some(log) = &self.capture {
            log.lock().push(bytes.to_vec());
        }
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("Debug transport closed after {} frames", self.sent);
        }
    }
}

// ============================================================================
// Serial
// ============================================================================

/// Frames written to any byte sink, normally a UART device node
///
/// Baud rate and line settings belong to the device node and are set up
/// outside the process (`stty`, device tree overlay).
pub struct SerialTransport<W: Write + Send> {
    name: String,
    writer: Option<W>,
}

impl SerialTransport<std::fs::File> {
    /// Open a TTY device node for writing
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .map_err(|e| SurfaceError::DeviceUnavailable {
                device: path.display().to_string(),
                reason: e.to_string(),
            })?;
        info!("✅ Serial transport open on {}", path.display());
        Ok(Self::new(format!("serial:{}", path.display()), file))
    }

    /// Open `configured` if given, else the USB serial nodes under `dev_dir`
    /// in name order; the first one that opens wins
    pub fn discover(configured: Option<&Path>, dev_dir: &Path) -> Result<Self> {
        let mut tried = Vec::new();
        let candidates = configured
            .map(Path::to_path_buf)
            .into_iter()
            .chain(serial_candidates(dev_dir));
        for candidate in candidates {
            match Self::open(&candidate) {
                Ok(transport) => return Ok(transport),
                Err(e) => {
                    debug!("Serial candidate {} unusable: {}", candidate.display(), e);
                    tried.push(candidate.display().to_string());
                }
            }
        }
        Err(SurfaceError::DeviceUnavailable {
            device: "serial port".to_string(),
            reason: if tried.is_empty() {
                format!("no ttyUSB*/ttyACM* node under {}", dev_dir.display())
            } else {
                format!("none of {} could be opened", tried.join(", "))
            },
        })
    }
}

/// USB serial adapters under `dev_dir` (`ttyUSB*`, `ttyACM*`), sorted
pub fn serial_candidates(dev_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dev_dir) else {
        return Vec::new();
    };
    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name.starts_with("ttyUSB") || name.starts_with("ttyACM")
        })
        .map(|entry| entry.path())
        .collect();
    found.sort();
    found
}

impl<W: Write + Send> SerialTransport<W> {
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Some(writer),
        }
    }
}

impl<W: Write + Send> Transport for SerialTransport<W> {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| SurfaceError::IoFailure(format!("{} is closed", self.name)))?;
        writer.write_all(bytes)?;
        writer.flush()?;
        trace!("{} <- {}", self.name, format_hex(bytes));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
            info!("Serial transport {} closed", self.name);
        }
    }
}

// ============================================================================
// SPI
// ============================================================================

/// Frames clocked out on an `embedded-hal` SPI device, one transaction each
pub struct SpiTransport<S: SpiDevice + Send> {
    name: String,
    spi: Option<S>,
}

impl<S: SpiDevice + Send> SpiTransport<S> {
    pub fn new(name: impl Into<String>, spi: S) -> Self {
        Self {
            name: name.into(),
            spi: Some(spi),
        }
    }
}

impl<S: SpiDevice + Send> Transport for SpiTransport<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let spi = self
            .spi
            .as_mut()
            .ok_or_else(|| SurfaceError::IoFailure(format!("{} is closed", self.name)))?;
        spi.write(bytes)
            .map_err(|e| SurfaceError::IoFailure(format!("{}: {:?}", self.name, e.kind())))?;
        trace!("{} <- {}", self.name, format_hex(bytes));
        Ok(())
    }

    fn close(&mut self) {
        if self.spi.take().is_some() {
            info!("SPI transport {} closed", self.name);
        }
    }
}

// ============================================================================
// MIDI out
// ============================================================================

/// Frames sent to a MIDI output port, for outboard units reachable over MIDI
pub struct MidiOutTransport {
    name: String,
    connection: Option<MidiOutputConnection>,
}

impl MidiOutTransport {
    /// Connect to the first output port whose name contains `pattern`
    pub fn connect(pattern: &str) -> Result<Self> {
        let unavailable = |reason: String| SurfaceError::DeviceUnavailable {
            device: format!("MIDI output '{}'", pattern),
            reason,
        };

        let midi_out = MidiOutput::new("Synth-Surface-Out").map_err(|e| unavailable(e.to_string()))?;
        let (port, port_name) = ports::find_output_port(&midi_out, pattern)
            .ok_or_else(|| unavailable("no matching port".to_string()))?;
        let connection = midi_out
            .connect(&port, "synth-surface")
            .map_err(|e| unavailable(e.to_string()))?;

        info!("✅ MIDI transport connected to {}", port_name);
        Ok(Self {
            name: format!("midi:{}", port_name),
            connection: Some(connection),
        })
    }
}

impl Transport for MidiOutTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| SurfaceError::IoFailure(format!("{} is closed", self.name)))?;
        connection
            .send(bytes)
            .map_err(|e| SurfaceError::IoFailure(e.to_string()))?;
        trace!("{} <- {}", self.name, format_hex(bytes));
        Ok(())
    }

    fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            info!("MIDI transport {} closed", self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that fails every write, like a UART whose device went away
    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_debug_capture() {
        let (mut transport, log) = DebugTransport::with_capture();
        transport.write(&[0xB0, 7, 64]).unwrap();
        transport.write(&[0x90, 60, 100]).unwrap();

        assert_eq!(transport.frames_sent(), 2);
        assert_eq!(*log.lock(), vec![vec![0xB0, 7, 64], vec![0x90, 60, 100]]);
    }

    #[test]
    fn test_write_after_close_fails() {
        let mut transport = DebugTransport::new();
        transport.close();
        transport.close();
        assert!(matches!(
            transport.write(&[0xB0, 7, 64]),
            Err(SurfaceError::IoFailure(_))
        ));
    }

    #[test]
    fn test_serial_writes_bytes_verbatim() {
        let mut transport = SerialTransport::new("serial:test", Vec::new());
        transport.write(&[0xB0, 74, 127]).unwrap();
        transport.write(&[0x80, 60, 0]).unwrap();
        assert_eq!(
            transport.writer.as_deref(),
            Some(&[0xB0, 74, 127, 0x80, 60, 0][..])
        );

        transport.close();
        assert!(transport.write(&[0xB0, 74, 0]).is_err());
    }

    #[test]
    fn test_serial_io_error_is_io_failure() {
        let mut transport = SerialTransport::new("serial:broken", BrokenPipe);
        assert!(matches!(
            transport.write(&[0xB0, 1, 2]),
            Err(SurfaceError::IoFailure(_))
        ));
    }

    #[test]
    fn test_open_missing_device_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = SerialTransport::open(dir.path().join("ttyMISSING")).err().unwrap();
        assert!(matches!(err, SurfaceError::DeviceUnavailable { .. }));
    }

    #[test]
    fn test_discover_tries_configured_then_usb_nodes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["ttyUSB1", "ttyACM0", "ttyUSB0", "ttyS0", "null"] {
            std::fs::File::create(dir.path().join(name)).unwrap();
        }
        assert_eq!(
            serial_candidates(dir.path()),
            vec![dir.path().join("ttyACM0"), dir.path().join("ttyUSB0"), dir.path().join("ttyUSB1")]
        );

        // configured port is gone, the scan takes over
        let missing = dir.path().join("ttyAMA0");
        let transport = SerialTransport::discover(Some(&missing), dir.path()).unwrap();
        assert_eq!(transport.name(), format!("serial:{}", dir.path().join("ttyACM0").display()));

        let configured = dir.path().join("ttyS0");
        let transport = SerialTransport::discover(Some(&configured), dir.path()).unwrap();
        assert_eq!(transport.name(), format!("serial:{}", configured.display()));
    }

    #[test]
    fn test_discover_without_candidates_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = SerialTransport::discover(None, dir.path()).err().unwrap();
        assert!(matches!(err, SurfaceError::DeviceUnavailable { ref reason, .. } if reason.contains("no ttyUSB")));

        let err = SerialTransport::discover(Some(&dir.path().join("ttyX")), dir.path())
            .err()
            .unwrap();
        assert!(matches!(err, SurfaceError::DeviceUnavailable { ref reason, .. } if reason.contains("ttyX")));
    }

    mod spi {
        use embedded_hal::spi::{ErrorKind, ErrorType, Operation, SpiDevice};

        #[derive(Debug)]
        pub struct SpiFault;

        impl embedded_hal::spi::Error for SpiFault {
            fn kind(&self) -> ErrorKind {
                ErrorKind::Other
            }
        }

        /// Records every write transaction
        #[derive(Default)]
        pub struct RecordingSpi {
            pub sent: Vec<Vec<u8>>,
            pub fail: bool,
        }

        impl ErrorType for RecordingSpi {
            type Error = SpiFault;
        }

        impl SpiDevice for RecordingSpi {
            fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), SpiFault> {
                if self.fail {
                    return Err(SpiFault);
                }
                for op in operations.iter() {
                    if let Operation::Write(bytes) = op {
                        self.sent.push(bytes.to_vec());
                    }
                }
                Ok(())
            }
        }
    }

    #[test]
    fn test_spi_one_transaction_per_frame() {
        let mut transport = SpiTransport::new("spi:test", spi::RecordingSpi::default());
        transport.write(&[0xB0, 20, 2]).unwrap();
        transport.write(&[0x90, 60, 100]).unwrap();
        assert_eq!(
            transport.spi.as_ref().unwrap().sent,
            vec![vec![0xB0, 20, 2], vec![0x90, 60, 100]]
        );

        transport.close();
        assert!(matches!(transport.write(&[0x80, 60, 0]), Err(SurfaceError::IoFailure(_))));
    }

    #[test]
    fn test_spi_bus_error_is_io_failure() {
        let failing = spi::RecordingSpi {
            fail: true,
            ..Default::default()
        };
        let mut transport = SpiTransport::new("spi:broken", failing);
        assert!(matches!(transport.write(&[0xB0, 1, 2]), Err(SurfaceError::IoFailure(_))));
    }

    #[test]
    fn test_shared_transport_is_object_safe() {
        let (debug, log) = DebugTransport::with_capture();
        let transport = shared(debug);
        transport.lock().write(&[0xB0, 1, 1]).unwrap();
        assert_eq!(transport.lock().name(), "debug");
        assert_eq!(log.lock().len(), 1);
    }
}

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serialport::SerialPort;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::settings::{Config, ParityConfig};
use crate::devices::traits::ModbusDevice;
use crate::modbus::constants::{EXCEPTION_FLAG, MAX_RTU_FRAME_LEN};
use crate::modbus::crc::{append_crc, strip_crc};
use crate::modbus::server::ModbusServer;
use crate::utils::error::ModbusError;

/// Pause after a failed read or write before touching the port again.
const IO_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Failures in a row, without any frame served in between, after which the
/// port is given up on.
const MAX_CONSECUTIVE_IO_ERRORS: u32 = 50;

/// Fixed gap used above this baud rate.
const FIXED_GAP_BAUD_RATE: u32 = 19_200;
const FIXED_GAP: Duration = Duration::from_micros(1_750);

/// Silence that ends an RTU frame: 3.5 character times of 11 bits each,
/// or a fixed 1.75 ms above 19200 baud.
pub fn inter_frame_gap(baud_rate: u32) -> Duration {
    if baud_rate > FIXED_GAP_BAUD_RATE {
        return FIXED_GAP;
    }
    let baud = u64::from(baud_rate.max(1));
    Duration::from_micros((38_500_000 + baud - 1) / baud)
}

/// Cut a burst received without a gap into CRC-valid frames.
///
/// The whole burst is tried first, then the shortest valid prefix, so a
/// reply from another device followed by a request to us yields both. The
/// second value is whatever could not be framed.
pub fn split_frames(buffer: &[u8]) -> (Vec<&[u8]>, &[u8]) {
    let mut frames = Vec::new();
    let mut rest = buffer;

    while !rest.is_empty() {
        if strip_crc(rest).is_ok() {
            frames.push(rest);
            return (frames, &[]);
        }
        match (4..rest.len()).find(|&end| strip_crc(&rest[..end]).is_ok()) {
            Some(end) => {
                frames.push(&rest[..end]);
                rest = &rest[end..];
            }
            None => break,
        }
    }

    (frames, rest)
}

/// Lost device errors end the server; anything else is retried.
fn port_error(e: io::Error) -> ModbusError {
    match e.kind() {
        ErrorKind::NotFound
        | ErrorKind::PermissionDenied
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected => {
            ModbusError::ConnectionError(format!("Serial port lost: {}", e))
        }
        _ => e.into(),
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub started_at: DateTime<Utc>,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub frames_received: u64,
    pub crc_errors: u64,
    pub oversized_frames: u64,
    pub ignored: u64,
    pub malformed: u64,
    pub replies: u64,
    pub exceptions: u64,
    pub io_errors: u64,
}

impl ServerStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            last_frame_at: None,
            frames_received: 0,
            crc_errors: 0,
            oversized_frames: 0,
            ignored: 0,
            malformed: 0,
            replies: 0,
            exceptions: 0,
            io_errors: 0,
        }
    }

    pub fn log_summary(&self) {
        let uptime = Utc::now().signed_duration_since(self.started_at);
        info!("📊 Server statistics (uptime {}s):", uptime.num_seconds());
        info!("   📥 Frames received: {}", self.frames_received);
        info!("   📤 Replies sent: {} ({} exceptions)", self.replies, self.exceptions);
        info!("   🙈 Not addressed to us: {}", self.ignored);
        info!(
            "   ❌ CRC errors: {}, malformed: {}, oversized: {}",
            self.crc_errors, self.malformed, self.oversized_frames
        );
        info!("   ⚡ Port IO errors: {}", self.io_errors);
    }
}

/// Open the serial port described by the configuration.
///
/// The read timeout doubles as the inter-frame silence that ends a frame.
pub fn open_port(config: &Config) -> Result<Box<dyn SerialPort>, ModbusError> {
    let timeout = config.frame_timeout();
    info!("🔌 Opening Modbus RTU port: {}", config.serial_port);
    info!(
        "⚙️  Configuration: {} baud, 8 data bits, {:?} parity, 1 stop bit, {}µs frame gap",
        config.baud_rate,
        config.parity,
        timeout.as_micros()
    );

    let serial_parity = match config.parity {
        ParityConfig::None => serialport::Parity::None,
        ParityConfig::Even => serialport::Parity::Even,
        ParityConfig::Odd => serialport::Parity::Odd,
    };

    let port = serialport::new(&config.serial_port, config.baud_rate)
        .timeout(timeout)
        .data_bits(serialport::DataBits::Eight)
        .stop_bits(serialport::StopBits::One)
        .parity(serial_parity)
        .open()
        .map_err(|e| {
            error!("❌ Failed to open serial port {}: {}", config.serial_port, e);
            ModbusError::ConnectionError(format!("Failed to open port: {}", e))
        })?;

    info!("✅ Serial port ready");
    Ok(port)
}

pub fn list_ports() -> Result<(), ModbusError> {
    println!("📡 Available Serial Ports:");

    let ports = serialport::available_ports()?;
    if ports.is_empty() {
        println!("   ⚠️  No serial ports found");
        return Ok(());
    }

    for (index, port) in ports.iter().enumerate() {
        println!("   {}. {}", index + 1, port.port_name);
        if let serialport::SerialPortType::UsbPort(usb_info) = &port.port_type {
            if let Some(manufacturer) = &usb_info.manufacturer {
                println!("      📱 Manufacturer: {}", manufacturer);
            }
            if let Some(serial_number) = &usb_info.serial_number {
                println!("      🔢 Serial Number: {}", serial_number);
            }
        }
    }

    Ok(())
}

/// RTU framing around a [`ModbusServer`]: frames end on read timeout, CRC is
/// checked and appended here.
pub struct RtuServer<P, D> {
    port: P,
    server: ModbusServer<D>,
    stats: ServerStats,
    retry_delay: Duration,
}

impl<P: Read + Write, D: ModbusDevice> RtuServer<P, D> {
    pub fn new(port: P, server: ModbusServer<D>) -> Self {
        Self {
            port,
            server,
            stats: ServerStats::new(),
            retry_delay: IO_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn server(&self) -> &ModbusServer<D> {
        &self.server
    }

    pub fn server_mut(&mut self) -> &mut ModbusServer<D> {
        &mut self.server
    }

    /// Serve frames until `shutdown` is raised.
    ///
    /// Port errors are logged and retried. The loop only fails when the
    /// device is gone or keeps failing without serving anything.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), ModbusError> {
        info!(
            "🚀 Modbus RTU server listening as device {}",
            self.server.device_id()
        );

        let mut consecutive_errors = 0u32;
        while !shutdown.load(Ordering::SeqCst) {
            match self.serve_once() {
                Ok(_) => consecutive_errors = 0,
                Err(e @ ModbusError::ConnectionError(_)) => {
                    error!("❌ {}", e);
                    return Err(e);
                }
                Err(e) => {
                    self.stats.io_errors += 1;
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_IO_ERRORS {
                        error!("❌ Giving up after {} port errors: {}", consecutive_errors, e);
                        return Err(e);
                    }
                    warn!("⚠️  Port error, retrying: {}", e);
                    thread::sleep(self.retry_delay);
                }
            }
        }

        info!("🛑 Modbus RTU server stopped");
        Ok(())
    }

    /// Read one silence-delimited burst and answer every frame in it.
    /// Returns `false` when the line was idle.
    pub fn serve_once(&mut self) -> Result<bool, ModbusError> {
        let Some(buffer) = self.read_frame()? else {
            return Ok(false);
        };

        self.stats.last_frame_at = Some(Utc::now());
        debug!("📥 RX [{}]", hex::encode(&buffer));

        let (frames, rest) = split_frames(&buffer);
        for frame in frames {
            self.stats.frames_received += 1;
            self.answer(frame)?;
        }

        if !rest.is_empty() {
            self.stats.frames_received += 1;
            if buffer.len() >= MAX_RTU_FRAME_LEN {
                self.stats.oversized_frames += 1;
                warn!("⚠️  Dropping {} bytes of an oversized frame", rest.len());
            } else {
                // Another device may own a garbled frame; never answer it.
                self.stats.crc_errors += 1;
                debug!("Dropping {} bytes with bad CRC", rest.len());
            }
        }

        Ok(true)
    }

    fn answer(&mut self, frame: &[u8]) -> Result<(), ModbusError> {
        let payload = strip_crc(frame)?;

        match self.server.handle_frame(payload) {
            None => self.stats.ignored += 1,
            Some(reply) if reply.is_empty() => self.stats.malformed += 1,
            Some(mut reply) => {
                if reply[1] & EXCEPTION_FLAG != 0 {
                    self.stats.exceptions += 1;
                }
                append_crc(&mut reply);
                debug!("📤 TX [{}]", hex::encode(&reply));
                self.port.write_all(&reply).map_err(port_error)?;
                self.port.flush().map_err(port_error)?;
                self.stats.replies += 1;
            }
        }

        Ok(())
    }

    /// Collect bytes until the line goes quiet or the buffer holds the
    /// largest legal RTU frame.
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, ModbusError> {
        let mut frame = Vec::with_capacity(MAX_RTU_FRAME_LEN);
        let mut chunk = [0u8; 64];

        while frame.len() < MAX_RTU_FRAME_LEN {
            let room = (MAX_RTU_FRAME_LEN - frame.len()).min(chunk.len());
            match self.port.read(&mut chunk[..room]) {
                Ok(0) => break,
                Ok(n) => frame.extend_from_slice(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(port_error(e)),
            }
        }

        Ok((!frame.is_empty()).then_some(frame))
    }
}

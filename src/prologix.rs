//! Links through a Prologix-style GPIB-USB controller.
//!
//! The controller enumerates as a serial port. Lines starting with `++` configure the controller,
//! everything else is forwarded to the instrument at the configured GPIB address. The controller
//! is run with `++auto 0`, so each query needs an explicit `++read eoi` to fetch the response.

use std::io;
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::address::ResourceAddress;
use crate::config::DEFAULT_BAUD_RATE;
use crate::link::{Connector, Link};

/// The controller refuses read timeouts above this.
const MAX_READ_TIMEOUT_MS: u128 = 3000;

const ESC: u8 = 0x1B;

/// Returns the names of all serial ports that could host an adapter.
pub fn available_ports() -> Result<Vec<String>, IoError> {
    let ports = serialport::available_ports().map_err(|e| IoError(e.into()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Opens [PrologixLink]s.
#[derive(Debug, Clone)]
pub struct PrologixConnector {
    /// Used for VISA style addresses which do not name a port.
    default_port: Option<String>,
    baud_rate: u32,
}

impl PrologixConnector {
    pub fn new(default_port: Option<String>) -> Self {
        Self {
            default_port,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

impl Connector for PrologixConnector {
    type Link = PrologixLink;

    fn open(
        &mut self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<PrologixLink, IoError> {
        let port_name = address
            .port()
            .or(self.default_port.as_deref())
            .ok_or_else(|| {
                IoError(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no adapter port configured for {}", address),
                ))
            })?;

        log::debug!("Opening GPIB adapter on {}", port_name);
        let port = serialport::new(port_name, self.baud_rate)
            .timeout(timeout)
            .open()
            .map_err(|e| IoError(e.into()))?;

        let mut link = PrologixLink { port };
        link.init(address.primary(), timeout)?;
        Ok(link)
    }
}

/// An open adapter talking to one GPIB address.
pub struct PrologixLink {
    port: Box<dyn SerialPort>,
}

impl PrologixLink {
    fn init(&mut self, primary: u8, timeout: Duration) -> Result<(), IoError> {
        log::debug!("Initialising adapter for GPIB address {}", primary);
        self.controller_command("++savecfg 0")?;
        self.controller_command("++mode 1")?;
        self.controller_command("++auto 0")?;
        self.controller_command("++eoi 1")?;
        // The adapter appends CR+LF to everything it forwards.
        self.controller_command("++eos 0")?;
        self.controller_command(&format!("++addr {}", primary))?;
        self.set_read_timeout(timeout)
    }

    fn controller_command(&mut self, command: &str) -> Result<(), IoError> {
        let line = format!("{}\n", command);
        embedded_io::Write::write_all(self, line.as_bytes())?;
        embedded_io::Write::flush(self)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), IoError> {
        let ms = timeout.as_millis().clamp(1, MAX_READ_TIMEOUT_MS);
        self.controller_command(&format!("++read_tmo_ms {}", ms))
    }
}

/// Escape bytes the adapter would otherwise interpret, then terminate the line.
fn frame_message(message: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(message.len() + 8);
    for &byte in message {
        if matches!(byte, b'\r' | b'\n' | ESC | b'+') {
            framed.push(ESC);
        }
        framed.push(byte);
    }
    framed.push(b'\n');
    framed
}

impl Link for PrologixLink {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), IoError> {
        self.port.set_timeout(timeout).map_err(|e| IoError(e.into()))?;
        self.set_read_timeout(timeout)
    }

    fn write_message(&mut self, message: &[u8]) -> Result<(), IoError> {
        let framed = frame_message(message);
        embedded_io::Write::write_all(self, &framed)?;
        embedded_io::Write::flush(self)
    }

    fn request_response(&mut self) -> Result<(), IoError> {
        self.controller_command("++read eoi")
    }

    fn discard_input(&mut self) -> Result<(), IoError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| IoError(e.into()))
    }
}

#[derive(Debug)]
pub struct IoError(pub io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self.0.kind() {
            io::ErrorKind::NotFound => embedded_io::ErrorKind::NotFound,
            io::ErrorKind::PermissionDenied => embedded_io::ErrorKind::PermissionDenied,
            io::ErrorKind::ConnectionReset => embedded_io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted => embedded_io::ErrorKind::ConnectionAborted,
            io::ErrorKind::NotConnected => embedded_io::ErrorKind::NotConnected,
            io::ErrorKind::BrokenPipe => embedded_io::ErrorKind::BrokenPipe,
            io::ErrorKind::InvalidInput => embedded_io::ErrorKind::InvalidInput,
            io::ErrorKind::InvalidData => embedded_io::ErrorKind::InvalidData,
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => embedded_io::ErrorKind::TimedOut,
            io::ErrorKind::Interrupted => embedded_io::ErrorKind::Interrupted,
            io::ErrorKind::Unsupported => embedded_io::ErrorKind::Unsupported,
            _ => embedded_io::ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PrologixLink {
    type Error = IoError;
}

impl embedded_io::Read for PrologixLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        io::Read::read(&mut self.port, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PrologixLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        io::Write::write(&mut self.port, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        io::Write::flush(&mut self.port).map_err(IoError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::Error;

    #[test]
    fn frame_plain_command() {
        assert_eq!(frame_message(b"RF 144000000"), b"RF 144000000\n".to_vec());
    }

    #[test]
    fn frame_escapes_special_bytes() {
        assert_eq!(
            frame_message(b"FM:INT 1.000E+3"),
            b"FM:INT 1.000E\x1B+3\n".to_vec()
        );
        assert_eq!(frame_message(b"A\r\nB"), b"A\x1B\r\x1B\nB\n".to_vec());
    }

    #[test]
    fn io_timeouts_map_to_timed_out() {
        let err = IoError(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        assert!(matches!(err.kind(), embedded_io::ErrorKind::TimedOut));
        let err = IoError(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err.kind(), embedded_io::ErrorKind::NotFound));
    }

    #[test]
    fn missing_port_fails_to_open() {
        let mut connector = PrologixConnector::new(None);
        let result = connector.open(&ResourceAddress::default(), Duration::from_millis(10));
        match result {
            Err(err) => assert!(matches!(err.kind(), embedded_io::ErrorKind::NotFound)),
            Ok(_) => panic!("opened a link without a port"),
        }
    }
}

//! We use this mocking module in unit tests to emulate an SMY02 behind its link.
//!
//! The mock understands the vendor command set well enough to answer readback queries, and can
//! be told to hang on queries, fail writes, or report event status bits.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::address::ResourceAddress;
use crate::link::{Connector, Link};

pub const MOCK_IDN: &str = "ROHDE&SCHWARZ,SMY02,832451/011,2.10";

/// Simulated front panel state.
#[derive(Debug, Clone, PartialEq)]
pub struct Panel {
    pub frequency_hz: f64,
    pub level_dbm: f64,
    /// Cleared by `LEVEL:OFF`, set again by any `LEVEL <dBm>`.
    pub level_on: bool,
    pub fm_on: bool,
    pub am_on: bool,
    pub output_on: bool,
    pub fm_tone_hz: f64,
    pub fm_deviation_hz: f64,
    pub af_hz: f64,
}

impl Default for Panel {
    /// State after `*RST`.
    fn default() -> Self {
        Self {
            frequency_hz: 100e6,
            level_dbm: -30.0,
            level_on: true,
            fm_on: false,
            am_on: false,
            output_on: false,
            fm_tone_hz: 1000.0,
            fm_deviation_hz: 0.0,
            af_hz: 1000.0,
        }
    }
}

#[derive(Debug)]
pub enum MockError {
    /// Nothing to read before the deadline.
    Timeout,
    /// Simulated write failure.
    WriteFailed,
    /// Simulated missing adapter.
    NotFound,
}

impl core::fmt::Display for MockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::error::Error for MockError {}

impl embedded_io::Error for MockError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockError::Timeout => embedded_io::ErrorKind::TimedOut,
            MockError::WriteFailed => embedded_io::ErrorKind::Other,
            MockError::NotFound => embedded_io::ErrorKind::NotFound,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    /// Every line the instrument received, queries included, in order.
    written: Vec<String>,
    /// Bytes of the line currently being written.
    incoming: Vec<u8>,
    /// Response bytes waiting to be read.
    pending: VecDeque<u8>,
    /// Replies which only turn up after the read waiting for them gave up.
    delayed: Vec<u8>,
    overrides: HashMap<String, String>,
    hanging: HashSet<String>,
    late: HashSet<String>,
    failing: HashSet<String>,
    unreachable: bool,
    absent: bool,
    esr: u8,
    errors: u32,
    panel: Panel,
    opened: usize,
    timeouts: Vec<Duration>,
}

impl MockState {
    fn handle_line(&mut self, line: String) -> Result<(), MockError> {
        self.written.push(line.clone());
        if self.failing.contains(&line) {
            return Err(MockError::WriteFailed);
        }
        if line.ends_with('?') {
            self.answer(&line);
        } else {
            self.apply(&line);
        }
        Ok(())
    }

    fn answer(&mut self, query: &str) {
        if self.hanging.contains(query) {
            return;
        }
        let response = if let Some(text) = self.overrides.get(query) {
            Some(text.clone())
        } else {
            let panel = &self.panel;
            match query {
                "*IDN?" if !self.absent => Some(MOCK_IDN.to_string()),
                "*IDN?" => None,
                "*ESR?" => {
                    let esr = self.esr;
                    // Reading the register clears it.
                    self.esr = 0;
                    Some(esr.to_string())
                }
                "ERR?" => Some(format!("ERRORS  {}", self.errors)),
                "RF?" => Some(format!("RF  {:.6}E+6", panel.frequency_hz / 1e6)),
                "LEVEL?" if panel.level_on => Some(format!("LEVEL  {:.1}", panel.level_dbm)),
                "LEVEL?" => Some("LEVEL  OFF".to_string()),
                "FM?" if panel.fm_on => Some(format!("FM  {:.1}E+3", panel.fm_deviation_hz / 1e3)),
                "FM?" => Some("FM  OFF".to_string()),
                "AF?" => Some(format!("AF  {:.1}E+3", panel.af_hz / 1e3)),
                "OUTP?" if panel.output_on => Some("OUTP ON".to_string()),
                "OUTP?" => Some("OUTP OFF".to_string()),
                _ => {
                    self.command_error();
                    None
                }
            }
        };
        if let Some(text) = response {
            let reply = text.bytes().chain(*b"\r\n");
            if self.late.contains(query) {
                self.delayed.extend(reply);
            } else {
                self.pending.extend(reply);
            }
        }
    }

    fn apply(&mut self, command: &str) {
        let (head, arg) = match command.split_once(' ') {
            Some((head, arg)) => (head, Some(arg)),
            None => (command, None),
        };
        let value = arg.and_then(|a| a.trim().parse::<f64>().ok());
        let panel = &mut self.panel;
        match (head, arg, value) {
            ("RF", _, Some(hz)) => panel.frequency_hz = hz,
            ("LEVEL", _, Some(dbm)) => {
                panel.level_dbm = dbm;
                panel.level_on = true;
            }
            ("LEVEL:OFF", None, _) => panel.level_on = false,
            ("FM:INT", _, Some(hz)) => panel.fm_tone_hz = hz,
            ("FM", Some("OFF"), _) | ("FM:OFF", None, _) => panel.fm_on = false,
            ("FM", _, Some(hz)) => panel.fm_deviation_hz = hz,
            ("FM:ON", None, _) => panel.fm_on = true,
            ("AM:ON", None, _) => panel.am_on = true,
            ("AM:OFF", None, _) => panel.am_on = false,
            ("AF", _, Some(hz)) => panel.af_hz = hz,
            ("OUTP", Some("ON"), _) => panel.output_on = true,
            ("OUTP", Some("OFF"), _) => panel.output_on = false,
            ("*RST", None, _) => *panel = Panel::default(),
            ("*CLS", None, _) => {
                self.esr = 0;
                self.errors = 0;
            }
            _ => self.command_error(),
        }
    }

    fn command_error(&mut self) {
        self.esr |= 32;
        self.errors += 1;
    }
}

/// A handle on the simulated instrument. Clones share the same instrument.
#[derive(Debug, Clone, Default)]
pub struct MockInstrument(Arc<Mutex<MockState>>);

impl MockInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    /// No adapter at the address: opening the link fails.
    pub fn unreachable() -> Self {
        let mock = Self::new();
        mock.state().unreachable = true;
        mock
    }

    /// The adapter opens but no instrument answers on the bus.
    pub fn absent() -> Self {
        let mock = Self::new();
        mock.state().absent = true;
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    /// Never answer `query`.
    pub fn hang_on(&self, query: &str) {
        self.state().hanging.insert(query.to_string());
    }

    /// Answer `query` only once the read for it has timed out.
    pub fn late_on(&self, query: &str) {
        self.state().late.insert(query.to_string());
    }

    /// Fail the write of `command`.
    pub fn fail_on(&self, command: &str) {
        self.state().failing.insert(command.to_string());
    }

    pub fn respond(&self, query: &str, response: &str) {
        self.state()
            .overrides
            .insert(query.to_string(), response.to_string());
    }

    /// Value returned by the next `*ESR?`.
    pub fn set_esr(&self, esr: u8) {
        self.state().esr = esr;
    }

    pub fn set_error_count(&self, errors: u32) {
        self.state().errors = errors;
    }

    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    pub fn clear_written(&self) {
        self.state().written.clear();
    }

    pub fn panel(&self) -> Panel {
        self.state().panel.clone()
    }

    /// How many links were opened.
    pub fn opened(&self) -> usize {
        self.state().opened
    }

    /// Every timeout applied to a link, in order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.state().timeouts.clone()
    }
}

impl Connector for MockInstrument {
    type Link = MockLink;

    fn open(
        &mut self,
        _address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<MockLink, MockError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(MockError::NotFound);
        }
        state.opened += 1;
        state.timeouts.push(timeout);
        Ok(MockLink(self.0.clone()))
    }
}

pub struct MockLink(Arc<Mutex<MockState>>);

impl embedded_io::ErrorType for MockLink {
    type Error = MockError;
}

impl embedded_io::Write for MockLink {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.lock().unwrap();
        for &byte in buf {
            if byte == b'\n' {
                let raw = std::mem::take(&mut state.incoming);
                let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
                state.handle_line(line)?;
            } else {
                state.incoming.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.0.lock().unwrap();
        if state.pending.is_empty() {
            let late = std::mem::take(&mut state.delayed);
            state.pending.extend(late);
            return Err(MockError::Timeout);
        }
        let count = buf.len().min(state.pending.len());
        for slot in buf.iter_mut().take(count) {
            *slot = state.pending.pop_front().unwrap_or_default();
        }
        Ok(count)
    }
}

impl Link for MockLink {
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Self::Error> {
        self.0.lock().unwrap().timeouts.push(timeout);
        Ok(())
    }

    fn discard_input(&mut self) -> Result<(), Self::Error> {
        self.0.lock().unwrap().pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_io::{Read, Write};

    fn open(mock: &MockInstrument) -> MockLink {
        let mut connector = mock.clone();
        connector
            .open(&ResourceAddress::default(), Duration::from_millis(10))
            .unwrap()
    }

    #[test]
    fn records_lines() {
        let mock = MockInstrument::new();
        let mut link = open(&mock);
        link.write_all(b"RF 144000000\r\n").unwrap();
        link.write_all(b"LEVEL ").unwrap();
        link.write_all(b"-20\r\n").unwrap();
        assert_eq!(mock.written(), vec!["RF 144000000", "LEVEL -20"]);
        assert_eq!(mock.panel().frequency_hz, 144e6);
        assert_eq!(mock.panel().level_dbm, -20.0);
    }

    #[test]
    fn answers_queries() {
        let mock = MockInstrument::new();
        let mut link = open(&mock);
        link.write_all(b"RF?\r\n").unwrap();
        let mut buf = [0u8; 64];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"RF  100.000000E+6\r\n");
    }

    #[test]
    fn read_without_response_times_out() {
        let mock = MockInstrument::new();
        mock.hang_on("RF?");
        let mut link = open(&mock);
        link.write_all(b"RF?\r\n").unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(link.read(&mut buf), Err(MockError::Timeout)));
    }

    #[test]
    fn late_reply_arrives_after_timeout() {
        let mock = MockInstrument::new();
        mock.late_on("ERR?");
        let mut link = open(&mock);
        link.write_all(b"ERR?\r\n").unwrap();
        let mut buf = [0u8; 16];
        assert!(matches!(link.read(&mut buf), Err(MockError::Timeout)));
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ERRORS  0\r\n");

        link.write_all(b"ERR?\r\n").unwrap();
        assert!(matches!(link.read(&mut buf), Err(MockError::Timeout)));
        link.discard_input().unwrap();
        assert!(matches!(link.read(&mut buf), Err(MockError::Timeout)));
    }

    #[test]
    fn failing_write_is_still_recorded() {
        let mock = MockInstrument::new();
        mock.fail_on("FM:OFF");
        let mut link = open(&mock);
        assert!(matches!(link.write_all(b"FM:OFF\r\n"), Err(MockError::WriteFailed)));
        assert_eq!(mock.written(), vec!["FM:OFF"]);
    }

    #[test]
    fn unknown_command_sets_command_error() {
        let mock = MockInstrument::new();
        let mut link = open(&mock);
        link.write_all(b"OUTP:STAT ON\r\n*ESR?\r\n").unwrap();
        let mut buf = [0u8; 8];
        let n = link.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"32\r\n");
    }

    #[test]
    fn reset_restores_defaults() {
        let mock = MockInstrument::new();
        let mut link = open(&mock);
        link.write_all(b"RF 144000000\r\nOUTP ON\r\nLEVEL:OFF\r\n*RST\r\n").unwrap();
        assert_eq!(mock.panel(), Panel::default());
    }

    #[test]
    fn unreachable_fails_to_open() {
        let mut mock = MockInstrument::unreachable();
        let result = mock.open(&ResourceAddress::default(), Duration::from_millis(10));
        assert!(matches!(result, Err(MockError::NotFound)));
        assert_eq!(mock.opened(), 0);
    }
}

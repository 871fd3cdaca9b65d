//! Types for what the SMY02 reports back.

use core::fmt;

use modular_bitfield::prelude::*;
use serde::Serialize;

/// IEEE 488.2 standard event status register, as returned by `*ESR?`.
///
/// Reading the register clears it on the instrument.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatus {
    /// Bit 0 (1): OPC, operation complete.
    pub operation_complete: bool,
    /// Bit 1 (2): RQC, request control.
    pub request_control: bool,
    /// Bit 2 (4): QYE, query error. Usually an unanswered or interrupted query.
    pub query_error: bool,
    /// Bit 3 (8): DDE, device dependent error.
    pub device_error: bool,
    /// Bit 4 (16): EXE, execution error. The command was understood but could not be executed.
    pub execution_error: bool,
    /// Bit 5 (32): CME, command error. The command was not understood.
    pub command_error: bool,
    /// Bit 6 (64): URQ, user request.
    pub user_request: bool,
    /// Bit 7 (128): PON, power on.
    pub power_on: bool,
}

impl EventStatus {
    pub fn from_raw(raw: u8) -> Self {
        Self::from_bytes([raw])
    }

    pub fn raw(&self) -> u8 {
        self.into_bytes()[0]
    }

    /// True when no event bit is set, i.e. the last commands were accepted.
    pub fn is_clear(&self) -> bool {
        self.raw() == 0
    }

    /// Parse a `*ESR?` response. The value is the last token of the line.
    pub fn parse(response: &str) -> Option<Self> {
        let token = response.split_whitespace().last()?;
        let raw: u16 = token.parse().ok()?;
        u8::try_from(raw).ok().map(Self::from_raw)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw())?;
        let flags = [
            (self.operation_complete(), "OPC"),
            (self.request_control(), "RQC"),
            (self.query_error(), "QYE"),
            (self.device_error(), "DDE"),
            (self.execution_error(), "EXE"),
            (self.command_error(), "CME"),
            (self.user_request(), "URQ"),
            (self.power_on(), "PON"),
        ];
        let set: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect();
        if !set.is_empty() {
            write!(f, " ({})", set.join("|"))?;
        }
        Ok(())
    }
}

/// Identity as reported by `*IDN?`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub manufacturer: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    /// The raw response line.
    pub raw: String,
}

impl Identity {
    pub fn parse(response: &str) -> Self {
        let raw = response.trim().to_string();
        let mut parts = raw.split(',').map(|p| p.trim().to_string());
        let manufacturer = parts.next().unwrap_or_default();
        let model = parts.next().unwrap_or_else(|| "Unknown".to_string());
        let serial = parts.next().unwrap_or_default();
        let firmware = parts.next().unwrap_or_default();
        Self {
            manufacturer,
            model,
            serial,
            firmware,
            raw,
        }
    }

    pub fn is_smy02(&self) -> bool {
        self.raw.to_uppercase().contains("SMY02")
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Pull the first number out of a response such as `RF  144.000000E+6` or `LEVEL  -20.0`.
pub fn parse_number(response: &str) -> Option<f64> {
    response
        .split_whitespace()
        .find_map(|token| token.parse::<f64>().ok())
}

/// Read an on/off reply such as `OUTP ON` or `0`.
pub fn parse_switch(response: &str) -> Option<bool> {
    match response.split_whitespace().last()?.to_uppercase().as_str() {
        "ON" | "1" => Some(true),
        "OFF" | "0" => Some(false),
        _ => None,
    }
}

/// Best-effort readout of the instrument state.
///
/// Every field is read by its own query, a field is `None` when that query timed out.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// Carrier frequency in Hz (`RF?`).
    pub frequency_hz: Option<f64>,
    /// Output level in dBm (`LEVEL?`).
    pub level_dbm: Option<f64>,
    /// Raw modulation status line (`FM?`).
    pub modulation: Option<String>,
    /// Audio frequency in Hz (`AF?`).
    pub audio_frequency_hz: Option<f64>,
    /// Number of entries in the error queue (`ERR?`), `0` means no error.
    pub error_code: Option<i32>,
}

impl StatusSnapshot {
    /// The instrument reported a nonzero error count.
    pub fn has_device_error(&self) -> bool {
        matches!(self.error_code, Some(code) if code != 0)
    }

    /// Every query timed out.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn or_unknown<T: fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let frequency = self
            .frequency_hz
            .map(|hz| format!("{:.6} MHz", hz / 1e6))
            .unwrap_or_else(|| "N/A".to_string());
        let level = self
            .level_dbm
            .map(|dbm| format!("{:.1} dBm", dbm))
            .unwrap_or_else(|| "N/A".to_string());
        let af = self
            .audio_frequency_hz
            .map(|hz| format!("{} Hz", hz))
            .unwrap_or_else(|| "N/A".to_string());
        write!(
            f,
            "RF: {} | Level: {} | FM: {} | AF: {} | Errors: {}",
            frequency,
            level,
            or_unknown(&self.modulation),
            af,
            or_unknown(&self.error_code)
        )
    }
}

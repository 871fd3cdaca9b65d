//! The SMY02's vendor command set.
//!
//! The instrument predates SCPI and only accepts its own short command forms. Every string here
//! was checked against the instrument and must be sent exactly as formatted.

use core::fmt;

use fugit::HertzU32;
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// Lowest carrier frequency the SMY02 can synthesise.
pub const MIN_FREQUENCY: HertzU32 = HertzU32::kHz(9);
/// Highest carrier frequency of the SMY02 (2.08 GHz).
pub const MAX_FREQUENCY: HertzU32 = HertzU32::MHz(2080);
/// Lowest settable output level in dBm.
pub const MIN_LEVEL_DBM: f32 = -140.0;
/// Highest settable output level in dBm.
pub const MAX_LEVEL_DBM: f32 = 13.0;

/// Commands which change instrument state and produce no response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// `RF <Hz>` - Carrier frequency, sent as an integer number of hertz.
    Frequency(HertzU32),
    /// `LEVEL <dBm>` - Output level.
    Level(f32),
    /// `LEVEL:OFF` - Mute the output stage.
    ///
    /// Only verified against one firmware revision, the command reference does not list it.
    LevelOff,
    /// `FM:INT <Hz>` - Internal modulation tone.
    FmTone(HertzU32),
    /// `FM <Hz>` - FM deviation.
    FmDeviation(HertzU32),
    /// `AF <Hz>` - Audio frequency of the modulation generator.
    AudioFrequency(HertzU32),
    /// `FM:ON`
    FmOn,
    /// `FM:OFF`
    FmOff,
    /// `FM OFF` - Alias of [Command::FmOff], some firmware only honours one of the two.
    FmOffAlias,
    /// `AM:ON`
    AmOn,
    /// `AM:OFF`
    AmOff,
    /// `OUTP ON` - RF output on.
    OutputOn,
    /// `OUTP OFF` - RF output off.
    OutputOff,
    /// `*RST` - Factory defaults: 100 MHz, -30 dBm.
    Reset,
    /// `*CLS` - Clear status registers and the error queue.
    ClearStatus,
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Frequency(hz) => write!(f, "RF {}", hz.to_Hz()),
            Command::Level(dbm) => write!(f, "LEVEL {}", format_level(*dbm)),
            Command::LevelOff => f.write_str("LEVEL:OFF"),
            Command::FmTone(hz) => write!(f, "FM:INT {}", hz.to_Hz()),
            Command::FmDeviation(hz) => write!(f, "FM {}", hz.to_Hz()),
            Command::AudioFrequency(hz) => write!(f, "AF {}", hz.to_Hz()),
            Command::FmOn => f.write_str("FM:ON"),
            Command::FmOff => f.write_str("FM:OFF"),
            Command::FmOffAlias => f.write_str("FM OFF"),
            Command::AmOn => f.write_str("AM:ON"),
            Command::AmOff => f.write_str("AM:OFF"),
            Command::OutputOn => f.write_str("OUTP ON"),
            Command::OutputOff => f.write_str("OUTP OFF"),
            Command::Reset => f.write_str("*RST"),
            Command::ClearStatus => f.write_str("*CLS"),
        }
    }
}

/// Signed dBm with no trailing `.0` for whole numbers. `-0` is sent as `0`.
fn format_level(dbm: f32) -> String {
    if dbm == 0.0 {
        return "0".to_string();
    }
    format!("{}", dbm)
}

/// Commands which produce a single response line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, IntoStaticStr)]
pub enum Query {
    /// Identity string: manufacturer, model, serial, firmware.
    #[strum(serialize = "*IDN?")]
    Identity,
    /// Standard event status register. Reading it clears it.
    #[strum(serialize = "*ESR?")]
    EventStatus,
    /// Error queue, e.g. `ERRORS  0`.
    #[strum(serialize = "ERR?")]
    Errors,
    /// e.g. `RF  144.000000E+6`
    #[strum(serialize = "RF?")]
    Frequency,
    /// e.g. `LEVEL  -20.0`
    #[strum(serialize = "LEVEL?")]
    Level,
    #[strum(serialize = "FM?")]
    Modulation,
    #[strum(serialize = "AF?")]
    AudioFrequency,
    #[strum(serialize = "OUTP?")]
    Output,
}

impl Query {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

use std::time::Duration;

use fugit::HertzU32;

use crate::{
    address::ResourceAddress,
    command::{MAX_FREQUENCY, MAX_LEVEL_DBM, MIN_FREQUENCY, MIN_LEVEL_DBM, Query},
    error::{Error, Result, SoftTimeout},
    link::{Connector, LinkError},
    preset::{Bandwidth, Preset},
    sequence::{CommandSequence, OperationState, Outcome, Policy, Unconfirmed},
    session::Session,
    status::{Identity, StatusSnapshot, parse_number, parse_switch},
};

/// Default deadline for each query of a status snapshot.
pub const DEFAULT_READBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings applied in one go by [Generator::configure]. `None` leaves a setting untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Settings {
    pub frequency: Option<HertzU32>,
    pub level_dbm: Option<f32>,
    pub fm_tone: Option<HertzU32>,
    pub audio_frequency: Option<HertzU32>,
    pub fm_deviation: Option<HertzU32>,
}

/// You can create a Generator from any [Session], whatever [Connector] opens its links.
///
/// Setting a value never reads it back, the SMY02 hangs on some readback queries right after a
/// write. Success is judged from the event status register instead, see [Outcome].
///
/// A generator that is dropped while connected runs the shutdown sequence and disconnects.
pub struct Generator<C: Connector, const L: usize = 128> {
    session: Session<C, L>,
    readback_timeout: Duration,
}

impl<C: Connector, const L: usize> Generator<C, L> {
    pub fn new(session: Session<C, L>) -> Self {
        Self {
            session,
            readback_timeout: DEFAULT_READBACK_TIMEOUT,
        }
    }

    pub fn with_readback_timeout(mut self, timeout: Duration) -> Self {
        self.readback_timeout = timeout;
        self
    }

    pub fn session(&self) -> &Session<C, L> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C, L> {
        &mut self.session
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Open the link and return the instrument's identity.
    pub fn connect(
        &mut self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<Identity, LinkError<C>> {
        self.session.connect(address, timeout)?;
        match self.session.identity() {
            Some(identity) => Ok(identity.clone()),
            None => self.session.identify(),
        }
    }

    /// Shut the instrument down and close the link.
    ///
    /// Returns the shutdown outcome, or `None` when there was nothing to disconnect.
    pub fn disconnect(&mut self) -> Option<Outcome> {
        if !self.session.is_connected() {
            return None;
        }
        let outcome = match self.shutdown() {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                log::error!("Shutdown before disconnect failed: {}", err);
                None
            }
        };
        self.session.disconnect();
        outcome
    }

    /// Query the identity string again.
    pub fn identify(&mut self) -> Result<Identity, LinkError<C>> {
        self.session.identify()
    }

    /// Set the carrier frequency. (`RF <Hz>`)
    pub fn set_frequency(&mut self, frequency: HertzU32) -> Result<Outcome, LinkError<C>> {
        Self::check_frequency(frequency)?;
        self.run(&CommandSequence::set_frequency(frequency))
    }

    /// Set the output level in dBm. (`LEVEL <dBm>`)
    pub fn set_level(&mut self, dbm: f32) -> Result<Outcome, LinkError<C>> {
        Self::check_level(dbm)?;
        self.run(&CommandSequence::set_level(dbm))
    }

    /// Set the internal FM tone. (`FM:INT <Hz>`)
    pub fn set_fm_tone(&mut self, tone: HertzU32) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::set_fm_tone(tone))
    }

    /// Set the FM deviation. (`FM <Hz>`)
    pub fn set_fm_deviation(&mut self, deviation: HertzU32) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::set_fm_deviation(deviation))
    }

    /// Set the modulation generator's audio frequency. (`AF <Hz>`)
    pub fn set_audio_frequency(&mut self, frequency: HertzU32) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::set_audio_frequency(frequency))
    }

    /// Set the FM deviation for a channel bandwidth.
    pub fn set_bandwidth(&mut self, bandwidth: Bandwidth) -> Result<Outcome, LinkError<C>> {
        log::debug!("Bandwidth {} -> deviation {}", bandwidth, bandwidth.deviation());
        self.run(&CommandSequence::set_bandwidth(bandwidth.deviation()))
    }

    /// Switch FM on, then the RF output.
    pub fn enable(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::enable())
    }

    /// Switch from FM to AM.
    pub fn set_am(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::set_am())
    }

    /// Switch from AM back to FM.
    pub fn set_fm(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::set_fm())
    }

    /// Mute the output without resetting anything else.
    pub fn disable_output(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::disable_output())
    }

    /// Mute and reset the instrument.
    ///
    /// Every step is attempted even if earlier ones fail, and running it again on an instrument
    /// which is already off changes nothing.
    pub fn shutdown(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::shutdown())
    }

    /// Factory defaults. (`*RST`)
    pub fn reset(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::reset())
    }

    /// Clear the status registers and error queue. (`*CLS`)
    pub fn clear_status(&mut self) -> Result<Outcome, LinkError<C>> {
        self.run(&CommandSequence::clear_status())
    }

    /// Apply frequency, level, FM tone, audio frequency and deviation in that order.
    ///
    /// Ranges are checked before anything is sent. Stops at the first setting which fails to write.
    pub fn configure(&mut self, settings: &Settings) -> Result<Vec<Outcome>, LinkError<C>> {
        if let Some(frequency) = settings.frequency {
            Self::check_frequency(frequency)?;
        }
        if let Some(dbm) = settings.level_dbm {
            Self::check_level(dbm)?;
        }

        let mut outcomes = Vec::new();
        if let Some(frequency) = settings.frequency {
            outcomes.push(self.set_frequency(frequency)?);
        }
        if let Some(dbm) = settings.level_dbm {
            outcomes.push(self.set_level(dbm)?);
        }
        if let Some(tone) = settings.fm_tone {
            outcomes.push(self.set_fm_tone(tone)?);
        }
        if let Some(frequency) = settings.audio_frequency {
            outcomes.push(self.set_audio_frequency(frequency)?);
        }
        if let Some(deviation) = settings.fm_deviation {
            outcomes.push(self.set_fm_deviation(deviation)?);
        }
        Ok(outcomes)
    }

    /// Apply a preset's frequency, level and bandwidth.
    pub fn apply_preset(&mut self, preset: &Preset) -> Result<Vec<Outcome>, LinkError<C>> {
        let Ok(frequency) = preset.frequency() else {
            return Err(Error::OutOfRange {
                quantity: "frequency",
                value: preset.frequency_mhz * 1e6,
                min: MIN_FREQUENCY.to_Hz() as f64,
                max: MAX_FREQUENCY.to_Hz() as f64,
            });
        };
        Self::check_frequency(frequency)?;
        Self::check_level(preset.level_dbm)?;

        Ok(vec![
            self.set_frequency(frequency)?,
            self.set_level(preset.level_dbm)?,
            self.set_bandwidth(preset.bandwidth)?,
        ])
    }

    /// Read back the instrument state.
    ///
    /// Each query is independent, one that times out leaves its field empty and the rest are
    /// still asked. Only losing the connection is an error.
    pub fn query_state(&mut self) -> Result<StatusSnapshot, LinkError<C>> {
        let frequency = self.readback(Query::Frequency)?;
        let level = self.readback(Query::Level)?;
        let modulation = self.readback(Query::Modulation)?;
        let audio = self.readback(Query::AudioFrequency)?;
        let errors = self.readback(Query::Errors)?;

        let snapshot = StatusSnapshot {
            frequency_hz: frequency.as_deref().and_then(parse_number),
            level_dbm: level.as_deref().and_then(parse_number),
            modulation,
            audio_frequency_hz: audio.as_deref().and_then(parse_number),
            error_code: errors.as_deref().and_then(parse_number).map(|n| n as i32),
        };
        if snapshot.has_device_error() {
            log::warn!("query_state: instrument reports {:?} errors", snapshot.error_code);
        }
        Ok(snapshot)
    }

    /// Number of entries in the error queue, `None` when `ERR?` did not answer.
    pub fn error_count(&mut self) -> Result<Option<u32>, LinkError<C>> {
        let response = self.readback(Query::Errors)?;
        Ok(response
            .as_deref()
            .and_then(parse_number)
            .map(|n| n as u32))
    }

    /// Whether the RF output is on, `None` when `OUTP?` did not answer.
    pub fn output_state(&mut self) -> Result<Option<bool>, LinkError<C>> {
        let response = self.readback(Query::Output)?;
        Ok(response.as_deref().and_then(parse_switch))
    }

    fn readback(&mut self, query: Query) -> Result<Option<String>, LinkError<C>> {
        match self
            .session
            .query(query.as_str(), Some(self.readback_timeout))
            .soft()
        {
            Ok(response) => Ok(response),
            Err(err) if err.is_connection_error() => Err(err),
            Err(err) => {
                log::warn!("{} failed: {}", query, err);
                Ok(None)
            }
        }
    }

    /// Write every step in order, then check the status register if the sequence is verified.
    pub fn run(&mut self, sequence: &CommandSequence) -> Result<Outcome, LinkError<C>> {
        let operation = sequence.operation();
        if !self.session.is_connected() {
            log::error!("{}: not connected", operation);
            return Err(Error::NotConnected);
        }

        let mut outcome = Outcome::new(operation);
        for step in sequence.steps() {
            let line = step.command.to_string();
            if let Err(err) = self.session.send(&line) {
                match sequence.policy() {
                    Policy::StopOnError => {
                        log::error!("{}: `{}` failed: {}", operation, line, err);
                        return Err(err);
                    }
                    Policy::BestEffort => {
                        log::warn!(
                            "{}: `{}` ({}) failed, continuing: {}",
                            operation,
                            line,
                            step.effect,
                            err
                        );
                        outcome.failed_steps.push(step.command);
                    }
                }
            }
        }
        outcome.state = OperationState::Sent;

        if sequence.verify() {
            self.verify(&mut outcome)?;
        }

        match outcome.state {
            OperationState::Unconfirmed => log::warn!("{}", outcome),
            _ if !outcome.failed_steps.is_empty() => log::warn!("{}", outcome),
            _ => log::info!("{}", outcome),
        }
        Ok(outcome)
    }

    fn verify(&mut self, outcome: &mut Outcome) -> Result<(), LinkError<C>> {
        match self.session.read_status_register().soft() {
            Ok(Some(status)) if !status.is_clear() => {
                log::warn!("{}: instrument reports event status {}", outcome.operation, status);
                outcome.unconfirmed(Unconfirmed::DeviceError(status));
            }
            Ok(Some(_)) if !outcome.failed_steps.is_empty() => {
                outcome.unconfirmed(Unconfirmed::FailedSteps);
            }
            Ok(Some(_)) => outcome.state = OperationState::Confirmed,
            Ok(None) => outcome.unconfirmed(Unconfirmed::StatusTimeout),
            Err(err) if err.is_connection_error() => return Err(err),
            Err(err) => outcome.unconfirmed(Unconfirmed::StatusUnreadable(err.to_string())),
        }
        Ok(())
    }

    fn check_frequency(frequency: HertzU32) -> Result<(), LinkError<C>> {
        if frequency < MIN_FREQUENCY || frequency > MAX_FREQUENCY {
            return Err(Error::OutOfRange {
                quantity: "frequency",
                value: frequency.to_Hz() as f64,
                min: MIN_FREQUENCY.to_Hz() as f64,
                max: MAX_FREQUENCY.to_Hz() as f64,
            });
        }
        Ok(())
    }

    fn check_level(dbm: f32) -> Result<(), LinkError<C>> {
        if !(MIN_LEVEL_DBM..=MAX_LEVEL_DBM).contains(&dbm) {
            return Err(Error::OutOfRange {
                quantity: "level",
                value: dbm as f64,
                min: MIN_LEVEL_DBM as f64,
                max: MAX_LEVEL_DBM as f64,
            });
        }
        Ok(())
    }
}

impl<C: Connector, const L: usize> Drop for Generator<C, L> {
    fn drop(&mut self) {
        if self.session.is_connected() {
            log::info!("Generator dropped while connected, shutting down");
            self.disconnect();
        }
    }
}

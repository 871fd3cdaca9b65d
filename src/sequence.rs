//! Named, ordered command sequences and the outcome of running one.
//!
//! The command order of every sequence here is what the SMY02 needs, e.g. `OUTP OFF` must reach
//! the instrument before `FM:OFF`. Nothing may reorder or batch the steps.

use core::fmt;

use fugit::HertzU32;
use serde::Serialize;
use strum_macros::{Display, IntoStaticStr};

use crate::command::Command;
use crate::status::EventStatus;

/// What to do when a step fails to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Abort the sequence and surface the error.
    StopOnError,
    /// Record the failure and carry on with the next step.
    BestEffort,
}

/// The named operations of the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SetFrequency,
    SetLevel,
    SetFmTone,
    SetFmDeviation,
    SetAudioFrequency,
    SetBandwidth,
    Enable,
    SetAm,
    SetFm,
    DisableOutput,
    Shutdown,
    Reset,
    ClearStatus,
}

/// One command and what it is expected to do to the instrument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub command: Command,
    pub effect: &'static str,
}

/// An ordered list of steps with an execution policy.
///
/// Verified sequences read the event status register once every step has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSequence {
    operation: Operation,
    steps: Vec<Step>,
    policy: Policy,
    verify: bool,
}

impl CommandSequence {
    /// An empty, verified, stop-on-error sequence.
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            steps: Vec::new(),
            policy: Policy::StopOnError,
            verify: true,
        }
    }

    pub fn step(mut self, command: Command, effect: &'static str) -> Self {
        self.steps.push(Step { command, effect });
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Skip the status register check, the sequence then ends in `Sent`.
    pub fn unverified(mut self) -> Self {
        self.verify = false;
        self
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub fn verify(&self) -> bool {
        self.verify
    }

    /// The command lines in the order they are written.
    pub fn lines(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.command.to_string()).collect()
    }

    pub fn set_frequency(frequency: HertzU32) -> Self {
        Self::new(Operation::SetFrequency).step(Command::Frequency(frequency), "carrier frequency")
    }

    pub fn set_level(dbm: f32) -> Self {
        Self::new(Operation::SetLevel).step(Command::Level(dbm), "output level")
    }

    pub fn set_fm_tone(tone: HertzU32) -> Self {
        Self::new(Operation::SetFmTone).step(Command::FmTone(tone), "internal FM tone")
    }

    pub fn set_fm_deviation(deviation: HertzU32) -> Self {
        Self::new(Operation::SetFmDeviation).step(Command::FmDeviation(deviation), "FM deviation")
    }

    pub fn set_audio_frequency(frequency: HertzU32) -> Self {
        Self::new(Operation::SetAudioFrequency)
            .step(Command::AudioFrequency(frequency), "audio frequency")
    }

    /// FM deviation sized for a channel bandwidth.
    pub fn set_bandwidth(deviation: HertzU32) -> Self {
        Self::new(Operation::SetBandwidth)
            .step(Command::FmDeviation(deviation), "channel deviation")
    }

    /// FM is switched on before the RF output.
    pub fn enable() -> Self {
        Self::new(Operation::Enable)
            .step(Command::FmOn, "FM on")
            .step(Command::OutputOn, "RF output on")
    }

    pub fn set_am() -> Self {
        Self::new(Operation::SetAm)
            .step(Command::FmOff, "FM off")
            .step(Command::AmOn, "AM on")
    }

    pub fn set_fm() -> Self {
        Self::new(Operation::SetFm)
            .step(Command::AmOff, "AM off")
            .step(Command::FmOn, "FM on")
    }

    /// Quick mute without resetting the instrument.
    pub fn disable_output() -> Self {
        Self::new(Operation::DisableOutput)
            .step(Command::OutputOff, "RF output off")
            .step(Command::LevelOff, "output stage muted")
            .with_policy(Policy::BestEffort)
            .unverified()
    }

    /// Leaves the instrument muted, unmodulated and at factory defaults whatever state it was in.
    ///
    /// Both FM off aliases are sent since firmware revisions disagree on which one they accept.
    pub fn shutdown() -> Self {
        Self::new(Operation::Shutdown)
            .step(Command::OutputOff, "RF output off")
            .step(Command::FmOff, "FM off")
            .step(Command::FmOffAlias, "FM off")
            .step(Command::LevelOff, "output stage muted")
            .step(Command::Reset, "factory defaults")
            .step(Command::ClearStatus, "status cleared")
            .with_policy(Policy::BestEffort)
            .unverified()
    }

    pub fn reset() -> Self {
        Self::new(Operation::Reset).step(Command::Reset, "factory defaults")
    }

    /// Unverified, `*CLS` clears the register we would read.
    pub fn clear_status() -> Self {
        Self::new(Operation::ClearStatus)
            .step(Command::ClearStatus, "status cleared")
            .unverified()
    }
}

/// Progress of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationState {
    Pending,
    /// Every command was written.
    Sent,
    /// The status register read 0 right after.
    Confirmed,
    /// The status register timed out or reported an event.
    Unconfirmed,
}

/// Why an operation ended `Unconfirmed`.
#[derive(Debug, Clone, PartialEq)]
pub enum Unconfirmed {
    /// `*ESR?` did not answer in time.
    StatusTimeout,
    /// `*ESR?` reported events.
    DeviceError(EventStatus),
    /// `*ESR?` answered something we could not use.
    StatusUnreadable(String),
    /// Some steps failed to write.
    FailedSteps,
}

impl fmt::Display for Unconfirmed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unconfirmed::StatusTimeout => f.write_str("status register timed out"),
            Unconfirmed::DeviceError(status) => write!(f, "event status {}", status),
            Unconfirmed::StatusUnreadable(err) => write!(f, "status register unreadable: {}", err),
            Unconfirmed::FailedSteps => f.write_str("commands failed"),
        }
    }
}

/// Result of running a [CommandSequence].
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub operation: Operation,
    pub state: OperationState,
    pub reason: Option<Unconfirmed>,
    /// Commands which failed to write under a best-effort policy.
    pub failed_steps: Vec<Command>,
}

impl Outcome {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            state: OperationState::Pending,
            reason: None,
            failed_steps: Vec::new(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == OperationState::Confirmed
    }

    pub fn is_unconfirmed(&self) -> bool {
        self.state == OperationState::Unconfirmed
    }

    pub(crate) fn unconfirmed(&mut self, reason: Unconfirmed) {
        self.state = OperationState::Unconfirmed;
        self.reason = Some(reason);
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.operation, self.state)?;
        if let Some(reason) = &self.reason {
            write!(f, " ({})", reason)?;
        }
        if !self.failed_steps.is_empty() {
            let failed: Vec<String> = self.failed_steps.iter().map(|c| c.to_string()).collect();
            write!(f, " failed: {}", failed.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_order() {
        let shutdown = CommandSequence::shutdown();
        assert_eq!(
            shutdown.lines(),
            vec!["OUTP OFF", "FM:OFF", "FM OFF", "LEVEL:OFF", "*RST", "*CLS"]
        );
        assert_eq!(shutdown.policy(), Policy::BestEffort);
        assert!(!shutdown.verify());
    }

    #[test]
    fn enable_order() {
        let enable = CommandSequence::enable();
        assert_eq!(enable.lines(), vec!["FM:ON", "OUTP ON"]);
        assert_eq!(enable.policy(), Policy::StopOnError);
        assert!(enable.verify());
    }

    #[test]
    fn single_step_sequences() {
        assert_eq!(
            CommandSequence::set_frequency(HertzU32::MHz(144)).lines(),
            vec!["RF 144000000"]
        );
        assert_eq!(CommandSequence::set_level(-20.0).lines(), vec!["LEVEL -20"]);
        assert_eq!(
            CommandSequence::set_fm_tone(HertzU32::Hz(1000)).lines(),
            vec!["FM:INT 1000"]
        );
        assert_eq!(CommandSequence::set_am().lines(), vec!["FM:OFF", "AM:ON"]);
        assert_eq!(CommandSequence::set_fm().lines(), vec!["AM:OFF", "FM:ON"]);
        assert!(CommandSequence::set_fm().verify());
        assert_eq!(
            CommandSequence::disable_output().lines(),
            vec!["OUTP OFF", "LEVEL:OFF"]
        );
    }

    #[test]
    fn outcome_display() {
        let mut outcome = Outcome::new(Operation::SetFrequency);
        assert_eq!(outcome.to_string(), "set_frequency: PENDING");

        outcome.unconfirmed(Unconfirmed::DeviceError(EventStatus::from_raw(32)));
        assert!(outcome.is_unconfirmed());
        assert_eq!(
            outcome.to_string(),
            "set_frequency: UNCONFIRMED (event status 32 (CME))"
        );

        let mut outcome = Outcome::new(Operation::Shutdown);
        outcome.state = OperationState::Sent;
        outcome.failed_steps.push(Command::FmOff);
        assert_eq!(outcome.to_string(), "shutdown: SENT failed: FM:OFF");
    }
}

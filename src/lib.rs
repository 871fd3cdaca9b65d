//! This crate provides an interface for controlling a Rohde & Schwarz SMY02 signal generator.
//!
//! The generator is reached through a Prologix style GPIB-USB controller, which shows up as a
//! serial port. Anything else which can move bytes can be used by implementing [link::Connector]
//! and [link::Link] for it.
//!
//! Every operation is a fixed [sequence::CommandSequence]. After sending it the event status
//! register (`*ESR?`) is read and the operation reported as confirmed or unconfirmed. A status
//! read which times out makes the operation unconfirmed rather than failed.
//!
//! ```no_run
//! # #[cfg(feature = "prologix")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use std::time::Duration;
//! use fugit::HertzU32;
//! use smy02::{generator::Generator, prologix::PrologixConnector, session::Session};
//!
//! let session = Session::new(PrologixConnector::new(Some("/dev/ttyUSB0".into())));
//! let mut generator: Generator<PrologixConnector> = Generator::new(session);
//! generator.connect(&"GPIB0::28::INSTR".parse()?, Duration::from_secs(5))?;
//! generator.set_frequency(HertzU32::MHz(144))?;
//! generator.set_level(-20.0)?;
//! println!("{}", generator.enable()?);
//! // Dropping the generator runs the shutdown sequence.
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "prologix"))]
//! # fn main() {}
//! ```
//!
//! The adapter's serial port is opened like so:
//! * Baud rate: ignored by USB adapters, 115200 is used
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None

pub mod address;
pub mod command;
pub mod config;
pub mod error;
pub mod generator;
pub mod link;
pub mod preset;
#[cfg(feature = "prologix")]
pub mod prologix;
pub mod sequence;
pub mod session;
pub mod status;
pub mod worker;

#[cfg(test)]
mod mock;

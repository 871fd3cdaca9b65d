//! The seam between the session and whatever carries bytes to the instrument.
//!
//! A link is any [embedded_io::Read] + [embedded_io::Write] interface that can also change its
//! read deadline. A [Connector] knows how to open one for a [ResourceAddress].

use core::time::Duration;

use embedded_io::ErrorType;

use crate::address::ResourceAddress;

/// Line terminator the SMY02 expects after every command.
pub const TERMINATOR: &[u8] = b"\r\n";

pub trait Link: embedded_io::Read + embedded_io::Write {
    /// Change how long a single read may block before failing with `TimedOut`.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), Self::Error>;

    /// Write one complete command line.
    fn write_message(&mut self, message: &[u8]) -> Result<(), Self::Error> {
        self.write_all(message)?;
        self.write_all(TERMINATOR)?;
        self.flush()
    }

    /// Ask the bus to hand over the instrument's pending response.
    ///
    /// Direct links have nothing to do here. Bus controllers which need an explicit read request
    /// (e.g. `++read eoi`) override this.
    fn request_response(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Drop anything already received, e.g. the late reply to a query which timed out.
    fn discard_input(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Opens links to instruments.
pub trait Connector {
    type Link: Link;

    /// Open the link for `address`, reads on it blocking for at most `timeout`.
    fn open(
        &mut self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<Self::Link, LinkError<Self>>;
}

/// Error type of the links a connector produces.
pub type LinkError<C> = <<C as Connector>::Link as ErrorType>::Error;

//! Our error types for talking to the SMY02.

use thiserror::Error;

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Errors raised while talking to the signal generator.
///
/// `I` is the error type of the underlying instrument link.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    /// The link to the instrument could not be opened or was lost.
    #[error("Could not open instrument link")]
    Connection(I),
    /// The link opened but nothing answered the identification query.
    #[error("No instrument responded at {0}")]
    NoInstrument(String),
    /// The session is connected to another address, disconnect first.
    #[error("Already connected to {0}")]
    AlreadyConnected(String),
    /// An operation was attempted on a session that is not connected.
    #[error("Session is not connected")]
    NotConnected,
    /// Writing to, or reading from, the link failed.
    #[error("Instrument communication error")]
    Communication(I),
    /// A query did not complete before its deadline.
    #[error("Communication timeout")]
    Timeout,
    #[error("Invalid response received: {0:?}")]
    InvalidResponse(String),
    /// A setting outside what the instrument can produce. Nothing was sent.
    #[error("{quantity} {value} is outside the instrument range [{min}, {max}]")]
    OutOfRange {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    /// A response line did not fit into the session's receive buffer.
    #[error("Response exceeded receive buffer")]
    BufferError,
}

impl<I: embedded_io::Error> Error<I> {
    /// Translate a link error raised while reading a response.
    ///
    /// Timeouts are kept apart so callers can treat them as "unknown" rather than failed.
    pub(crate) fn from_read(err: I) -> Self {
        match err.kind() {
            embedded_io::ErrorKind::TimedOut => Error::Timeout,
            _ => Self::from_write(err),
        }
    }

    /// Translate a link error raised while writing a command.
    pub(crate) fn from_write(err: I) -> Self {
        match err.kind() {
            embedded_io::ErrorKind::NotConnected
            | embedded_io::ErrorKind::NotFound
            | embedded_io::ErrorKind::BrokenPipe
            | embedded_io::ErrorKind::ConnectionReset
            | embedded_io::ErrorKind::ConnectionAborted => Error::Connection(err),
            _ => Error::Communication(err),
        }
    }

    /// Connection-level errors abort the current operation and are never absorbed.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::NoInstrument(_) | Error::NotConnected
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }
}

/// Absorb the expected firmware timeouts at the transport boundary.
pub trait SoftTimeout<T, I: embedded_io::Error> {
    /// Turn a [`Error::Timeout`] into `Ok(None)`, leaving every other error untouched.
    fn soft(self) -> Result<Option<T>, I>;
}

impl<T, I: embedded_io::Error> SoftTimeout<T, I> for Result<T, I> {
    fn soft(self) -> Result<Option<T>, I> {
        match self {
            Ok(value) => Ok(Some(value)),
            Err(Error::Timeout) => {
                log::debug!("query timed out, treating value as unknown");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

//! A session owns at most one open link to the instrument.
//!
//! It only knows how to write a command line, read one response line, and turn link failures into
//! [Error]s. Deciding what a failure means for an operation is left to the [Generator].
//!
//! [Generator]: crate::generator::Generator

use std::thread;
use std::time::{Duration, Instant};

use embedded_io::Read;

use crate::{
    address::ResourceAddress,
    command::Query,
    error::{Error, Result},
    link::{Connector, Link, LinkError},
    status::{EventStatus, Identity},
};

/// Default deadline for opening the link and for reading responses.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default deadline for `*ESR?`. The register answers immediately when it answers at all.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_millis(500);
/// Default pause after every write, the SMY02 drops commands that arrive back to back.
pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(50);

/// A transport session to one instrument.
///
/// `L` bounds the length of a single response line.
pub struct Session<C: Connector, const L: usize = 128> {
    connector: C,
    link: Option<C::Link>,
    address: Option<ResourceAddress>,
    timeout: Duration,
    status_timeout: Duration,
    settle: Duration,
    identity: Option<Identity>,
}

impl<C: Connector, const L: usize> Session<C, L> {
    /// Create a closed session which opens its links with `connector`.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            link: None,
            address: None,
            timeout: DEFAULT_TIMEOUT,
            status_timeout: DEFAULT_STATUS_TIMEOUT,
            settle: DEFAULT_SETTLE_TIME,
            identity: None,
        }
    }

    pub fn with_status_timeout(mut self, timeout: Duration) -> Self {
        self.status_timeout = timeout;
        self
    }

    pub fn with_settle_time(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Address of the open link, if any.
    pub fn address(&self) -> Option<&ResourceAddress> {
        self.address.as_ref()
    }

    /// Identity reported when the link was opened.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Open the link and check something answers `*IDN?`.
    ///
    /// Connecting an already connected session to the same address does nothing, connecting it
    /// to another address fails with [Error::AlreadyConnected].
    pub fn connect(
        &mut self,
        address: &ResourceAddress,
        timeout: Duration,
    ) -> Result<(), LinkError<C>> {
        if self.is_connected() {
            return match &self.address {
                Some(current) if current != address => {
                    log::warn!("Not connecting to {}, still connected to {}", address, current);
                    Err(Error::AlreadyConnected(current.to_string()))
                }
                _ => {
                    log::debug!("Already connected to {}", address);
                    Ok(())
                }
            };
        }

        log::info!("Connecting to {}", address);
        let link = self
            .connector
            .open(address, timeout)
            .map_err(Error::Connection)?;
        self.link = Some(link);
        self.address = Some(address.clone());
        self.timeout = timeout;

        match self.identify() {
            Ok(identity) => {
                if !identity.is_smy02() {
                    log::warn!("{} identifies as {}, not an SMY02", address, identity);
                }
                log::info!("Connected to {}", identity);
                Ok(())
            }
            Err(err) => {
                self.close();
                if err.is_timeout() {
                    log::error!("No instrument answered at {}", address);
                    Err(Error::NoInstrument(address.to_string()))
                } else {
                    log::error!("Identification at {} failed: {}", address, err);
                    Err(err)
                }
            }
        }
    }

    /// Close the link. Safe to call when already closed.
    pub fn disconnect(&mut self) {
        if let Some(address) = self.close() {
            log::info!("Disconnected from {}", address);
        }
    }

    fn close(&mut self) -> Option<ResourceAddress> {
        self.identity = None;
        self.link.take()?;
        self.address.take()
    }

    fn link(&mut self) -> Result<&mut C::Link, LinkError<C>> {
        self.link.as_mut().ok_or(Error::NotConnected)
    }

    /// Write one command line. Does not wait for any response.
    pub fn send(&mut self, command: &str) -> Result<(), LinkError<C>> {
        let settle = self.settle;
        let link = self.link()?;
        log::debug!("-> {}", command);
        link.write_message(command.as_bytes())
            .map_err(Error::from_write)?;
        if !settle.is_zero() {
            thread::sleep(settle);
        }
        Ok(())
    }

    /// Write `command` and read back one response line.
    ///
    /// `timeout` replaces the session timeout for this exchange only.
    pub fn query(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<String, LinkError<C>> {
        let session_timeout = self.timeout;
        let link = self.link()?;
        // A reply that missed an earlier deadline must not answer this query.
        link.discard_input().map_err(Error::from_write)?;
        let deadline = match timeout {
            Some(timeout) => {
                link.set_timeout(timeout).map_err(Error::from_write)?;
                timeout
            }
            None => session_timeout,
        };

        log::debug!("-> {}", command);
        let response = Self::exchange(link, command, deadline);

        if timeout.is_some() {
            let restored = link.set_timeout(session_timeout);
            let response = response?;
            restored.map_err(Error::from_write)?;
            log::debug!("<- {}", response);
            Ok(response)
        } else {
            let response = response?;
            log::debug!("<- {}", response);
            Ok(response)
        }
    }

    fn exchange(
        link: &mut C::Link,
        command: &str,
        timeout: Duration,
    ) -> Result<String, LinkError<C>> {
        link.write_message(command.as_bytes())
            .map_err(Error::from_write)?;
        link.request_response().map_err(Error::from_write)?;
        Self::read_line(link, timeout)
    }

    /// Read up to the next `\n`, dropping any `\r`.
    fn read_line(link: &mut C::Link, timeout: Duration) -> Result<String, LinkError<C>> {
        let deadline = Instant::now() + timeout;
        let mut line: heapless::Vec<u8, L> = heapless::Vec::new();

        // One byte at a time, so nothing after the terminator is consumed.
        let mut temp_buf = [0u8; 1];
        loop {
            match link.read(&mut temp_buf) {
                Ok(0) => {
                    if Instant::now() >= deadline {
                        return Err(Error::Timeout);
                    }
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(_) => match temp_buf[0] {
                    b'\n' => break,
                    b'\r' => {}
                    byte => {
                        if line.push(byte).is_err() {
                            return Err(Error::BufferError);
                        }
                    }
                },
                Err(e) => return Err(Error::from_read(e)),
            }
        }

        match core::str::from_utf8(&line) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(_) => Err(Error::InvalidResponse(
                String::from_utf8_lossy(&line).into_owned(),
            )),
        }
    }

    /// Read and decode the event status register (`*ESR?`).
    ///
    /// Fails with [Error::Timeout] when the firmware does not answer in time, which callers
    /// should treat as "status unknown".
    pub fn read_status_register(&mut self) -> Result<EventStatus, LinkError<C>> {
        let response = self.query(Query::EventStatus.as_str(), Some(self.status_timeout))?;
        EventStatus::parse(&response).ok_or(Error::InvalidResponse(response))
    }

    /// Query `*IDN?` and remember the answer.
    pub fn identify(&mut self) -> Result<Identity, LinkError<C>> {
        let response = self.query(Query::Identity.as_str(), None)?;
        let identity = Identity::parse(&response);
        self.identity = Some(identity.clone());
        Ok(identity)
    }
}

//! A background thread which owns the [Generator].
//!
//! Callers queue [Job]s and read [Event]s back, both over ordered channels, so commands reach the
//! instrument in exactly the order they were queued. Monitoring and playlist hopping run between
//! jobs on the worker itself and stop as soon as a stop or terminate job arrives.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, never, select, tick, unbounded};
use fugit::HertzU32;
use thiserror::Error;

use crate::{
    address::ResourceAddress,
    error,
    generator::{Generator, Settings},
    link::{Connector, LinkError},
    preset::{Bandwidth, Playlist, PlaylistEntry},
    sequence::Outcome,
    status::{Identity, StatusSnapshot},
};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Could not start worker thread")]
    Spawn(#[source] std::io::Error),
    #[error("Worker has stopped")]
    Stopped,
}

/// Work for the worker, executed in the order received.
#[derive(Debug, Clone)]
pub enum Job {
    Connect {
        address: ResourceAddress,
        timeout: Duration,
    },
    SetFrequency(HertzU32),
    SetLevel(f32),
    SetFmTone(HertzU32),
    SetBandwidth(Bandwidth),
    Configure(Settings),
    Enable,
    DisableOutput,
    Shutdown,
    QueryState,
    /// Emit a status snapshot every `interval` until stopped.
    StartMonitor { interval: Duration },
    /// Stop monitoring and shut the instrument down.
    StopMonitor,
    /// Apply each entry in turn, `dwell` apart, looping until stopped.
    StartHopping { playlist: Playlist, dwell: Duration },
    /// Stop hopping and shut the instrument down.
    StopHopping,
    /// Shut down, disconnect and end the thread.
    Terminate,
}

#[derive(Debug, Clone)]
pub enum Event {
    Connected(Identity),
    Outcome(Outcome),
    Snapshot(StatusSnapshot),
    Hop {
        index: usize,
        entry: PlaylistEntry,
        outcomes: Vec<Outcome>,
    },
    Failure {
        operation: String,
        message: String,
        /// The connection is gone, nothing else will succeed.
        fatal: bool,
    },
    /// The shutdown sequence ran after an activity stopped or before terminating.
    ShutdownComplete(Option<Outcome>),
    /// The thread has ended.
    Stopped,
}

/// Handle on the worker thread. Dropping it terminates the worker.
pub struct Worker {
    jobs: Sender<Job>,
    events: Receiver<Event>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Move `generator` onto a new thread.
    pub fn spawn<C, const L: usize>(generator: Generator<C, L>) -> Result<Self, WorkerError>
    where
        C: Connector + Send + 'static,
        C::Link: Send + 'static,
    {
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let (events_tx, events_rx) = unbounded::<Event>();

        let handle = thread::Builder::new()
            .name("smy02-worker".to_string())
            .spawn(move || Actor::new(generator, events_tx).run(jobs_rx))
            .map_err(WorkerError::Spawn)?;

        Ok(Self {
            jobs: jobs_tx,
            events: events_rx,
            handle: Some(handle),
        })
    }

    pub fn send(&self, job: Job) -> Result<(), WorkerError> {
        self.jobs.send(job).map_err(|_| WorkerError::Stopped)
    }

    /// A sender for queueing jobs from elsewhere, e.g. a Ctrl-C handler.
    pub fn job_sender(&self) -> Sender<Job> {
        self.jobs.clone()
    }

    pub fn events(&self) -> &Receiver<Event> {
        &self.events
    }

    /// Terminate the worker and wait for it to finish.
    pub fn join(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            // Fails only if the thread already ended.
            let _ = self.jobs.send(Job::Terminate);
            if handle.join().is_err() {
                log::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Activity {
    Idle,
    Monitoring {
        ticker: Receiver<Instant>,
    },
    Hopping {
        playlist: Playlist,
        index: usize,
        ticker: Receiver<Instant>,
    },
}

impl Activity {
    fn ticker(&self) -> Receiver<Instant> {
        match self {
            Activity::Idle => never(),
            Activity::Monitoring { ticker } | Activity::Hopping { ticker, .. } => ticker.clone(),
        }
    }
}

struct Actor<C: Connector, const L: usize> {
    generator: Generator<C, L>,
    events: Sender<Event>,
    activity: Activity,
    /// The shutdown sequence ran and nothing was sent since.
    shut_down: bool,
}

impl<C: Connector, const L: usize> Actor<C, L> {
    fn new(generator: Generator<C, L>, events: Sender<Event>) -> Self {
        Self {
            generator,
            events,
            activity: Activity::Idle,
            shut_down: false,
        }
    }

    fn run(mut self, jobs: Receiver<Job>) {
        log::debug!("Worker started");
        loop {
            let ticker = self.activity.ticker();
            select! {
                recv(jobs) -> job => match job {
                    Ok(Job::Terminate) | Err(_) => break,
                    Ok(job) => self.handle(job),
                },
                recv(ticker) -> _ => self.tick(),
            }
        }
        self.terminate();
        log::debug!("Worker stopped");
    }

    fn emit(&self, event: Event) {
        // The handle may already be gone, e.g. while terminating from its Drop.
        let _ = self.events.send(event);
    }

    fn fail<E: core::fmt::Display>(&self, operation: &str, err: E, fatal: bool) {
        log::error!("{}: {}", operation, err);
        self.emit(Event::Failure {
            operation: operation.to_string(),
            message: err.to_string(),
            fatal,
        });
    }

    fn handle(&mut self, job: Job) {
        log::debug!("Job {:?}", job);
        match job {
            Job::Connect { address, timeout } => match self.generator.connect(&address, timeout) {
                Ok(identity) => self.emit(Event::Connected(identity)),
                Err(err) => {
                    let fatal = err.is_connection_error();
                    self.fail("connect", err, fatal);
                }
            },
            Job::SetFrequency(frequency) => {
                self.apply("set_frequency", |g| g.set_frequency(frequency))
            }
            Job::SetLevel(dbm) => self.apply("set_level", |g| g.set_level(dbm)),
            Job::SetFmTone(tone) => self.apply("set_fm_tone", |g| g.set_fm_tone(tone)),
            Job::SetBandwidth(bandwidth) => {
                self.apply("set_bandwidth", |g| g.set_bandwidth(bandwidth))
            }
            Job::Configure(settings) => {
                self.shut_down = false;
                match self.generator.configure(&settings) {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            self.emit(Event::Outcome(outcome));
                        }
                    }
                    Err(err) => {
                        let fatal = err.is_connection_error();
                        self.fail("configure", err, fatal);
                    }
                }
            }
            Job::Enable => self.apply("enable", |g| g.enable()),
            Job::DisableOutput => self.apply("disable_output", |g| g.disable_output()),
            Job::Shutdown => self.shutdown(),
            Job::QueryState => self.snapshot(),
            Job::StartMonitor { interval } => {
                log::info!("Monitoring every {:?}", interval);
                self.shut_down = false;
                self.activity = Activity::Monitoring {
                    ticker: tick(interval),
                };
                self.snapshot();
            }
            Job::StartHopping { playlist, dwell } => self.start_hopping(playlist, dwell),
            Job::StopMonitor | Job::StopHopping => self.stop_activity(),
            Job::Terminate => {}
        }
    }

    fn apply<F>(&mut self, operation: &str, op: F)
    where
        F: FnOnce(&mut Generator<C, L>) -> error::Result<Outcome, LinkError<C>>,
    {
        self.shut_down = false;
        match op(&mut self.generator) {
            Ok(outcome) => self.emit(Event::Outcome(outcome)),
            Err(err) => {
                let fatal = err.is_connection_error();
                self.fail(operation, err, fatal);
            }
        }
    }

    fn tick(&mut self) {
        match self.activity {
            Activity::Idle => {}
            Activity::Monitoring { .. } => self.snapshot(),
            Activity::Hopping { .. } => self.hop(),
        }
    }

    fn snapshot(&mut self) {
        match self.generator.query_state() {
            Ok(snapshot) => self.emit(Event::Snapshot(snapshot)),
            Err(err) => {
                let fatal = err.is_connection_error();
                self.fail("query_state", err, fatal);
                if fatal {
                    self.activity = Activity::Idle;
                }
            }
        }
    }

    fn start_hopping(&mut self, playlist: Playlist, dwell: Duration) {
        if playlist.is_empty() {
            self.fail("start_hopping", "playlist is empty", false);
            return;
        }
        log::info!("Hopping over {} entries, {:?} dwell", playlist.len(), dwell);
        self.shut_down = false;
        self.activity = Activity::Hopping {
            playlist,
            index: 0,
            ticker: tick(dwell),
        };
        self.hop();
        if !matches!(self.activity, Activity::Hopping { .. }) {
            return;
        }
        // Hopping carries on re-tuning even if the output refuses to come on.
        match self.generator.enable() {
            Ok(outcome) => self.emit(Event::Outcome(outcome)),
            Err(err) => {
                let fatal = err.is_connection_error();
                self.fail("enable", err, fatal);
                if fatal {
                    self.activity = Activity::Idle;
                }
            }
        }
    }

    fn hop(&mut self) {
        let Activity::Hopping {
            playlist, index, ..
        } = &mut self.activity
        else {
            return;
        };
        let current = *index;
        let entry = playlist.entries()[current].clone();
        *index = (current + 1) % playlist.len();

        match self.generator.apply_preset(&entry.preset) {
            Ok(outcomes) => {
                log::info!("Hop to: {}", entry.name);
                self.emit(Event::Hop {
                    index: current,
                    entry,
                    outcomes,
                });
            }
            Err(err) => {
                let fatal = err.is_connection_error();
                self.fail(&format!("hop to {}", entry.name), err, fatal);
                self.activity = Activity::Idle;
                if !fatal {
                    self.shutdown();
                }
            }
        }
    }

    fn stop_activity(&mut self) {
        match self.activity {
            Activity::Idle => log::debug!("Nothing to stop"),
            _ => {
                self.activity = Activity::Idle;
                self.shutdown();
            }
        }
    }

    /// Runs the shutdown sequence unless it already ran since the last change.
    fn shutdown(&mut self) {
        if self.shut_down {
            log::debug!("Already shut down");
            self.emit(Event::ShutdownComplete(None));
            return;
        }
        match self.generator.shutdown() {
            Ok(outcome) => {
                self.shut_down = true;
                self.emit(Event::ShutdownComplete(Some(outcome)));
            }
            Err(err) => {
                let fatal = err.is_connection_error();
                self.fail("shutdown", err, fatal);
            }
        }
    }

    fn terminate(&mut self) {
        self.activity = Activity::Idle;
        if self.generator.is_connected() {
            if self.shut_down {
                self.generator.session_mut().disconnect();
            } else {
                let outcome = self.generator.disconnect();
                self.emit(Event::ShutdownComplete(outcome));
            }
        }
        self.emit(Event::Stopped);
    }
}

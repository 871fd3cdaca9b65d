use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use fugit::HertzU32;
use inquire::Select;

use smy02::{
    address::ResourceAddress,
    config::Config,
    generator::{Generator, Settings},
    preset::{Bandwidth, Playlist, Preset, PresetStore, SweepBuilder},
    prologix::{self, PrologixConnector},
    session::Session,
    status::StatusSnapshot,
    worker::{Event, Job, Worker},
};

type AppResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "smy02",
    version,
    about = "Control an SMY02 signal generator through a GPIB-USB adapter"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Instrument address, overrides the configuration.
    #[arg(short, long)]
    address: Option<String>,
    /// Serial port of the GPIB adapter, overrides the configuration.
    #[arg(short, long)]
    port: Option<String>,
    /// Log verbose output.
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug, Default)]
struct Tuning {
    /// Carrier frequency in MHz.
    #[arg(short, long)]
    frequency: Option<f64>,
    /// Output level in dBm.
    #[arg(short, long, allow_negative_numbers = true)]
    level: Option<f32>,
    /// FM tone in Hz.
    #[arg(long)]
    tone: Option<u32>,
    /// Audio frequency in Hz.
    #[arg(long)]
    af: Option<u32>,
    /// Channel bandwidth: 6.25, 12.5 or 25 (kHz).
    #[arg(short, long)]
    bandwidth: Option<Bandwidth>,
    /// Start from a stored preset, other options override it.
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List serial ports which may hold a GPIB adapter.
    List,
    /// Identify the instrument and read back its state.
    Query,
    /// Apply settings and leave the instrument configured.
    Configure(Tuning),
    /// Switch the RF output on and monitor it until Ctrl-C.
    Enable {
        #[command(flatten)]
        tuning: Tuning,
        /// Monitor interval in milliseconds.
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Run the shutdown sequence.
    Shutdown,
    /// Hop through a playlist until Ctrl-C.
    Hop {
        /// Playlist JSON file.
        #[arg(long)]
        playlist: Option<PathBuf>,
        /// Dwell time per entry in milliseconds.
        #[arg(long)]
        dwell: Option<u64>,
        /// Build a sweep instead: start, stop and step in MHz.
        #[arg(
            long,
            num_args = 3,
            value_names = ["START", "STOP", "STEP"],
            allow_negative_numbers = true
        )]
        sweep: Option<Vec<f64>>,
        /// Sweep level in dBm.
        #[arg(long, allow_negative_numbers = true)]
        level: Option<f32>,
        /// Alternate sweep level in dBm.
        #[arg(long, allow_negative_numbers = true, requires = "every")]
        alt_level: Option<f32>,
        /// Switch between levels every N entries.
        #[arg(long)]
        every: Option<usize>,
        #[arg(short, long)]
        bandwidth: Option<Bandwidth>,
        /// Write the playlist to this file before hopping.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Manage stored presets.
    Presets {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand, Debug)]
enum PresetAction {
    List,
    Save {
        name: String,
        /// Carrier frequency in MHz.
        #[arg(allow_negative_numbers = true)]
        frequency: f64,
        #[arg(allow_negative_numbers = true, default_value_t = -20.0)]
        level: f32,
        #[arg(default_value_t = Bandwidth::default())]
        bandwidth: Bandwidth,
    },
    Remove {
        name: String,
    },
}

/// How the run ended, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Exit {
    Success,
    Unconfirmed,
    Fatal,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        match exit {
            Exit::Success => ExitCode::SUCCESS,
            Exit::Unconfirmed => ExitCode::from(2),
            Exit::Fatal => ExitCode::from(1),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "smy02=debug" } else { "smy02=info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(filter)).init();

    match run(cli) {
        Ok(exit) => exit.into(),
        Err(err) => {
            log::error!("{}", err);
            Exit::Fatal.into()
        }
    }
}

fn run(cli: Cli) -> AppResult<Exit> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(address) = cli.address {
        config.address = address;
    }
    if cli.port.is_some() {
        config.adapter_port = cli.port;
    }

    match cli.command {
        Command::List => {
            let ports = prologix::available_ports()?;
            if ports.is_empty() {
                println!("No serial ports found!");
            }
            for port in ports {
                println!("{}", port);
            }
            Ok(Exit::Success)
        }
        Command::Presets { action } => presets(&config, action),
        Command::Query => query(&config),
        Command::Configure(tuning) => configure(&config, &tuning),
        Command::Shutdown => shutdown(&config),
        Command::Enable { tuning, interval } => {
            let settings = settings(&config, &tuning)?;
            let interval = interval
                .map(Duration::from_millis)
                .unwrap_or(config.monitor_interval());
            let mut jobs = vec![];
            if settings != Settings::default() {
                jobs.push(Job::Configure(settings));
            }
            jobs.push(Job::Enable);
            jobs.push(Job::StartMonitor { interval });
            supervise(&config, jobs, Job::StopMonitor)
        }
        Command::Hop {
            playlist,
            dwell,
            sweep,
            level,
            alt_level,
            every,
            bandwidth,
            save,
        } => {
            let playlist = match sweep.as_deref() {
                Some([start, stop, step]) => {
                    let mut builder = SweepBuilder::new(*start, *stop, *step)
                        .with_bandwidth(bandwidth.unwrap_or_default());
                    if let Some(level) = level {
                        builder = builder.with_level(level);
                    }
                    if let (Some(alt_level), Some(every)) = (alt_level, every) {
                        builder = builder.alternating(alt_level, every);
                    }
                    builder.build()?
                }
                _ => {
                    let Some(path) = playlist.or_else(|| config.playlist_file.clone()) else {
                        return Err("No playlist given, use --playlist or --sweep".into());
                    };
                    Playlist::load(path)?
                }
            };
            if let Some(path) = save {
                playlist.save(&path)?;
                log::info!("Saved {} entries to {}", playlist.len(), path.display());
            }
            let dwell = dwell.map(Duration::from_millis).unwrap_or(config.dwell());
            supervise(&config, vec![Job::StartHopping { playlist, dwell }], Job::StopHopping)
        }
    }
}

/// Resolve the address, asking for the adapter port when nothing names one.
fn resolve_address(config: &mut Config) -> AppResult<ResourceAddress> {
    let address = config.address()?;
    if address.port().is_some() || config.adapter_port.is_some() {
        return Ok(address);
    }

    let ports = prologix::available_ports()?;
    if ports.is_empty() {
        return Err("No serial ports found!".into());
    }
    let port = Select::new("Select the GPIB adapter port:", ports).prompt()?;
    println!("Using port: {}", port);
    config.adapter_port = Some(port);
    Ok(address)
}

fn generator(config: &mut Config) -> AppResult<(Generator<PrologixConnector>, ResourceAddress)> {
    let address = resolve_address(config)?;
    let connector =
        PrologixConnector::new(config.adapter_port.clone()).with_baud_rate(config.baud_rate);
    let session = Session::new(connector)
        .with_status_timeout(config.status_timeout())
        .with_settle_time(config.settle_time());
    let generator = Generator::new(session).with_readback_timeout(config.readback_timeout());
    Ok((generator, address))
}

fn connected(config: &Config) -> AppResult<Generator<PrologixConnector>> {
    let mut config = config.clone();
    let (mut generator, address) = generator(&mut config)?;
    let identity = generator.connect(&address, config.timeout())?;
    println!("Connected: {}", identity);
    if !identity.is_smy02() {
        log::warn!("{} is not an SMY02, carrying on anyway", identity.model);
    }
    Ok(generator)
}

/// Print the instrument state and the RF output switch.
fn readback(
    generator: &mut Generator<PrologixConnector>,
) -> AppResult<(StatusSnapshot, Option<bool>)> {
    let snapshot = generator.query_state()?;
    let output = generator.output_state()?;
    let output_label = match output {
        Some(true) => "ON",
        Some(false) => "OFF",
        None => "N/A",
    };
    println!("{} | Output: {}", snapshot, output_label);
    Ok((snapshot, output))
}

fn query(config: &Config) -> AppResult<Exit> {
    let mut generator = connected(config)?;
    let (snapshot, _) = readback(&mut generator)?;
    // Leave the instrument as it is.
    generator.session_mut().disconnect();
    if snapshot.has_device_error() {
        return Ok(Exit::Unconfirmed);
    }
    Ok(Exit::Success)
}

fn presets(config: &Config, action: PresetAction) -> AppResult<Exit> {
    let mut store = PresetStore::load(&config.presets_file)?;
    match action {
        PresetAction::List => {
            if store.is_empty() {
                println!("No presets in {}", store.path().display());
            }
            for (name, preset) in store.iter() {
                println!(
                    "{}: {} MHz @ {} dBm, {}",
                    name, preset.frequency_mhz, preset.level_dbm, preset.bandwidth
                );
            }
            return Ok(Exit::Success);
        }
        PresetAction::Save {
            name,
            frequency,
            level,
            bandwidth,
        } => {
            let preset = Preset::new(frequency, level, bandwidth);
            preset.validate()?;
            if store.insert(name.as_str(), preset).is_some() {
                log::info!("Replaced preset {}", name);
            }
        }
        PresetAction::Remove { name } => {
            if store.remove(&name).is_none() {
                return Err(unknown_preset(&store, &name));
            }
        }
    }
    store.save()?;
    log::info!("Saved {} presets to {}", store.len(), store.path().display());
    Ok(Exit::Success)
}

fn unknown_preset(store: &PresetStore, name: &str) -> Box<dyn Error> {
    let known: Vec<&str> = store.names().collect();
    format!("No preset named {:?}, known: {}", name, known.join(", ")).into()
}

fn settings(config: &Config, tuning: &Tuning) -> AppResult<Settings> {
    let mut settings = Settings::default();
    if let Some(name) = &tuning.preset {
        let store = PresetStore::load(&config.presets_file)?;
        let Some(preset) = store.get(name) else {
            return Err(unknown_preset(&store, name));
        };
        settings.frequency = Some(preset.frequency()?);
        settings.level_dbm = Some(preset.level_dbm);
        settings.fm_deviation = Some(preset.bandwidth.deviation());
    }
    if let Some(mhz) = tuning.frequency {
        settings.frequency = Some(Preset::new(mhz, 0.0, Bandwidth::default()).frequency()?);
    }
    if let Some(dbm) = tuning.level {
        settings.level_dbm = Some(dbm);
    }
    if let Some(hz) = tuning.tone {
        settings.fm_tone = Some(HertzU32::Hz(hz));
    }
    if let Some(hz) = tuning.af {
        settings.audio_frequency = Some(HertzU32::Hz(hz));
    }
    if let Some(bandwidth) = tuning.bandwidth {
        settings.fm_deviation = Some(bandwidth.deviation());
    }
    Ok(settings)
}

fn configure(config: &Config, tuning: &Tuning) -> AppResult<Exit> {
    let settings = settings(config, tuning)?;
    if settings == Settings::default() {
        return Err("Nothing to configure".into());
    }
    let mut generator = connected(config)?;
    let outcomes = generator.configure(&settings)?;
    let mut exit = Exit::Success;
    for outcome in outcomes {
        println!("{}", outcome);
        if outcome.is_unconfirmed() {
            exit = Exit::Unconfirmed;
        }
    }
    generator.session_mut().disconnect();
    Ok(exit)
}

fn shutdown(config: &Config) -> AppResult<Exit> {
    let mut generator = connected(config)?;
    let outcome = generator.shutdown()?;
    println!("{}", outcome);

    // Check the instrument really ended up off, unanswered queries stay unknown.
    let (snapshot, output) = readback(&mut generator)?;
    generator.session_mut().disconnect();

    if !outcome.failed_steps.is_empty() || snapshot.has_device_error() || output == Some(true) {
        return Ok(Exit::Unconfirmed);
    }
    Ok(Exit::Success)
}

/// Run `jobs` on a worker and report its events until it stops.
///
/// Ctrl-C queues `stop` followed by a terminate.
fn supervise(config: &Config, jobs: Vec<Job>, stop: Job) -> AppResult<Exit> {
    let mut config = config.clone();
    let (generator, address) = generator(&mut config)?;
    let worker = Worker::spawn(generator)?;

    let interrupt = worker.job_sender();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, shutting down");
        let _ = interrupt.send(stop.clone());
        let _ = interrupt.send(Job::Terminate);
    })?;

    worker.send(Job::Connect {
        address,
        timeout: config.timeout(),
    })?;
    for job in jobs {
        worker.send(job)?;
    }

    let mut exit = Exit::Success;
    for event in worker.events().iter() {
        match event {
            Event::Connected(identity) => println!("Connected: {}", identity),
            Event::Outcome(outcome) => {
                println!("{}", outcome);
                if outcome.is_unconfirmed() {
                    exit = exit.max(Exit::Unconfirmed);
                }
            }
            Event::Snapshot(snapshot) => println!("{}", snapshot),
            Event::Hop { index, entry, outcomes } => {
                println!("[{}] {}", index, entry.name);
                if outcomes.iter().any(|o| o.is_unconfirmed()) {
                    exit = exit.max(Exit::Unconfirmed);
                }
            }
            Event::Failure {
                operation,
                message,
                fatal,
            } => {
                eprintln!("{} failed: {}", operation, message);
                if fatal {
                    exit = Exit::Fatal;
                    worker.send(Job::Terminate)?;
                } else {
                    exit = exit.max(Exit::Unconfirmed);
                }
            }
            Event::ShutdownComplete(Some(outcome)) => println!("{}", outcome),
            Event::ShutdownComplete(None) => {}
            Event::Stopped => break,
        }
    }
    worker.join();
    Ok(exit)
}

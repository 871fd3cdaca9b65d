//! Named presets, playlists and the sweep generator.
//!
//! Both files are plain JSON. Frequencies are stored in MHz, levels in dBm, bandwidth as its
//! label, e.g.:
//!
//! ```json
//! { "Repeater": { "frequency": 145.6, "level": -20.0, "bandwidth": "12.5 kHz" } }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use fugit::HertzU32;
use serde::{Deserialize, Deserializer, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use crate::command::{MAX_FREQUENCY, MAX_LEVEL_DBM, MIN_FREQUENCY, MIN_LEVEL_DBM};

/// Longest playlist a sweep may produce.
pub const MAX_SWEEP_ENTRIES: usize = 10_000;

#[derive(Error, Debug)]
pub enum PresetError {
    #[error("Could not access {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed JSON in {path}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Frequency {0} MHz cannot be represented")]
    InvalidFrequency(f64),
    #[error("{quantity} {value} is outside the instrument range")]
    OutOfRange { quantity: &'static str, value: f64 },
    #[error("Invalid sweep: {0}")]
    InvalidSweep(&'static str),
}

/// FM channel bandwidth, applied as a peak deviation of half the channel width.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
pub enum Bandwidth {
    #[strum(to_string = "6.25 kHz", serialize = "6.25")]
    #[serde(rename = "6.25 kHz")]
    Narrow,
    #[default]
    #[strum(to_string = "12.5 kHz", serialize = "12.5")]
    #[serde(rename = "12.5 kHz")]
    Standard,
    #[strum(to_string = "25 kHz", serialize = "25")]
    #[serde(rename = "25 kHz")]
    Wide,
}

impl Bandwidth {
    pub fn deviation(&self) -> HertzU32 {
        match self {
            Bandwidth::Narrow => HertzU32::Hz(3125),
            Bandwidth::Standard => HertzU32::Hz(6250),
            Bandwidth::Wide => HertzU32::Hz(12500),
        }
    }
}

/// Unknown bandwidth labels fall back to the default rather than rejecting the whole file.
fn bandwidth_or_default<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bandwidth, D::Error> {
    let label = String::deserialize(deserializer)?;
    Ok(label.parse().unwrap_or_else(|_| {
        log::warn!("Unknown bandwidth {:?}, using {}", label, Bandwidth::default());
        Bandwidth::default()
    }))
}

fn default_level() -> f32 {
    -20.0
}

/// One set of carrier settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    /// Carrier frequency in MHz.
    #[serde(rename = "frequency")]
    pub frequency_mhz: f64,
    /// Output level in dBm.
    #[serde(rename = "level", default = "default_level")]
    pub level_dbm: f32,
    #[serde(default, deserialize_with = "bandwidth_or_default")]
    pub bandwidth: Bandwidth,
}

impl Preset {
    pub fn new(frequency_mhz: f64, level_dbm: f32, bandwidth: Bandwidth) -> Self {
        Self {
            frequency_mhz,
            level_dbm,
            bandwidth,
        }
    }

    /// Carrier frequency rounded to whole hertz.
    pub fn frequency(&self) -> Result<HertzU32, PresetError> {
        let hz = (self.frequency_mhz * 1e6).round();
        if !hz.is_finite() || hz < 0.0 || hz > u32::MAX as f64 {
            return Err(PresetError::InvalidFrequency(self.frequency_mhz));
        }
        Ok(HertzU32::Hz(hz as u32))
    }

    /// Check the preset is something the instrument can produce.
    pub fn validate(&self) -> Result<(), PresetError> {
        let frequency = self.frequency()?;
        if frequency < MIN_FREQUENCY || frequency > MAX_FREQUENCY {
            return Err(PresetError::OutOfRange {
                quantity: "frequency",
                value: self.frequency_mhz,
            });
        }
        if !(MIN_LEVEL_DBM..=MAX_LEVEL_DBM).contains(&self.level_dbm) {
            return Err(PresetError::OutOfRange {
                quantity: "level",
                value: self.level_dbm as f64,
            });
        }
        Ok(())
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, PresetError> {
    let text = fs::read_to_string(path).map_err(|source| PresetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| PresetError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PresetError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| PresetError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, text).map_err(|source| PresetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Presets by name, backed by a JSON file.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
    presets: BTreeMap<String, Preset>,
}

impl PresetStore {
    /// Load the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, PresetError> {
        let path = path.into();
        let presets = if path.exists() {
            let presets: BTreeMap<String, Preset> = read_json(&path)?;
            log::info!("Loaded {} presets from {}", presets.len(), path.display());
            presets
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, presets })
    }

    pub fn save(&self) -> Result<(), PresetError> {
        write_json(&self.path, &self.presets)?;
        log::debug!("Saved {} presets to {}", self.presets.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the preset previously stored under `name`.
    pub fn insert(&mut self, name: impl Into<String>, preset: Preset) -> Option<Preset> {
        self.presets.insert(name.into(), preset)
    }

    pub fn remove(&mut self, name: &str) -> Option<Preset> {
        self.presets.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&Preset> {
        self.presets.get(name)
    }

    /// Names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Preset)> {
        self.presets.iter().map(|(name, preset)| (name.as_str(), preset))
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub name: String,
    #[serde(flatten)]
    pub preset: Preset,
}

impl PlaylistEntry {
    /// Entry named after its settings.
    pub fn from_preset(preset: Preset) -> Self {
        Self {
            name: format!("{} MHz @ {} dBm", preset.frequency_mhz, preset.level_dbm),
            preset,
        }
    }
}

/// An ordered list of hops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Playlist {
    entries: Vec<PlaylistEntry>,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let path = path.as_ref();
        let playlist: Playlist = read_json(path)?;
        log::info!("Loaded {} playlist entries from {}", playlist.len(), path.display());
        Ok(playlist)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PresetError> {
        write_json(path.as_ref(), self)
    }

    pub fn entries(&self) -> &[PlaylistEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<PlaylistEntry> for Playlist {
    fn from_iter<T: IntoIterator<Item = PlaylistEntry>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Use this type to generate a playlist stepping through a frequency range.
///
/// Runs downwards when `stop` is below `start`. Both ends are included.
#[derive(Debug, Clone)]
pub struct SweepBuilder {
    start_mhz: f64,
    stop_mhz: f64,
    step_mhz: f64,
    level_dbm: f32,
    /// Alternate level and how many entries each level block lasts.
    alternate: Option<(f32, usize)>,
    bandwidth: Bandwidth,
}

impl SweepBuilder {
    pub fn new(start_mhz: f64, stop_mhz: f64, step_mhz: f64) -> Self {
        Self {
            start_mhz,
            stop_mhz,
            step_mhz,
            level_dbm: default_level(),
            alternate: None,
            bandwidth: Bandwidth::default(),
        }
    }

    /// Base level of every entry.
    pub fn with_level(mut self, level_dbm: f32) -> Self {
        self.level_dbm = level_dbm;
        self
    }

    /// Switch between the base level and `level_dbm` every `every` entries.
    pub fn alternating(mut self, level_dbm: f32, every: usize) -> Self {
        self.alternate = Some((level_dbm, every));
        self
    }

    pub fn with_bandwidth(mut self, bandwidth: Bandwidth) -> Self {
        self.bandwidth = bandwidth;
        self
    }

    pub fn build(self) -> Result<Playlist, PresetError> {
        if !(self.step_mhz.is_finite() && self.step_mhz > 0.0) {
            return Err(PresetError::InvalidSweep("step must be > 0"));
        }
        if !(self.start_mhz.is_finite() && self.stop_mhz.is_finite()) {
            return Err(PresetError::InvalidSweep("start and stop must be finite"));
        }
        if matches!(self.alternate, Some((_, 0))) {
            return Err(PresetError::InvalidSweep("alternate every N must be >= 1"));
        }

        let ascending = self.stop_mhz >= self.start_mhz;
        // Absorbs float error so the stop frequency is still reached.
        let eps = self.step_mhz / 10.0;
        let span = (self.stop_mhz - self.start_mhz).abs();
        let steps = ((span + eps) / self.step_mhz).floor();
        if steps >= MAX_SWEEP_ENTRIES as f64 {
            return Err(PresetError::InvalidSweep("too many entries, use a larger step"));
        }
        let count = steps as usize + 1;

        let entries = (0..count)
            .map(|idx| {
                let offset = idx as f64 * self.step_mhz;
                let mhz = if ascending {
                    self.start_mhz + offset
                } else {
                    self.start_mhz - offset
                };
                let mhz = (mhz * 1e6).round() / 1e6;
                let level_dbm = match self.alternate {
                    Some((alt, every)) if (idx / every) % 2 == 1 => alt,
                    _ => self.level_dbm,
                };
                PlaylistEntry {
                    name: format!("Sweep {} MHz @ {} dBm", mhz, level_dbm),
                    preset: Preset::new(mhz, level_dbm, self.bandwidth),
                }
            })
            .collect::<Playlist>();

        log::info!(
            "Generated {} sweep entries ({} -> {} MHz, step {} MHz)",
            entries.len(),
            self.start_mhz,
            self.stop_mhz,
            self.step_mhz
        );
        Ok(entries)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn bandwidth_deviation() {
        assert_eq!(Bandwidth::Narrow.deviation(), HertzU32::Hz(3125));
        assert_eq!(Bandwidth::Standard.deviation(), HertzU32::Hz(6250));
        assert_eq!(Bandwidth::Wide.deviation(), HertzU32::Hz(12500));
        assert_eq!(Bandwidth::default(), Bandwidth::Standard);
    }

    #[test]
    fn bandwidth_labels() {
        for bandwidth in Bandwidth::iter() {
            assert_eq!(bandwidth.to_string().parse::<Bandwidth>().unwrap(), bandwidth);
        }
        assert_eq!("25".parse::<Bandwidth>().unwrap(), Bandwidth::Wide);
        assert_eq!(Bandwidth::Narrow.to_string(), "6.25 kHz");
        assert!("50 kHz".parse::<Bandwidth>().is_err());
    }

    #[test]
    fn preset_frequency() {
        let preset = Preset::new(144.0, -20.0, Bandwidth::Standard);
        assert_eq!(preset.frequency().unwrap(), HertzU32::Hz(144_000_000));

        let preset = Preset::new(145.6125, -20.0, Bandwidth::Narrow);
        assert_eq!(preset.frequency().unwrap(), HertzU32::Hz(145_612_500));

        assert!(Preset::new(-1.0, 0.0, Bandwidth::Wide).frequency().is_err());
        assert!(Preset::new(f64::NAN, 0.0, Bandwidth::Wide).frequency().is_err());
    }

    #[test]
    fn preset_json_format() {
        let json = r#"{"frequency": 145.6, "bandwidth": "25 kHz", "modulation": "FM"}"#;
        let preset: Preset = serde_json::from_str(json).unwrap();
        assert_eq!(preset, Preset::new(145.6, -20.0, Bandwidth::Wide));

        let json = r#"{"frequency": 145.6, "level": -10, "bandwidth": "7 kHz"}"#;
        let preset: Preset = serde_json::from_str(json).unwrap();
        assert_eq!(preset.bandwidth, Bandwidth::Standard);
        assert_eq!(preset.level_dbm, -10.0);

        let value = serde_json::to_value(Preset::new(144.0, -20.0, Bandwidth::Narrow)).unwrap();
        assert_eq!(value["frequency"], 144.0);
        assert_eq!(value["bandwidth"], "6.25 kHz");
    }

    #[test]
    fn store_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::load(dir.path().join("presets.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn store_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.json");

        let mut store = PresetStore::load(&path).unwrap();
        store.insert("Repeater", Preset::new(145.6, -20.0, Bandwidth::Standard));
        store.insert("Airband", Preset::new(118.1, -30.0, Bandwidth::Wide));
        let previous = store.insert("Repeater", Preset::new(145.7, -20.0, Bandwidth::Standard));
        assert_eq!(previous.map(|p| p.frequency_mhz), Some(145.6));
        store.save().unwrap();

        let mut store = PresetStore::load(&path).unwrap();
        assert_eq!(store.names().collect::<Vec<_>>(), vec!["Airband", "Repeater"]);
        assert_eq!(store.get("Repeater").unwrap().frequency_mhz, 145.7);

        assert!(store.remove("Airband").is_some());
        assert!(store.remove("Airband").is_none());
        store.save().unwrap();
        assert_eq!(PresetStore::load(&path).unwrap().len(), 1);
    }

    #[test]
    fn store_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("presets.json");
        fs::write(&path, "[1, 2").unwrap();
        assert!(matches!(PresetStore::load(&path), Err(PresetError::Json { .. })));
    }

    #[test]
    fn playlist_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("playlist.json");

        let playlist: Playlist = [
            PlaylistEntry::from_preset(Preset::new(144.0, -20.0, Bandwidth::Standard)),
            PlaylistEntry {
                name: "Simplex".to_string(),
                preset: Preset::new(145.5, -25.5, Bandwidth::Narrow),
            },
        ]
        .into_iter()
        .collect();
        playlist.save(&path).unwrap();

        let loaded = Playlist::load(&path).unwrap();
        assert_eq!(loaded, playlist);
        assert_eq!(loaded.entries()[0].name, "144 MHz @ -20 dBm");

        let text = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[1]["name"], "Simplex");
        assert_eq!(value[1]["frequency"], 145.5);
    }

    #[test]
    fn sweep_ascending() {
        let playlist = SweepBuilder::new(144.0, 146.0, 0.5).build().unwrap();
        let mhz: Vec<f64> = playlist.entries().iter().map(|e| e.preset.frequency_mhz).collect();
        assert_eq!(mhz, vec![144.0, 144.5, 145.0, 145.5, 146.0]);
        assert!(playlist.entries().iter().all(|e| e.preset.level_dbm == -20.0));
        assert_eq!(playlist.entries()[1].name, "Sweep 144.5 MHz @ -20 dBm");
    }

    #[test]
    fn sweep_descending_with_fractional_step() {
        let playlist = SweepBuilder::new(108.3, 108.0, 0.1)
            .with_bandwidth(Bandwidth::Wide)
            .build()
            .unwrap();
        let mhz: Vec<f64> = playlist.entries().iter().map(|e| e.preset.frequency_mhz).collect();
        assert_eq!(mhz, vec![108.3, 108.2, 108.1, 108.0]);
        assert!(playlist.entries().iter().all(|e| e.preset.bandwidth == Bandwidth::Wide));
    }

    #[test]
    fn sweep_alternating_levels() {
        let playlist = SweepBuilder::new(100.0, 105.0, 1.0)
            .with_level(-20.0)
            .alternating(-30.0, 2)
            .build()
            .unwrap();
        let levels: Vec<f32> = playlist.entries().iter().map(|e| e.preset.level_dbm).collect();
        assert_eq!(levels, vec![-20.0, -20.0, -30.0, -30.0, -20.0, -20.0]);
    }

    #[test]
    fn sweep_single_point() {
        let playlist = SweepBuilder::new(144.0, 144.0, 1.0).build().unwrap();
        assert_eq!(playlist.len(), 1);
    }

    #[test]
    fn sweep_rejects_bad_input() {
        assert!(SweepBuilder::new(144.0, 146.0, 0.0).build().is_err());
        assert!(SweepBuilder::new(144.0, 146.0, -1.0).build().is_err());
        assert!(SweepBuilder::new(144.0, 146.0, 1.0)
            .alternating(-30.0, 0)
            .build()
            .is_err());
    }

    #[test]
    fn sweep_rejects_huge_playlists() {
        assert!(matches!(
            SweepBuilder::new(100.0, 200.0, 1e-300).build(),
            Err(PresetError::InvalidSweep(_))
        ));
        assert!(matches!(
            SweepBuilder::new(0.009, 2080.0, 1e-6).build(),
            Err(PresetError::InvalidSweep(_))
        ));
        let playlist = SweepBuilder::new(100.0, 199.99, 0.01).build().unwrap();
        assert_eq!(playlist.len(), MAX_SWEEP_ENTRIES);
    }

    #[test]
    fn preset_validation() {
        assert!(Preset::new(145.6125, -20.0, Bandwidth::Narrow).validate().is_ok());
        assert!(matches!(
            Preset::new(5000.0, -20.0, Bandwidth::default()).validate(),
            Err(PresetError::OutOfRange { quantity: "frequency", .. })
        ));
        assert!(matches!(
            Preset::new(145.0, 20.0, Bandwidth::default()).validate(),
            Err(PresetError::OutOfRange { quantity: "level", .. })
        ));
        assert!(matches!(
            Preset::new(f64::NAN, -20.0, Bandwidth::default()).validate(),
            Err(PresetError::InvalidFrequency(_))
        ));
    }
}

use anyhow::{Context, Error};
use chrono::Local;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{create_dir_all, read_dir, File},
    path::{Path, PathBuf},
};

use super::Message;

/// The levels received at a single receiver location
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LevelTrace {
    /// Simulation times in seconds
    pub times: Vec<f64>,
    /// Sound levels in dB(A), one per entry in `times`
    pub levels: Vec<f64>,
}

impl LevelTrace {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The trace as plot points
    pub fn points(&self) -> Vec<[f64; 2]> {
        self.times
            .iter()
            .zip(&self.levels)
            .map(|(t, l)| [*t, *l])
            .collect()
    }

    /// Mean time step between samples, `None` with less than two samples
    pub fn dt(&self) -> Option<f64> {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) if self.len() > 1 && last > first => {
                Some((last - first) / (self.len() - 1) as f64)
            }
            _ => None,
        }
    }

    fn push(&mut self, time: f64, level: f64) {
        self.times.push(time);
        self.levels.push(level);
    }
}

/// What happened to a message handed to [LevelStore::apply]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Cleared,
    /// The levels were stored, for this many locations
    Appended(usize),
    /// The message was older than the last one and was dropped
    Discarded,
}

/// All levels received during a session, per receiver location.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct LevelStore {
    last_time: Option<f64>,
    traces: BTreeMap<String, LevelTrace>,
}

impl LevelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the store with a received message.
    pub fn apply(&mut self, message: Message) -> Applied {
        match message {
            Message::Clear => {
                self.clear();
                Applied::Cleared
            }
            Message::Levels { time, levels } => {
                if let Some(last) = self.last_time {
                    if time < last {
                        debug!("Discarding non-chronological levels at {:.2}s (last {:.2}s)", time, last);
                        return Applied::Discarded;
                    }
                }
                self.last_time = Some(time);
                let count = levels.len();
                for (loc, level) in levels {
                    debug!("Level received: time {:.2}s, {}, {:.2} dB", time, loc, level);
                    self.traces.entry(loc).or_default().push(time, level);
                }
                Applied::Appended(count)
            }
        }
    }

    pub fn clear(&mut self) {
        self.last_time = None;
        self.traces.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// The receiver locations seen so far, sorted by name
    pub fn locations(&self) -> Vec<String> {
        self.traces.keys().cloned().collect()
    }

    pub fn trace(&self, location: &str) -> Option<&LevelTrace> {
        self.traces.get(location)
    }

    /// Time of the most recent accepted update
    pub fn last_time(&self) -> Option<f64> {
        self.last_time
    }

    /// Save the store as JSON, creating parent directories as needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                create_dir_all(parent)?;
            }
        }
        let f = File::create(path.as_ref())
            .with_context(|| format!("Can't create {}", path.as_ref().display()))?;
        serde_json::to_writer(f, self)?;
        Ok(())
    }

    /// Replace the store with the contents of a saved recording
    pub fn load<P: AsRef<Path>>(&mut self, path: P) -> Result<(), Error> {
        let f = File::open(path.as_ref())
            .with_context(|| format!("Can't open {}", path.as_ref().display()))?;
        *self = serde_json::from_reader(f)?;
        Ok(())
    }

    /// Directory holding recordings and saved plots
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("noysim")
    }

    /// A fresh, timestamped file name in [LevelStore::data_dir]
    pub fn session_file(extension: &str) -> PathBuf {
        Self::data_dir().join(format!(
            "levels-{}.{}",
            Local::now().format("%Y-%m-%d-%Hh%Mm%Ss"),
            extension
        ))
    }

    /// All recordings present on this system
    pub fn recordings() -> Result<Vec<PathBuf>, Error> {
        Self::recordings_in(Self::data_dir())
    }

    /// The recordings in `dir`, sorted by name
    pub fn recordings_in<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, Error> {
        let mut files = read_dir(dir.as_ref())
            .with_context(|| format!("Can't list {}", dir.as_ref().display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
            .collect::<Vec<_>>();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn levels(time: f64, levels: &[(&str, f64)]) -> Message {
        Message::levels(time, levels).unwrap()
    }

    #[test]
    fn append_and_clear() {
        let mut store = LevelStore::new();
        assert_eq!(store.apply(levels(0.5, &[("b", 40.0), ("a", 50.0)])), Applied::Appended(2));
        assert_eq!(store.apply(levels(1.0, &[("a", 51.0)])), Applied::Appended(1));
        assert_eq!(store.locations(), vec!["a", "b"]);
        assert_eq!(store.trace("a").unwrap().points(), vec![[0.5, 50.0], [1.0, 51.0]]);
        assert_eq!(store.trace("b").unwrap().len(), 1);

        assert_eq!(store.apply(Message::Clear), Applied::Cleared);
        assert!(store.is_empty());
        assert_eq!(store.last_time(), None);
    }

    #[test]
    fn discard_non_chronological() {
        let mut store = LevelStore::new();
        store.apply(levels(2.0, &[("a", 40.0)]));
        assert_eq!(store.apply(levels(1.5, &[("a", 99.0)])), Applied::Discarded);
        // equal times are accepted
        assert_eq!(store.apply(levels(2.0, &[("a", 41.0)])), Applied::Appended(1));
        assert_eq!(store.trace("a").unwrap().levels, vec![40.0, 41.0]);
        assert_eq!(store.last_time(), Some(2.0));
    }

    #[test]
    fn time_restarts_after_clear() {
        let mut store = LevelStore::new();
        store.apply(levels(10.0, &[("a", 40.0)]));
        store.apply(Message::Clear);
        assert_eq!(store.apply(levels(0.5, &[("a", 45.0)])), Applied::Appended(1));
    }

    #[test]
    fn save_load() {
        let _ = env_logger::try_init();
        let path = std::env::temp_dir()
            .join("noysim-test")
            .join(format!("store-{}.json", std::process::id()));
        let mut store = LevelStore::new();
        store.apply(levels(0.5, &[("(1.00,2.00,3.00)", 40.0)]));
        store.apply(levels(1.0, &[("(1.00,2.00,3.00)", 42.5)]));
        store.save(&path).unwrap();

        let mut loaded = LevelStore::new();
        loaded.load(&path).unwrap();
        assert_eq!(loaded, store);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn session_file_name() {
        let file = LevelStore::session_file("png");
        assert!(file.starts_with(LevelStore::data_dir()));
        assert_eq!(file.extension().unwrap(), "png");
    }

    #[test]
    fn mean_time_step() {
        let mut store = LevelStore::new();
        store.apply(levels(0.5, &[("a", 40.0)]));
        assert_eq!(store.trace("a").unwrap().dt(), None);
        store.apply(levels(1.0, &[("a", 40.0)]));
        store.apply(levels(2.0, &[("a", 40.0)]));
        assert_eq!(store.trace("a").unwrap().dt(), Some(0.75));
    }

    #[test]
    fn non_finite_levels_never_reach_the_store() {
        let mut store = LevelStore::new();
        for text in &["10.00;a:50.00", "nan;a:50.00", "11.00;a:NaN", "1.00;a:60.00"] {
            if let Ok(Some(message)) = Message::parse(text) {
                store.apply(message);
            }
        }
        // the old update after the rejected ones is still discarded
        assert_eq!(store.trace("a").unwrap().times, vec![10.0]);
        assert_eq!(store.last_time(), Some(10.0));
    }

    #[test]
    fn list_recordings() {
        let dir = std::env::temp_dir().join(format!("noysim-recordings-{}", std::process::id()));
        let mut store = LevelStore::new();
        store.apply(levels(0.5, &[("a", 40.0)]));
        store.save(dir.join("levels-b.json")).unwrap();
        store.save(dir.join("levels-a.json")).unwrap();
        std::fs::write(dir.join("levels-a.png"), b"not a recording").unwrap();

        let files = LevelStore::recordings_in(&dir).unwrap();
        assert_eq!(files, vec![dir.join("levels-a.json"), dir.join("levels-b.json")]);

        let _ = std::fs::remove_dir_all(&dir);
        assert!(LevelStore::recordings_in(&dir).is_err());
    }
}

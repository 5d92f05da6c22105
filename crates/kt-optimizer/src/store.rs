//! Persisted trial history.
//!
//! [`JournalStore`] appends one JSON line per finished trial. The file is
//! opened in append mode for every write so several driver processes can
//! share one journal; each line is written with a single call. Readers keep
//! a byte position and only pick up lines written since their last read.

use kt_types::{KtResult, StoreError};
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::trial::Trial;

/// Storage for finished trials, shared by every worker of an experiment.
pub trait TrialStore: Send + Sync {
    /// All finished trials recorded under `exp_key`, in append order.
    fn load(&self, exp_key: &str) -> KtResult<Vec<Trial>> {
        self.load_from(exp_key, 0).map(|(trials, _)| trials)
    }

    /// Trials recorded under `exp_key` at or after `position`, and the
    /// position to continue from. Positions are opaque to callers; start
    /// with zero.
    fn load_from(&self, exp_key: &str, position: u64) -> KtResult<(Vec<Trial>, u64)>;

    /// Record a finished trial.
    fn append(&self, trial: &Trial) -> KtResult<()>;
}

/// JSON-lines journal at `<dir>/<experiment>.jsonl`.
#[derive(Debug)]
pub struct JournalStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JournalStore {
    pub fn open(dir: &Path, experiment: &str) -> KtResult<Self> {
        fs::create_dir_all(dir).map_err(|e| StoreError::Open {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self {
            path: dir.join(format!("{experiment}.jsonl")),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrialStore for JournalStore {
    fn load_from(&self, exp_key: &str, position: u64) -> KtResult<(Vec<Trial>, u64)> {
        let mut file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), position)),
            Err(e) => {
                return Err(StoreError::Open {
                    path: self.path.clone(),
                    message: e.to_string(),
                }
                .into())
            }
        };
        file.seek(SeekFrom::Start(position))?;

        let mut reader = BufReader::new(file);
        let mut trials = Vec::new();
        let mut offset = position;
        let mut line = Vec::new();
        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            // A line without its newline is still being written.
            if read == 0 || line.last() != Some(&b'\n') {
                break;
            }
            let line_start = offset;
            offset += read as u64;

            let text = String::from_utf8_lossy(&line);
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            match serde_json::from_str::<Trial>(text) {
                Ok(trial) if trial.exp_key == exp_key => trials.push(trial),
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Skipping unreadable journal line at byte {} in {}: {}",
                        line_start,
                        self.path.display(),
                        e
                    );
                }
            }
        }
        debug!(
            "Loaded {} trials from {} (bytes {}..{})",
            trials.len(),
            self.path.display(),
            position,
            offset
        );
        Ok((trials, offset))
    }

    fn append(&self, trial: &Trial) -> KtResult<()> {
        let mut line = serde_json::to_vec(trial)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| StoreError::Open {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        file.write_all(&line)
            .and_then(|_| file.sync_data())
            .map_err(|e| StoreError::Append {
                message: e.to_string(),
            })?;
        Ok(())
    }
}

/// In-memory store, handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    trials: Mutex<Vec<Trial>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trials(trials: Vec<Trial>) -> Self {
        Self {
            trials: Mutex::new(trials),
        }
    }

    pub fn len(&self) -> usize {
        self.trials.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.lock().is_empty()
    }
}

impl TrialStore for MemoryStore {
    fn load_from(&self, exp_key: &str, position: u64) -> KtResult<(Vec<Trial>, u64)> {
        let trials = self.trials.lock();
        let start = usize::try_from(position).map_or(trials.len(), |p| p.min(trials.len()));
        let picked = trials[start..]
            .iter()
            .filter(|t| t.exp_key == exp_key)
            .cloned()
            .collect();
        Ok((picked, trials.len() as u64))
    }

    fn append(&self, trial: &Trial) -> KtResult<()> {
        self.trials.lock().push(trial.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trial::tests::result;
    use crate::trial::OptimizationConfig;
    use kt_types::{EvaluationStatus, ParamSample};
    use tempfile::TempDir;

    fn finished_trial(config: &OptimizationConfig, number: usize, loss: f64) -> Trial {
        let sample = ParamSample::from([("x".to_string(), number as f64 + 1.0)]);
        let mut trial = Trial::new(config, number, sample);
        trial.mark_running(Some("worker-0".into()));
        trial.finish(result(Some(loss), EvaluationStatus::Success));
        trial
    }

    #[test]
    fn journal_round_trips_trials() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), "circle").unwrap();
        assert!(store.load("kalman").unwrap().is_empty());

        let config = OptimizationConfig::covariance("circle", "random");
        let first = finished_trial(&config, 0, 1.0);
        let second = finished_trial(&config, 1, 0.5);
        store.append(&first).unwrap();
        store.append(&second).unwrap();

        let loaded = store.load("kalman").unwrap();
        assert_eq!(loaded, vec![first, second]);
        assert_eq!(store.path(), dir.path().join("circle.jsonl"));
    }

    #[test]
    fn journal_filters_by_exp_key() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), "circle").unwrap();

        let a = OptimizationConfig::covariance("circle", "random");
        let b = OptimizationConfig::covariance("circle", "random").with_exp_key("other");
        store.append(&finished_trial(&a, 0, 1.0)).unwrap();
        store.append(&finished_trial(&b, 0, 2.0)).unwrap();

        assert_eq!(store.load("kalman").unwrap().len(), 1);
        assert_eq!(store.load("other").unwrap().len(), 1);
        assert!(store.load("missing").unwrap().is_empty());
    }

    #[test]
    fn journal_skips_corrupt_lines() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), "circle").unwrap();
        let config = OptimizationConfig::covariance("circle", "random");

        store.append(&finished_trial(&config, 0, 1.0)).unwrap();
        // A writer that died mid-line
        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        file.write_all(b"{\"id\": \"trunc\n\n").unwrap();
        drop(file);
        store.append(&finished_trial(&config, 1, 2.0)).unwrap();

        let loaded = store.load("kalman").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].trial_number, 1);
    }

    #[test]
    fn incremental_reads_return_only_new_trials() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), "circle").unwrap();
        let config = OptimizationConfig::covariance("circle", "random");

        let (empty, start) = store.load_from("kalman", 0).unwrap();
        assert!(empty.is_empty());
        assert_eq!(start, 0);

        store.append(&finished_trial(&config, 0, 1.0)).unwrap();
        let (first, position) = store.load_from("kalman", start).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(position, fs::metadata(store.path()).unwrap().len());

        store.append(&finished_trial(&config, 1, 2.0)).unwrap();
        let (second, _) = store.load_from("kalman", position).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].trial_number, 1);
    }

    #[test]
    fn partial_trailing_line_is_left_for_the_next_read() {
        let dir = TempDir::new().unwrap();
        let store = JournalStore::open(dir.path(), "circle").unwrap();
        let config = OptimizationConfig::covariance("circle", "random");
        store.append(&finished_trial(&config, 0, 1.0)).unwrap();
        let complete = fs::metadata(store.path()).unwrap().len();

        // Another process is halfway through its append.
        let line = serde_json::to_vec(&finished_trial(&config, 1, 2.0)).unwrap();
        let (head, tail) = line.split_at(40);
        let mut file = OpenOptions::new().append(true).open(store.path()).unwrap();
        file.write_all(head).unwrap();

        let (trials, position) = store.load_from("kalman", 0).unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(position, complete);

        file.write_all(tail).unwrap();
        file.write_all(b"\n").unwrap();
        drop(file);
        let (rest, _) = store.load_from("kalman", position).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].trial_number, 1);
    }

    #[test]
    fn memory_store_reads_from_position() {
        let config = OptimizationConfig::covariance("circle", "random");
        let store = MemoryStore::new();
        store.append(&finished_trial(&config, 0, 1.0)).unwrap();
        let (first, position) = store.load_from("kalman", 0).unwrap();
        assert_eq!((first.len(), position), (1, 1));
        store.append(&finished_trial(&config, 1, 2.0)).unwrap();
        let (second, position) = store.load_from("kalman", position).unwrap();
        assert_eq!((second.len(), position), (1, 2));
        assert!(store.load_from("kalman", 99).unwrap().0.is_empty());
    }

    #[test]
    fn two_handles_share_one_journal() {
        let dir = TempDir::new().unwrap();
        let writer_a = JournalStore::open(dir.path(), "circle").unwrap();
        let writer_b = JournalStore::open(dir.path(), "circle").unwrap();
        let config = OptimizationConfig::covariance("circle", "random");

        writer_a.append(&finished_trial(&config, 0, 1.0)).unwrap();
        writer_b.append(&finished_trial(&config, 1, 2.0)).unwrap();

        assert_eq!(writer_a.load("kalman").unwrap().len(), 2);
    }

    #[test]
    fn memory_store_filters_by_exp_key() {
        let config = OptimizationConfig::covariance("circle", "random");
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.append(&finished_trial(&config, 0, 1.0)).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("kalman").unwrap().len(), 1);
        assert!(store.load("other").unwrap().is_empty());
    }
}

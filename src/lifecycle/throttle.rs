//! Persisted redraw delay shared with out-of-process visualizers

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use flume::Receiver;
use tracing::{debug, info, warn};

use crate::lifecycle::StopSignal;

/// Longest wait between stop checks in the persister
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read the persisted delay, falling back to `default` when the file is
/// missing or does not hold a finite, non-negative number.
pub fn read_throttle(path: &Path, default: f64) -> f64 {
    match fs::read_to_string(path) {
        Ok(text) => match text.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => value,
            _ => {
                debug!("Malformed throttle file {}: {:?}", path.display(), text);
                default
            }
        },
        Err(_) => default,
    }
}

/// Single-value text file, replaced atomically on every write
#[derive(Debug, Clone)]
pub struct ThrottleFile {
    path: PathBuf,
}

impl ThrottleFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(OsString::from)
            .unwrap_or_else(|| OsString::from("throttle"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Write `value` to a sibling temp file and rename it over the target
    pub fn write(&self, value: f64) -> io::Result<()> {
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            writeln!(file, "{value}")?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)
    }

    pub fn read(&self, default: f64) -> f64 {
        read_throttle(&self.path, default)
    }

    /// Delete the file; a file that is already gone is not an error
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
            _ => Ok(()),
        }
    }
}

/// Drains operator updates to the latest value and persists it once per interval
pub struct ThrottlePersister {
    file: ThrottleFile,
    updates: Receiver<f64>,
    interval: Duration,
    stop: StopSignal,
}

impl ThrottlePersister {
    pub fn new(
        file: ThrottleFile,
        updates: Receiver<f64>,
        interval: Duration,
        stop: StopSignal,
    ) -> Self {
        Self {
            file,
            updates,
            interval,
            stop,
        }
    }

    /// Persist the newest pending value, if any. Returns the value written.
    pub fn flush(&self) -> Option<f64> {
        let latest = self.updates.try_iter().last()?;
        match self.file.write(latest) {
            Ok(()) => {
                info!("Throttle delay set to {}s", latest);
                Some(latest)
            }
            Err(err) => {
                warn!(
                    "Failed to persist throttle delay to {}: {}",
                    self.file.path().display(),
                    err
                );
                None
            }
        }
    }

    /// Loop until the stop signal is set. Pending values are discarded on stop.
    pub fn run(self) {
        while !self.stop.sleep(self.interval, POLL_INTERVAL) {
            self.flush();
        }
        debug!("Throttle persister stopped");
    }
}

//! Periodic crash-safe persistence of registry snapshots.
//!
//! Saves go through a temp-file-then-atomic-rename sequence so a reader
//! never observes a half-written snapshot; a failed save is logged and the
//! loop carries on at the next tick.

use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::registry::CounterRegistry;
use crate::snapshot::{Snapshot, SnapshotData};

/// Writes a snapshot to `path` with the binary adapter, atomically.
pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<()> {
    save_data(&snapshot.to_data(), path)
}

fn save_data(data: &SnapshotData, path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(Error::Persistence)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        bincode::serialize_into(&mut writer, data)
            .map_err(|e| Error::Persistence(io::Error::new(io::ErrorKind::Other, e)))?;
        writer.flush().map_err(Error::Persistence)?;
    }
    tmp.persist(path).map_err(|e| Error::Persistence(e.error))?;
    Ok(())
}

/// Loads a snapshot written by [`save_snapshot`]. A missing, truncated or
/// non-binary file is a hard [`Error::SnapshotLoad`]; no partial snapshot
/// is ever returned.
pub fn load_snapshot(path: &Path) -> Result<SnapshotData> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::SnapshotLoad(format!("{}: {e}", path.display())))?;
    SnapshotData::read_binary(BufReader::new(file))
}

/// Background loop that persists a registry snapshot on a fixed interval.
///
/// One dedicated thread sleeps for the interval, checks the stop signal,
/// then saves. Save failures never terminate the loop. [`stop`](Self::stop)
/// is cooperative and waits up to three intervals for the thread to
/// finish; an in-progress save is not interrupted.
pub struct PersistenceScheduler {
    stop_tx: mpsc::Sender<()>,
    handle: Option<JoinHandle<()>>,
    interval: Duration,
}

impl PersistenceScheduler {
    /// Spawns the persistence thread, saving snapshots of `registry` to
    /// `path` every `interval`.
    pub fn start(
        registry: Arc<CounterRegistry>,
        path: impl Into<PathBuf>,
        interval: Duration,
    ) -> Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let path = path.into();
        let handle = thread::Builder::new()
            .name("telemetria-persist".into())
            .spawn(move || run(registry, path, interval, stop_rx))
            .map_err(Error::Persistence)?;
        Ok(Self {
            stop_tx,
            handle: Some(handle),
            interval,
        })
    }

    /// The configured save interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Signals the loop to exit and waits up to 3× the interval for it to
    /// do so. Returns `false` if the thread (e.g. stuck in a slow save)
    /// had not finished within the bound; it is then left to finish on
    /// its own.
    pub fn stop(mut self) -> bool {
        let _ = self.stop_tx.send(());
        let Some(handle) = self.handle.take() else {
            return true;
        };
        let deadline = Instant::now() + self.interval * 3;
        while !handle.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if handle.is_finished() {
            let _ = handle.join();
            true
        } else {
            tracing::warn!("persistence loop did not stop within 3x interval; detaching");
            false
        }
    }
}

impl Drop for PersistenceScheduler {
    fn drop(&mut self) {
        // Dropping stop_tx disconnects the channel, which the loop treats
        // as a stop signal; the thread is detached rather than joined so
        // an unwinding caller is not blocked.
        if self.handle.is_some() {
            let _ = self.stop_tx.send(());
        }
    }
}

fn run(
    registry: Arc<CounterRegistry>,
    path: PathBuf,
    interval: Duration,
    stop_rx: mpsc::Receiver<()>,
) {
    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let snapshot = registry.snapshot();
                if let Err(err) = save_snapshot(&snapshot, &path) {
                    tracing::error!(
                        error = %err,
                        path = %path.display(),
                        "periodic snapshot save failed"
                    );
                }
            }
        }
    }
}

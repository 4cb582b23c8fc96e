//! Backlog snapshots
//!
//! A snapshot captures the complete backlog state (configuration, pending
//! keys, seen keys and re-add counters) as JSON so an interrupted crawl can be
//! resumed later.

use super::{Backlog, BacklogError, BacklogResult, BacklogState, Key, SelectionStrategy};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

/// Format version written into every snapshot
pub const SNAPSHOT_VERSION: u32 = 1;

/// Number of pending keys shown by `inspect_snapshot`
const SUMMARY_HEAD: usize = 10;

#[derive(Debug, Serialize, Deserialize)]
struct BacklogSnapshot<K> {
    version: u32,
    strategy: SelectionStrategy,
    re_add_limit: u32,
    pending: Vec<K>,
    seen: Vec<K>,
    // pairs instead of a map so non-string keys serialize
    re_adds: Vec<(K, u32)>,
}

impl<K> BacklogSnapshot<K> {
    fn check_version(&self) -> BacklogResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(BacklogError::Snapshot(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        Ok(())
    }
}

/// Overview of a snapshot file, readable without knowing the key type
#[derive(Debug, Clone)]
pub struct SnapshotSummary {
    pub strategy: SelectionStrategy,
    pub re_add_limit: u32,
    pub pending: usize,
    pub seen: usize,
    pub re_added_keys: usize,
    pub exhausted_keys: usize,
    pub head: Vec<serde_json::Value>,
}

impl<K: Key> Backlog<K> {
    /// Serializes the full backlog state to a writer
    pub fn persist<W: Write>(&self, writer: W) -> BacklogResult<()> {
        let snapshot = {
            let state = self.state();
            BacklogSnapshot {
                version: SNAPSHOT_VERSION,
                strategy: self.strategy,
                re_add_limit: self.re_add_limit,
                pending: state.pending.iter().cloned().collect(),
                seen: state.seen.iter().cloned().collect(),
                re_adds: state
                    .re_adds
                    .iter()
                    .map(|(key, count)| (key.clone(), *count))
                    .collect(),
            }
        };

        let mut writer = BufWriter::new(writer);
        serde_json::to_writer(&mut writer, &snapshot)?;
        writer.flush()?;
        Ok(())
    }

    /// Rebuilds a backlog from a snapshot previously written by `persist`
    pub fn restore<R: Read>(reader: R) -> BacklogResult<Self> {
        let snapshot: BacklogSnapshot<K> = serde_json::from_reader(BufReader::new(reader))?;
        snapshot.check_version()?;

        let state = BacklogState {
            pending: snapshot.pending.into(),
            seen: snapshot.seen.into_iter().collect(),
            re_adds: snapshot.re_adds.into_iter().collect(),
        };

        Ok(Self {
            strategy: snapshot.strategy,
            re_add_limit: snapshot.re_add_limit,
            state: std::sync::Mutex::new(state),
        })
    }

    /// Writes a snapshot to `path`
    ///
    /// The snapshot goes to a sibling temporary file first and is renamed
    /// into place, so an existing snapshot is never left truncated.
    pub fn persist_to_path(&self, path: &Path) -> BacklogResult<()> {
        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = Path::new(&tmp_name);

        self.persist(File::create(tmp_path)?)?;
        fs::rename(tmp_path, path)?;

        tracing::debug!(
            "Persisted backlog to {} ({} pending, {} seen)",
            path.display(),
            self.len(),
            self.total()
        );
        Ok(())
    }

    /// Restores a backlog from `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Snapshot file written by `persist_to_path`
    /// * `missing_ok` - Return a fresh default backlog instead of failing
    ///   when the file does not exist
    pub fn from_path(path: &Path, missing_ok: bool) -> BacklogResult<Self> {
        match File::open(path) {
            Ok(file) => {
                let backlog = Self::restore(file)?;
                tracing::info!(
                    "Restored backlog from {} ({} pending, {} seen)",
                    path.display(),
                    backlog.len(),
                    backlog.total()
                );
                Ok(backlog)
            }
            Err(e) if missing_ok && e.kind() == ErrorKind::NotFound => {
                tracing::info!("No backlog snapshot at {}, starting fresh", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Reads a snapshot file and summarizes it
pub fn inspect_snapshot(path: &Path) -> BacklogResult<SnapshotSummary> {
    let file = File::open(path)?;
    let snapshot: BacklogSnapshot<serde_json::Value> =
        serde_json::from_reader(BufReader::new(file))?;
    snapshot.check_version()?;

    let exhausted_keys = snapshot
        .re_adds
        .iter()
        .filter(|(_, count)| *count >= snapshot.re_add_limit)
        .count();

    Ok(SnapshotSummary {
        strategy: snapshot.strategy,
        re_add_limit: snapshot.re_add_limit,
        pending: snapshot.pending.len(),
        seen: snapshot.seen.len(),
        re_added_keys: snapshot.re_adds.len(),
        exhausted_keys,
        head: snapshot.pending.into_iter().take(SUMMARY_HEAD).collect(),
    })
}

//! Persisted rotation state with backup and restore.
//!
//! The state is a single JSON record. Before any mutating rotation attempt the controller
//! takes a [Backup] of the raw persisted bytes; if the rotation cannot be confirmed the
//! backup is written back verbatim, which is the only way a rotation is undone.

use crate::{node::Node, Error};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tracing::{info, warn};

/// Suffix appended to the state file's stem to name its backup.
const BACKUP_SUFFIX: &str = "_backup";

/// The persisted record of which node is expected to forge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationState {
    /// Node currently expected to be forging (empty before the first rotation).
    pub active_node: Node,

    /// Milliseconds since the UNIX epoch of the last successful rotation.
    pub last_rotation_timestamp: u64,

    /// True only until the first rotation has completed.
    pub initialized: bool,

    /// Missed block count observed during the last rotation.
    #[serde(default)]
    pub missed_blocks: Option<u64>,
}

impl Default for RotationState {
    fn default() -> Self {
        Self {
            active_node: Node::default(),
            last_rotation_timestamp: 0,
            initialized: true,
            missed_blocks: None,
        }
    }
}

impl RotationState {
    /// Decode a persisted record, rejecting records that name no active node after the
    /// first rotation.
    pub fn decode(bytes: &[u8]) -> Result<Self, Error> {
        let state: Self = serde_json::from_slice(bytes)?;
        if !state.initialized && state.active_node.is_empty() {
            return Err(Error::Malformed("state has no active node"));
        }
        Ok(state)
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// Snapshot of the persisted bytes (or their absence) taken before a rotation attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backup(Option<Vec<u8>>);

impl Backup {
    pub(crate) fn new(bytes: Option<Vec<u8>>) -> Self {
        Self(bytes)
    }

    /// Raw bytes that were persisted when the backup was taken.
    pub fn bytes(&self) -> Option<&[u8]> {
        self.0.as_deref()
    }
}

/// Storage for the single [RotationState] record.
pub trait Store {
    /// Load the persisted state, or the bootstrap default if nothing has been persisted.
    fn load(&self) -> Result<RotationState, Error>;

    /// Persist `state`. A returned error means the state must not be assumed persisted.
    fn save(&mut self, state: &RotationState) -> Result<(), Error>;

    /// Snapshot the currently persisted state.
    fn backup(&mut self) -> Result<Backup, Error>;

    /// Overwrite the persisted state with `backup`.
    fn restore(&mut self, backup: Backup) -> Result<(), Error>;
}

/// [Store] backed by a JSON file with a sibling backup copy.
pub struct FileStore {
    path: PathBuf,
    backup_path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let backup_path = backup_path(&path);
        Self { path, backup_path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    fn read(&self) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Derive `<dir>/<stem>_backup.<ext>` from `<dir>/<stem>.<ext>`.
fn backup_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}{BACKUP_SUFFIX}.{}", ext.to_string_lossy()),
        None => format!("{stem}{BACKUP_SUFFIX}"),
    };
    path.with_file_name(name)
}

/// Write `bytes` to a temporary sibling and rename it over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Error> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

impl Store for FileStore {
    fn load(&self) -> Result<RotationState, Error> {
        match self.read()? {
            Some(bytes) => RotationState::decode(&bytes),
            None => {
                info!(path = %self.path.display(), "no persisted state, bootstrapping");
                Ok(RotationState::default())
            }
        }
    }

    fn save(&mut self, state: &RotationState) -> Result<(), Error> {
        let bytes = state.encode()?;
        write_atomic(&self.path, &bytes)
            .map_err(|err| Error::PersistenceFailure(err.to_string()))?;
        info!(path = %self.path.display(), "saved state");
        Ok(())
    }

    fn backup(&mut self) -> Result<Backup, Error> {
        let bytes = self.read()?;
        match &bytes {
            Some(bytes) => write_atomic(&self.backup_path, bytes)?,
            None => remove_if_exists(&self.backup_path)?,
        }
        info!(path = %self.backup_path.display(), "created backup of state");
        Ok(Backup::new(bytes))
    }

    fn restore(&mut self, backup: Backup) -> Result<(), Error> {
        match backup.bytes() {
            Some(bytes) => write_atomic(&self.path, bytes)?,
            None => {
                warn!(path = %self.path.display(), "no state existed before backup, removing");
                remove_if_exists(&self.path)?;
            }
        }
        info!(path = %self.path.display(), "restored backup of state");
        Ok(())
    }
}

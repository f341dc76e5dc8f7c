use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::console::ConsoleStream;
use crate::emitter::{AsyncEmitter, Record, StatsSnapshot};
use crate::error::{EmitterError, SetupError};

/// Canonical identity of a destination. Two setups asking for the same
/// key get the same destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DestinationKey {
    /// Resolved absolute path of the live log file.
    File(PathBuf),
    Console(ConsoleStream),
    /// A user-supplied sink, identified by name.
    Custom(String),
}

impl DestinationKey {
    /// Resolve `file` under `dir`, creating the containing directory, and
    /// canonicalise it so different spellings of one path compare equal.
    pub fn for_file(dir: &Path, file: impl AsRef<Path>) -> Result<Self, SetupError> {
        let joined = dir.join(file.as_ref());
        let parent = match joined.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = joined
            .file_name()
            .ok_or_else(|| SetupError::OpenFile {
                path: joined.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "log file name is empty"),
            })?
            .to_os_string();

        fs::create_dir_all(&parent).map_err(|source| SetupError::CreateDirectory {
            path: parent.clone(),
            source,
        })?;
        let parent = fs::canonicalize(&parent).map_err(|source| SetupError::CreateDirectory {
            path: parent.clone(),
            source,
        })?;
        Ok(DestinationKey::File(parent.join(name)))
    }

    pub fn file_path(&self) -> Option<&Path> {
        match self {
            DestinationKey::File(path) => Some(path),
            DestinationKey::Console(_) | DestinationKey::Custom(_) => None,
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestinationKey::File(path) => write!(f, "file:{}", path.display()),
            DestinationKey::Console(stream) => write!(f, "console:{}", stream.as_str()),
            DestinationKey::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

struct Destination {
    key: DestinationKey,
    emitter: AsyncEmitter,
}

/// Attached destinations, at most one per [`DestinationKey`].
#[derive(Default)]
pub struct Registry {
    destinations: Vec<Destination>,
}

impl Registry {
    pub fn contains(&self, key: &DestinationKey) -> bool {
        self.destinations.iter().any(|d| &d.key == key)
    }

    /// Attach the destination built by `build` unless a live one is already
    /// present under `key`, in which case `build` is never called. A
    /// destination that failed fatally is closed and replaced. Returns
    /// whether a destination was attached.
    pub fn register_with<F, E>(&mut self, key: DestinationKey, build: F) -> Result<bool, E>
    where
        F: FnOnce() -> Result<AsyncEmitter, E>,
    {
        let existing = self.destinations.iter().position(|d| d.key == key);
        if let Some(index) = existing {
            if !self.destinations[index].emitter.is_dead() {
                return Ok(false);
            }
            let emitter = build()?;
            let dead = std::mem::replace(&mut self.destinations[index].emitter, emitter);
            if let Err(e) = dead.close() {
                tracing::warn!(destination = %key, error = %e, "replaced failed log destination");
            }
            return Ok(true);
        }
        let emitter = build()?;
        self.destinations.push(Destination { key, emitter });
        Ok(true)
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn keys(&self) -> Vec<DestinationKey> {
        self.destinations.iter().map(|d| d.key.clone()).collect()
    }

    pub fn emit_all(&self, record: &Record) {
        for destination in &self.destinations {
            destination.emitter.emit(Record::clone(record));
        }
    }

    pub fn flush_all(&self) {
        for destination in &self.destinations {
            destination.emitter.flush();
        }
    }

    pub fn stats(&self) -> Vec<(DestinationKey, StatsSnapshot)> {
        self.destinations
            .iter()
            .map(|d| (d.key.clone(), d.emitter.stats()))
            .collect()
    }

    /// Detach and close every destination. All are closed even if some
    /// fail; the first error is returned.
    pub fn close_all(&mut self) -> Result<(), EmitterError> {
        let mut first_err = None;
        for destination in self.destinations.drain(..) {
            if let Err(e) = destination.emitter.close() {
                tracing::error!(destination = %destination.key, error = %e, "log destination failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

//! Result storage keyed by job handle.
//!
//! Exactly one worker writes the result for a handle; any number of
//! readers may load it while the owning job is referenced. The job store
//! deletes a result only once no remaining job shares its handle.

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use ulid::Ulid;

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Storage for job results.
pub trait ResultStore: Send + Sync + fmt::Debug {
    /// Stores the result for `handle`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the result cannot be written.
    fn store(&self, handle: &str, frame: Frame) -> Result<()>;

    /// Loads the result for `handle`, or `None` if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the result cannot be read.
    fn load(&self, handle: &str) -> Result<Option<Arc<Frame>>>;

    /// Deletes the result for `handle`. Deleting a missing result succeeds.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the result cannot be removed.
    fn delete(&self, handle: &str) -> Result<()>;
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Keeps results in process memory.
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    frames: RwLock<HashMap<String, Arc<Frame>>>,
}

impl InMemoryResultStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored results.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.frames.read().map_err(poison_err)?.len())
    }

    /// Returns true if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl ResultStore for InMemoryResultStore {
    fn store(&self, handle: &str, frame: Frame) -> Result<()> {
        self.frames
            .write()
            .map_err(poison_err)?
            .insert(handle.to_string(), Arc::new(frame));
        Ok(())
    }

    fn load(&self, handle: &str) -> Result<Option<Arc<Frame>>> {
        Ok(self.frames.read().map_err(poison_err)?.get(handle).cloned())
    }

    fn delete(&self, handle: &str) -> Result<()> {
        self.frames.write().map_err(poison_err)?.remove(handle);
        Ok(())
    }
}

/// Persists results as JSON files named `job-<handle>.data`.
pub struct FsResultStore {
    dir: PathBuf,
}

impl FsResultStore {
    /// Creates a store rooted at `dir`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::storage_with_source(format!("cannot create {}", dir.display()), e)
        })?;
        Ok(Self { dir })
    }

    /// Returns the data directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file that holds the result for `handle`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the handle is not safe to use in a file name.
    pub fn path_for(&self, handle: &str) -> Result<PathBuf> {
        let safe = !handle.is_empty()
            && handle
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(Error::storage(format!("unsafe result handle '{handle}'")));
        }
        Ok(self.dir.join(format!("job-{handle}.data")))
    }
}

impl fmt::Debug for FsResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsResultStore")
            .field("dir", &self.dir)
            .finish()
    }
}

impl ResultStore for FsResultStore {
    fn store(&self, handle: &str, frame: Frame) -> Result<()> {
        let path = self.path_for(handle)?;
        let bytes = serde_json::to_vec(&frame)?;
        let tmp = self
            .dir
            .join(format!(".job-{handle}.{}.tmp", Ulid::new().to_string().to_lowercase()));
        std::fs::write(&tmp, bytes).map_err(|e| {
            Error::storage_with_source(format!("cannot write {}", tmp.display()), e)
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            Error::storage_with_source(format!("cannot move result to {}", path.display()), e)
        })
    }

    fn load(&self, handle: &str) -> Result<Option<Arc<Frame>>> {
        let path = self.path_for(handle)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(Arc::new(serde_json::from_slice(&bytes)?))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::storage_with_source(
                format!("cannot read {}", path.display()),
                e,
            )),
        }
    }

    fn delete(&self, handle: &str) -> Result<()> {
        let path = self.path_for(handle)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with_source(
                format!("cannot delete {}", path.display()),
                e,
            )),
        }
    }
}

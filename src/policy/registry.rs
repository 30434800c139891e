use crate::policy::{PolicyMode, PolicyRegistry, PolicyState, PolicyUpdate};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Structural registry failures. These halt rollout progression.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize registry: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("control_rate must be in [0, 1], got {0}")]
    InvalidRate(f64),

    #[error("Failed to lock registry via {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry lock poisoned by a panicked writer")]
    Poisoned,
}

/// Exclusive advisory lock on a sidecar file
///
/// Held by [`PolicyRegistryService`] from the read through the write, so
/// separate processes sharing one registry file serialize their cycles.
pub struct LockFile {
    path: PathBuf,
    lock: fd_lock::RwLock<File>,
}

impl LockFile {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let lock_err = |source: std::io::Error| RegistryError::Lock {
            path: path.clone(),
            source,
        };

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(lock_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(lock_err)?;

        Ok(Self {
            path,
            lock: fd_lock::RwLock::new(file),
        })
    }

    /// Block until no other holder remains
    pub fn acquire(&mut self) -> Result<fd_lock::RwLockWriteGuard<'_, File>, RegistryError> {
        let path = self.path.clone();
        self.lock
            .write()
            .map_err(|source| RegistryError::Lock { path, source })
    }
}

/// Durable storage for the policy registry document
pub trait RegistryStore: Send {
    /// Read the stored registry; `Ok(None)` when nothing has been written yet
    fn read(&self) -> Result<Option<PolicyRegistry>, RegistryError>;

    /// Replace the stored registry as one unit
    fn write(&mut self, registry: &PolicyRegistry) -> Result<(), RegistryError>;

    /// Store the first registry document; `Ok(false)` if one already exists
    fn create(&mut self, registry: &PolicyRegistry) -> Result<bool, RegistryError> {
        if self.read()?.is_some() {
            return Ok(false);
        }
        self.write(registry)?;
        Ok(true)
    }

    /// Lock shared with other processes using the same store, if any
    fn lock_file(&self) -> Result<Option<LockFile>, RegistryError> {
        Ok(None)
    }
}

/// Pretty-printed JSON file, replaced by write-to-temp + atomic rename
///
/// A concurrent reader of the file sees either the old or the new document,
/// never a partial one. Writers coordinate through `<file>.lock`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sidecar lock path, e.g. `policy_registry.json.lock`
    pub fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn io_err(&self, source: std::io::Error) -> RegistryError {
        RegistryError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn staged(&self, registry: &PolicyRegistry) -> Result<tempfile::NamedTempFile, RegistryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;

        let json = serde_json::to_vec_pretty(registry)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_err(e))?;
        tmp.write_all(&json).map_err(|e| self.io_err(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        Ok(tmp)
    }
}

impl RegistryStore for JsonFileStore {
    fn read(&self) -> Result<Option<PolicyRegistry>, RegistryError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_err(e)),
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| RegistryError::Corrupt {
                path: self.path.clone(),
                source,
            })
    }

    fn write(&mut self, registry: &PolicyRegistry) -> Result<(), RegistryError> {
        let tmp = self.staged(registry)?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;
        Ok(())
    }

    fn create(&mut self, registry: &PolicyRegistry) -> Result<bool, RegistryError> {
        let tmp = self.staged(registry)?;
        match tmp.persist_noclobber(&self.path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(self.io_err(e.error)),
        }
    }

    fn lock_file(&self) -> Result<Option<LockFile>, RegistryError> {
        LockFile::open(self.lock_path()).map(Some)
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    registry: Option<PolicyRegistry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_registry(registry: PolicyRegistry) -> Self {
        Self {
            registry: Some(registry),
        }
    }
}

impl RegistryStore for MemoryStore {
    fn read(&self) -> Result<Option<PolicyRegistry>, RegistryError> {
        Ok(self.registry.clone())
    }

    fn write(&mut self, registry: &PolicyRegistry) -> Result<(), RegistryError> {
        self.registry = Some(registry.clone());
        Ok(())
    }
}

/// Outcome of a [`PolicyRegistryService::transact`] call
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    /// Current state observed inside the critical section
    pub previous: PolicyState,
    /// Newly created state, if the closure requested an update
    pub created: Option<PolicyState>,
}

/// Versioned policy registry behind a single lock
///
/// Every operation holds the lock for its full duration, so `load` never
/// observes a half-applied update and `transact` makes a read-modify-write
/// atomic. The in-process mutex orders callers sharing this service; the
/// store's lock file orders separate services and processes on one file.
///
/// # Example
/// ```
/// use rollout_guard::policy::{MemoryStore, PolicyMode, PolicyRegistryService};
///
/// let registry = PolicyRegistryService::new(MemoryStore::new(), 0.10);
/// assert_eq!(registry.load()?.current.policy_version, "P0");
///
/// let state = registry.update(0.05, PolicyMode::Experiment, "rollout GO -> 0.05")?;
/// assert_eq!(state.policy_version, "P1");
/// # Ok::<(), rollout_guard::policy::RegistryError>(())
/// ```
#[derive(Debug)]
pub struct PolicyRegistryService<S: RegistryStore> {
    store: Mutex<S>,
    default_control_rate: f64,
}

impl<S: RegistryStore> PolicyRegistryService<S> {
    pub fn new(store: S, default_control_rate: f64) -> Self {
        Self {
            store: Mutex::new(store),
            default_control_rate,
        }
    }

    /// Current registry, bootstrapping the default on first access
    pub fn load(&self) -> Result<PolicyRegistry, RegistryError> {
        let mut store = self.store.lock().map_err(|_| RegistryError::Poisoned)?;
        let mut lock = store.lock_file()?;
        let _guard = lock.as_mut().map(LockFile::acquire).transpose()?;
        self.load_locked(&mut *store)
    }

    /// Current policy state
    pub fn current(&self) -> Result<PolicyState, RegistryError> {
        Ok(self.load()?.current)
    }

    /// Append the current state to history and install a new one
    pub fn update(
        &self,
        control_rate: f64,
        mode: PolicyMode,
        notes: impl Into<String>,
    ) -> Result<PolicyState, RegistryError> {
        let update = PolicyUpdate {
            control_rate,
            mode,
            notes: notes.into(),
        };
        let tx = self.transact(move |_| Some(update))?;
        // transact always creates a state when the closure returns Some
        Ok(tx.created.unwrap_or(tx.previous))
    }

    /// Atomic read-modify-write
    ///
    /// `decide` sees the current state and returns the update to apply, or
    /// `None` to leave the registry untouched. Both locks are held from the
    /// read through the write.
    pub fn transact<F>(&self, decide: F) -> Result<Transaction, RegistryError>
    where
        F: FnOnce(&PolicyState) -> Option<PolicyUpdate>,
    {
        let mut store = self.store.lock().map_err(|_| RegistryError::Poisoned)?;
        let mut lock = store.lock_file()?;
        let _guard = lock.as_mut().map(LockFile::acquire).transpose()?;
        let mut registry = self.load_locked(&mut *store)?;
        let previous = registry.current.clone();

        let Some(update) = decide(&previous) else {
            return Ok(Transaction {
                previous,
                created: None,
            });
        };

        if !(0.0..=1.0).contains(&update.control_rate) {
            return Err(RegistryError::InvalidRate(update.control_rate));
        }

        let created = registry.supersede(update, chrono::Utc::now().to_rfc3339());
        store.write(&registry)?;

        tracing::info!(
            from = %previous.policy_version,
            to = %created.policy_version,
            control_rate = created.control_rate,
            mode = %created.mode,
            "Policy registry updated"
        );

        Ok(Transaction {
            previous,
            created: Some(created),
        })
    }

    fn load_locked(&self, store: &mut S) -> Result<PolicyRegistry, RegistryError> {
        if let Some(registry) = store.read()? {
            return Ok(registry);
        }

        let registry = PolicyRegistry::bootstrap(self.default_control_rate);
        if !store.create(&registry)? {
            // another writer got there first; its document wins
            return self.load_locked(store);
        }
        tracing::info!(
            control_rate = self.default_control_rate,
            "Bootstrapped policy registry"
        );
        Ok(registry)
    }
}

//! Durable monotonic counter store.
//!
//! The counter is the trust anchor of every token: it only moves forward, by
//! exactly one per issuance, and an acknowledged increment survives a crash.
//!
//! ## Record Format
//! ```text
//! [4]  magic "SLPC"
//! [1]  format version (= 1)
//! [8]  counter, big-endian u64
//! [32] BLAKE3 over the 13 bytes above
//! ```
//!
//! ## Write Protocol
//! 1. Write the new record to a temp file in the same directory (mode 0600)
//! 2. fsync the temp file
//! 3. Atomically rename it over the committed record
//! 4. fsync the parent directory
//!
//! A crash at any point leaves either the old or the new record on disk.

use crate::config::{CorruptionPolicy, SlpConfig};
use crate::crypto::blake3;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;

pub const RECORD_MAGIC: [u8; 4] = *b"SLPC";
pub const RECORD_VERSION: u8 = 1;
pub const RECORD_LEN: usize = 4 + 1 + 8 + 32;

const BODY_LEN: usize = 4 + 1 + 8;

/// Atomic read/increment access to a monotonic counter.
///
/// Implementations own the counter value; nothing else may write it.
pub trait CounterStore: Send + Sync {
    /// Current value. Never mutates state.
    fn read(&self) -> Result<u64, CounterError>;

    /// Advance by one and durably persist before returning the new value.
    ///
    /// Must be a single critical section: no concurrent `read` or
    /// `increment` observes anything but the old or the new value.
    fn increment(&self) -> Result<u64, CounterError>;

    /// Best-effort, non-mutating check that the backing medium is usable.
    fn check_integrity(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("Counter storage I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Counter record is corrupt: {0}")]
    Corrupt(#[from] RecordError),

    #[error("Counter overflow: maximum value reached")]
    Overflow,

    #[error("Timed out after {0:?} waiting for the counter lock")]
    LockTimeout(Duration),

    #[error("Counter operation interrupted: {0}")]
    Interrupted(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("bad magic")]
    BadMagic,

    #[error("unsupported record version: {0}")]
    UnsupportedVersion(u8),

    #[error("checksum mismatch")]
    ChecksumMismatch,
}

/// Encode a counter value as a committed record.
pub fn encode_record(value: u64) -> [u8; RECORD_LEN] {
    let mut record = [0u8; RECORD_LEN];
    record[..4].copy_from_slice(&RECORD_MAGIC);
    record[4] = RECORD_VERSION;
    record[5..BODY_LEN].copy_from_slice(&value.to_be_bytes());
    let checksum = blake3(&record[..BODY_LEN]);
    record[BODY_LEN..].copy_from_slice(&checksum);
    record
}

/// Decode and validate a committed record.
pub fn decode_record(bytes: &[u8]) -> Result<u64, RecordError> {
    if bytes.len() != RECORD_LEN {
        return Err(RecordError::InvalidLength {
            expected: RECORD_LEN,
            actual: bytes.len(),
        });
    }
    if bytes[..4] != RECORD_MAGIC {
        return Err(RecordError::BadMagic);
    }
    if bytes[4] != RECORD_VERSION {
        return Err(RecordError::UnsupportedVersion(bytes[4]));
    }
    if blake3(&bytes[..BODY_LEN])[..] != bytes[BODY_LEN..] {
        return Err(RecordError::ChecksumMismatch);
    }

    let mut value = [0u8; 8];
    value.copy_from_slice(&bytes[5..BODY_LEN]);
    Ok(u64::from_be_bytes(value))
}

/// Options for [`FileCounterStore::open`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub on_corrupt: CorruptionPolicy,
    pub lock_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions::from(&SlpConfig::default())
    }
}

impl From<&SlpConfig> for StoreOptions {
    fn from(config: &SlpConfig) -> Self {
        Self {
            on_corrupt: config.on_corrupt,
            lock_timeout: config.lock_timeout(),
        }
    }
}

// One critical section per record path, shared by every store handle in the
// process that points at it.
static STORE_LOCKS: Lazy<Mutex<HashMap<PathBuf, Weak<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn lock_for(path: &Path) -> Arc<Mutex<()>> {
    let mut locks = STORE_LOCKS.lock();
    locks.retain(|_, lock| lock.strong_count() > 0);
    if let Some(lock) = locks.get(path).and_then(Weak::upgrade) {
        return lock;
    }
    let lock = Arc::new(Mutex::new(()));
    locks.insert(path.to_path_buf(), Arc::downgrade(&lock));
    lock
}

/// File-backed counter store.
#[derive(Debug)]
pub struct FileCounterStore {
    path: PathBuf,
    dir: PathBuf,
    options: StoreOptions,
    lock: Arc<Mutex<()>>,
}

impl FileCounterStore {
    /// Open the store at `path`, creating it with value 0 if absent.
    ///
    /// Under [`CorruptionPolicy::Reject`] an existing unparsable record makes
    /// `open` fail.
    pub fn open(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self, CounterError> {
        let path = path.as_ref();
        let file_name = path.file_name().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("counter store path has no file name: {}", path.display()),
            )
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;
        let dir = dir.canonicalize()?;
        let path = dir.join(file_name);

        let store = Self {
            lock: lock_for(&path),
            path,
            dir,
            options,
        };

        {
            let _guard = store.lock()?;
            match fs::read(&store.path) {
                Ok(bytes) => {
                    if let Err(e) = decode_record(&bytes) {
                        match store.options.on_corrupt {
                            CorruptionPolicy::Reject => return Err(e.into()),
                            CorruptionPolicy::Bootstrap => tracing::error!(
                                path = %store.path.display(),
                                "Counter record is unreadable ({}); it will read as 0",
                                e
                            ),
                        }
                    }
                    restrict_permissions(&store.path);
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    store.persist(0)?;
                    tracing::info!(
                        path = %store.path.display(),
                        "Created counter store with value 0"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(store)
    }

    /// Path of the committed record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, CounterError> {
        self.lock
            .try_lock_for(self.options.lock_timeout)
            .ok_or(CounterError::LockTimeout(self.options.lock_timeout))
    }

    fn read_locked(&self) -> Result<u64, CounterError> {
        match fs::read(&self.path) {
            Ok(bytes) => match decode_record(&bytes) {
                Ok(value) => Ok(value),
                Err(e) => match self.options.on_corrupt {
                    CorruptionPolicy::Bootstrap => {
                        tracing::error!(
                            path = %self.path.display(),
                            "Counter record is unreadable ({}); reading as 0",
                            e
                        );
                        Ok(0)
                    }
                    CorruptionPolicy::Reject => Err(e.into()),
                },
            },
            // The record existed at open, so a vanished one is an anomaly.
            Err(e) if e.kind() == io::ErrorKind::NotFound => match self.options.on_corrupt {
                CorruptionPolicy::Bootstrap => {
                    tracing::warn!(
                        path = %self.path.display(),
                        "Counter record is missing; reading as 0"
                    );
                    Ok(0)
                }
                CorruptionPolicy::Reject => {
                    tracing::error!(path = %self.path.display(), "Counter record vanished");
                    Err(e.into())
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, value: u64) -> Result<(), CounterError> {
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file()
                .set_permissions(fs::Permissions::from_mode(0o600))?;
        }

        temp.as_file_mut().write_all(&encode_record(value))?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| e.error)?;
        sync_directory(&self.dir)?;
        Ok(())
    }
}

impl CounterStore for FileCounterStore {
    fn read(&self) -> Result<u64, CounterError> {
        let _guard = self.lock()?;
        let value = self.read_locked()?;
        tracing::debug!(value, "Read monotonic counter");
        Ok(value)
    }

    fn increment(&self) -> Result<u64, CounterError> {
        let _guard = self.lock()?;
        let current = self.read_locked()?;
        let next = match current.checked_add(1) {
            Some(next) => next,
            None => {
                tracing::error!(
                    path = %self.path.display(),
                    "Counter overflow: maximum value reached, refusing to wrap"
                );
                return Err(CounterError::Overflow);
            }
        };

        self.persist(next)?;
        tracing::debug!(value = next, "Advanced monotonic counter");
        Ok(next)
    }

    fn check_integrity(&self) -> bool {
        let Ok(_guard) = self.lock() else {
            return false;
        };
        match fs::read(&self.path) {
            Ok(bytes) => match decode_record(&bytes) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "Integrity check failed: {}", e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Integrity check failed: {}", e);
                false
            }
        }
    }
}

fn restrict_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            tracing::warn!(
                path = %path.display(),
                "Failed to restrict counter store permissions: {}",
                e
            );
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> io::Result<()> {
    Ok(())
}

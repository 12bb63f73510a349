//! Main store tying the mapping, the write gate and the listeners together.

use crate::error::{Result, StoreError};
use crate::gate::{Ticket, WriteGate};
use crate::listeners::{Notifier, UpdateListener};
use crate::persist;
use crate::types::{AccountBinding, NotificationId, Registrations, SubscriberKey, SubscriberRecord};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Registration file.
    pub path: PathBuf,

    /// Whether to create the file (and its directory) if it doesn't exist.
    pub create_if_missing: bool,

    /// Call `fsync` after every write.
    pub sync_on_write: bool,

    /// Write indented JSON.
    pub pretty: bool,

    /// How long dropping the store waits for listeners to finish queued updates.
    pub listener_drain_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".cache/users.json"),
            create_if_missing: true,
            sync_on_write: true,
            pretty: false,
            listener_drain_timeout: Duration::from_secs(5),
        }
    }
}

impl StoreConfig {
    /// Default configuration with the file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// File-backed mapping of chat users to linked accounts.
///
/// Every mutation updates memory first, then waits its turn at the write gate
/// to rewrite the whole file, then queues a snapshot for the listeners. Turns
/// are granted in mutation order, and each write carries every mutation
/// applied before it, so the file never loses an update.
///
/// Share it between command handlers with an [`Arc`].
pub struct RegistrationStore {
    config: StoreConfig,

    /// In-memory state. Never held across I/O.
    users: Mutex<Registrations>,

    /// Backing file, reachable only in FIFO order.
    file: WriteGate<File>,

    notifier: Notifier,
}

impl RegistrationStore {
    /// Open the store at `config.path`, loading any previous state.
    ///
    /// Unreadable or malformed content is discarded and the store starts
    /// empty. Failing to create, open or lock the file is an error.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let (mut file, created) = Self::open_file(&config)?;

        file.try_lock_exclusive().map_err(lock_error)?;

        let users = if created {
            Registrations::new()
        } else {
            Self::load(&mut file, &config.path)
        };

        tracing::info!(
            path = %config.path.display(),
            entries = users.len(),
            created,
            "Opened registration store"
        );

        Ok(Self {
            users: Mutex::new(users),
            file: WriteGate::new(file),
            notifier: Notifier::new(config.listener_drain_timeout),
            config,
        })
    }

    /// Open with default settings at `path`.
    pub fn open_at(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(StoreConfig::at(path))
    }

    fn open_file(config: &StoreConfig) -> Result<(File, bool)> {
        let path = &config.path;
        if path.as_os_str().is_empty() {
            return Err(StoreError::InvalidPath("empty path".to_string()));
        }

        let existed = path.exists();
        if !existed && config.create_if_missing {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(config.create_if_missing)
            .open(path)?;

        Ok((file, !existed))
    }

    /// Decode prior state, falling back to an empty mapping.
    fn load(file: &mut File, path: &Path) -> Registrations {
        match persist::read_from(file) {
            Ok(users) => users,
            Err(StoreError::Io(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "Could not read registrations, starting empty");
                Registrations::new()
            }
            Err(e) => {
                // An empty file is the normal state after a crash before the first write.
                let empty = file.metadata().map(|m| m.len() == 0).unwrap_or(false);
                if empty {
                    tracing::info!(path = %path.display(), "Registration file is empty");
                } else {
                    tracing::warn!(path = %path.display(), error = %e, "Discarding malformed registration file");
                }
                Registrations::new()
            }
        }
    }

    /// Registration file location.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Add a listener. It hears about the next successful write, not the current state.
    ///
    /// Each listener gets its own delivery thread; failing to start it is an error.
    pub fn register_listener(&self, listener: impl UpdateListener + 'static) -> Result<()> {
        self.register_shared_listener(Arc::new(listener))
    }

    /// Add a listener that is already shared.
    pub fn register_shared_listener(&self, listener: Arc<dyn UpdateListener>) -> Result<()> {
        self.notifier.register(listener)?;
        Ok(())
    }

    pub fn listener_count(&self) -> usize {
        self.notifier.listener_count()
    }

    // --- Mutations ---

    /// Link `key` to `binding`, replacing any previous registration.
    ///
    /// The subscriber's delivered notifications are always cleared.
    pub fn register(&self, key: SubscriberKey, binding: AccountBinding) -> Result<()> {
        let ticket = {
            let mut users = self.users.lock();
            if users.insert(key.clone(), SubscriberRecord::new(binding)).is_some() {
                tracing::debug!(key = %key, "Re-registering subscriber, notification state reset");
            }
            self.file.ticket()
        };

        self.persist(ticket)
    }

    /// Remove `key`. Returns `false` without writing if it wasn't registered.
    pub fn unregister(&self, key: &str) -> Result<bool> {
        let ticket = {
            let mut users = self.users.lock();
            if users.remove(key).is_none() {
                tracing::trace!(key, "Unregister of unknown subscriber ignored");
                return Ok(false);
            }
            self.file.ticket()
        };

        self.persist(ticket)?;
        Ok(true)
    }

    /// Replace the delivered notifications for `key`.
    ///
    /// Unknown keys are ignored without writing.
    pub fn update(&self, key: &str, notification_ids: Vec<NotificationId>) -> Result<()> {
        let ticket = {
            let mut users = self.users.lock();
            let Some(record) = users.get_mut(key) else {
                tracing::trace!(key, "Update for unknown subscriber ignored");
                return Ok(());
            };
            record.current_notification_ids = notification_ids;
            self.file.ticket()
        };

        self.persist(ticket)
    }

    /// Write the current mapping once `ticket` is served, then queue it for listeners.
    fn persist(&self, ticket: Ticket) -> Result<()> {
        let mut file = self.file.enter(ticket);

        let snapshot = self.users.lock().deep_copy();
        let written = persist::overwrite(
            &mut file,
            &snapshot,
            self.config.pretty,
            self.config.sync_on_write,
        )
        .inspect_err(|e| {
            tracing::error!(path = %self.config.path.display(), error = %e, "Failed to persist registrations");
        })?;

        tracing::debug!(bytes = written, entries = snapshot.len(), "Persisted registrations");

        // Queued under the gate so listeners see snapshots in write order.
        self.notifier.publish(snapshot);
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn users(&self) -> Registrations {
        self.users.lock().deep_copy()
    }
}

/// Only contention means another handle owns the file; anything else is a storage error.
fn lock_error(e: io::Error) -> StoreError {
    let contended = fs2::lock_contended_error();
    let same_errno = e.raw_os_error().is_some() && e.raw_os_error() == contended.raw_os_error();
    if same_errno || e.kind() == io::ErrorKind::WouldBlock {
        StoreError::Locked
    } else {
        StoreError::Io(e)
    }
}

//! # Registration Store
//!
//! File-backed storage of which chat user is linked to which GitHub account,
//! and which notifications each of them has already been sent.
//!
//! ## Core Concepts
//!
//! - **Registrations**: one record per chat user, holding the account binding
//!   and the delivered notification ids
//! - **Write gate**: rewrites of the backing file happen one at a time, in the
//!   order the mutations were made
//! - **Listeners**: receive a private copy of the whole mapping after every
//!   successful write
//!
//! ## Example
//!
//! ```ignore
//! use registration_store::{AccountBinding, RegistrationStore, RegistrationView};
//!
//! let store = RegistrationStore::open_at(".cache/users.json")?;
//!
//! let view = RegistrationView::new();
//! store.register_listener(view.clone())?;
//!
//! store.register("1234".into(), AccountBinding::new(
//!     "andy",
//!     "https://github.com/andy",
//!     "https://github.com/andy.png",
//! ))?;
//! store.update("1234", vec!["n1".into()])?;
//! assert!(store.unregister("1234")?);
//! ```

pub mod error;
pub mod gate;
pub mod listeners;
pub mod persist;
pub mod store;
pub mod types;

// Re-exports
pub use error::{ListenerError, Result, StoreError};
pub use gate::{GateGuard, WriteGate};
pub use listeners::{RegistrationView, SnapshotChannel, UpdateListener};
pub use persist::read_registrations;
pub use store::{RegistrationStore, StoreConfig};
pub use types::*;

//! # tessera storage
//!
//! Byte-level storage backends underneath tessera environments.
//!
//! A backend is an **opaque append-only byte store**: it knows nothing about
//! commit records, DBIs or rows. The environment engine in `tessera_core`
//! owns the on-disk format and only asks a backend to read, append, flush
//! and (when several handles share one file) serialize writers.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - ephemeral stores and tests
//! - [`FileBackend`] - one file per store, with an advisory writer lock
//!
//! ## Example
//!
//! ```rust
//! use tessera_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"commit").unwrap();
//! assert_eq!(backend.read_at(offset, 6).unwrap(), b"commit");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

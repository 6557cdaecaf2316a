//! Environment engine.
//!
//! An environment is the physical store of one table (or one audit log, or
//! the system catalog): a set of named, ordered DBIs persisted as an
//! append-only commit log.
//!
//! - [`Environment`] - open/replay, write queue, group commit, snapshots
//! - [`ReadTxn`] / [`Cursor`] - pinned reads and ordered range iteration
//! - [`WriteBatch`] - atomic, optionally conditional, group of operations

mod batch;
mod dbi;
pub(crate) mod record;
mod store;
mod txn;

pub use batch::{BatchOutcome, Op, Precondition, WriteBatch, WriteTicket};
pub use dbi::{DbiFlags, KeyKind};
pub use record::{LOG_MAGIC, LOG_VERSION};
pub use store::Environment;
pub use txn::{Cursor, CursorEntry, Direction, ReadTxn};

//! Read transactions and cursors.

use super::dbi::{DbiData, DbiFlags};
use super::store::Environment;
use crate::error::CoreResult;
use std::ops::{Bound, ControlFlow};

/// A pinned, consistent view of an environment.
///
/// Every read through one `ReadTxn` sees the state as of the commit that
/// was current when it was opened, however many commits land meanwhile.
/// The snapshot is released on drop.
pub struct ReadTxn<'env> {
    env: &'env Environment,
    sequence: u64,
}

impl<'env> ReadTxn<'env> {
    pub(crate) fn new(env: &'env Environment, sequence: u64) -> Self {
        Self { env, sequence }
    }

    /// Commit sequence this snapshot reads at.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The environment this snapshot reads.
    #[must_use]
    pub fn environment(&self) -> &'env Environment {
        self.env
    }

    fn with_dbi<R>(&self, dbi: &str, f: impl FnOnce(&DbiData) -> R) -> CoreResult<R> {
        self.env.with_dbi(dbi, self.sequence, f)
    }

    /// Value of `key` in a unique DBI.
    pub fn get(&self, dbi: &str, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.with_dbi(dbi, |data| {
            data.get(key, self.sequence).map(|(_, v)| v.to_vec())
        })
    }

    /// Value of `key` with the version that wrote it.
    pub fn get_versioned(&self, dbi: &str, key: &[u8]) -> CoreResult<Option<(u64, Vec<u8>)>> {
        self.with_dbi(dbi, |data| {
            data.get(key, self.sequence)
                .map(|(version, v)| (version, v.to_vec()))
        })
    }

    /// All values stored under `key`, in value order.
    pub fn get_dups(&self, dbi: &str, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        self.with_dbi(dbi, |data| data.dups(key, self.sequence))
    }

    /// Number of values stored under `key`.
    pub fn count_dups(&self, dbi: &str, key: &[u8]) -> CoreResult<usize> {
        self.with_dbi(dbi, |data| data.count_dups(key, self.sequence))
    }

    /// Number of entries in a DBI, counting each duplicate value.
    pub fn entry_count(&self, dbi: &str) -> CoreResult<usize> {
        self.with_dbi(dbi, |data| data.visible_len(self.sequence))
    }

    /// Flags of a DBI.
    pub fn dbi_flags(&self, dbi: &str) -> CoreResult<DbiFlags> {
        self.with_dbi(dbi, DbiData::flags)
    }

    /// Whether a DBI exists in this snapshot. A DBI dropped after the
    /// snapshot was taken still exists here.
    #[must_use]
    pub fn has_dbi(&self, dbi: &str) -> bool {
        self.env.has_dbi_at(dbi, self.sequence)
    }

    /// Opens a cursor over a DBI, unbounded and forward by default.
    #[must_use]
    pub fn cursor(&self, dbi: &str) -> Cursor<'_> {
        Cursor {
            txn: self,
            dbi: dbi.to_string(),
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
            direction: Direction::Forward,
        }
    }
}

impl Drop for ReadTxn<'_> {
    fn drop(&mut self) {
        self.env.release_snapshot(self.sequence);
    }
}

/// Iteration order of a cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending key order.
    #[default]
    Forward,
    /// Descending key order.
    Backward,
}

/// One visited entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorEntry {
    /// Encoded key.
    pub key: Vec<u8>,
    /// Value; in dup DBIs one of the key's values.
    pub value: Vec<u8>,
    /// Version stamp of the entry.
    pub version: u64,
}

/// Ordered range iteration over one DBI of a snapshot.
///
/// Duplicate values are flattened: a key with three values is visited
/// three times, values in order (reversed when iterating backward).
pub struct Cursor<'t> {
    txn: &'t ReadTxn<'t>,
    dbi: String,
    lower: Bound<Vec<u8>>,
    upper: Bound<Vec<u8>>,
    direction: Direction,
}

impl Cursor<'_> {
    /// Sets the lower bound.
    #[must_use]
    pub fn lower(mut self, bound: Bound<Vec<u8>>) -> Self {
        self.lower = bound;
        self
    }

    /// Sets the upper bound.
    #[must_use]
    pub fn upper(mut self, bound: Bound<Vec<u8>>) -> Self {
        self.upper = bound;
        self
    }

    /// Sets both bounds.
    #[must_use]
    pub fn range(self, lower: Bound<Vec<u8>>, upper: Bound<Vec<u8>>) -> Self {
        self.lower(lower).upper(upper)
    }

    /// Sets the iteration order.
    #[must_use]
    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    /// Visits entries until `visit` breaks or the range is exhausted.
    ///
    /// `visit` runs while the environment is read-locked and must not call
    /// back into it.
    pub fn for_each<F>(self, mut visit: F) -> CoreResult<()>
    where
        F: FnMut(&[u8], &[u8], u64) -> ControlFlow<()>,
    {
        let at = self.txn.sequence;
        let reverse = self.direction == Direction::Backward;
        self.txn.with_dbi(&self.dbi, |data| {
            data.scan(
                as_ref_bound(&self.lower),
                as_ref_bound(&self.upper),
                reverse,
                at,
                &mut visit,
            );
        })
    }

    /// Collects every entry in range.
    pub fn collect_entries(self) -> CoreResult<Vec<CursorEntry>> {
        let mut out = Vec::new();
        self.for_each(|key, value, version| {
            out.push(CursorEntry {
                key: key.to_vec(),
                value: value.to_vec(),
                version,
            });
            ControlFlow::Continue(())
        })?;
        Ok(out)
    }
}

fn as_ref_bound(bound: &Bound<Vec<u8>>) -> Bound<&[u8]> {
    match bound {
        Bound::Included(v) => Bound::Included(v.as_slice()),
        Bound::Excluded(v) => Bound::Excluded(v.as_slice()),
        Bound::Unbounded => Bound::Unbounded,
    }
}

//! Named ordered indexes (DBIs) inside an environment.
//!
//! Every key holds a short chain of versions. A slot records the commit
//! sequence that wrote it, the row's version stamp and the value, or `None`
//! when that commit deleted the key. Readers see the newest slot at or below
//! their snapshot sequence. Slots that no live snapshot can see are pruned
//! when the key is next written.
//!
//! The version stamp is the sequence of the last commit that changed the
//! row's content. A rewrite keeps the stamp of the slot it replaces.

use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};
use tessera_codec::KeyBracket;

/// Which encoded keys a DBI accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Any key type; brackets sort `null < bool < number < text`.
    Mixed,
    /// Number keys only.
    Numeric,
    /// Text keys only.
    Text,
}

impl KeyKind {
    pub(crate) const fn as_byte(self) -> u8 {
        match self {
            Self::Mixed => 0,
            Self::Numeric => 1,
            Self::Text => 2,
        }
    }

    pub(crate) const fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Mixed),
            1 => Some(Self::Numeric),
            2 => Some(Self::Text),
            _ => None,
        }
    }

    /// Whether an encoded key belongs in a DBI of this kind.
    #[must_use]
    pub fn accepts(self, key: &[u8]) -> bool {
        match (self, KeyBracket::of_encoded(key)) {
            (_, None) => false,
            (Self::Mixed, Some(_)) => true,
            (Self::Numeric, Some(bracket)) => bracket == KeyBracket::Number,
            (Self::Text, Some(bracket)) => bracket == KeyBracket::Text,
        }
    }
}

/// DBI flags, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DbiFlags {
    /// Key maps to an ordered set of values instead of one value.
    pub dup_sort: bool,
    /// Accepted key type.
    pub key_kind: KeyKind,
}

impl DbiFlags {
    /// One value per key, any key type. Used for primary indexes.
    pub const PRIMARY: Self = Self {
        dup_sort: false,
        key_kind: KeyKind::Mixed,
    };

    /// Duplicate values per key, any key type. Used for attribute indexes.
    pub const INDEX: Self = Self {
        dup_sort: true,
        key_kind: KeyKind::Mixed,
    };

    /// Duplicate values per numeric key.
    pub const NUMERIC_INDEX: Self = Self {
        dup_sort: true,
        key_kind: KeyKind::Numeric,
    };

    /// Creates flags.
    #[must_use]
    pub const fn new(dup_sort: bool, key_kind: KeyKind) -> Self {
        Self { dup_sort, key_kind }
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    seq: u64,
    version: u64,
    value: Option<T>,
}

#[derive(Debug, Clone)]
struct Chain<T> {
    slots: Vec<Slot<T>>,
}

impl<T> Chain<T> {
    fn new() -> Self {
        Self { slots: Vec::new() }
    }

    fn visible(&self, at: u64) -> Option<(u64, &T)> {
        let slot = self.slots.iter().rev().find(|s| s.seq <= at)?;
        slot.value.as_ref().map(|v| (slot.version, v))
    }

    /// Stamp of the newest slot, if it holds a value.
    fn latest_version(&self) -> Option<u64> {
        self.slots
            .last()
            .filter(|s| s.value.is_some())
            .map(|s| s.version)
    }

    fn record(&mut self, seq: u64, value: Option<T>, horizon: u64) {
        self.record_stamped(seq, seq, value, horizon);
    }

    fn record_stamped(&mut self, seq: u64, version: u64, value: Option<T>, horizon: u64) {
        self.slots.push(Slot {
            seq,
            version,
            value,
        });
        // Keep the newest slot at or below the horizon and everything after it.
        if let Some(keep_from) = self.slots.iter().rposition(|s| s.seq <= horizon) {
            self.slots.drain(..keep_from);
        }
    }

    fn is_dead(&self, horizon: u64) -> bool {
        matches!(self.slots.as_slice(), [only] if only.value.is_none() && only.seq <= horizon)
    }
}

#[derive(Debug, Clone)]
enum Entries {
    Unique(BTreeMap<Vec<u8>, Chain<Vec<u8>>>),
    Dup(BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, Chain<()>>>),
}

/// Contents of one DBI.
#[derive(Debug, Clone)]
pub(crate) struct DbiData {
    flags: DbiFlags,
    /// Commit that created the DBI; older snapshots do not see it.
    created: u64,
    entries: Entries,
}

impl DbiData {
    pub(crate) fn new(flags: DbiFlags, created: u64) -> Self {
        let entries = if flags.dup_sort {
            Entries::Dup(BTreeMap::new())
        } else {
            Entries::Unique(BTreeMap::new())
        };
        Self {
            flags,
            created,
            entries,
        }
    }

    pub(crate) fn flags(&self) -> DbiFlags {
        self.flags
    }

    pub(crate) fn created(&self) -> u64 {
        self.created
    }

    /// Value and version of a key in a unique DBI. A dup DBI yields its
    /// first value with the version that added it.
    pub(crate) fn get(&self, key: &[u8], at: u64) -> Option<(u64, &[u8])> {
        match &self.entries {
            Entries::Unique(map) => map
                .get(key)
                .and_then(|chain| chain.visible(at))
                .map(|(seq, v)| (seq, v.as_slice())),
            Entries::Dup(map) => map.get(key).and_then(|values| {
                values.iter().find_map(|(value, chain)| {
                    chain.visible(at).map(|(seq, ())| (seq, value.as_slice()))
                })
            }),
        }
    }

    pub(crate) fn dups(&self, key: &[u8], at: u64) -> Vec<Vec<u8>> {
        match &self.entries {
            Entries::Unique(_) => self
                .get(key, at)
                .map(|(_, v)| vec![v.to_vec()])
                .unwrap_or_default(),
            Entries::Dup(map) => map
                .get(key)
                .map(|values| {
                    values
                        .iter()
                        .filter(|(_, chain)| chain.visible(at).is_some())
                        .map(|(value, _)| value.clone())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    pub(crate) fn count_dups(&self, key: &[u8], at: u64) -> usize {
        match &self.entries {
            Entries::Unique(_) => usize::from(self.get(key, at).is_some()),
            Entries::Dup(map) => map.get(key).map_or(0, |values| {
                values
                    .values()
                    .filter(|chain| chain.visible(at).is_some())
                    .count()
            }),
        }
    }

    pub(crate) fn visible_len(&self, at: u64) -> usize {
        match &self.entries {
            Entries::Unique(map) => map.values().filter(|c| c.visible(at).is_some()).count(),
            Entries::Dup(map) => map
                .values()
                .flat_map(|values| values.values())
                .filter(|c| c.visible(at).is_some())
                .count(),
        }
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8], seq: u64, horizon: u64) {
        if let Entries::Unique(map) = &mut self.entries {
            map.entry(key.to_vec())
                .or_insert_with(Chain::new)
                .record(seq, Some(value.to_vec()), horizon);
        }
    }

    /// Replaces a key's value in a unique DBI without moving its version
    /// stamp. A key with no value is written as by [`DbiData::put`].
    pub(crate) fn rewrite(&mut self, key: &[u8], value: &[u8], seq: u64, horizon: u64) {
        if let Entries::Unique(map) = &mut self.entries {
            let chain = map.entry(key.to_vec()).or_insert_with(Chain::new);
            let version = chain.latest_version().unwrap_or(seq);
            chain.record_stamped(seq, version, Some(value.to_vec()), horizon);
        }
    }

    pub(crate) fn put_dup(&mut self, key: &[u8], value: &[u8], seq: u64, horizon: u64) {
        if let Entries::Dup(map) = &mut self.entries {
            map.entry(key.to_vec())
                .or_default()
                .entry(value.to_vec())
                .or_insert_with(Chain::new)
                .record(seq, Some(()), horizon);
        }
    }

    /// Deletes a key. In a dup DBI every value under the key goes.
    pub(crate) fn delete(&mut self, key: &[u8], seq: u64, horizon: u64) {
        match &mut self.entries {
            Entries::Unique(map) => {
                if let Some(chain) = map.get_mut(key) {
                    chain.record(seq, None, horizon);
                    if chain.is_dead(horizon) {
                        map.remove(key);
                    }
                }
            }
            Entries::Dup(map) => {
                if let Some(values) = map.get_mut(key) {
                    for chain in values.values_mut() {
                        chain.record(seq, None, horizon);
                    }
                    values.retain(|_, chain| !chain.is_dead(horizon));
                    if values.is_empty() {
                        map.remove(key);
                    }
                }
            }
        }
    }

    pub(crate) fn delete_dup(&mut self, key: &[u8], value: &[u8], seq: u64, horizon: u64) {
        if let Entries::Dup(map) = &mut self.entries {
            let Some(values) = map.get_mut(key) else {
                return;
            };
            if let Some(chain) = values.get_mut(value) {
                chain.record(seq, None, horizon);
                if chain.is_dead(horizon) {
                    values.remove(value);
                }
            }
            if values.is_empty() {
                map.remove(key);
            }
        }
    }

    /// Visits visible entries between `lower` and `upper` in key order (or
    /// reverse key order). Duplicate values are visited in value order.
    pub(crate) fn scan(
        &self,
        lower: Bound<&[u8]>,
        upper: Bound<&[u8]>,
        reverse: bool,
        at: u64,
        visit: &mut dyn FnMut(&[u8], &[u8], u64) -> ControlFlow<()>,
    ) {
        if is_empty_range(lower, upper) {
            return;
        }
        match &self.entries {
            Entries::Unique(map) => {
                let range = map.range::<[u8], _>((lower, upper));
                let mut step = |(key, chain): (&Vec<u8>, &Chain<Vec<u8>>)| match chain.visible(at)
                {
                    Some((seq, value)) => visit(key, value, seq),
                    None => ControlFlow::Continue(()),
                };
                if reverse {
                    let _ = range.rev().try_for_each(&mut step);
                } else {
                    let _ = range.into_iter().try_for_each(&mut step);
                }
            }
            Entries::Dup(map) => {
                let range = map.range::<[u8], _>((lower, upper));
                let mut step = |(key, values): (&Vec<u8>, &BTreeMap<Vec<u8>, Chain<()>>)| {
                    let mut each = |(value, chain): (&Vec<u8>, &Chain<()>)| match chain.visible(at) {
                        Some((seq, ())) => visit(key, value, seq),
                        None => ControlFlow::Continue(()),
                    };
                    if reverse {
                        values.iter().rev().try_for_each(&mut each)
                    } else {
                        values.iter().try_for_each(&mut each)
                    }
                };
                if reverse {
                    let _ = range.rev().try_for_each(&mut step);
                } else {
                    let _ = range.into_iter().try_for_each(&mut step);
                }
            }
        }
    }
}

/// `BTreeMap::range` panics on inverted bounds; treat them as empty.
fn is_empty_range(lower: Bound<&[u8]>, upper: Bound<&[u8]>) -> bool {
    match (lower, upper) {
        (Bound::Included(l), Bound::Included(u)) => l > u,
        (Bound::Included(l) | Bound::Excluded(l), Bound::Excluded(u))
        | (Bound::Excluded(l), Bound::Included(u)) => l >= u,
        _ => false,
    }
}

//! Index probes.
//!
//! A probe walks one index of a pinned snapshot and yields `(key, hash)`
//! hits in index order. Secondary indexes map an attribute value to hash
//! keys; the primary index maps a hash key to its row, so there the key
//! is the hash.

use super::classify::{Classified, SearchType};
use crate::env::{Direction, KeyKind, ReadTxn};
use crate::error::{CoreError, CoreResult};
use crate::stats::BridgeStats;
use std::ops::{Bound, ControlFlow};
use tessera_codec::{CodecError, IndexKey, KeyBracket};

/// Byte past the end of any UTF-8 continuation of a text prefix.
const PREFIX_END: u8 = 0xFF;

/// One probe hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexHit {
    /// Encoded index key.
    pub key: Vec<u8>,
    /// Encoded hash key of the row.
    pub hash: Vec<u8>,
}

/// The index a probe walks.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProbeTarget<'a> {
    /// DBI name, which is the attribute name.
    pub dbi: &'a str,
    /// Whether the DBI is the primary index.
    pub primary: bool,
}

type Range = (Bound<Vec<u8>>, Bound<Vec<u8>>);

/// Runs a classified search against one index.
///
/// `cap` stops the walk once that many hits are collected.
pub(crate) fn probe(
    txn: &ReadTxn<'_>,
    target: ProbeTarget<'_>,
    search: &Classified,
    reverse: bool,
    cap: Option<usize>,
    stats: &BridgeStats,
) -> CoreResult<Vec<IndexHit>> {
    let kind = txn.dbi_flags(target.dbi)?.key_kind;
    let mut walk = Walk::new(txn, target, reverse, cap);

    match search.kind {
        SearchType::Equals => {
            stats.record_index_probe();
            walk.exact(&search.keys)?;
        }
        SearchType::StartsWith if kind != KeyKind::Numeric => {
            stats.record_index_probe();
            let prefix = match IndexKey::Text(search.pattern.clone()).encode() {
                Ok(prefix) => prefix,
                // No indexed key is that long, so none can extend it.
                Err(CodecError::KeyTooLarge { .. }) => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };
            let mut end = prefix.clone();
            end.push(PREFIX_END);
            let text: Range = (Bound::Included(prefix), Bound::Excluded(end));
            if kind == KeyKind::Text {
                walk.ranges(vec![text], None)?;
            } else {
                // Numbers, booleans and null render to strings that may
                // share the prefix but do not sort together.
                let others: Range = (
                    Bound::Included(KeyBracket::Null.lower_bound()),
                    Bound::Excluded(KeyBracket::Text.lower_bound()),
                );
                walk.segments(vec![(others, Some(search)), (text, None)])?;
            }
        }
        SearchType::All | SearchType::StartsWith | SearchType::EndsWith | SearchType::Contains => {
            stats.record_full_scan();
            let filter = (search.kind != SearchType::All).then_some(search);
            walk.ranges(vec![(Bound::Unbounded, Bound::Unbounded)], filter)?;
        }
        SearchType::GreaterThan
        | SearchType::GreaterThanEqual
        | SearchType::LessThan
        | SearchType::LessThanEqual
        | SearchType::Between => {
            stats.record_index_probe();
            walk.ranges(vec![range_bounds(target.dbi, kind, search)?], None)?;
        }
    }
    Ok(walk.hits)
}

/// Byte range covering a comparison, confined to the value's bracket.
fn range_bounds(attribute: &str, kind: KeyKind, search: &Classified) -> CoreResult<Range> {
    let start = search
        .start
        .as_ref()
        .ok_or_else(|| CoreError::engine("range search without a start value"))?;
    let bracket = start.bracket();
    let index_type = match kind {
        KeyKind::Numeric if bracket != KeyBracket::Number => Some("numeric"),
        KeyKind::Text if bracket != KeyBracket::Text => Some("string"),
        _ => None,
    };
    if let Some(index_type) = index_type {
        return Err(CoreError::ComparisonType {
            attribute: attribute.to_string(),
            value_type: bracket_name(bracket).to_string(),
            index_type: index_type.to_string(),
        });
    }

    let key = start.encode()?;
    let floor = Bound::Included(bracket.lower_bound());
    let ceiling = Bound::Excluded(bracket.upper_bound());
    Ok(match search.kind {
        SearchType::GreaterThan => (Bound::Excluded(key), ceiling),
        SearchType::GreaterThanEqual => (Bound::Included(key), ceiling),
        SearchType::LessThan => (floor, Bound::Excluded(key)),
        SearchType::LessThanEqual => (floor, Bound::Included(key)),
        _ => {
            let end = search
                .end
                .as_ref()
                .ok_or_else(|| CoreError::engine("between search without an end value"))?;
            (Bound::Included(key), Bound::Included(end.encode()?))
        }
    })
}

fn bracket_name(bracket: KeyBracket) -> &'static str {
    match bracket {
        KeyBracket::Null => "null",
        KeyBracket::Bool => "boolean",
        KeyBracket::Number => "number",
        KeyBracket::Text => "string",
    }
}

struct Walk<'t, 'a> {
    txn: &'t ReadTxn<'t>,
    target: ProbeTarget<'a>,
    reverse: bool,
    cap: Option<usize>,
    hits: Vec<IndexHit>,
}

impl<'t, 'a> Walk<'t, 'a> {
    fn new(
        txn: &'t ReadTxn<'t>,
        target: ProbeTarget<'a>,
        reverse: bool,
        cap: Option<usize>,
    ) -> Self {
        Self {
            txn,
            target,
            reverse,
            cap,
            hits: Vec::new(),
        }
    }

    fn full(&self) -> bool {
        self.cap.is_some_and(|cap| self.hits.len() >= cap)
    }

    /// Point lookups of each key.
    fn exact(&mut self, keys: &[IndexKey]) -> CoreResult<()> {
        let mut found = Vec::new();
        for key in keys {
            let encoded = match key.encode() {
                Ok(encoded) => encoded,
                // Nothing that large was ever indexed.
                Err(CodecError::KeyTooLarge { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            if self.target.primary {
                if self.txn.get(self.target.dbi, &encoded)?.is_some() {
                    found.push(IndexHit {
                        hash: encoded.clone(),
                        key: encoded,
                    });
                }
            } else {
                for hash in self.txn.get_dups(self.target.dbi, &encoded)? {
                    found.push(IndexHit {
                        key: encoded.clone(),
                        hash,
                    });
                }
            }
        }
        if self.reverse {
            found.reverse();
        }
        if let Some(cap) = self.cap {
            found.truncate(cap);
        }
        self.hits = found;
        Ok(())
    }

    /// Walks ranges given in forward order, all under the same filter.
    fn ranges(&mut self, ranges: Vec<Range>, filter: Option<&Classified>) -> CoreResult<()> {
        self.segments(ranges.into_iter().map(|r| (r, filter)).collect())
    }

    /// Walks segments given in forward order; backward walks visit them
    /// last to first.
    fn segments(&mut self, mut segments: Vec<(Range, Option<&Classified>)>) -> CoreResult<()> {
        if self.reverse {
            segments.reverse();
        }
        for ((lower, upper), filter) in segments {
            if self.full() {
                break;
            }
            self.walk(lower, upper, filter)?;
        }
        Ok(())
    }

    fn walk(
        &mut self,
        lower: Bound<Vec<u8>>,
        upper: Bound<Vec<u8>>,
        filter: Option<&Classified>,
    ) -> CoreResult<()> {
        let direction = if self.reverse {
            Direction::Backward
        } else {
            Direction::Forward
        };
        let primary = self.target.primary;
        let cap = self.cap;
        let hits = &mut self.hits;
        let mut failure = None;

        self.txn
            .cursor(self.target.dbi)
            .range(lower, upper)
            .direction(direction)
            .for_each(|key, value, _| {
                if let Some(filter) = filter {
                    match IndexKey::decode(key) {
                        Ok(decoded) if filter.matches_key(&decoded) => {}
                        Ok(_) => return ControlFlow::Continue(()),
                        Err(e) => {
                            failure = Some(e);
                            return ControlFlow::Break(());
                        }
                    }
                }
                hits.push(IndexHit {
                    key: key.to_vec(),
                    hash: if primary { key.to_vec() } else { value.to_vec() },
                });
                if cap.is_some_and(|cap| hits.len() >= cap) {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;

        match failure {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

//! Write batches, tickets and outcomes.

use super::dbi::DbiFlags;
use crate::error::{CoreError, CoreResult};
use std::sync::{Arc, OnceLock};

/// One mutation inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Creates a DBI. Creating an existing DBI with the same flags is a no-op.
    CreateDbi {
        /// DBI name.
        name: String,
        /// DBI flags.
        flags: DbiFlags,
    },
    /// Drops a DBI and everything in it.
    DropDbi {
        /// DBI name.
        name: String,
    },
    /// Sets the value of a key in a unique DBI.
    Put {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Replaces the value of a key in a unique DBI, keeping the key's
    /// version stamp.
    Rewrite {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Removes a key. In a dup DBI all of its values are removed.
    Delete {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
    },
    /// Adds a value under a key in a dup DBI.
    PutDup {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Removes one value under a key in a dup DBI.
    DeleteDup {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
}

/// Condition a batch needs to hold at commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// The key has no value.
    Absent {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
    },
    /// The key exists and was last written by commit `version`.
    Version {
        /// DBI name.
        dbi: String,
        /// Encoded key.
        key: Vec<u8>,
        /// Expected version.
        version: u64,
    },
}

/// An atomic group of operations. Either every op commits or none does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub(crate) precondition: Option<Precondition>,
    pub(crate) ops: Vec<Op>,
}

impl WriteBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires `key` to be absent from `dbi` at commit time.
    #[must_use]
    pub fn if_absent(mut self, dbi: &str, key: Vec<u8>) -> Self {
        self.precondition = Some(Precondition::Absent {
            dbi: dbi.to_string(),
            key,
        });
        self
    }

    /// Requires `key` in `dbi` to still carry `version` at commit time.
    #[must_use]
    pub fn if_version(mut self, dbi: &str, key: Vec<u8>, version: u64) -> Self {
        self.precondition = Some(Precondition::Version {
            dbi: dbi.to_string(),
            key,
            version,
        });
        self
    }

    /// Queues a DBI creation.
    pub fn create_dbi(&mut self, name: &str, flags: DbiFlags) -> &mut Self {
        self.ops.push(Op::CreateDbi {
            name: name.to_string(),
            flags,
        });
        self
    }

    /// Queues a DBI drop.
    pub fn drop_dbi(&mut self, name: &str) -> &mut Self {
        self.ops.push(Op::DropDbi {
            name: name.to_string(),
        });
        self
    }

    /// Queues a put.
    pub fn put(&mut self, dbi: &str, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Put {
            dbi: dbi.to_string(),
            key,
            value,
        });
        self
    }

    /// Queues a put that keeps the key's version stamp. Readers and
    /// `if_version` checks see the new value under the old version.
    pub fn rewrite(&mut self, dbi: &str, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Rewrite {
            dbi: dbi.to_string(),
            key,
            value,
        });
        self
    }

    /// Queues a delete.
    pub fn delete(&mut self, dbi: &str, key: Vec<u8>) -> &mut Self {
        self.ops.push(Op::Delete {
            dbi: dbi.to_string(),
            key,
        });
        self
    }

    /// Queues a duplicate-value put.
    pub fn put_dup(&mut self, dbi: &str, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::PutDup {
            dbi: dbi.to_string(),
            key,
            value,
        });
        self
    }

    /// Queues a duplicate-value delete.
    pub fn delete_dup(&mut self, dbi: &str, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(Op::DeleteDup {
            dbi: dbi.to_string(),
            key,
            value,
        });
        self
    }

    /// Returns the queued operations.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// Whether the batch has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

/// What happened to a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Committed at this sequence.
    Committed {
        /// Commit sequence; also the new version of every key it put.
        sequence: u64,
    },
    /// The precondition did not hold; nothing was applied.
    ConditionFailed,
    /// The batch was invalid (missing DBI, wrong key type); nothing was
    /// applied.
    Rejected {
        /// Why the batch was rejected.
        reason: String,
    },
    /// The commit group failed to persist.
    Failed {
        /// Underlying error.
        reason: String,
    },
}

impl BatchOutcome {
    /// Whether the batch committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Commit sequence, if committed.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Committed { sequence } => Some(*sequence),
            _ => None,
        }
    }

    /// Turns rejection and failure into errors.
    pub(crate) fn into_result(self) -> CoreResult<Self> {
        match self {
            Self::Rejected { reason } | Self::Failed { reason } => Err(CoreError::engine(reason)),
            other => Ok(other),
        }
    }
}

/// Handle to a queued batch.
#[derive(Debug, Clone)]
pub struct WriteTicket {
    pub(crate) number: u64,
    pub(crate) outcome: Arc<OnceLock<BatchOutcome>>,
}

impl WriteTicket {
    /// Position of the batch in the environment's submission order.
    #[must_use]
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Outcome, once the batch has been committed or refused.
    #[must_use]
    pub fn outcome(&self) -> Option<&BatchOutcome> {
        self.outcome.get()
    }
}

//! The environment: named DBIs over one commit log.

use super::batch::{BatchOutcome, Op, Precondition, WriteBatch, WriteTicket};
use super::dbi::{DbiData, DbiFlags};
use super::record::{scan_log, LogRecord};
use super::txn::ReadTxn;
use crate::error::{CoreError, CoreResult};
use parking_lot::{Mutex, RwLock};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Write;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tessera_storage::{FileBackend, InMemoryBackend, StorageBackend};
use tracing::{debug, warn};

/// Committed state: the DBIs and the sequence of the last applied commit.
#[derive(Default)]
struct EnvData {
    sequence: u64,
    dbis: BTreeMap<String, DbiData>,
    /// Dropped DBIs still visible to snapshots older than the drop.
    retired: Vec<Retired>,
}

struct Retired {
    name: String,
    dropped: u64,
    data: DbiData,
}

impl EnvData {
    fn apply(&mut self, record: &LogRecord, horizon: u64) {
        let seq = record.sequence;
        for op in &record.ops {
            match op {
                Op::CreateDbi { name, flags } => {
                    self.dbis
                        .entry(name.clone())
                        .or_insert_with(|| DbiData::new(*flags, seq));
                }
                Op::DropDbi { name } => {
                    if let Some(data) = self.dbis.remove(name) {
                        if horizon < seq {
                            self.retired.push(Retired {
                                name: name.clone(),
                                dropped: seq,
                                data,
                            });
                        }
                    }
                }
                Op::Put { dbi, key, value } => {
                    if let Some(data) = self.dbis.get_mut(dbi) {
                        data.put(key, value, seq, horizon);
                    }
                }
                Op::Rewrite { dbi, key, value } => {
                    if let Some(data) = self.dbis.get_mut(dbi) {
                        data.rewrite(key, value, seq, horizon);
                    }
                }
                Op::Delete { dbi, key } => {
                    if let Some(data) = self.dbis.get_mut(dbi) {
                        data.delete(key, seq, horizon);
                    }
                }
                Op::PutDup { dbi, key, value } => {
                    if let Some(data) = self.dbis.get_mut(dbi) {
                        data.put_dup(key, value, seq, horizon);
                    }
                }
                Op::DeleteDup { dbi, key, value } => {
                    if let Some(data) = self.dbis.get_mut(dbi) {
                        data.delete_dup(key, value, seq, horizon);
                    }
                }
            }
        }
        self.retired.retain(|r| r.dropped > horizon);
        self.sequence = self.sequence.max(seq);
    }

    /// The DBI named `name` as a snapshot at `at` sees it.
    fn dbi_at(&self, name: &str, at: u64) -> Option<&DbiData> {
        if let Some(data) = self.dbis.get(name).filter(|d| d.created() <= at) {
            return Some(data);
        }
        self.retired
            .iter()
            .rev()
            .find(|r| r.name == name && r.data.created() <= at && at < r.dropped)
            .map(|r| &r.data)
    }
}

struct LogWriter {
    backend: Box<dyn StorageBackend>,
    /// Offset through which the log has been applied to `EnvData`.
    applied: u64,
}

struct Pending {
    number: u64,
    batch: WriteBatch,
    outcome: Arc<OnceLock<BatchOutcome>>,
}

/// A physical store holding named, ordered DBIs.
///
/// Writers submit [`WriteBatch`]es to a FIFO queue. Waiting on a ticket
/// commits every queued batch up to and including it, in submission
/// order, as one log append. Waiting on the last ticket of a sequence is
/// therefore enough to know every earlier one has been committed or
/// refused.
///
/// Several `Environment` handles may share one store file. Commits take
/// the backend's exclusive lock and first apply whatever other handles
/// appended; [`Environment::reset_read_txn`] does the same for readers.
pub struct Environment {
    label: String,
    data: RwLock<EnvData>,
    /// Live read snapshots by sequence, with reference counts.
    snapshots: Mutex<BTreeMap<u64, usize>>,
    writer: Mutex<LogWriter>,
    queue: Mutex<VecDeque<Pending>>,
    next_ticket: AtomicU64,
    sync_on_commit: bool,
}

impl Environment {
    /// Opens an environment over a backend, replaying its commit log.
    ///
    /// An incomplete trailing record is truncated away.
    ///
    /// # Errors
    ///
    /// Returns `LogCorruption` or `ChecksumMismatch` when the log cannot
    /// be replayed.
    pub fn open(
        label: impl Into<String>,
        mut backend: Box<dyn StorageBackend>,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        let label = label.into();
        backend.lock_exclusive()?;
        let replay = Self::replay(&mut *backend, &label);
        let unlock = backend.unlock();
        let (data, applied) = replay?;
        unlock?;

        debug!(
            environment = %label,
            sequence = data.sequence,
            dbis = data.dbis.len(),
            "opened environment"
        );

        Ok(Self {
            label,
            data: RwLock::new(data),
            snapshots: Mutex::new(BTreeMap::new()),
            writer: Mutex::new(LogWriter { backend, applied }),
            queue: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(0),
            sync_on_commit,
        })
    }

    /// Opens (creating if absent) a file-backed environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or replayed.
    pub fn open_file(
        label: impl Into<String>,
        path: &Path,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        let backend = FileBackend::open_with_create_dirs(path)?;
        Self::open(label, Box::new(backend), sync_on_commit)
    }

    /// Creates an empty in-memory environment.
    #[must_use]
    pub fn in_memory(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: RwLock::new(EnvData::default()),
            snapshots: Mutex::new(BTreeMap::new()),
            writer: Mutex::new(LogWriter {
                backend: Box::new(InMemoryBackend::new()),
                applied: 0,
            }),
            queue: Mutex::new(VecDeque::new()),
            next_ticket: AtomicU64::new(0),
            sync_on_commit: false,
        }
    }

    fn replay(backend: &mut dyn StorageBackend, label: &str) -> CoreResult<(EnvData, u64)> {
        let scan = scan_log(backend, 0)?;
        let mut data = EnvData::default();
        for record in &scan.records {
            data.apply(record, record.sequence);
        }
        if scan.torn {
            warn!(
                environment = %label,
                offset = scan.end,
                "truncating incomplete commit record"
            );
            backend.truncate(scan.end)?;
        }
        Ok((data, scan.end))
    }

    /// Label used in logs and errors, usually `schema.table`.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Sequence of the latest applied commit.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.data.read().sequence
    }

    /// Pins the current committed state.
    #[must_use]
    pub fn read_txn(&self) -> ReadTxn<'_> {
        let data = self.data.read();
        let sequence = data.sequence;
        *self.snapshots.lock().entry(sequence).or_insert(0) += 1;
        drop(data);
        ReadTxn::new(self, sequence)
    }

    pub(crate) fn release_snapshot(&self, sequence: u64) {
        let mut snapshots = self.snapshots.lock();
        if let Entry::Occupied(mut entry) = snapshots.entry(sequence) {
            *entry.get_mut() -= 1;
            if *entry.get() == 0 {
                entry.remove();
            }
        }
    }

    /// Oldest sequence a live snapshot may still read, capped at `ceiling`.
    fn horizon(&self, ceiling: u64) -> u64 {
        self.snapshots
            .lock()
            .keys()
            .next()
            .map_or(ceiling, |&oldest| oldest.min(ceiling))
    }

    pub(crate) fn with_dbi<R>(
        &self,
        name: &str,
        at: u64,
        f: impl FnOnce(&DbiData) -> R,
    ) -> CoreResult<R> {
        let data = self.data.read();
        let dbi = data
            .dbi_at(name, at)
            .ok_or_else(|| CoreError::DbiNotFound {
                environment: self.label.clone(),
                name: name.to_string(),
            })?;
        Ok(f(dbi))
    }

    pub(crate) fn has_dbi_at(&self, name: &str, at: u64) -> bool {
        self.data.read().dbi_at(name, at).is_some()
    }

    /// Whether a DBI exists in the latest committed state.
    #[must_use]
    pub fn has_dbi(&self, name: &str) -> bool {
        self.data.read().dbis.contains_key(name)
    }

    /// Names of all DBIs in the latest committed state.
    #[must_use]
    pub fn dbi_names(&self) -> Vec<String> {
        self.data.read().dbis.keys().cloned().collect()
    }

    /// Applies commits appended by other handles of the same store, so
    /// the next [`Self::read_txn`] observes them.
    ///
    /// # Errors
    ///
    /// Returns an error if the new log tail cannot be read or is corrupt.
    pub fn reset_read_txn(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        self.catch_up(&mut writer, false)
    }

    fn catch_up(&self, writer: &mut LogWriter, repair: bool) -> CoreResult<()> {
        let size = writer.backend.size()?;
        if size == writer.applied {
            return Ok(());
        }
        if size < writer.applied {
            return Err(CoreError::log_corruption(format!(
                "log of '{}' shrank from {} to {size} bytes",
                self.label, writer.applied
            )));
        }

        let scan = scan_log(&*writer.backend, writer.applied)?;
        if !scan.records.is_empty() {
            let mut data = self.data.write();
            for record in &scan.records {
                let horizon = self.horizon(record.sequence);
                data.apply(record, horizon);
            }
            debug!(
                environment = %self.label,
                records = scan.records.len(),
                sequence = data.sequence,
                "applied commits from another handle"
            );
        }
        writer.applied = scan.end;
        if scan.torn && repair {
            warn!(
                environment = %self.label,
                offset = scan.end,
                "truncating incomplete commit record"
            );
            writer.backend.truncate(scan.end)?;
        }
        Ok(())
    }

    /// Queues a batch. Nothing is applied until a ticket at or after this
    /// one is waited on.
    pub fn submit(&self, batch: WriteBatch) -> WriteTicket {
        let outcome = Arc::new(OnceLock::new());
        let mut queue = self.queue.lock();
        let number = self.next_ticket.fetch_add(1, Ordering::Relaxed) + 1;
        queue.push_back(Pending {
            number,
            batch,
            outcome: Arc::clone(&outcome),
        });
        WriteTicket { number, outcome }
    }

    /// Commits every queued batch up to and including `ticket`, in
    /// submission order, and returns the ticket's outcome.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the batch was rejected, or the
    /// underlying error if the commit could not be persisted.
    pub fn wait(&self, ticket: &WriteTicket) -> CoreResult<BatchOutcome> {
        if let Some(outcome) = ticket.outcome() {
            return outcome.clone().into_result();
        }
        let mut writer = self.writer.lock();
        if ticket.outcome().is_none() {
            let group = self.drain_through(ticket.number);
            self.commit_group(&mut writer, group)?;
        }
        ticket
            .outcome()
            .cloned()
            .ok_or_else(|| CoreError::engine("write ticket was never resolved"))?
            .into_result()
    }

    /// Submits a batch and waits for it.
    ///
    /// # Errors
    ///
    /// See [`Self::wait`].
    pub fn write(&self, batch: WriteBatch) -> CoreResult<BatchOutcome> {
        let ticket = self.submit(batch);
        self.wait(&ticket)
    }

    /// Commits everything queued and syncs the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit or sync fails.
    pub fn flush(&self) -> CoreResult<()> {
        let mut writer = self.writer.lock();
        let group = self.drain_through(u64::MAX);
        self.commit_group(&mut writer, group)?;
        writer.backend.sync()?;
        Ok(())
    }

    fn drain_through(&self, number: u64) -> Vec<Pending> {
        let mut queue = self.queue.lock();
        let n = queue.iter().take_while(|p| p.number <= number).count();
        queue.drain(..n).collect()
    }

    fn commit_group(&self, writer: &mut LogWriter, group: Vec<Pending>) -> CoreResult<()> {
        if group.is_empty() {
            return Ok(());
        }
        let outcomes: Vec<_> = group.iter().map(|p| Arc::clone(&p.outcome)).collect();

        let result = writer
            .backend
            .lock_exclusive()
            .map_err(CoreError::from)
            .and_then(|()| {
                let committed = self.commit_locked(writer, group);
                let unlocked = writer.backend.unlock().map_err(CoreError::from);
                committed.and_then(|resolved| unlocked.map(|()| resolved))
            });

        match result {
            Ok(resolved) => {
                for (slot, outcome) in outcomes.iter().zip(resolved) {
                    let _ = slot.set(outcome);
                }
                Ok(())
            }
            Err(e) => {
                warn!(environment = %self.label, error = %e, "commit group failed");
                for slot in &outcomes {
                    let _ = slot.set(BatchOutcome::Failed {
                        reason: e.to_string(),
                    });
                }
                Err(e)
            }
        }
    }

    /// Validates, persists and applies a group. Returns one outcome per
    /// batch, in order.
    fn commit_locked(
        &self,
        writer: &mut LogWriter,
        group: Vec<Pending>,
    ) -> CoreResult<Vec<BatchOutcome>> {
        self.catch_up(writer, true)?;

        let mut outcomes = Vec::with_capacity(group.len());
        let mut records = Vec::new();
        {
            let data = self.data.read();
            let mut overlay = Overlay::new(&data);
            let mut sequence = data.sequence;
            for pending in group {
                match overlay.check(&pending.batch, &self.label) {
                    Ok(true) => {
                        sequence += 1;
                        overlay.absorb(&pending.batch, sequence);
                        records.push(LogRecord {
                            sequence,
                            ops: pending.batch.ops,
                        });
                        outcomes.push(BatchOutcome::Committed { sequence });
                    }
                    Ok(false) => outcomes.push(BatchOutcome::ConditionFailed),
                    Err(reason) => outcomes.push(BatchOutcome::Rejected { reason }),
                }
            }
        }

        if records.is_empty() {
            return Ok(outcomes);
        }

        let mut buf = Vec::new();
        for record in &records {
            buf.extend(record.encode()?);
        }
        let offset = writer.backend.append(&buf)?;
        writer.backend.flush()?;
        if self.sync_on_commit {
            writer.backend.sync()?;
        }
        writer.applied = offset + buf.len() as u64;

        let mut data = self.data.write();
        for record in &records {
            let horizon = self.horizon(record.sequence);
            data.apply(record, horizon);
        }
        debug!(
            environment = %self.label,
            batches = records.len(),
            bytes = buf.len(),
            sequence = data.sequence,
            "committed write group"
        );
        Ok(outcomes)
    }

    /// Streams the raw store bytes, including any uncompacted history.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read or `out` fails.
    pub fn copy_raw_to(&self, out: &mut dyn Write) -> CoreResult<u64> {
        let writer = self.writer.lock();
        Ok(writer.backend.copy_to(out)?)
    }

    /// Writes a compacted log of the current state: one commit per DBI
    /// holding its visible entries. Opening the bytes as a store yields an
    /// environment with the same contents.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or `out` fails.
    pub fn write_snapshot_to(&self, out: &mut dyn Write) -> CoreResult<u64> {
        let data = self.data.read();
        let at = data.sequence;
        let mut written = 0u64;
        for (name, dbi) in &data.dbis {
            let flags = dbi.flags();
            let mut ops = vec![Op::CreateDbi {
                name: name.clone(),
                flags,
            }];
            dbi.scan(
                std::ops::Bound::Unbounded,
                std::ops::Bound::Unbounded,
                false,
                at,
                &mut |key, value, _| {
                    let (key, value) = (key.to_vec(), value.to_vec());
                    ops.push(if flags.dup_sort {
                        Op::PutDup {
                            dbi: name.clone(),
                            key,
                            value,
                        }
                    } else {
                        Op::Put {
                            dbi: name.clone(),
                            key,
                            value,
                        }
                    });
                    ControlFlow::Continue(())
                },
            );
            let bytes = LogRecord { sequence: at, ops }.encode()?;
            out.write_all(&bytes)?;
            written += bytes.len() as u64;
        }
        out.flush()?;
        Ok(written)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("label", &self.label)
            .field("sequence", &self.sequence())
            .finish_non_exhaustive()
    }
}

/// Effects of batches already accepted into the current group, layered
/// over the committed state so later batches see earlier ones.
struct Overlay<'a> {
    base: &'a EnvData,
    dbis: HashMap<String, Option<DbiFlags>>,
    keys: HashMap<(String, Vec<u8>), Option<u64>>,
}

impl<'a> Overlay<'a> {
    fn new(base: &'a EnvData) -> Self {
        Self {
            base,
            dbis: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    fn flags(&self, name: &str, local: &HashMap<String, Option<DbiFlags>>) -> Option<DbiFlags> {
        if let Some(flags) = local.get(name) {
            return *flags;
        }
        if let Some(flags) = self.dbis.get(name) {
            return *flags;
        }
        self.base.dbis.get(name).map(DbiData::flags)
    }

    fn version(&self, dbi: &str, key: &[u8]) -> Option<u64> {
        if let Some(v) = self.keys.get(&(dbi.to_string(), key.to_vec())) {
            return *v;
        }
        if self.dbis.contains_key(dbi) {
            // Dropped or recreated earlier in this group.
            return None;
        }
        self.base
            .dbis
            .get(dbi)
            .and_then(|data| data.get(key, self.base.sequence))
            .map(|(version, _)| version)
    }

    /// `Ok(true)` to apply, `Ok(false)` when the precondition fails,
    /// `Err` with a reason when the batch is invalid.
    fn check(&self, batch: &WriteBatch, label: &str) -> Result<bool, String> {
        let mut local: HashMap<String, Option<DbiFlags>> = HashMap::new();
        for op in &batch.ops {
            match op {
                Op::CreateDbi { name, flags } => match self.flags(name, &local) {
                    Some(existing) if existing != *flags => {
                        return Err(format!(
                            "index '{name}' already exists in '{label}' with different flags"
                        ));
                    }
                    _ => {
                        local.insert(name.clone(), Some(*flags));
                    }
                },
                Op::DropDbi { name } => {
                    if self.flags(name, &local).is_none() {
                        return Err(format!("index '{name}' does not exist in '{label}'"));
                    }
                    local.insert(name.clone(), None);
                }
                Op::Put { dbi, key, .. }
                | Op::Rewrite { dbi, key, .. }
                | Op::Delete { dbi, key } => {
                    let flags = self.require(dbi, &local, label)?;
                    if !matches!(op, Op::Delete { .. }) && flags.dup_sort {
                        return Err(format!("put on duplicate index '{dbi}'"));
                    }
                    check_key(flags, dbi, key)?;
                }
                Op::PutDup { dbi, key, .. } | Op::DeleteDup { dbi, key, .. } => {
                    let flags = self.require(dbi, &local, label)?;
                    if !flags.dup_sort {
                        return Err(format!("duplicate write on unique index '{dbi}'"));
                    }
                    check_key(flags, dbi, key)?;
                }
            }
        }

        Ok(match &batch.precondition {
            None => true,
            Some(Precondition::Absent { dbi, key }) => self.version(dbi, key).is_none(),
            Some(Precondition::Version { dbi, key, version }) => {
                self.version(dbi, key) == Some(*version)
            }
        })
    }

    fn require(
        &self,
        dbi: &str,
        local: &HashMap<String, Option<DbiFlags>>,
        label: &str,
    ) -> Result<DbiFlags, String> {
        self.flags(dbi, local)
            .ok_or_else(|| format!("index '{dbi}' does not exist in '{label}'"))
    }

    fn absorb(&mut self, batch: &WriteBatch, sequence: u64) {
        for op in &batch.ops {
            match op {
                Op::CreateDbi { name, flags } => {
                    if self.flags(name, &HashMap::new()).is_none() {
                        self.dbis.insert(name.clone(), Some(*flags));
                        self.keys.retain(|(dbi, _), _| dbi != name);
                    }
                }
                Op::DropDbi { name } => {
                    self.dbis.insert(name.clone(), None);
                    self.keys.retain(|(dbi, _), _| dbi != name);
                }
                Op::Put { dbi, key, .. } => {
                    self.keys.insert((dbi.clone(), key.clone()), Some(sequence));
                }
                Op::Rewrite { dbi, key, .. } => {
                    let version = self.version(dbi, key).unwrap_or(sequence);
                    self.keys.insert((dbi.clone(), key.clone()), Some(version));
                }
                Op::Delete { dbi, key } => {
                    self.keys.insert((dbi.clone(), key.clone()), None);
                }
                Op::PutDup { .. } | Op::DeleteDup { .. } => {}
            }
        }
    }
}

fn check_key(flags: DbiFlags, dbi: &str, key: &[u8]) -> Result<(), String> {
    if flags.key_kind.accepts(key) {
        Ok(())
    } else {
        Err(format!(
            "key does not match the {:?} key type of index '{dbi}'",
            flags.key_kind
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_codec::IndexKey;

    fn key(s: &str) -> Vec<u8> {
        IndexKey::from(s).encode().unwrap()
    }

    fn env_with_dbis() -> Environment {
        let env = Environment::in_memory("dev.dog");
        let mut batch = WriteBatch::new();
        batch
            .create_dbi("id", DbiFlags::PRIMARY)
            .create_dbi("name", DbiFlags::INDEX);
        env.write(batch).unwrap();
        env
    }

    #[test]
    fn write_then_read() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"row-a".to_vec());
        let outcome = env.write(batch).unwrap();

        let txn = env.read_txn();
        let (version, value) = txn.get_versioned("id", &key("a")).unwrap().unwrap();
        assert_eq!(value, b"row-a");
        assert_eq!(Some(version), outcome.sequence());
    }

    #[test]
    fn snapshot_ignores_later_commits() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"v1".to_vec());
        env.write(batch).unwrap();

        let txn = env.read_txn();
        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"v2".to_vec());
        batch.put("id", key("b"), b"v1".to_vec());
        env.write(batch).unwrap();

        assert_eq!(txn.get("id", &key("a")).unwrap().unwrap(), b"v1");
        assert!(txn.get("id", &key("b")).unwrap().is_none());
        drop(txn);
        assert_eq!(env.read_txn().get("id", &key("a")).unwrap().unwrap(), b"v2");
    }

    #[test]
    fn missing_dbi_is_not_found() {
        let env = Environment::in_memory("dev.dog");
        let err = env.read_txn().get("nope", b"\x03a").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn group_commit_resolves_earlier_tickets() {
        let env = env_with_dbis();
        let tickets: Vec<_> = (0..5)
            .map(|i| {
                let mut batch = WriteBatch::new();
                batch.put("id", key(&format!("k{i}")), vec![i]);
                env.submit(batch)
            })
            .collect();
        assert!(tickets.iter().all(|t| t.outcome().is_none()));

        env.wait(tickets.last().unwrap()).unwrap();
        let sequences: Vec<_> = tickets
            .iter()
            .map(|t| t.outcome().unwrap().sequence().unwrap())
            .collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(env.read_txn().entry_count("id").unwrap(), 5);
    }

    #[test]
    fn absent_precondition_sees_earlier_batch_in_group() {
        let env = env_with_dbis();
        let make = |value: u8| {
            let mut batch = WriteBatch::new().if_absent("id", key("a"));
            batch.put("id", key("a"), vec![value]);
            batch
        };
        let first = env.submit(make(1));
        let second = env.submit(make(2));
        env.wait(&second).unwrap();

        assert!(first.outcome().unwrap().is_committed());
        assert_eq!(second.outcome(), Some(&BatchOutcome::ConditionFailed));
        assert_eq!(env.read_txn().get("id", &key("a")).unwrap().unwrap(), vec![1]);
    }

    #[test]
    fn version_precondition_detects_concurrent_update() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"v1".to_vec());
        let v1 = env.write(batch).unwrap().sequence().unwrap();

        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"v2".to_vec());
        env.write(batch).unwrap();

        let mut stale = WriteBatch::new().if_version("id", key("a"), v1);
        stale.put("id", key("a"), b"stale".to_vec());
        assert_eq!(env.write(stale).unwrap(), BatchOutcome::ConditionFailed);
        assert_eq!(env.read_txn().get("id", &key("a")).unwrap().unwrap(), b"v2");
    }

    #[test]
    fn invalid_batch_is_rejected_atomically() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"row".to_vec());
        batch.put_dup("missing", key("x"), key("a"));
        assert!(env.write(batch).is_err());
        assert!(env.read_txn().get("id", &key("a")).unwrap().is_none());
    }

    #[test]
    fn wrong_key_kind_is_rejected() {
        let env = Environment::in_memory("audit");
        let mut batch = WriteBatch::new();
        batch.create_dbi("ts", DbiFlags::new(false, crate::env::KeyKind::Numeric));
        env.write(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.put("ts", key("not a number"), b"x".to_vec());
        assert!(env.write(batch).is_err());
    }

    #[test]
    fn drop_dbi_removes_contents() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put_dup("name", key("rex"), key("a"));
        env.write(batch).unwrap();

        let mut batch = WriteBatch::new();
        batch.drop_dbi("name");
        env.write(batch).unwrap();
        assert!(!env.has_dbi("name"));

        let mut batch = WriteBatch::new();
        batch.drop_dbi("name");
        assert!(env.write(batch).is_err());
    }

    #[test]
    fn snapshot_keeps_a_dropped_dbi() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put_dup("name", key("rex"), key("a"));
        env.write(batch).unwrap();

        let before = env.read_txn();
        let mut batch = WriteBatch::new();
        batch.drop_dbi("name");
        env.write(batch).unwrap();
        let mut batch = WriteBatch::new();
        batch.put("id", key("b"), b"row".to_vec());
        env.write(batch).unwrap();

        assert!(before.has_dbi("name"));
        assert_eq!(before.get_dups("name", &key("rex")).unwrap(), vec![key("a")]);
        let after = env.read_txn();
        assert!(!after.has_dbi("name"));
        assert!(after.get_dups("name", &key("rex")).unwrap_err().is_not_found());

        // Recreated under the same name, the new DBI starts empty and the
        // old snapshot still reads the old one.
        let mut batch = WriteBatch::new();
        batch.create_dbi("name", DbiFlags::INDEX);
        env.write(batch).unwrap();
        assert_eq!(env.read_txn().count_dups("name", &key("rex")).unwrap(), 0);
        assert_eq!(before.count_dups("name", &key("rex")).unwrap(), 1);
        drop(before);
        drop(after);

        // Once no snapshot predates the drop, the next commit releases it.
        let mut batch = WriteBatch::new();
        batch.put("id", key("c"), b"row".to_vec());
        env.write(batch).unwrap();
        assert!(env.data.read().retired.is_empty());
    }

    #[test]
    fn snapshot_does_not_see_later_dbis() {
        let env = Environment::in_memory("dev.dog");
        let before = env.read_txn();
        let mut batch = WriteBatch::new();
        batch.create_dbi("id", DbiFlags::PRIMARY);
        env.write(batch).unwrap();
        assert!(!before.has_dbi("id"));
        assert!(env.read_txn().has_dbi("id"));
    }

    #[test]
    fn rewrite_keeps_version_for_later_preconditions() {
        let env = env_with_dbis();
        let mut batch = WriteBatch::new();
        batch.put("id", key("a"), b"full".to_vec());
        let v1 = env.write(batch).unwrap().sequence().unwrap();

        let mut trim = WriteBatch::new().if_version("id", key("a"), v1);
        trim.rewrite("id", key("a"), b"trimmed".to_vec());
        assert!(env.write(trim).unwrap().is_committed());
        assert_eq!(
            env.read_txn().get_versioned("id", &key("a")).unwrap(),
            Some((v1, b"trimmed".to_vec()))
        );

        // A writer that read before the rewrite still holds a valid version.
        let mut update = WriteBatch::new().if_version("id", key("a"), v1);
        update.put("id", key("a"), b"updated".to_vec());
        let v2 = env.write(update).unwrap().sequence().unwrap();
        assert!(v2 > v1);

        // Same within one group: the rewrite does not move the version.
        let mut trim = WriteBatch::new().if_version("id", key("a"), v2);
        trim.rewrite("id", key("a"), b"again".to_vec());
        let mut follow = WriteBatch::new().if_version("id", key("a"), v2);
        follow.put("id", key("a"), b"last".to_vec());
        let first = env.submit(trim);
        let second = env.submit(follow);
        env.wait(&second).unwrap();
        assert!(first.outcome().unwrap().is_committed());
        assert!(second.outcome().unwrap().is_committed());
    }

    #[test]
    fn rewrite_survives_replay() {
        let backend = InMemoryBackend::new();
        let env = Environment::open("dev.dog", Box::new(backend.clone()), false).unwrap();
        let mut batch = WriteBatch::new();
        batch.create_dbi("id", DbiFlags::PRIMARY);
        batch.put("id", key("a"), b"full".to_vec());
        let v1 = env.write(batch).unwrap().sequence().unwrap();
        let mut batch = WriteBatch::new();
        batch.rewrite("id", key("a"), b"trimmed".to_vec());
        env.write(batch).unwrap();

        let reopened = Environment::open("dev.dog", Box::new(backend), false).unwrap();
        assert_eq!(
            reopened.read_txn().get_versioned("id", &key("a")).unwrap(),
            Some((v1, b"trimmed".to_vec()))
        );
    }

    #[test]
    fn shared_log_is_replayed_on_open() {
        let backend = InMemoryBackend::new();
        let env = Environment::open("dev.dog", Box::new(backend.clone()), false).unwrap();
        let mut batch = WriteBatch::new();
        batch.create_dbi("id", DbiFlags::PRIMARY);
        batch.put("id", key("a"), b"row".to_vec());
        env.write(batch).unwrap();

        let reopened = Environment::open("dev.dog", Box::new(backend), false).unwrap();
        assert_eq!(
            reopened.read_txn().get("id", &key("a")).unwrap().unwrap(),
            b"row"
        );
        assert_eq!(reopened.sequence(), env.sequence());
    }

    #[test]
    fn reset_read_txn_sees_other_handle() {
        let backend = InMemoryBackend::new();
        let a = Environment::open("dev.dog", Box::new(backend.clone()), false).unwrap();
        let b = Environment::open("dev.dog", Box::new(backend), false).unwrap();

        let mut batch = WriteBatch::new();
        batch.create_dbi("id", DbiFlags::PRIMARY);
        batch.put("id", key("a"), b"row".to_vec());
        a.write(batch).unwrap();

        assert!(!b.has_dbi("id"));
        b.reset_read_txn().unwrap();
        assert_eq!(b.read_txn().get("id", &key("a")).unwrap().unwrap(), b"row");

        // A commit through `b` lands after `a`'s, never over it.
        let mut batch = WriteBatch::new();
        batch.put("id", key("b"), b"row-b".to_vec());
        let seq = b.write(batch).unwrap().sequence().unwrap();
        assert!(seq > a.sequence());
    }

    #[test]
    fn torn_tail_is_truncated_on_open() {
        let backend = InMemoryBackend::new();
        let env = Environment::open("t", Box::new(backend.clone()), false).unwrap();
        let mut batch = WriteBatch::new();
        batch.create_dbi("id", DbiFlags::PRIMARY);
        env.write(batch).unwrap();
        let good = backend.size().unwrap();

        let mut handle = backend.clone();
        handle.append(&crate::env::record::LOG_MAGIC).unwrap();

        let reopened = Environment::open("t", Box::new(backend.clone()), false).unwrap();
        assert!(reopened.has_dbi("id"));
        assert_eq!(backend.size().unwrap(), good);
    }

    #[test]
    fn snapshot_stream_opens_as_store() {
        let env = env_with_dbis();
        for name in ["a", "b", "c"] {
            let mut batch = WriteBatch::new();
            batch.put("id", key(name), name.as_bytes().to_vec());
            batch.put_dup("name", key("shared"), key(name));
            env.write(batch).unwrap();
        }
        let mut batch = WriteBatch::new();
        batch.delete("id", key("b"));
        batch.delete_dup("name", key("shared"), key("b"));
        env.write(batch).unwrap();

        let mut bytes = Vec::new();
        env.write_snapshot_to(&mut bytes).unwrap();
        let copy =
            Environment::open("copy", Box::new(InMemoryBackend::with_data(bytes)), false).unwrap();

        let txn = copy.read_txn();
        assert_eq!(txn.entry_count("id").unwrap(), 2);
        assert_eq!(txn.count_dups("name", &key("shared")).unwrap(), 2);
        assert!(txn.get("id", &key("b")).unwrap().is_none());
    }

    #[test]
    fn raw_copy_matches_backend() {
        let backend = InMemoryBackend::new();
        let env = Environment::open("t", Box::new(backend.clone()), false).unwrap();
        let mut batch = WriteBatch::new();
        batch.create_dbi("id", DbiFlags::PRIMARY);
        env.write(batch).unwrap();

        let mut out = Vec::new();
        env.copy_raw_to(&mut out).unwrap();
        assert_eq!(out, backend.data());
    }
}

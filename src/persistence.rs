//! Persistence adapter (external collaborator, optional, feature
//! `persistence`): durable storage the client can `load()` from on startup
//! and `put`/`remove` into as the graph changes. There is no browser
//! `localStorage` to lean on here, so this module also ships a reference
//! in-memory journal implementation for tests and for embedders that want
//! the replication shape without wiring a real backend.

use std::cell::Cell;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Duration;
use std::time::Instant;

use crate::error::PersistenceError;
use crate::graph::Record;
use crate::graph::RecordId;

/// Durable storage for the record graph. `put`/`remove` are called from the
/// client facade's single `Graph::on_change` listener; `load` is called once
/// at client construction.
#[async_trait::async_trait(?Send)]
pub trait PersistenceAdapter {
    async fn load(&self) -> Result<Vec<(RecordId, Record)>, PersistenceError>;

    async fn put(&self, records: Vec<(RecordId, Record)>) -> Result<(), PersistenceError>;

    async fn remove(&self, ids: Vec<RecordId>) -> Result<(), PersistenceError>;

    /// Releases any held resources (file handles, connections). Called once
    /// when the owning client is torn down.
    async fn dispose(&self) -> Result<(), PersistenceError>;

    /// Forces any buffered writes to become durable. A no-op for adapters
    /// that write through on every `put`/`remove`.
    fn flush_journal(&self) {}

    /// Drops journal entries older than `max_age`. A no-op for adapters that
    /// keep no journal.
    fn evict_journal(&self, max_age: Duration) {
        let _ = max_age;
    }
}

enum JournalChange {
    Put(RecordId, Record),
    Remove(RecordId),
}

struct JournalEntry {
    epoch: u64,
    at: Instant,
    change: JournalChange,
}

/// Reference `PersistenceAdapter`: an in-memory table plus a monotonic
/// journal of every `put`/`remove`, so a second in-process client can
/// replicate by replaying entries past its own `last_seen_epoch`.
pub struct MemoryJournal {
    store: RefCell<HashMap<RecordId, Record>>,
    journal: RefCell<VecDeque<JournalEntry>>,
    next_epoch: Cell<u64>,
}

impl Default for MemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self { store: RefCell::new(HashMap::new()), journal: RefCell::new(VecDeque::new()), next_epoch: Cell::new(0) }
    }

    fn bump_epoch(&self) -> u64 {
        let epoch = self.next_epoch.get();
        self.next_epoch.set(epoch + 1);
        epoch
    }

    /// Every journal entry with `epoch > last_seen_epoch`, for a replicating
    /// reader to catch up from.
    pub fn entries_since(&self, last_seen_epoch: u64) -> Vec<(u64, RecordId, Option<Record>)> {
        self.journal
            .borrow()
            .iter()
            .filter(|entry| entry.epoch > last_seen_epoch)
            .map(|entry| match &entry.change {
                JournalChange::Put(id, record) => (entry.epoch, id.clone(), Some(record.clone())),
                JournalChange::Remove(id) => (entry.epoch, id.clone(), None),
            })
            .collect()
    }

    pub fn latest_epoch(&self) -> u64 {
        self.next_epoch.get().saturating_sub(1)
    }
}

#[async_trait::async_trait(?Send)]
impl PersistenceAdapter for MemoryJournal {
    async fn load(&self) -> Result<Vec<(RecordId, Record)>, PersistenceError> {
        Ok(self.store.borrow().iter().map(|(id, record)| (id.clone(), record.clone())).collect())
    }

    async fn put(&self, records: Vec<(RecordId, Record)>) -> Result<(), PersistenceError> {
        let mut store = self.store.borrow_mut();
        let mut journal = self.journal.borrow_mut();
        for (id, record) in records {
            store.insert(id.clone(), record.clone());
            let epoch = self.bump_epoch();
            journal.push_back(JournalEntry { epoch, at: Instant::now(), change: JournalChange::Put(id, record) });
        }
        Ok(())
    }

    async fn remove(&self, ids: Vec<RecordId>) -> Result<(), PersistenceError> {
        let mut store = self.store.borrow_mut();
        let mut journal = self.journal.borrow_mut();
        for id in ids {
            store.remove(&id);
            let epoch = self.bump_epoch();
            journal.push_back(JournalEntry { epoch, at: Instant::now(), change: JournalChange::Remove(id) });
        }
        Ok(())
    }

    async fn dispose(&self) -> Result<(), PersistenceError> {
        self.store.borrow_mut().clear();
        self.journal.borrow_mut().clear();
        Ok(())
    }

    fn flush_journal(&self) {
        // Nothing buffered: `put`/`remove` already write through.
    }

    fn evict_journal(&self, max_age: Duration) {
        let now = Instant::now();
        self.journal.borrow_mut().retain(|entry| now.duration_since(entry.at) <= max_age);
    }
}

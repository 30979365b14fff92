//! Commit engine and entity reads.
//!
//! [`Context`] wraps a shared storage adapter. It is the only place that
//! stamps `nanotime` (so fold semantics stay backend-independent) and the
//! only place batches reach [`Store::commit`]. A batch always belongs to a
//! single root subtree; callers issue one `execute` per root.

use std::cmp;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::error::{CrudError, Result};
use crate::model::Record;
use crate::store::Store;

mod entity;
mod update;

pub use entity::{ChildEdge, Entity, ScalarCell};
pub use update::{create, get, Batch, NodeRef};

/// Shared engine handle: the adapter, the process-monotonic commit clock,
/// and an optional wall-clock deadline applied to adapter calls.
///
/// `Context` is cheap to clone; clones share the store and the clock, so
/// sequential commits across clones still get non-decreasing timestamps.
#[derive(Clone)]
pub struct Context {
    store: Arc<dyn Store>,
    clock: Arc<AtomicI64>,
    deadline: Option<Instant>,
}

impl Context {
    pub fn new(store: impl Store + 'static) -> Self {
        Self::from_shared(Arc::new(store))
    }

    pub fn from_shared(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            clock: Arc::new(AtomicI64::new(0)),
            deadline: None,
        }
    }

    /// Returns a handle whose operations fail with
    /// [`CrudError::DeadlineExceeded`] once `deadline` passes. Checked
    /// before every adapter call and at every traversal level; partial
    /// traversal state is discarded.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut ctx = self.clone();
        ctx.deadline = Some(deadline);
        ctx
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub(crate) fn check_deadline(&self) -> Result<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(CrudError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Stamps one nanotime over the whole batch (intra-batch order is the
    /// `seq` field) and hands it to the adapter.
    pub(crate) fn commit_batch(&self, mut records: Vec<Record>) -> Result<()> {
        self.check_deadline()?;
        let nanotime = self.next_nanotime();
        for (seq, record) in records.iter_mut().enumerate() {
            record.nanotime = nanotime;
            record.seq = seq as u32;
        }
        debug!(nanotime, records = records.len(), "committing batch");
        self.store.commit(&records)
    }

    /// Monotonic-enough commit timestamp: wall-clock nanos, bumped past the
    /// previous stamp on clock ties or regressions.
    fn next_nanotime(&self) -> i64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        let prev = match self
            .clock
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(cmp::max(last + 1, now))
            }) {
            Ok(prev) | Err(prev) => prev,
        };
        cmp::max(prev + 1, now)
    }

    /// Folds every record of the subject into its current snapshot. A
    /// subject with no records folds to an empty snapshot (`exists()` is
    /// false); absence is not an error at this layer.
    pub fn read_entity(&self, kind: &str, id: &str) -> Result<Entity> {
        self.check_deadline()?;
        let records = self.store.get_entity(kind, id)?;
        Ok(Entity::fold(kind, id, records))
    }

    /// Raw record history of the subject in `(nanotime, seq)` order, for
    /// audit and migration tooling. Includes superseded values and records
    /// of tombstoned subjects.
    pub fn read_history(&self, kind: &str, id: &str) -> Result<Vec<Record>> {
        self.check_deadline()?;
        let mut records = self.store.get_entity(kind, id)?;
        records.sort_by_key(Record::ord_key);
        Ok(records)
    }
}

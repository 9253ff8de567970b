#![forbid(unsafe_code)]

//! Batched writes on one cell.
//!
//! A [`Transaction`] holds the cell's transaction lock for its lifetime.
//! Writes made through it (or through the cell from the same thread) apply
//! immediately but stay silent; when the outermost transaction on the cell
//! ends normally, watchers receive exactly one "changed" delivery with the
//! final value, even if the value ended where it started.
//!
//! The guard is `!Send`: it cannot be held across an `.await` on a
//! multi-threaded runtime or moved to another thread.
//!
//! # Failure Modes
//!
//! - **Panic inside the scope**: the lock is released during unwinding and
//!   nothing is delivered.
//! - **[`discard`](Transaction::discard)** or an `Err` from
//!   [`Ref::transact`]: changes stay applied, nothing is delivered.
//! - **Contention**: a second thread opening a transaction (or writing) on the
//!   same cell blocks until the first one ends.

use std::cell::Cell;
use std::ops::Deref;

use parking_lot::ReentrantMutexGuard;

use super::cell::Ref;
use super::payload::Payload;

/// Scoped batch of writes on one [`Ref`]. Derefs to the cell.
#[must_use = "dropping the transaction ends it immediately"]
pub struct Transaction<'a, T: Payload> {
    cell: &'a Ref<T>,
    depth: Option<ReentrantMutexGuard<'a, Cell<usize>>>,
    deliver: bool,
}

impl<'a, T: Payload> Transaction<'a, T> {
    fn begin(cell: &'a Ref<T>) -> Self {
        let depth = cell.inner.tx.lock();
        depth.set(depth.get() + 1);
        tracing::debug!(name = %cell.inner.name, depth = depth.get(), "transaction started");
        Self {
            cell,
            depth: Some(depth),
            deliver: true,
        }
    }

    /// Nesting level of this transaction, starting at 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.as_ref().map_or(0, |d| d.get())
    }

    /// End the transaction and deliver the batch.
    pub fn commit(self) {}

    /// End the transaction without delivering. Changes stay applied.
    pub fn discard(mut self) {
        self.deliver = false;
    }
}

impl<T: Payload> Deref for Transaction<'_, T> {
    type Target = Ref<T>;

    fn deref(&self) -> &Ref<T> {
        self.cell
    }
}

impl<T: Payload> Drop for Transaction<'_, T> {
    fn drop(&mut self) {
        let Some(depth) = self.depth.take() else {
            return;
        };
        let remaining = depth.get().saturating_sub(1);
        depth.set(remaining);
        drop(depth);

        let name = &self.cell.inner.name;
        if std::thread::panicking() {
            tracing::debug!(name = %name, "transaction aborted by panic");
        } else if !self.deliver {
            tracing::debug!(name = %name, "transaction discarded");
        } else if remaining == 0 {
            tracing::debug!(name = %name, "transaction committed");
            self.cell.inner.trigger();
        }
    }
}

impl<T: Payload> Ref<T> {
    /// Open a transaction on this cell, blocking while another thread holds one.
    pub fn transaction(&self) -> Transaction<'_, T> {
        Transaction::begin(self)
    }

    /// Run `body` in a transaction. An `Err` ends it without delivering.
    pub fn transact<R, E>(
        &self,
        body: impl FnOnce(&Transaction<'_, T>) -> Result<R, E>,
    ) -> Result<R, E> {
        let tx = self.transaction();
        match body(&tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(err) => {
                tx.discard();
                Err(err)
            }
        }
    }
}

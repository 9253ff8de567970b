#![forbid(unsafe_code)]

//! Observable state for the shell.
//!
//! - [`Ref`]: a named, typed cell whose changes reach watchers on the next
//!   loop turn. Built with [`Ref::new`] or [`Ref::builder`].
//! - [`ListView`], [`SetView`], [`MapView`]: in-place container edits that
//!   notify like a plain write.
//! - [`Transaction`]: batches writes on one cell into a single delivery.
//! - [`Computed`]: lazy, memoized derivations over cells.
//! - [`Value`]: the dynamically shaped payload used for settings and other
//!   loosely typed state.
//!
//! # Architecture
//!
//! Each cell owns a [`Signals`](crate::signals::Signals) bus and notifies on
//! its `"changed"` signal through the bus's deferred path, so a burst of
//! writes inside one callback collapses into one delivery carrying the final
//! value. A per-cell re-entrant lock tracks transaction depth: writes from
//! the thread holding it join the transaction, writes from other threads
//! wait.
//!
//! # Invariants
//!
//! 1. Version increments exactly once per write or container edit that
//!    changes the value.
//! 2. Writing a value equal to the current one is a no-op.
//! 3. A cell that is not ready never notifies.
//! 4. `Computed::get()` never returns a stale value.

pub mod cell;
pub mod computed;
pub mod containers;
pub mod payload;
pub mod transaction;

pub use cell::{Ref, RefBuilder, CHANGED};
pub use computed::{Computed, Dependency};
pub use containers::{
    ListPayload, ListView, MapContainer, MapPayload, MapView, PathError, SetContainer, SetPayload,
    SetView,
};
pub use payload::{PathSegment, Payload, Value, ValueKind};
pub use transaction::Transaction;

#![forbid(unsafe_code)]

//! Lazy values derived from [`Ref`] sources.
//!
//! # Design
//!
//! [`Computed<T>`] wraps a compute function, its cached result, and one
//! version reader per source cell. Cells bump their version synchronously on
//! every committed change, so staleness is detected by comparing the readings
//! with the versions seen at the last computation. Nothing waits for the
//! deferred "changed" delivery.
//!
//! # Invariants
//!
//! 1. `get()` never returns a value computed from older source versions than
//!    the current ones.
//! 2. The compute function runs at most once per change of the sources
//!    (memoization).
//! 3. `version()` increments by exactly 1 per recomputation.
//!
//! # Failure Modes
//!
//! - **Compute function panics**: the cached value and the seen versions stay
//!   from the last successful computation, so the next `get()` retries.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::cell::Ref;
use super::payload::Payload;

/// Version reader on one source cell.
pub struct Dependency {
    read_version: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl Dependency {
    /// Track `cell`.
    pub fn on<S: Payload>(cell: &Ref<S>) -> Self {
        let cell = cell.clone();
        Self {
            read_version: Box::new(move || cell.version()),
        }
    }

    fn version(&self) -> u64 {
        (self.read_version)()
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("version", &self.version())
            .finish()
    }
}

struct ComputedInner<T> {
    compute: Box<dyn Fn() -> T + Send + Sync>,
    dependencies: Vec<Dependency>,
    /// Source versions the cached value was computed from.
    seen: Vec<u64>,
    cached: Option<T>,
    forced: bool,
    version: u64,
}

impl<T> ComputedInner<T> {
    fn is_stale(&self) -> bool {
        self.forced
            || self.cached.is_none()
            || self
                .dependencies
                .iter()
                .zip(&self.seen)
                .any(|(dep, seen)| dep.version() != *seen)
    }

    fn refresh(&mut self) -> &T {
        // A panicking compute leaves the previous value in place.
        let fresh = if self.is_stale() { None } else { self.cached.take() };
        let value = match fresh {
            Some(value) => value,
            None => {
                let seen = self.dependencies.iter().map(Dependency::version).collect();
                let value = (self.compute)();
                self.seen = seen;
                self.forced = false;
                self.version += 1;
                value
            }
        };
        self.cached.insert(value)
    }
}

/// A lazily evaluated, memoized value derived from one or more cells.
///
/// Cloning a `Computed` creates a new handle to the same cache.
pub struct Computed<T> {
    inner: Arc<Mutex<ComputedInner<T>>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Computed")
            .field("cached", &inner.cached)
            .field("version", &inner.version)
            .finish()
    }
}

impl<T: Clone + Send + 'static> Computed<T> {
    /// Derive from a single cell.
    pub fn from_ref<S: Payload>(source: &Ref<S>, map: impl Fn(&S) -> T + Send + Sync + 'static) -> Self {
        let s = source.clone();
        Self::from_fn(move || s.with(&map), vec![Dependency::on(source)])
    }

    /// Derive from two cells.
    pub fn from2<S1: Payload, S2: Payload>(
        s1: &Ref<S1>,
        s2: &Ref<S2>,
        map: impl Fn(&S1, &S2) -> T + Send + Sync + 'static,
    ) -> Self {
        let (a, b) = (s1.clone(), s2.clone());
        Self::from_fn(
            move || {
                let first = a.unpack();
                b.with(|second| map(&first, second))
            },
            vec![Dependency::on(s1), Dependency::on(s2)],
        )
    }

    /// Derive from three cells.
    pub fn from3<S1: Payload, S2: Payload, S3: Payload>(
        s1: &Ref<S1>,
        s2: &Ref<S2>,
        s3: &Ref<S3>,
        map: impl Fn(&S1, &S2, &S3) -> T + Send + Sync + 'static,
    ) -> Self {
        let (a, b, c) = (s1.clone(), s2.clone(), s3.clone());
        Self::from_fn(
            move || {
                let first = a.unpack();
                let second = b.unpack();
                c.with(|third| map(&first, &second, third))
            },
            vec![
                Dependency::on(s1),
                Dependency::on(s2),
                Dependency::on(s3),
            ],
        )
    }

    /// Derive from a free-standing function. Only the listed dependencies
    /// mark the cache stale; without any, it recomputes on `invalidate` only.
    pub fn from_fn(
        compute: impl Fn() -> T + Send + Sync + 'static,
        dependencies: Vec<Dependency>,
    ) -> Self {
        let seen = vec![0; dependencies.len()];
        Self {
            inner: Arc::new(Mutex::new(ComputedInner {
                compute: Box::new(compute),
                dependencies,
                seen,
                cached: None,
                forced: false,
                version: 0,
            })),
        }
    }

    /// Current value, recomputed first if any source changed.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.lock().refresh().clone()
    }

    /// Borrow the current value without cloning.
    ///
    /// `f` must not call back into this `Computed`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let mut inner = self.inner.lock();
        f(inner.refresh())
    }

    /// Whether the next `get()` will recompute.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.lock().is_stale()
    }

    /// Force a recomputation on the next `get()`.
    pub fn invalidate(&self) {
        self.inner.lock().forced = true;
    }

    /// Number of computations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.lock().version
    }
}

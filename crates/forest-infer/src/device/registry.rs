//! Keyed single-flight initialization registry.
//!
//! Each key owns a cell with a three-phase state machine:
//!
//! ```text
//!            ensure()              init Ok
//!   Idle ───────────────► InFlight ─────────► Ready
//!    ▲                        │
//!    └────────────────────────┘
//!          init Err / panic
//! ```
//!
//! Exactly one caller runs the initializer for a key at a time. Callers that
//! arrive while it runs block on the cell's condvar and observe the outcome of
//! that attempt: success, or a clone of its error. A failed or panicked
//! attempt returns the cell to `Idle`, so the next caller retries. Once
//! `Ready`, a key stays ready for the registry's lifetime and the check is a
//! single atomic load after the map lookup.
//!
//! Cells live in a sharded [`DashMap`]; its shard lock is only held to find or
//! insert a cell, so contention on one key never blocks another.

use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    InFlight,
    Ready,
}

#[derive(Debug)]
struct CellState<E> {
    phase: Phase,
    /// Number of attempts started so far.
    attempt: u64,
    /// Attempt number and error of the most recent failure.
    last_failure: Option<(u64, E)>,
}

#[derive(Debug)]
struct InitCell<E> {
    ready: AtomicBool,
    state: Mutex<CellState<E>>,
    changed: Condvar,
}

impl<E> InitCell<E> {
    fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            state: Mutex::new(CellState {
                phase: Phase::Idle,
                attempt: 0,
                last_failure: None,
            }),
            changed: Condvar::new(),
        }
    }
}

/// Returns the cell to `Idle` if the initializer unwinds.
struct FlightGuard<'a, E> {
    cell: &'a InitCell<E>,
    armed: bool,
}

impl<E> Drop for FlightGuard<'_, E> {
    fn drop(&mut self) {
        if self.armed {
            self.cell.state.lock().phase = Phase::Idle;
            self.cell.changed.notify_all();
        }
    }
}

/// Per-key single-flight initialization state.
#[derive(Debug)]
pub struct InitRegistry<K: Eq + Hash, E> {
    cells: DashMap<K, Arc<InitCell<E>>>,
}

impl<K: Eq + Hash, E> Default for InitRegistry<K, E> {
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<K, E> InitRegistry<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` has been initialized successfully.
    pub fn is_initialized(&self, key: &K) -> bool {
        self.cells
            .get(key)
            .is_some_and(|cell| cell.ready.load(Ordering::Acquire))
    }

    /// Make sure `key` is initialized, running `init` if no earlier attempt
    /// succeeded and none is in flight.
    ///
    /// `init` runs at most once per call and never concurrently for the same
    /// key. Callers that wait on an in-flight attempt return its result.
    pub fn ensure<F>(&self, key: &K, init: F) -> Result<(), E>
    where
        F: FnOnce() -> Result<(), E>,
    {
        let cell = self.cell(key);
        if cell.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let mut state = cell.state.lock();
        loop {
            match state.phase {
                Phase::Ready => return Ok(()),
                Phase::Idle => break,
                Phase::InFlight => {
                    let attempt = state.attempt;
                    tracing::trace!(attempt, "waiting for in-flight initialization");
                    while state.phase == Phase::InFlight && state.attempt == attempt {
                        cell.changed.wait(&mut state);
                    }

                    if state.phase == Phase::Ready {
                        return Ok(());
                    }
                    if let Some((failed, err)) = &state.last_failure {
                        if *failed == attempt {
                            return Err(err.clone());
                        }
                    }
                    // The attempt unwound, or a newer one started: look again.
                }
            }
        }

        state.phase = Phase::InFlight;
        state.attempt += 1;
        let attempt = state.attempt;
        drop(state);

        let mut guard = FlightGuard {
            cell: &*cell,
            armed: true,
        };
        let result = init();

        let mut state = cell.state.lock();
        match &result {
            Ok(()) => {
                state.phase = Phase::Ready;
                cell.ready.store(true, Ordering::Release);
            }
            Err(err) => {
                state.phase = Phase::Idle;
                state.last_failure = Some((attempt, err.clone()));
            }
        }
        guard.armed = false;
        drop(state);
        cell.changed.notify_all();

        result
    }

    fn cell(&self, key: &K) -> Arc<InitCell<E>> {
        if let Some(cell) = self.cells.get(key) {
            return Arc::clone(cell.value());
        }
        let cell = self
            .cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(InitCell::new()));
        Arc::clone(cell.value())
    }
}

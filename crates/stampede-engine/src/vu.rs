//! Virtual-user slot pool.
//!
//! The pool owns a bounded set of execution slots. A slot is borrowed by at
//! most one in-flight iteration at a time through an RAII [`VuLease`]; the
//! pool grows lazily up to its maximum and never queues callers. When no
//! slot can be produced, `try_acquire` returns `None` and the caller decides
//! what a refused start means (the arrival-rate executor counts it as a
//! dropped iteration).

use std::sync::Arc;

use parking_lot::Mutex;

/// Lifecycle state of a VU slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VuState {
    /// Available for acquisition.
    Idle,
    /// Borrowed by an in-flight iteration or an iterating worker.
    Running,
    /// Flagged for drain-down; finishes its current iteration, then stops.
    Draining,
    /// Terminal; the slot will not be handed out again.
    Stopped,
}

impl VuState {
    /// Returns the canonical lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug)]
struct VuSlot {
    state: VuState,
}

#[derive(Debug)]
struct PoolInner {
    slots: Vec<VuSlot>,
    shutting_down: bool,
}

/// Bounded, lazily growing pool of VU slots. Cheap to clone; clones share
/// state.
#[derive(Debug, Clone)]
pub struct VuPool {
    inner: Arc<Mutex<PoolInner>>,
    max: u32,
}

impl VuPool {
    /// Creates a pool with `pre_allocated` idle slots, growing lazily up to
    /// `max`.
    #[must_use]
    pub fn new(pre_allocated: u32, max: u32) -> Self {
        let max = max.max(pre_allocated);
        let slots = (0..pre_allocated)
            .map(|_| VuSlot {
                state: VuState::Idle,
            })
            .collect();
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                slots,
                shutting_down: false,
            })),
            max,
        }
    }

    /// Hands out an idle slot (Idle → Running), creating one if the pool has
    /// not reached its maximum yet. Returns `None` when every slot is busy
    /// and the pool is full; the caller must not wait.
    #[must_use]
    pub fn try_acquire(&self) -> Option<VuLease> {
        let mut inner = self.inner.lock();
        if inner.shutting_down {
            return None;
        }

        if let Some((id, slot)) = inner
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, s)| s.state == VuState::Idle)
        {
            slot.state = VuState::Running;
            return Some(VuLease {
                pool: self.clone(),
                id: id as u32,
            });
        }

        if inner.slots.len() < self.max as usize {
            let id = inner.slots.len() as u32;
            inner.slots.push(VuSlot {
                state: VuState::Running,
            });
            return Some(VuLease {
                pool: self.clone(),
                id,
            });
        }

        None
    }

    fn release(&self, id: u32) {
        let mut inner = self.inner.lock();
        let shutting_down = inner.shutting_down;
        if let Some(slot) = inner.slots.get_mut(id as usize) {
            slot.state = match slot.state {
                VuState::Running | VuState::Draining if shutting_down => VuState::Stopped,
                VuState::Running | VuState::Draining => VuState::Idle,
                other => other,
            };
        }
    }

    /// Flags up to `n` running slots for drain-down; returns how many were
    /// flagged. Draining workers finish their current iteration first.
    pub fn mark_draining(&self, n: u32) -> u32 {
        let mut inner = self.inner.lock();
        let mut marked = 0;
        for slot in inner.slots.iter_mut() {
            if marked == n {
                break;
            }
            if slot.state == VuState::Running {
                slot.state = VuState::Draining;
                marked += 1;
            }
        }
        marked
    }

    /// True when the given slot has been flagged for drain-down.
    #[must_use]
    pub fn is_draining(&self, id: u32) -> bool {
        let inner = self.inner.lock();
        inner
            .slots
            .get(id as usize)
            .map(|s| s.state == VuState::Draining)
            .unwrap_or(false)
    }

    /// Slots currently in `Running` state.
    #[must_use]
    pub fn running(&self) -> u32 {
        self.count(|s| s == VuState::Running)
    }

    /// Slots currently executing (`Running` or `Draining`).
    #[must_use]
    pub fn active(&self) -> u32 {
        self.count(|s| matches!(s, VuState::Running | VuState::Draining))
    }

    /// Total slots created so far (any state).
    #[must_use]
    pub fn allocated(&self) -> u32 {
        self.inner.lock().slots.len() as u32
    }

    /// Upper bound on slots this pool will ever create.
    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.max
    }

    /// Stops handing out slots and retires idle ones; busy slots retire on
    /// release.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.shutting_down = true;
        for slot in inner.slots.iter_mut() {
            if slot.state == VuState::Idle {
                slot.state = VuState::Stopped;
            }
        }
    }

    fn count(&self, pred: impl Fn(VuState) -> bool) -> u32 {
        let inner = self.inner.lock();
        inner.slots.iter().filter(|s| pred(s.state)).count() as u32
    }

    #[cfg(test)]
    fn states(&self) -> Vec<VuState> {
        self.inner.lock().slots.iter().map(|s| s.state).collect()
    }
}

/// Exclusive borrow of one VU slot; releases on drop.
#[derive(Debug)]
pub struct VuLease {
    pool: VuPool,
    id: u32,
}

impl VuLease {
    /// Identity of the borrowed slot.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True when the slot was flagged for drain-down.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.pool.is_draining(self.id)
    }
}

impl Drop for VuLease {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

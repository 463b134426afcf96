//! Run-wide recursion and deadline budget.
//!
//! One [`ResourceLimiter`] is created per run and shared by every [`crate::Context`] of that run.
//! It is consulted at every node visit, at every dispatcher entry and inside compiled loops.
//! Exceeding either limit yields a fatal [`EmuError`] which aborts the run.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::error::EmuError;
use crate::policy::EmulationPolicy;

/// Largest string, in bytes, or array, in elements, emulated code may allocate.
pub(crate) const MAX_ALLOC_LEN: usize = 1 << 24;

/// `n` as an allocation size when emulated code is allowed that much. Negative sizes are empty.
pub(crate) fn alloc_len(n: i64) -> Option<usize> {
    usize::try_from(n.max(0))
        .ok()
        .filter(|n| *n <= MAX_ALLOC_LEN)
}

/// Minimum native stack to keep available before recursing into a procedure call.
const RED_ZONE: usize = 128 * 1024;

/// Native stack allocated whenever the red zone is reached.
const STACK_PER_RECURSION: usize = 2 * 1024 * 1024;

#[derive(Debug)]
pub struct ResourceLimiter {
    max_depth: usize,
    depth: Cell<usize>,
    deadline: Instant,
    ticks: Cell<u64>,
}

impl ResourceLimiter {
    pub fn new(max_depth: usize, budget: Duration) -> Self {
        let now = Instant::now();
        Self {
            max_depth,
            depth: Cell::new(0),
            deadline: now.checked_add(budget).unwrap_or(now + Duration::from_secs(86_400)),
            ticks: Cell::new(0),
        }
    }

    pub fn from_policy(policy: &EmulationPolicy) -> Self {
        Self::new(policy.max_call_depth, policy.max_execution_time)
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Full check of both limits.
    pub fn check(&self) -> Result<(), EmuError> {
        if self.depth.get() > self.max_depth {
            return Err(EmuError::RecursionLimit {
                depth: self.depth.get(),
            });
        }
        if Instant::now() >= self.deadline {
            return Err(EmuError::Timeout);
        }
        Ok(())
    }

    /// Cheap per-node check: the clock is only read every 64 calls.
    pub fn tick(&self) -> Result<(), EmuError> {
        let ticks = self.ticks.get().wrapping_add(1);
        self.ticks.set(ticks);
        if self.depth.get() > self.max_depth {
            return Err(EmuError::RecursionLimit {
                depth: self.depth.get(),
            });
        }
        if (ticks & 0x3F) == 0 && Instant::now() >= self.deadline {
            return Err(EmuError::Timeout);
        }
        Ok(())
    }

    /// Account for one more level of procedure nesting. The level is released when the guard
    /// drops.
    pub fn enter(self: &Rc<Self>) -> Result<DepthGuard, EmuError> {
        let depth = self.depth.get() + 1;
        if depth > self.max_depth {
            log::warn!("call depth {depth} exceeds the limit of {}", self.max_depth);
            return Err(EmuError::RecursionLimit { depth });
        }
        self.depth.set(depth);
        Ok(DepthGuard(self.clone()))
    }
}

#[derive(Debug)]
pub struct DepthGuard(Rc<ResourceLimiter>);

impl Drop for DepthGuard {
    fn drop(&mut self) {
        let depth = self.0.depth.get();
        self.0.depth.set(depth.saturating_sub(1));
    }
}

/// Grow the native stack when it runs low so that deep emulated recursion is bounded by the
/// configured call depth rather than by the host thread's stack size.
#[inline]
pub(crate) fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

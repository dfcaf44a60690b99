// ============================================================================
// SCHEDULER — timers and local task spawning
// ============================================================================
//
// Debounce windows, removal transitions and fire-and-forget fetches all go
// through this seam instead of touching setTimeout/spawn_local directly, so
// they can be driven deterministically.
//
// FrameScheduler follows the frame-tick pattern the other engines use: the
// host calls tick(now_ms) once per animation frame (or a test calls advance),
// due timers fire in (due time, registration order), and spawned futures run
// on a single-threaded LocalPool until they stall on I/O.
//
// ============================================================================

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::executor::{LocalPool, LocalSpawner};
use futures::future::LocalBoxFuture;
use futures::task::LocalSpawnExt;

/// Cancels a pending timer. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Rc<Cell<bool>>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }
}

/// Timer and task seam. Implementations are single-threaded.
pub trait Scheduler {
    /// Current time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Run `task` once `delay_ms` has elapsed, unless the token is cancelled.
    fn after(&self, delay_ms: u64, task: Box<dyn FnOnce()>) -> CancelToken;

    /// Run a future to completion in the background.
    fn spawn(&self, task: LocalBoxFuture<'static, ()>);
}

// ── FrameScheduler ─────────────────────────────────────────────────────────

struct Timer {
    due_ms: u64,
    seq: u64,
    token: CancelToken,
    task: Box<dyn FnOnce()>,
}

pub struct FrameScheduler {
    now_ms: Cell<u64>,
    next_seq: Cell<u64>,
    timers: RefCell<Vec<Timer>>,
    pool: RefCell<LocalPool>,
    spawner: LocalSpawner,
}

impl FrameScheduler {
    pub fn new() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            now_ms: Cell::new(0),
            next_seq: Cell::new(0),
            timers: RefCell::new(Vec::new()),
            pool: RefCell::new(pool),
            spawner,
        }
    }

    /// Move the clock to `now_ms`, firing every timer that becomes due on the
    /// way. Timers scheduled by a firing timer are honored in the same tick if
    /// they fall inside the window.
    pub fn tick(&self, now_ms: u64) {
        let target = now_ms.max(self.now_ms.get());
        loop {
            self.run_until_stalled();
            let Some(timer) = self.take_next_due(target) else {
                break;
            };
            self.now_ms.set(timer.due_ms.max(self.now_ms.get()));
            if !timer.token.is_cancelled() {
                (timer.task)();
            }
        }
        self.now_ms.set(target);
        self.run_until_stalled();
    }

    /// Advance the clock by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.tick(self.now_ms.get() + delta_ms);
    }

    /// Poll spawned tasks until none can make progress.
    pub fn run_until_stalled(&self) {
        self.pool.borrow_mut().run_until_stalled();
    }

    /// Timers that are scheduled and not cancelled.
    pub fn pending_timers(&self) -> usize {
        self.timers
            .borrow()
            .iter()
            .filter(|t| !t.token.is_cancelled())
            .count()
    }

    fn take_next_due(&self, target: u64) -> Option<Timer> {
        let mut timers = self.timers.borrow_mut();
        timers.retain(|t| !t.token.is_cancelled());
        let idx = timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due_ms <= target)
            .min_by_key(|(_, t)| (t.due_ms, t.seq))
            .map(|(idx, _)| idx)?;
        Some(timers.swap_remove(idx))
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for FrameScheduler {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }

    fn after(&self, delay_ms: u64, task: Box<dyn FnOnce()>) -> CancelToken {
        let token = CancelToken::new();
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.timers.borrow_mut().push(Timer {
            due_ms: self.now_ms.get() + delay_ms,
            seq,
            token: token.clone(),
            task,
        });
        token
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(err) = self.spawner.spawn_local(task) {
            tracing::warn!(%err, "local executor rejected task");
        }
    }
}

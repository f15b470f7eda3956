//! A mutex built directly on the wait-queue primitive (`spec.md` §4.6).
//!
//! No owner tracking, no recursion, no priority inheritance. Lock
//! acquisition is FIFO-fair because the underlying wait queue is FIFO.

use crate::error::Error;
use crate::kernel::{Kernel, QueueId};
use crate::platform::Platform;
use crate::thread::SavedContext;

/// `{ locked: bool, queue: wait-queue-head }` from `spec.md` §3. Invariant:
/// if `locked` is `false`, `queue` is empty.
pub struct Mutex {
    locked: bool,
    queue: QueueId,
}

impl Mutex {
    /// Allocate a new, unlocked mutex. Needs a kernel handle because the
    /// wait queue backing it lives in the kernel's queue arena (see
    /// `DESIGN.md` on why this crate does not give wait queues their own
    /// free-standing storage).
    pub fn new<P: Platform, const PR: usize, const MT: usize, const Q: usize>(
        kernel: &mut Kernel<P, PR, MT, Q>,
    ) -> Result<Self, Error> {
        Ok(Mutex {
            locked: false,
            queue: kernel.new_queue()?,
        })
    }

    #[cfg(test)]
    pub(crate) fn queue_for_test(&self) -> QueueId {
        self.queue
    }

    fn try_lock_raw(&mut self) -> Result<(), Error> {
        if self.locked {
            Err(Error::WouldBlock)
        } else {
            self.locked = true;
            Ok(())
        }
    }

    /// `try_lock` (`spec.md` §4.6). Enters and leaves the scheduler-critical
    /// region itself.
    pub fn try_lock<P: Platform, const PR: usize, const MT: usize, const Q: usize>(
        &mut self,
        kernel: &mut Kernel<P, PR, MT, Q>,
    ) -> Result<(), Error> {
        kernel.thread_critical_start();
        let result = self.try_lock_raw();
        kernel.thread_critical_end();
        result
    }

    /// `lock` (`spec.md` §4.6): retry `try_lock` after each wakeup. `_wait`
    /// returns with the scheduler-critical region re-acquired, so the retry
    /// is race-free.
    pub fn lock<P: Platform, const PR: usize, const MT: usize, const Q: usize>(
        &mut self,
        kernel: &mut Kernel<P, PR, MT, Q>,
        ctx: &mut SavedContext,
    ) {
        kernel.thread_critical_start();
        while self.try_lock_raw().is_err() {
            let _ = kernel.wait(ctx, self.queue, 0);
        }
        kernel.thread_critical_end();
    }

    /// `unlock` (`spec.md` §4.6): clear `locked` and signal-yield the
    /// waiters.
    pub fn unlock<P: Platform, const PR: usize, const MT: usize, const Q: usize>(
        &mut self,
        kernel: &mut Kernel<P, PR, MT, Q>,
        ctx: &mut SavedContext,
    ) {
        kernel.thread_critical_start();
        self.locked = false;
        kernel.signal_yield(ctx, self.queue);
    }
}

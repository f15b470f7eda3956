//! The scheduler: fixed-priority ready queues, the context switch, wait
//! queues, IRQ-safe signalling, and thread creation/termination/reaping.
//!
//! `Kernel` owns every arena this crate needs: thread descriptors, the
//! sleep heap, the per-priority ready lists, and a table of generic
//! wait-queue slots shared by mutexes, per-process ghost lists, per-process
//! reaper queues, and the `irq_signaled` list. Nothing here allocates after
//! construction; capacities are the `PRIORITIES`/`MAX_THREADS`/`QUEUES`
//! const generics.
//!
//! # The `ctx` parameter
//!
//! Real hardware suspends and resumes a thread by switching the CPU
//! register file; that mechanism is necessarily architecture-specific
//! assembly living outside this crate (`spec.md` §6's hardware trampoline).
//! Every operation that can suspend the calling thread therefore takes
//! `ctx: &mut SavedContext`, standing in for "the caller's register frame
//! at the point of the call" on the way in, and "the frame to resume into"
//! on the way out — the same contract `on_tick` has with the real
//! trampoline, just invoked from thread-level code instead of from an
//! interrupt.
//!
//! # Scheduler-critical regions
//!
//! Operations that only manipulate state the caller is assumed to already
//! protect (the low-level `wait`/`sleep`, the non-yielding `signal`/
//! `broadcast`) require the caller to be inside a scheduler-critical
//! region (`spec.md` §4.5). The convenience operations that are meant to
//! be called from ordinary thread-level code (`wait_relative`,
//! `sleep_relative`, `create`, `end`, `join`, `join_all`, and every
//! [`crate::mutex::Mutex`] operation) bracket the region themselves.
//! `on_tick` never touches the region flag itself; it only reads it as a
//! gate, since the flag exists purely to coordinate thread-level code
//! against the tick handler, not to coordinate the tick handler against
//! itself (`spec.md` §4.2).

use crate::error::Error;
use crate::heap::SleepHeap;
use crate::platform::{Platform, Ticks};
use crate::thread::{Location, ProcessHandle, SavedContext, Thread, ThreadState, Tid};

/// A handle to one of the kernel's generic wait-queue slots.
pub use crate::thread::QueueId;

fn idx(tid: Tid) -> usize {
    tid.0 as usize
}

fn qidx(q: QueueId) -> usize {
    q.0 as usize
}

#[derive(Clone, Copy)]
struct ListHead {
    head: Option<Tid>,
    tail: Option<Tid>,
}

impl ListHead {
    const fn empty() -> Self {
        ListHead {
            head: None,
            tail: None,
        }
    }
}

fn list_push_tail<Pid>(list: &mut ListHead, threads: &mut [Thread<Pid>], tid: Tid) {
    threads[idx(tid)].next = None;
    threads[idx(tid)].prev = list.tail;
    match list.tail {
        Some(t) => threads[idx(t)].next = Some(tid),
        None => list.head = Some(tid),
    }
    list.tail = Some(tid);
}

fn list_pop_head<Pid>(list: &mut ListHead, threads: &mut [Thread<Pid>]) -> Option<Tid> {
    let tid = list.head?;
    let next = threads[idx(tid)].next;
    list.head = next;
    match next {
        Some(n) => threads[idx(n)].prev = None,
        None => list.tail = None,
    }
    threads[idx(tid)].next = None;
    threads[idx(tid)].prev = None;
    Some(tid)
}

fn list_unlink<Pid>(list: &mut ListHead, threads: &mut [Thread<Pid>], tid: Tid) {
    let prev = threads[idx(tid)].prev;
    let next = threads[idx(tid)].next;
    match prev {
        Some(p) => threads[idx(p)].next = next,
        None => list.head = next,
    }
    match next {
        Some(n) => threads[idx(n)].prev = prev,
        None => list.tail = prev,
    }
    threads[idx(tid)].prev = None;
    threads[idx(tid)].next = None;
}

/// The scheduler core.
///
/// `PRIORITIES` is the priority count (`spec.md`'s `P`), `MAX_THREADS` the
/// sleep-heap/thread-arena capacity (`spec.md`'s `THREAD_COUNT_MAX`), and
/// `QUEUES` the number of generic wait-queue slots this kernel can host.
pub struct Kernel<P: Platform, const PRIORITIES: usize, const MAX_THREADS: usize, const QUEUES: usize> {
    platform: P,
    threads: [Thread<P::Pid>; MAX_THREADS],
    free_tids: heapless::Vec<Tid, MAX_THREADS>,
    ready: [ListHead; PRIORITIES],
    queues: [ListHead; QUEUES],
    free_queues: heapless::Vec<QueueId, QUEUES>,
    next_queue: u16,
    sleep: SleepHeap<MAX_THREADS>,
    current: Tid,
    idle: Tid,
    irq_signaled: QueueId,
    /// `schedule_enabled` is `spec.md` §4.2's `schedule_enabled` flag: true
    /// when no thread-level code is in a scheduler-critical region.
    schedule_enabled: bool,
}

impl<P: Platform, const PRIORITIES: usize, const MAX_THREADS: usize, const QUEUES: usize>
    Kernel<P, PRIORITIES, MAX_THREADS, QUEUES>
{
    /// Build a new kernel and its idle thread.
    ///
    /// `idle_entry` is stored in the idle thread's saved context purely for
    /// inspection; the idle loop itself (halt-until-interrupt, forever) is
    /// real code an integrator supplies, not something this crate executes.
    ///
    /// # Panics
    ///
    /// Panics if the idle thread cannot be created (page exhaustion at
    /// boot). A kernel that cannot create its idle thread cannot schedule
    /// anything, so this is a boot-time fatal condition, matching the
    /// original's `panic()` on `thread_create` failure in `main()`.
    pub fn new(platform: P, idle_entry: usize) -> Self {
        log::info!("kernel: initializing scheduler ({PRIORITIES} priorities, {MAX_THREADS} threads, {QUEUES} queues)");
        let threads: [Thread<P::Pid>; MAX_THREADS] = core::array::from_fn(|_| Thread::free());
        let mut free_tids = heapless::Vec::new();
        for i in (0..MAX_THREADS).rev() {
            let _ = free_tids.push(Tid(i as u16));
        }
        let ready = core::array::from_fn(|_| ListHead::empty());
        let queues = core::array::from_fn(|_| ListHead::empty());

        let mut kernel = Kernel {
            platform,
            threads,
            free_tids,
            ready,
            queues,
            free_queues: heapless::Vec::new(),
            next_queue: 0,
            sleep: SleepHeap::new(),
            current: Tid(0),
            idle: Tid(0),
            irq_signaled: QueueId(0),
            schedule_enabled: true,
        };

        kernel.irq_signaled = kernel.new_queue().expect("boot: failed to allocate irq_signaled queue");
        let idle = kernel
            .create(None, PRIORITIES - 1, idle_entry, 0)
            .expect("boot: failed to create idle thread");
        let selected = kernel.select_ready();
        debug_assert_eq!(selected, idle, "boot: idle must be the only ready thread");
        kernel.threads[idx(idle)].location = Location::Active;
        kernel.current = idle;
        kernel.idle = idle;
        log::info!("kernel: idle thread created, scheduler ready");
        kernel
    }

    /// The unique `ACTIVE` thread (`spec.md` §5, "Observability of
    /// `current`").
    pub fn current(&self) -> Tid {
        self.current
    }

    pub fn idle_tid(&self) -> Tid {
        self.idle
    }

    pub fn state_of(&self, tid: Tid) -> ThreadState {
        self.threads[idx(tid)].state()
    }

    pub fn thread_id(&self, tid: Tid) -> u8 {
        self.threads[idx(tid)].id
    }

    pub fn priority_of(&self, tid: Tid) -> crate::thread::Priority {
        self.threads[idx(tid)].priority
    }

    /// The value a woken thread would see in `ctx.retval` (`spec.md` §4.3,
    /// §4.5): `0` on signal, `-TIMED_OUT` on timeout.
    pub fn retval(&self, tid: Tid) -> i8 {
        self.threads[idx(tid)].context.retval
    }

    /// Absolute wake time in ticks, or `0` if `tid` is not in the sleep
    /// heap (`spec.md` §3).
    pub fn wakeup_of(&self, tid: Tid) -> Ticks {
        self.threads[idx(tid)].wakeup
    }

    /// Shared access to the underlying platform, e.g. for an integrator
    /// that needs to poke hardware state directly between kernel calls.
    pub fn platform(&self) -> &P {
        &self.platform
    }

    /// Exclusive access to the underlying platform.
    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    /// Mark `tid` as running with the user MMU layout. An external syscall
    /// trampoline calls this on return to user code; see
    /// [`SavedContext::kernel_layout`].
    pub fn set_user_mode(&mut self, tid: Tid) {
        self.threads[idx(tid)].context.kernel_layout = false;
    }

    /// Mark `tid` as running with the kernel MMU layout.
    pub fn set_kernel_mode(&mut self, tid: Tid) {
        self.threads[idx(tid)].context.kernel_layout = true;
    }

    /// Allocate a generic wait-queue slot (used for mutexes, per-process
    /// ghost lists, and per-process reaper queues).
    pub fn new_queue(&mut self) -> Result<QueueId, Error> {
        if let Some(q) = self.free_queues.pop() {
            self.queues[qidx(q)] = ListHead::empty();
            return Ok(q);
        }
        let next = self.next_queue as usize;
        if next >= QUEUES {
            return Err(Error::NoMemory);
        }
        self.next_queue += 1;
        Ok(QueueId(next as u16))
    }

    /// Return an empty queue slot to the free pool.
    ///
    /// # Panics
    ///
    /// Panics (debug builds) if the queue is not empty.
    pub fn free_queue(&mut self, queue: QueueId) {
        debug_assert!(
            self.queues[qidx(queue)].head.is_none(),
            "free_queue: queue not empty"
        );
        let _ = self.free_queues.push(queue);
    }

    /// Whether `queue` currently has no waiters. Exposed for tests asserting
    /// `spec.md` §8's "if `M.locked` is false, `M.queue` is empty" invariant
    /// on a real [`crate::mutex::Mutex`]'s backing queue.
    #[cfg(test)]
    pub(crate) fn queue_is_empty(&self, queue: QueueId) -> bool {
        self.queues[qidx(queue)].head.is_none()
    }

    // ---- §4.1 / §4.2: critical section primitive and scheduler lock ----

    /// `thread_critical_start` (`spec.md` §4.2): enter a scheduler-critical
    /// region. Not reentrant.
    ///
    /// # Panics
    ///
    /// Panics if the region is already held (scheduler-critical regions do
    /// not nest).
    pub fn thread_critical_start(&mut self) {
        self.platform.disable_interrupts();
        assert!(
            self.schedule_enabled,
            "thread_critical_start: scheduler-critical region already held"
        );
        self.schedule_enabled = false;
        self.platform.enable_interrupts();
        log::trace!("kernel: critical region entered");
    }

    /// `thread_critical_end` (`spec.md` §4.2): leave a scheduler-critical
    /// region.
    ///
    /// # Panics
    ///
    /// Panics if the region is not held.
    pub fn thread_critical_end(&mut self) {
        self.platform.disable_interrupts();
        assert!(
            !self.schedule_enabled,
            "thread_critical_end: scheduler-critical region not held"
        );
        self.schedule_enabled = true;
        self.platform.enable_interrupts();
        log::trace!("kernel: critical region left");
    }

    // ---- context switch plumbing ----

    fn save_outgoing(&mut self, ctx: &SavedContext) {
        let tid = self.current;
        let page = self.threads[idx(tid)].stack_page;
        let prev = page.and_then(|p| self.platform.map_scratch(p));
        self.threads[idx(tid)].context = *ctx;
        self.platform.unmap_scratch(prev);
    }

    fn restore_incoming(&mut self, ctx: &mut SavedContext) {
        let tid = self.current;
        let page = self.threads[idx(tid)].stack_page;
        let prev = page.and_then(|p| self.platform.map_scratch(p));
        *ctx = self.threads[idx(tid)].context;
        self.platform.unmap_scratch(prev);
    }

    fn push_ready(&mut self, tid: Tid, prio: crate::thread::Priority) {
        self.threads[idx(tid)].location = Location::Ready(prio);
        list_push_tail(&mut self.ready[prio], &mut self.threads, tid);
    }

    fn select_ready(&mut self) -> Tid {
        for p in 0..PRIORITIES {
            if let Some(tid) = list_pop_head(&mut self.ready[p], &mut self.threads) {
                return tid;
            }
        }
        unreachable!("the idle thread guarantees a ready thread always exists")
    }

    fn enqueue_wait(&mut self, tid: Tid, queue: QueueId) {
        self.threads[idx(tid)].location = Location::Waiting(queue);
        list_push_tail(&mut self.queues[qidx(queue)], &mut self.threads, tid);
    }

    fn pop_wait(&mut self, queue: QueueId) -> Option<Tid> {
        list_pop_head(&mut self.queues[qidx(queue)], &mut self.threads)
    }

    fn unlink_from_queue(&mut self, queue: QueueId, tid: Tid) {
        list_unlink(&mut self.queues[qidx(queue)], &mut self.threads, tid);
    }

    fn insert_sleep(&mut self, tid: Tid, wakeup_abs: Ticks) {
        self.threads[idx(tid)].wakeup = wakeup_abs;
        let ok = {
            let Kernel { sleep, threads, .. } = self;
            sleep.insert(wakeup_abs, tid, &mut |t, p| threads[idx(t)].heap_pos = p)
        };
        assert!(ok, "sleep heap exhausted");
    }

    fn cancel_sleep_if_any(&mut self, tid: Tid) {
        if let Some(pos) = self.threads[idx(tid)].heap_pos {
            let Kernel { sleep, threads, .. } = self;
            sleep.remove(pos, &mut |t, p| threads[idx(t)].heap_pos = p);
            threads[idx(tid)].wakeup = 0;
        }
    }

    /// Selection and the termination check (`spec.md` §4.4). Requeues the
    /// outgoing thread if it is still runnable, then scans priorities from
    /// `0` for the next thread to run, reaping any selected user thread
    /// that has `exit` set and is not running with the kernel MMU layout
    /// and restarting the scan — the redesigned behavior `spec.md` §4.4
    /// states explicitly (see `DESIGN.md`).
    fn schedule(&mut self) {
        let outgoing = self.current;
        if self.threads[idx(outgoing)].location == Location::Active {
            let prio = self.threads[idx(outgoing)].priority;
            self.push_ready(outgoing, prio);
        }
        loop {
            let next = self.select_ready();
            let t = &self.threads[idx(next)];
            if t.exit && t.process.is_some() && !t.context.kernel_layout {
                self.reap_into_ghost(next);
                continue;
            }
            self.threads[idx(next)].location = Location::Active;
            self.current = next;
            break;
        }
    }

    fn switch(&mut self, ctx: &mut SavedContext) {
        self.save_outgoing(ctx);
        self.schedule();
        self.restore_incoming(ctx);
    }

    /// The hardware tick handler's entry point (`spec.md` §6). `ctx` is the
    /// register frame the architectural trampoline produced on interrupt
    /// entry, and is overwritten with the frame to resume into.
    ///
    /// Ordering (`spec.md` §5): drain `irq_signaled`, then drain sleep-heap
    /// timeouts, then reschedule. Early-returns without touching anything
    /// if a scheduler-critical region is held (`spec.md` §4.2).
    pub fn on_tick(&mut self, ctx: &mut SavedContext) {
        if !self.schedule_enabled {
            log::trace!("kernel: tick deferred, critical region held");
            return;
        }
        self.save_outgoing(ctx);
        self.drain_irq_signaled();
        self.drain_sleep_timeouts();
        self.schedule();
        self.restore_incoming(ctx);
    }

    /// Release the scheduler lock and trigger a rescheduling trap
    /// (`spec.md` §4.4, "Yield"). `ctx` plays the same role it does in
    /// [`Kernel::on_tick`], standing in for the thread-level caller's
    /// register frame.
    ///
    /// Unlike [`Kernel::thread_critical_end`], this does not assert that
    /// the region was held first: it just ensures the lock ends up
    /// released before triggering the trap. That is what lets boot code
    /// call `yield_now` directly, with no prior `thread_critical_start`, to
    /// kick off scheduling the very first time (mirroring the original
    /// kernel's boot sequence, which enables interrupts and yields with no
    /// critical region active yet).
    pub fn yield_now(&mut self, ctx: &mut SavedContext) {
        self.schedule_enabled = true;
        self.switch(ctx);
    }

    fn drain_irq_signaled(&mut self) {
        self.broadcast(self.irq_signaled);
    }

    fn drain_sleep_timeouts(&mut self) {
        let now = self.platform.now();
        loop {
            match self.sleep.peek_min() {
                Some((wakeup, _)) if wakeup <= now => {}
                _ => break,
            }
            let tid = {
                let Kernel { sleep, threads, .. } = self;
                sleep
                    .extract_min(&mut |t, p| threads[idx(t)].heap_pos = p)
                    .expect("peek_min reported an entry")
                    .1
            };
            self.threads[idx(tid)].wakeup = 0;
            if let Location::Waiting(q) = self.threads[idx(tid)].location {
                self.unlink_from_queue(q, tid);
            }
            self.wake_with(tid, Error::TimedOut.code());
        }
    }

    /// Stash `retval` into a woken thread's saved context and move it to
    /// its ready queue (the original kernel's `_thread_set_return`, exposed
    /// here as the one path every wake source funnels through).
    fn wake_with(&mut self, tid: Tid, retval: i8) {
        self.threads[idx(tid)].context.retval = retval;
        let prio = self.threads[idx(tid)].priority;
        self.push_ready(tid, prio);
    }

    fn wait_result(&self, ctx: &SavedContext) -> Result<(), Error> {
        if ctx.retval == Error::TimedOut.code() {
            Err(Error::TimedOut)
        } else {
            Ok(())
        }
    }

    // ---- §4.3: sleep ----

    /// `sleep` (`spec.md` §4.3). Caller must already be inside a
    /// scheduler-critical region.
    pub fn sleep(&mut self, ctx: &mut SavedContext, wakeup_abs: Ticks) -> Result<(), Error> {
        debug_assert!(wakeup_abs > self.platform.now());
        let tid = self.current;
        self.threads[idx(tid)].location = Location::Sleeping;
        self.insert_sleep(tid, wakeup_abs);
        self.yield_now(ctx);
        self.thread_critical_start();
        self.wait_result(ctx)
    }

    /// `sleep_relative` (`spec.md` §4.3). Enters and leaves the
    /// scheduler-critical region itself.
    pub fn sleep_relative(&mut self, ctx: &mut SavedContext, dt: Ticks) -> Result<(), Error> {
        self.thread_critical_start();
        let wakeup = self.platform.now() + dt;
        let result = self.sleep(ctx, wakeup);
        self.thread_critical_end();
        result
    }

    // ---- §4.5: wait / signal primitives ----

    /// `_wait` (`spec.md` §4.5). Caller must already be inside a
    /// scheduler-critical region; on return the region is held again.
    pub fn wait(&mut self, ctx: &mut SavedContext, queue: QueueId, wakeup_abs: Ticks) -> Result<(), Error> {
        let tid = self.current;
        self.enqueue_wait(tid, queue);
        if wakeup_abs != 0 {
            self.insert_sleep(tid, wakeup_abs);
        }
        self.yield_now(ctx);
        self.thread_critical_start();
        self.wait_result(ctx)
    }

    /// `_wait_relative` (`spec.md` §4.5). Enters and leaves the
    /// scheduler-critical region itself.
    pub fn wait_relative(&mut self, ctx: &mut SavedContext, queue: QueueId, dt: Ticks) -> Result<(), Error> {
        self.thread_critical_start();
        let wakeup = if dt != 0 { self.platform.now() + dt } else { 0 };
        let result = self.wait(ctx, queue, wakeup);
        self.thread_critical_end();
        result
    }

    /// `_signal` (`spec.md` §4.5): wake the head of `queue`, if any.
    /// Returns `1` if a thread was moved, `0` otherwise. Caller must
    /// already be inside a scheduler-critical region. Never yields; use
    /// [`Kernel::signal_yield`] for immediate preemption by the woken
    /// thread.
    pub fn signal(&mut self, queue: QueueId) -> u32 {
        match self.pop_wait(queue) {
            Some(tid) => {
                self.cancel_sleep_if_any(tid);
                self.wake_with(tid, 0);
                1
            }
            None => 0,
        }
    }

    /// `_broadcast` (`spec.md` §4.5): repeat [`Kernel::signal`] until
    /// `queue` is empty. Returns the number of threads woken.
    pub fn broadcast(&mut self, queue: QueueId) -> u32 {
        let mut n = 0;
        while self.signal(queue) == 1 {
            n += 1;
        }
        n
    }

    /// `_signal_yield` (`spec.md` §4.5): signal, then yield only if a
    /// thread was actually woken; otherwise just leave the critical
    /// region. Caller must already be inside a scheduler-critical region.
    pub fn signal_yield(&mut self, ctx: &mut SavedContext, queue: QueueId) {
        if self.signal(queue) == 1 {
            self.yield_now(ctx);
        } else {
            self.thread_critical_end();
        }
    }

    /// `_broadcast_yield` (`spec.md` §4.5).
    pub fn broadcast_yield(&mut self, ctx: &mut SavedContext, queue: QueueId) {
        if self.broadcast(queue) > 0 {
            self.yield_now(ctx);
        } else {
            self.thread_critical_end();
        }
    }

    /// `_signal_irq` (`spec.md` §4.5): move every waiter on `queue` to the
    /// `irq_signaled` list, to be drained into the ready queues at the
    /// next tick. Callable from interrupt context (interrupts are already
    /// disabled there, which is what makes this safe without the
    /// thread-level scheduler lock).
    ///
    /// # Panics
    ///
    /// Panics (debug builds) if a waiter has a nonzero `wakeup` — bounded
    /// waits are not allowed with IRQ signalling (`spec.md` §9, Open
    /// Question (b)).
    pub fn signal_irq(&mut self, queue: QueueId) {
        while let Some(tid) = self.pop_wait(queue) {
            debug_assert_eq!(
                self.threads[idx(tid)].wakeup,
                0,
                "signal_irq: waiter has a timeout"
            );
            self.enqueue_wait(tid, self.irq_signaled);
        }
    }

    // ---- §4.7: thread creation and termination ----

    /// `create` (`spec.md` §4.7). `process` is `None` for a kernel thread
    /// (`id` is then `0` and the thread can never terminate).
    ///
    /// Page and id allocation happen outside any scheduler-critical region,
    /// matching the original `thread_create`'s `lock_lock(&p->lock)` over
    /// just those two steps (`spec.md` §4.7 step 4 only requires the ready
    /// queue insertion itself to be under the scheduler lock). Critical
    /// regions do not nest (`spec.md` §4.2), so a `Platform` whose
    /// `alloc_page`/`alloc_thread_id` take a lock of their own must be free
    /// to do so without tripping this crate's own region.
    pub fn create(
        &mut self,
        process: Option<ProcessHandle<P::Pid>>,
        priority: crate::thread::Priority,
        entry: usize,
        arg: usize,
    ) -> Result<Tid, Error> {
        assert!(priority < PRIORITIES, "create: priority out of range");

        let tid = self.free_tids.pop().ok_or(Error::NoMemory)?;

        let page = match self.platform.alloc_page() {
            Some(p) => p,
            None => {
                let _ = self.free_tids.push(tid);
                return Err(Error::NoMemory);
            }
        };

        let id = match process {
            Some(p) => match self.platform.alloc_thread_id(p.pid) {
                Ok(id) => id,
                Err(e) => {
                    self.platform.free_page(page);
                    let _ = self.free_tids.push(tid);
                    return Err(e);
                }
            },
            None => 0,
        };

        self.threads[idx(tid)] = Thread {
            id,
            priority,
            location: Location::Ready(priority),
            stack_page: Some(page),
            context: SavedContext {
                entry,
                arg,
                sp: 0,
                kernel_layout: true,
                retval: 0,
            },
            wakeup: 0,
            exit: false,
            process,
            prev: None,
            next: None,
            heap_pos: None,
        };

        self.thread_critical_start();
        list_push_tail(&mut self.ready[priority], &mut self.threads, tid);
        self.thread_critical_end();
        Ok(tid)
    }

    /// `end` (`spec.md` §4.7). If `tid` is the current thread this kills it
    /// immediately and yields — the thread performing this call must not
    /// run any more code afterward on a real target, since `yield_now`
    /// transfers the CPU away for good. Otherwise it defers: actual
    /// termination happens when the target is next selected to run.
    pub fn end(&mut self, ctx: &mut SavedContext, tid: Tid) {
        self.thread_critical_start();
        if tid == self.current {
            self.kill(tid);
            self.yield_now(ctx);
        } else {
            self.threads[idx(tid)].exit = true;
            self.thread_critical_end();
        }
    }

    /// `kill` (`spec.md` §4.7, internal). Moves `tid` into its process's
    /// ghost list and wakes one joiner, if any.
    ///
    /// # Panics
    ///
    /// Panics if `tid` has no owning process — kernel threads never
    /// terminate.
    fn kill(&mut self, tid: Tid) {
        let process = self.threads[idx(tid)]
            .process
            .expect("end: kernel threads never terminate");
        self.threads[idx(tid)].location = Location::Ghost(process.ghosts);
        list_push_tail(&mut self.queues[qidx(process.ghosts)], &mut self.threads, tid);
        let remaining = self.platform.release_thread_slot(process.pid);
        log::debug!("kernel: thread {} ghosted, {remaining} threads remain", self.threads[idx(tid)].id);
        if remaining == 0 {
            log::info!("kernel: last thread of a process ended, zombifying");
            self.platform.zombify(process.pid);
        }
        self.signal(process.reaper);
    }

    fn reap_into_ghost(&mut self, tid: Tid) {
        self.kill(tid);
    }

    fn find_ghost(&self, ghosts: QueueId, tid: Option<Tid>) -> Option<Tid> {
        let mut cur = self.queues[qidx(ghosts)].head;
        while let Some(t) = cur {
            let matches = match tid {
                None => true,
                Some(want) => want == t,
            };
            if matches {
                return Some(t);
            }
            cur = self.threads[idx(t)].next;
        }
        None
    }

    /// Free a ghost's resources for good: its id (returned to its process's
    /// namespace for reuse), its stack page, and its descriptor slot.
    fn reap(&mut self, tid: Tid) {
        if let Some(process) = self.threads[idx(tid)].process {
            self.platform.free_thread_id(process.pid, self.threads[idx(tid)].id);
        }
        if let Some(page) = self.threads[idx(tid)].stack_page.take() {
            self.platform.free_page(page);
        }
        self.threads[idx(tid)] = Thread::free();
        let _ = self.free_tids.push(tid);
    }

    /// `join` (`spec.md` §4.7). `tid = None` matches any ghost. `timeout =
    /// 0` means indefinite. Returns the reaped thread's [`Tid`]; its stack
    /// page and descriptor slot are freed exactly once, here.
    pub fn join(
        &mut self,
        ctx: &mut SavedContext,
        process: ProcessHandle<P::Pid>,
        tid: Option<Tid>,
        timeout: Ticks,
    ) -> Result<Tid, Error> {
        self.thread_critical_start();
        loop {
            if let Some(found) = self.find_ghost(process.ghosts, tid) {
                self.unlink_from_queue(process.ghosts, found);
                self.reap(found);
                self.thread_critical_end();
                return Ok(found);
            }
            let wakeup = if timeout != 0 { self.platform.now() + timeout } else { 0 };
            match self.wait(ctx, process.reaper, wakeup) {
                Ok(()) => continue,
                Err(e) => {
                    self.thread_critical_end();
                    return Err(e);
                }
            }
        }
    }

    /// `join_all` (`spec.md` §4.7): reap every ghost without blocking.
    pub fn join_all(&mut self, ghosts: QueueId) {
        self.thread_critical_start();
        while let Some(tid) = list_pop_head(&mut self.queues[qidx(ghosts)], &mut self.threads) {
            self.reap(tid);
        }
        self.thread_critical_end();
    }
}

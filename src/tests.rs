//! End-to-end scenarios and invariants from `spec.md` §8, driven against a
//! fake [`Platform`] under a deterministic, single-threaded harness.
//!
//! There is no real stack-switching execution engine in this crate (see the
//! module doc on [`crate::kernel`]), so these tests cannot let two
//! simulated threads genuinely run "at the same time" across a suspension
//! point. Each test instead plays dispatcher: it calls a kernel operation
//! only while [`Kernel::current`] is the thread the scenario says is
//! running, and inspects [`Kernel::state_of`]/[`Kernel::retval`] for the
//! outcome of anything that blocks rather than trusting the return value of
//! a call that is itself expected to block (in this synchronous harness,
//! such a call returns immediately with whatever `ctx.retval` held before
//! anyone else acted, which is not yet meaningful).

use std::collections::HashMap;

use crate::error::Error;
use crate::kernel::{Kernel, QueueId};
use crate::platform::{PageNumber, Platform, Ticks};
use crate::thread::{ProcessHandle, SavedContext, ThreadState, Tid};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub(crate) struct Pid(pub u32);

pub(crate) struct FakePlatform {
    now: Ticks,
    free_pages: Vec<PageNumber>,
    scratch: Option<PageNumber>,
    next_id: HashMap<Pid, u8>,
    thread_count: HashMap<Pid, u32>,
    zombified: Vec<Pid>,
}

impl FakePlatform {
    fn new(page_count: u8) -> Self {
        FakePlatform {
            now: 0,
            free_pages: (0..page_count).rev().collect(),
            scratch: None,
            next_id: HashMap::new(),
            thread_count: HashMap::new(),
            zombified: Vec::new(),
        }
    }

    fn advance(&mut self, dt: Ticks) {
        self.now += dt;
    }
}

impl Platform for FakePlatform {
    type Pid = Pid;

    fn now(&self) -> Ticks {
        self.now
    }

    fn alloc_page(&mut self) -> Option<PageNumber> {
        self.free_pages.pop()
    }

    fn free_page(&mut self, page: PageNumber) {
        self.free_pages.push(page);
    }

    fn map_scratch(&mut self, page: PageNumber) -> Option<PageNumber> {
        self.scratch.replace(page)
    }

    fn unmap_scratch(&mut self, previous: Option<PageNumber>) {
        self.scratch = previous;
    }

    fn disable_interrupts(&mut self) {}

    fn enable_interrupts(&mut self) {}

    fn halt(&mut self) {}

    fn alloc_thread_id(&mut self, pid: Pid) -> Result<u8, Error> {
        let id = self.next_id.entry(pid).or_insert(0);
        let assigned = *id;
        *id = id.checked_add(1).ok_or(Error::NoMemory)?;
        *self.thread_count.entry(pid).or_insert(0) += 1;
        Ok(assigned)
    }

    fn release_thread_slot(&mut self, pid: Pid) -> u32 {
        let count = self.thread_count.entry(pid).or_insert(0);
        *count = count.saturating_sub(1);
        *count
    }

    fn free_thread_id(&mut self, _pid: Pid, _id: u8) {
        // `next_id` only ever counts up; this fake never reissues an id, so
        // there is nothing to release into. Real id registries (a bitmap,
        // the original's `id_remove`) do the actual reclamation here.
    }

    fn zombify(&mut self, pid: Pid) {
        self.zombified.push(pid);
    }
}

const PRIORITIES: usize = 3;
const MAX_THREADS: usize = 16;
const QUEUES: usize = 8;

type TestKernel = Kernel<FakePlatform, PRIORITIES, MAX_THREADS, QUEUES>;

fn new_kernel() -> TestKernel {
    Kernel::new(FakePlatform::new(32), 0)
}

fn ctx() -> SavedContext {
    SavedContext::default()
}

/// idle -> the single other ready thread, by priority.
fn yield_from_idle(k: &mut TestKernel, ctx: &mut SavedContext) {
    k.thread_critical_start();
    k.yield_now(ctx);
}

#[test]
fn strict_priority_preemption() {
    let mut k = new_kernel();
    let low = k.create(None, 1, 0, 0).unwrap();
    let high = k.create(None, 0, 0, 0).unwrap();
    let mut ctx = ctx();

    // idle yields once at boot; the higher-priority thread runs first.
    yield_from_idle(&mut k, &mut ctx);
    assert_eq!(k.current(), high);

    // high sleeps 50 ticks; low (the only other ready thread) takes over.
    k.sleep_relative(&mut ctx, 50).unwrap();
    assert_eq!(k.current(), low);

    for tick in 1..50 {
        k.platform_mut().advance(1);
        k.on_tick(&mut ctx);
        assert_eq!(k.current(), low, "high must not wake before tick 50 (at tick {tick})");
    }
    k.platform_mut().advance(1);
    k.on_tick(&mut ctx);
    assert_eq!(k.current(), high, "high must be selected at tick 50");
}

#[test]
fn fifo_within_priority() {
    let mut k = new_kernel();
    let ids: Vec<Tid> = (0..5).map(|_| k.create(None, 1, 0, 0).unwrap()).collect();
    let mut ctx = ctx();

    yield_from_idle(&mut k, &mut ctx);

    let mut order = Vec::new();
    for _ in 0..12 {
        let cur = k.current();
        let slot = ids.iter().position(|&t| t == cur).expect("current is one of the five");
        order.push(slot);
        k.thread_critical_start();
        k.yield_now(&mut ctx);
    }
    assert_eq!(order, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0, 1]);
}

#[test]
fn mutex_wait_queue_is_fifo() {
    let mut k = new_kernel();
    let m = crate::mutex::Mutex::new(&mut k).unwrap();
    let queue = m.queue_for_test();

    let x = k.create(None, 1, 0, 0).unwrap();
    let y = k.create(None, 1, 0, 0).unwrap();
    let z = k.create(None, 1, 0, 0).unwrap();
    let mut ctx = ctx();

    // Park X, then Y, then Z, in contention order.
    for tid in [x, y, z] {
        k.thread_critical_start();
        k.yield_now(&mut ctx);
        assert_eq!(k.current(), tid);
        k.thread_critical_start();
        let _ = k.wait(&mut ctx, queue, 0);
        k.thread_critical_end();
    }

    // Draining by signal must wake them back in arrival order.
    k.thread_critical_start();
    assert_eq!(k.signal(queue), 1);
    assert_eq!(k.state_of(x), ThreadState::Ready);
    assert_eq!(k.signal(queue), 1);
    assert_eq!(k.state_of(y), ThreadState::Ready);
    assert_eq!(k.signal(queue), 1);
    assert_eq!(k.state_of(z), ThreadState::Ready);
    assert_eq!(k.signal(queue), 0, "signal on an empty queue is idempotent");
    k.thread_critical_end();
}

#[test]
fn mutex_try_lock_then_unlock_is_noop_on_queue_state() {
    let mut k = new_kernel();
    let mut m = crate::mutex::Mutex::new(&mut k).unwrap();
    let mut ctx = ctx();

    let queue = m.queue_for_test();

    m.try_lock(&mut k).unwrap();
    m.unlock(&mut k, &mut ctx);
    assert!(k.queue_is_empty(queue), "unlocked mutex must have an empty queue");
    assert!(m.try_lock(&mut k).is_ok(), "lock must be free again");
    m.unlock(&mut k, &mut ctx);
    assert!(k.queue_is_empty(queue));
}

/// Scenario 3 (`spec.md` §8, "Mutex handoff fairness"): three threads
/// contend on a real [`crate::mutex::Mutex`] through its public
/// `lock`/`unlock` surface and must acquire in arrival order X, Y, Z.
///
/// `Mutex::lock`'s retry loop assumes a blocked call is later resumed by a
/// real context switch; in this synchronous harness a blocking call
/// returns immediately instead (see the module doc), so driving a
/// *genuinely contended* `lock()` call here would spin forever re-checking
/// a lock nothing else can release within that same call. A contender's
/// blocking wait is therefore parked with the same low-level `wait()` call
/// `lock()` would have made for it, and `lock()` itself is called for real
/// at every point where the mutex is actually free at the moment of the
/// call — exactly the situation a woken thread resumes into on real
/// hardware. `unlock()` is called for real throughout; it is what actually
/// implements the FIFO handoff this test checks, via `signal_yield`
/// waking the longest-waiting contender before the releasing thread is
/// ever requeued behind it.
#[test]
fn mutex_lock_unlock_handoff_is_fifo() {
    let mut k = new_kernel();
    let mut m = crate::mutex::Mutex::new(&mut k).unwrap();
    let queue = m.queue_for_test();

    let x = k.create(None, 1, 0, 0).unwrap();
    let y = k.create(None, 1, 0, 0).unwrap();
    let z = k.create(None, 1, 0, 0).unwrap();
    let mut ctx = ctx();

    // X arrives first and finds the mutex free: lock() returns without
    // ever blocking.
    yield_from_idle(&mut k, &mut ctx);
    assert_eq!(k.current(), x);
    m.lock(&mut k, &mut ctx);
    assert_eq!(k.current(), x, "an uncontended lock() must not yield");

    // Y arrives next and finds it held: park it on the mutex queue.
    k.thread_critical_start();
    k.yield_now(&mut ctx);
    assert_eq!(k.current(), y);
    k.thread_critical_start();
    let _ = k.wait(&mut ctx, queue, 0);
    k.thread_critical_end();
    assert_eq!(k.state_of(y), ThreadState::Sleep);

    // Z arrives last, also finds it held, and parks behind Y. No explicit
    // yield is needed to get here: Y's own `wait` call above already
    // advanced `current` to the next ready thread, which is Z.
    assert_eq!(k.current(), z);
    k.thread_critical_start();
    let _ = k.wait(&mut ctx, queue, 0);
    k.thread_critical_end();
    assert_eq!(k.state_of(z), ThreadState::Sleep);

    // Control is back on X (the only thread left ready). X releases: the
    // real unlock() wakes Y, the head of the FIFO queue, and hands it the
    // CPU immediately.
    assert_eq!(k.current(), x);
    m.unlock(&mut k, &mut ctx);
    assert_eq!(k.current(), y, "unlock() must hand off to the longest-waiting contender");

    // Y resumes into exactly the situation its parked `wait` call would
    // have resumed into: the mutex is free, so a real lock() call for Y
    // here succeeds on its first check, with no blocking.
    m.lock(&mut k, &mut ctx);
    assert_eq!(k.current(), y, "an uncontended re-lock must not yield");

    // X has nothing left to do; retire it from the ready rotation with an
    // ordinary long sleep so it cannot be mistaken for Z when Y later
    // releases. This also hands control back to Y once X is parked.
    k.thread_critical_start();
    k.yield_now(&mut ctx);
    assert_eq!(k.current(), x);
    let _ = k.sleep_relative(&mut ctx, 1_000_000);
    assert_eq!(k.current(), y);

    // Y releases: Z, the only remaining waiter, is handed the lock.
    m.unlock(&mut k, &mut ctx);
    assert_eq!(k.current(), z, "unlock() must hand off to Z last, as it arrived last");

    m.lock(&mut k, &mut ctx);
    assert_eq!(k.current(), z);
    m.unlock(&mut k, &mut ctx);
    assert!(k.queue_is_empty(queue));
}

#[test]
fn timeout_vs_signal_race_prefers_signal() {
    let mut k = new_kernel();
    let q = k.new_queue().unwrap();
    let w = k.create(None, 1, 0, 0).unwrap();
    let mut ctx = ctx();

    yield_from_idle(&mut k, &mut ctx);
    assert_eq!(k.current(), w);

    k.thread_critical_start();
    let wakeup = k.platform().now() + 10;
    let _ = k.wait(&mut ctx, q, wakeup);
    k.thread_critical_end();
    assert_eq!(k.state_of(w), ThreadState::Sleep);
    assert_ne!(k.wakeup_of(w), 0);

    // Tick 10 arrives with both a pending signal and a pending timeout;
    // signal wins because it is applied before the tick's timeout drain.
    k.platform_mut().advance(10);
    k.thread_critical_start();
    assert_eq!(k.signal(q), 1);
    k.thread_critical_end();

    assert_eq!(k.state_of(w), ThreadState::Ready);
    assert_eq!(k.retval(w), 0, "W must observe the signal, not a timeout");
    assert_eq!(k.wakeup_of(w), 0, "W must be removed from the sleep heap by the signal");

    k.thread_critical_start();
    assert_eq!(k.signal(q), 0, "Q is empty afterward");
    k.thread_critical_end();

    k.on_tick(&mut ctx);
    assert_eq!(k.retval(w), 0, "the tick's own timeout drain must not re-fire for W");
}

#[test]
fn irq_signal_becomes_ready_no_later_than_the_next_tick() {
    let mut k = new_kernel();
    let q = k.new_queue().unwrap();
    let w = k.create(None, 0, 0, 0).unwrap();
    let mut ctx = ctx();

    yield_from_idle(&mut k, &mut ctx);
    assert_eq!(k.current(), w);

    k.thread_critical_start();
    let _ = k.wait(&mut ctx, q, 0);
    k.thread_critical_end();
    assert_eq!(k.state_of(w), ThreadState::Sleep);

    // tick 7: an ISR signals Q.
    k.platform_mut().advance(7);
    k.signal_irq(q);
    assert_eq!(k.state_of(w), ThreadState::Sleep, "still pending drain, not yet READY");

    // tick 8: drained into ready and selected (highest priority, no contender).
    k.platform_mut().advance(1);
    k.on_tick(&mut ctx);
    assert_eq!(k.state_of(w), ThreadState::Active);
    assert_eq!(k.current(), w);
}

#[test]
#[should_panic(expected = "waiter has a timeout")]
fn signal_irq_rejects_a_bounded_waiter() {
    let mut k = new_kernel();
    let q = k.new_queue().unwrap();
    let w = k.create(None, 0, 0, 0).unwrap();
    let mut ctx = ctx();

    yield_from_idle(&mut k, &mut ctx);
    k.thread_critical_start();
    let wakeup = k.platform().now() + 10;
    let _ = k.wait(&mut ctx, q, wakeup);
    k.signal_irq(q);
}

#[test]
fn termination_and_reaping() {
    let mut k = new_kernel();
    let pid = Pid(1);
    let ghosts = k.new_queue().unwrap();
    let reaper = k.new_queue().unwrap();
    let process = ProcessHandle { pid, ghosts, reaper };

    let t2 = k.create(Some(process), 0, 0, 0).unwrap();
    let joiner = k.create(None, 1, 0, 0).unwrap();
    let mut ctx = ctx();

    yield_from_idle(&mut k, &mut ctx);
    assert_eq!(k.current(), t2);

    k.end(&mut ctx, t2);
    assert_eq!(k.state_of(t2), ThreadState::Ghost);
    assert_eq!(k.current(), joiner, "the joiner is next up once T2 is gone");

    let reaped = k.join(&mut ctx, process, Some(t2), 0);
    assert_eq!(reaped, Ok(t2));
    assert_eq!(k.current(), joiner, "an already-present ghost does not block the joiner");

    // A second join for the same (already-reaped) thread has nothing to
    // find. Drive the blocking primitive directly: `join`'s own retry loop
    // assumes real suspension between the block and the eventual resume,
    // which this synchronous harness cannot provide (see the module doc).
    k.thread_critical_start();
    let wakeup = k.platform().now() + 1;
    let _ = k.wait(&mut ctx, reaper, wakeup);
    k.thread_critical_end();
    assert_eq!(k.current(), k.idle_tid());

    k.platform_mut().advance(1);
    k.on_tick(&mut ctx);
    assert_eq!(k.state_of(joiner), ThreadState::Ready);
    assert_eq!(k.retval(joiner), Error::TimedOut.code());
}

#[test]
fn broadcast_after_broadcast_is_equivalent_to_one() {
    let mut k = new_kernel();
    let q = k.new_queue().unwrap();
    let a = k.create(None, 1, 0, 0).unwrap();
    let b = k.create(None, 1, 0, 0).unwrap();
    let mut ctx = ctx();

    for tid in [a, b] {
        k.thread_critical_start();
        k.yield_now(&mut ctx);
        assert_eq!(k.current(), tid);
        k.thread_critical_start();
        let _ = k.wait(&mut ctx, q, 0);
        k.thread_critical_end();
    }

    k.thread_critical_start();
    assert_eq!(k.broadcast(q), 2);
    assert_eq!(k.broadcast(q), 0, "a second broadcast wakes nobody new");
    k.thread_critical_end();

    assert_eq!(k.state_of(a), ThreadState::Ready);
    assert_eq!(k.state_of(b), ThreadState::Ready);
}

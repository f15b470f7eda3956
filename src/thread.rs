//! Thread descriptor and the small handle types that index the kernel's
//! arenas.
//!
//! `spec.md` §3 describes the thread descriptor as carrying intrusive
//! `qnext`/`qprev` list pointers directly. §9's "Intrusive lists and heap"
//! design note asks for a type-safe rewrite where membership is a tagged
//! variant instead of raw pointers; [`Location`] is that variant, and
//! [`Tid`]/[`QueueId`] are `Copy` index handles into arenas the [`crate::kernel::Kernel`]
//! owns, rather than pointers.

use crate::platform::{PageNumber, Ticks};

/// Priority index: `0` is highest priority. Bounded by the `PRIORITIES`
/// const generic on `Kernel`.
pub type Priority = usize;

/// A handle to a thread descriptor inside a [`crate::kernel::Kernel`]'s arena.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tid(pub(crate) u16);

/// A handle to one of the kernel's generic wait-queue slots (mutex
/// queues, per-process ghost lists, per-process reaper queues, the
/// `irq_signaled` list, and any other ad-hoc wait queue).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct QueueId(pub(crate) u16);

/// The externally visible lifecycle state from `spec.md` §3.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ThreadState {
    Ready,
    Active,
    Sleep,
    Ghost,
}

/// Where a thread descriptor currently lives.
///
/// This is the type invariant `spec.md` §9 asks for: a thread is in
/// exactly one of these places, enforced by construction because the
/// field can only hold one variant at a time. Sleep-heap membership is
/// tracked orthogonally (`Thread::wakeup`/`Thread::heap_pos`) since
/// `spec.md` §3 allows a thread to be on a wait queue *and* in the sleep
/// heap simultaneously (a bounded wait).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Location {
    /// Unused arena slot.
    Free,
    Ready(Priority),
    Waiting(QueueId),
    /// Blocked solely on the sleep heap (plain `sleep`/`sleep_relative`,
    /// not parked on any wait queue).
    Sleeping,
    Active,
    Ghost(QueueId),
}

impl Location {
    pub(crate) fn state(self) -> ThreadState {
        match self {
            Location::Free => ThreadState::Ghost, // unused slots are not observable
            Location::Ready(_) => ThreadState::Ready,
            Location::Waiting(_) | Location::Sleeping => ThreadState::Sleep,
            Location::Active => ThreadState::Active,
            Location::Ghost(_) => ThreadState::Ghost,
        }
    }
}

/// The saved CPU context living at the top of a thread's stack page.
///
/// On the original 8-bit target this is reached through the scratch
/// window and context-pointer arithmetic; on a flat-address rewrite
/// (`spec.md` §9) it is a plain struct, and the scratch-mapping calls are
/// preserved only so a real paged-MMU integrator can keep its mapping
/// synchronized with the switch.
#[derive(Clone, Copy, Debug, Default)]
pub struct SavedContext {
    /// Program counter at thread start (ignored after first dispatch by a
    /// real context switch; kept for inspection/tests).
    pub entry: usize,
    /// Argument register at thread start.
    pub arg: usize,
    /// Saved stack pointer.
    pub sp: usize,
    /// `true` while this thread runs with the kernel MMU layout. A freshly
    /// created thread starts `true` (`spec.md` §4.7); an external syscall
    /// trampoline is expected to clear it on transition to user code and
    /// set it again on syscall entry — out of scope for this core, which
    /// only stores and consults the flag (see [`crate::kernel::Kernel::set_kernel_mode`]
    /// and [`crate::kernel::Kernel::set_user_mode`]).
    pub kernel_layout: bool,
    /// Value delivered to a woken thread: `0` on signal, `-TIMED_OUT` on
    /// timeout (`spec.md` §4.3, §4.5). Read by the thread itself after
    /// `yield`/`_wait` returns.
    pub retval: i8,
}

/// A process identity and its two kernel-hosted wait queues, minted once
/// when the owning process is created.
///
/// Process-level lifecycle management is out of scope for this core
/// (`spec.md` §1); the core only needs somewhere to put a process's
/// ghosts and somewhere for joiners to wait. Both are ordinary
/// [`QueueId`]s obtained from [`crate::kernel::Kernel::new_queue`].
#[derive(Clone, Copy, Debug)]
pub struct ProcessHandle<Pid> {
    pub pid: Pid,
    pub ghosts: QueueId,
    pub reaper: QueueId,
}

/// A thread descriptor.
///
/// Intrusive list pointers (`prev`/`next`) and the sleep-heap index
/// (`heap_pos`) are private to the arena/heap bookkeeping in
/// [`crate::kernel::Kernel`]; callers observe a thread only through its
/// [`Tid`] and the accessor methods below.
pub(crate) struct Thread<Pid> {
    pub id: u8,
    pub priority: Priority,
    pub location: Location,
    pub stack_page: Option<PageNumber>,
    pub context: SavedContext,
    /// Absolute wake time in ticks; `0` means "not in the sleep heap".
    pub wakeup: Ticks,
    pub exit: bool,
    pub process: Option<ProcessHandle<Pid>>,

    pub(crate) prev: Option<Tid>,
    pub(crate) next: Option<Tid>,
    pub(crate) heap_pos: Option<usize>,
}

impl<Pid: Copy> Thread<Pid> {
    pub(crate) const fn free() -> Self {
        Thread {
            id: 0,
            priority: 0,
            location: Location::Free,
            stack_page: None,
            context: SavedContext {
                entry: 0,
                arg: 0,
                sp: 0,
                kernel_layout: false,
                retval: 0,
            },
            wakeup: 0,
            exit: false,
            process: None,
            prev: None,
            next: None,
            heap_pos: None,
        }
    }

    pub fn state(&self) -> ThreadState {
        self.location.state()
    }
}

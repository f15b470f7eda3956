//! The boundary between the scheduler core and the rest of the kernel.
//!
//! `spec.md` §1 and §6 list the core's external collaborators: a tick
//! source, a page allocator, a scratch-mapping primitive, interrupt
//! control, and a per-process thread-id/ghost-list store. [`Platform`]
//! bundles all five into one trait so an integrator implements a single
//! cohesive boundary, the same shape the teacher crate uses for its
//! `KernelSchedCtx`/`Scheduler` split.

use crate::error::Error;

/// Physical page number. The target machine is 8-bit, so pages are
/// addressed with a single byte (`spec.md` §6: "a page allocator returning
/// an 8-bit page number").
pub type PageNumber = u8;

/// A monotonic tick count. Absolute wakeups and the tick source are
/// expressed in this unit; the tick period itself is externally
/// configured and never assumed by the core (`spec.md` §6).
pub type Ticks = u64;

/// The external hardware/process-storage boundary.
///
/// Implementations own: the monotonic tick source, the physical page
/// allocator, the scratch-mapping window, interrupt enable/disable, and
/// per-process thread-id registries / ghost lists (the latter addressed
/// indirectly: `Kernel` owns ghost-list and reaper-queue storage itself,
/// see [`crate::kernel::Kernel::new_queue`]; `Platform` owns only the
/// thread-id namespace, which is process-specific external state).
pub trait Platform {
    /// Process identifier type, opaque to the core.
    type Pid: Copy + Eq;

    /// Read the monotonic tick counter.
    fn now(&self) -> Ticks;

    /// Allocate one physical page, or `None` if exhausted.
    fn alloc_page(&mut self) -> Option<PageNumber>;

    /// Release a physical page previously returned by [`Platform::alloc_page`].
    fn free_page(&mut self, page: PageNumber);

    /// Map `page` into the scratch window, returning whatever page was
    /// mapped there previously (if any) so it can be restored with
    /// [`Platform::unmap_scratch`].
    fn map_scratch(&mut self, page: PageNumber) -> Option<PageNumber>;

    /// Restore a previous scratch mapping captured by [`Platform::map_scratch`].
    fn unmap_scratch(&mut self, previous: Option<PageNumber>);

    /// Unconditionally disable interrupts. Paired with [`Platform::enable_interrupts`];
    /// calls must strictly balance (`spec.md` §4.1).
    fn disable_interrupts(&mut self);

    /// Unconditionally re-enable interrupts.
    fn enable_interrupts(&mut self);

    /// Halt the CPU until the next interrupt. Used by the idle thread.
    fn halt(&mut self);

    /// Allocate a fresh thread id within `pid`'s namespace and record one
    /// more live thread for that process. Fails with [`Error::NoMemory`] or
    /// [`Error::Invalid`] if the registry is exhausted or collides.
    fn alloc_thread_id(&mut self, pid: Self::Pid) -> Result<u8, Error>;

    /// Record one more terminated (ghosted) thread for `pid`, returning the
    /// live thread count after the decrement. Called when a thread is
    /// killed, before it is reaped — the id itself stays reserved until
    /// [`Platform::free_thread_id`] releases it, so a still-unreaped ghost
    /// can never have its id handed to a new thread.
    fn release_thread_slot(&mut self, pid: Self::Pid) -> u32;

    /// Return `id` to `pid`'s namespace for reuse. Called only once the
    /// ghost is actually reaped, not when it is killed.
    fn free_thread_id(&mut self, pid: Self::Pid, id: u8);

    /// Called when a process's live thread count reaches zero: hand the
    /// process itself to the external zombification path (`spec.md` §4.7,
    /// `kill`: "if it becomes zero, hand the process itself to the
    /// zombify path (external)").
    fn zombify(&mut self, pid: Self::Pid);
}

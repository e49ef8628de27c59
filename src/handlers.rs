//! Registered exception handlers
//!
//! Other subsystems can observe exceptions that are not probe faults by registering a hook.
//! Hooks are consulted in order, the first one to claim the exception stops the dispatch, and
//! the original handler only sees exceptions no one claimed.
//!
//! The chain is traversed from the exception handler, which can not block. Traversal is lock
//! free: every link is an atomic pointer and mutators only swing a single link, with interrupts
//! disabled. The coarse lock only serializes mutators among themselves. A removed node is freed
//! once no traversal is in flight anymore.

use alloc::alloc::{alloc, Layout};
use alloc::boxed::Box;
use core::ffi::{c_int, c_void};
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use spin::Mutex;
use thiserror_no_std::Error;

use crate::arch::{ExceptionFrame, IrqGuard};

/// A Rust exception hook, called with the frame and the context it was registered with.
pub type ExceptionHook = fn(&mut ExceptionFrame, usize) -> HookAction;

/// A C exception hook, returns 0 if the exception was handled.
pub type ForeignHook = unsafe extern "C" fn(*mut ExceptionFrame, *mut c_void) -> c_int;

/// The global handler chain.
pub(crate) static CHAIN: HandlerChain = HandlerChain::new();

// ——————————————————————————————— Hooks ———————————————————————————————————— //

#[derive(Clone, Copy, Debug)]
pub enum Hook {
    Native(ExceptionHook),
    Foreign(ForeignHook),
}

impl Hook {
    fn call(self, frame: &mut ExceptionFrame, context: usize) -> HookAction {
        match self {
            Hook::Native(hook) => hook(frame, context),
            // SAFETY: the C side registered this hook together with its context.
            Hook::Foreign(hook) => match unsafe { hook(frame, context as *mut c_void) } {
                0 => HookAction::Handled,
                _ => HookAction::Pass,
            },
        }
    }

    /// Hooks are identified by their address.
    fn address(self) -> usize {
        match self {
            Hook::Native(hook) => hook as usize,
            Hook::Foreign(hook) => hook as usize,
        }
    }
}

impl PartialEq for Hook {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Hook::Native(_), Hook::Native(_)) | (Hook::Foreign(_), Hook::Foreign(_))
        ) && self.address() == other.address()
    }
}

impl Eq for Hook {}

/// The verdict of a hook on an exception.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookAction {
    /// The exception has been dealt with, stop the dispatch.
    Handled,
    /// Not for us, move on to the next hook.
    Pass,
}

/// Where to insert a new hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// Consulted before all hooks currently installed.
    Head,
    /// Consulted after all hooks currently installed.
    Tail,
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerError {
    #[error("handler already installed with the same context")]
    AlreadyInstalled,
    #[error("out of memory")]
    OutOfMemory,
    #[error("handler not found")]
    NotFound,
}

// ——————————————————————————————— Chain Nodes —————————————————————————————— //

struct Node {
    hook: Hook,
    context: usize,
    next: AtomicPtr<Node>,
}

impl Node {
    /// Allocate a detached node, without aborting if memory is exhausted.
    fn allocate(hook: Hook, context: usize) -> Result<*mut Node, HandlerError> {
        #[cfg(test)]
        if tests::FAIL_NEXT_ALLOCATION.with(|fail| fail.replace(false)) {
            return Err(HandlerError::OutOfMemory);
        }

        let layout = Layout::new::<Node>();
        // SAFETY: Node is not zero-sized.
        let node = unsafe { alloc(layout) } as *mut Node;
        if node.is_null() {
            return Err(HandlerError::OutOfMemory);
        }

        // SAFETY: the allocation is valid and properly aligned for a Node.
        unsafe {
            node.write(Node {
                hook,
                context,
                next: AtomicPtr::new(ptr::null_mut()),
            })
        };
        Ok(node)
    }

    /// SAFETY:
    /// `node` must come from [Node::allocate], be unreachable from any chain and not be in use by
    /// any traversal.
    unsafe fn free(node: *mut Node) {
        drop(Box::from_raw(node))
    }

    fn matches(&self, hook: Hook, context: usize) -> bool {
        self.hook == hook && self.context == context
    }
}

// ——————————————————————————————— Handler Chain ———————————————————————————— //

/// An ordered list of exception hooks, keyed by (hook, context).
pub struct HandlerChain {
    head: AtomicPtr<Node>,
    /// Serializes install and remove.
    lock: Mutex<()>,
    /// Number of traversals in flight.
    readers: AtomicUsize,
}

impl HandlerChain {
    pub const fn new() -> Self {
        HandlerChain {
            head: AtomicPtr::new(ptr::null_mut()),
            lock: Mutex::new(()),
            readers: AtomicUsize::new(0),
        }
    }

    /// Register a hook.
    ///
    /// The same hook can be registered several times with different contexts, but a (hook,
    /// context) pair is only ever installed once. The chain is left untouched on failure.
    pub fn install(
        &self,
        hook: Hook,
        context: usize,
        placement: Placement,
    ) -> Result<(), HandlerError> {
        let node = Node::allocate(hook, context)?;

        let _lock = self.lock.lock();
        let mut link = &self.head;
        loop {
            let current = link.load(Ordering::SeqCst);
            // SAFETY: nodes are only freed with the lock held.
            let Some(current) = (unsafe { current.as_ref() }) else {
                break;
            };
            if current.matches(hook, context) {
                // SAFETY: the node was never linked.
                unsafe { Node::free(node) };
                return Err(HandlerError::AlreadyInstalled);
            }
            link = &current.next;
        }

        // `link` is now the tail
        if placement == Placement::Head {
            link = &self.head;
        }

        let _irq = IrqGuard::new();
        // SAFETY: the node is not reachable yet, we are its only user.
        unsafe { (*node).next.store(link.load(Ordering::SeqCst), Ordering::SeqCst) };
        link.store(node, Ordering::SeqCst);
        Ok(())
    }

    /// Unregister a hook.
    ///
    /// Must not be called from within a hook, as the node can only be freed once no traversal
    /// is in flight. Traversals only run in exception context, which is not preemptible, so the
    /// reader count drops to zero in bounded time: a stream of overlapping traversals would keep
    /// this spinning with the mutator lock held.
    pub fn remove(&self, hook: Hook, context: usize) -> Result<(), HandlerError> {
        let _lock = self.lock.lock();
        let mut link = &self.head;
        loop {
            let current = link.load(Ordering::SeqCst);
            // SAFETY: nodes are only freed with the lock held.
            let Some(node) = (unsafe { current.as_ref() }) else {
                return Err(HandlerError::NotFound);
            };

            if node.matches(hook, context) {
                {
                    let _irq = IrqGuard::new();
                    link.store(node.next.load(Ordering::SeqCst), Ordering::SeqCst);
                }
                self.wait_for_readers();
                // SAFETY: the node is unlinked and no traversal can still observe it.
                unsafe { Node::free(current) };
                return Ok(());
            }
            link = &node.next;
        }
    }

    /// Offer an exception to each hook in order, until one handles it.
    pub fn dispatch(&self, frame: &mut ExceptionFrame) -> HookAction {
        let _reader = ReaderGuard::new(&self.readers);
        let mut current = self.head.load(Ordering::SeqCst);
        // SAFETY: nodes are not freed while a traversal is registered.
        while let Some(node) = unsafe { current.as_ref() } {
            if node.hook.call(frame, node.context) == HookAction::Handled {
                return HookAction::Handled;
            }
            current = node.next.load(Ordering::SeqCst);
        }
        HookAction::Pass
    }

    /// Number of installed hooks.
    pub fn len(&self) -> usize {
        let _lock = self.lock.lock();
        let mut len = 0;
        let mut current = self.head.load(Ordering::SeqCst);
        // SAFETY: nodes are only freed with the lock held.
        while let Some(node) = unsafe { current.as_ref() } {
            len += 1;
            current = node.next.load(Ordering::SeqCst);
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::SeqCst).is_null()
    }

    fn wait_for_readers(&self) {
        while self.readers.load(Ordering::SeqCst) != 0 {
            core::hint::spin_loop();
        }
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HandlerChain {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: we have exclusive access, no traversal can be in flight.
            unsafe {
                let next = (*current).next.load(Ordering::SeqCst);
                Node::free(current);
                current = next;
            }
        }
    }
}

/// Registers a traversal for as long as it is alive.
struct ReaderGuard<'a> {
    readers: &'a AtomicUsize,
}

impl<'a> ReaderGuard<'a> {
    fn new(readers: &'a AtomicUsize) -> Self {
        readers.fetch_add(1, Ordering::SeqCst);
        ReaderGuard { readers }
    }
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

// ———————————————————————————————— Global Chain ———————————————————————————— //

/// Register a hook on the global chain, see [HandlerChain::install].
pub fn install_handler(hook: Hook, context: usize, placement: Placement) -> Result<(), HandlerError> {
    CHAIN.install(hook, context, placement)?;
    log::debug!(
        "Installed exception hook 0x{:x} ({:?})",
        hook.address(),
        placement
    );
    Ok(())
}

/// Remove a hook from the global chain, see [HandlerChain::remove].
pub fn remove_handler(hook: Hook, context: usize) -> Result<(), HandlerError> {
    CHAIN.remove(hook, context)?;
    log::debug!("Removed exception hook 0x{:x}", hook.address());
    Ok(())
}

// ————————————————————————————————— Tests —————————————————————————————————— //

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    std::thread_local! {
        /// Makes the next node allocation on this thread fail.
        pub(super) static FAIL_NEXT_ALLOCATION: Cell<bool> = const { Cell::new(false) };
    }

    /// Append the context to the list of visited hooks kept in the frame.
    fn record(frame: &mut ExceptionFrame, context: usize) -> HookAction {
        let idx = frame.gpr[0];
        frame.gpr[1 + idx] = context;
        frame.gpr[0] += 1;
        HookAction::Pass
    }

    fn claim(_frame: &mut ExceptionFrame, _context: usize) -> HookAction {
        HookAction::Handled
    }

    unsafe extern "C" fn foreign_claim(frame: *mut ExceptionFrame, data: *mut c_void) -> c_int {
        (*frame).gpr[31] = data as usize;
        0
    }

    fn visited(chain: &HandlerChain) -> std::vec::Vec<usize> {
        let mut frame = ExceptionFrame::default();
        assert_eq!(chain.dispatch(&mut frame), HookAction::Pass);
        frame.gpr[1..1 + frame.gpr[0]].to_vec()
    }

    #[test]
    fn consultation_order() {
        let chain = HandlerChain::new();
        let hook = Hook::Native(record);
        const A: usize = 0xa;
        const B: usize = 0xb;
        const C: usize = 0xc;

        chain.install(hook, A, Placement::Tail).unwrap();
        chain.install(hook, B, Placement::Head).unwrap();
        chain.install(hook, C, Placement::Tail).unwrap();
        assert_eq!(visited(&chain), [B, A, C]);

        chain.remove(hook, A).unwrap();
        assert_eq!(visited(&chain), [B, C]);
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn first_handled_wins() {
        let chain = HandlerChain::new();
        chain.install(Hook::Native(record), 1, Placement::Tail).unwrap();
        chain.install(Hook::Native(claim), 2, Placement::Tail).unwrap();
        chain.install(Hook::Native(record), 3, Placement::Tail).unwrap();

        let mut frame = ExceptionFrame::default();
        assert_eq!(chain.dispatch(&mut frame), HookAction::Handled);
        assert_eq!(frame.gpr[0], 1);
        assert_eq!(frame.gpr[1], 1);
    }

    #[test]
    fn duplicates_and_missing_hooks() {
        let chain = HandlerChain::new();
        let hook = Hook::Native(record);

        assert!(chain.is_empty());
        chain.install(hook, 1, Placement::Tail).unwrap();
        assert_eq!(
            chain.install(hook, 1, Placement::Head),
            Err(HandlerError::AlreadyInstalled)
        );
        assert_eq!(chain.len(), 1);

        // Same hook, different context
        chain.install(hook, 2, Placement::Tail).unwrap();
        assert_eq!(chain.len(), 2);

        assert_eq!(chain.remove(hook, 3), Err(HandlerError::NotFound));
        assert_eq!(chain.remove(Hook::Native(claim), 1), Err(HandlerError::NotFound));
        assert_eq!(chain.len(), 2);

        chain.remove(hook, 1).unwrap();
        assert_eq!(chain.remove(hook, 1), Err(HandlerError::NotFound));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn allocation_failure() {
        let chain = HandlerChain::new();
        let hook = Hook::Native(record);
        const A: usize = 0xa;
        const B: usize = 0xb;

        chain.install(hook, A, Placement::Tail).unwrap();
        FAIL_NEXT_ALLOCATION.with(|fail| fail.set(true));
        assert_eq!(
            chain.install(hook, B, Placement::Head),
            Err(HandlerError::OutOfMemory)
        );
        assert_eq!(chain.len(), 1);
        assert_eq!(visited(&chain), [A]);

        // The failure does not stick
        chain.install(hook, B, Placement::Head).unwrap();
        assert_eq!(visited(&chain), [B, A]);
    }

    #[test]
    fn foreign_hooks() {
        let chain = HandlerChain::new();
        let hook = Hook::Foreign(foreign_claim);
        chain.install(hook, 0x77, Placement::Head).unwrap();

        let mut frame = ExceptionFrame::default();
        assert_eq!(chain.dispatch(&mut frame), HookAction::Handled);
        assert_eq!(frame.gpr[31], 0x77);

        chain.remove(hook, 0x77).unwrap();
        assert_eq!(chain.dispatch(&mut frame), HookAction::Pass);
    }

    #[test]
    fn concurrent_mutations() {
        const THREADS: usize = 4;
        const ROUNDS: usize = 200;

        let chain = HandlerChain::new();
        let hook = Hook::Native(record);
        let done = core::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            // A reader keeps traversing while the chain is mutated
            s.spawn(|| {
                while !done.load(Ordering::SeqCst) {
                    let mut frame = ExceptionFrame::default();
                    chain.dispatch(&mut frame);
                    assert!(frame.gpr[0] <= THREADS);
                }
            });

            let workers: std::vec::Vec<_> = (0..THREADS)
                .map(|t| {
                    let chain = &chain;
                    s.spawn(move || {
                        for round in 0..ROUNDS {
                            let placement = if round % 2 == 0 {
                                Placement::Head
                            } else {
                                Placement::Tail
                            };
                            chain.install(hook, t, placement).unwrap();
                            chain.remove(hook, t).unwrap();
                        }
                    })
                })
                .collect();

            for worker in workers {
                worker.join().unwrap();
            }
            done.store(true, Ordering::SeqCst);
        });

        assert!(chain.is_empty());
    }

    #[test]
    fn global_chain() {
        let _machine = crate::userspace::lock_machine();
        let hook = Hook::Native(claim);

        install_handler(hook, 0x600d, Placement::Tail).unwrap();
        assert_eq!(
            install_handler(hook, 0x600d, Placement::Tail),
            Err(HandlerError::AlreadyInstalled)
        );
        remove_handler(hook, 0x600d).unwrap();
        assert_eq!(remove_handler(hook, 0x600d), Err(HandlerError::NotFound));
    }
}

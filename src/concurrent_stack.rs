use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

/// A concurrent LIFO with an atomic head pointer.
///
/// Producers push with a lock-free compare-and-swap loop and never block
/// each other. Consumers serialize on an internal mutex: with a single
/// live popper at a time, a dequeued node can be freed immediately without
/// hazard pointers or tagged pointers, because nobody else can still be
/// reading its `next` link. Pops still race against concurrent pushes via
/// the same CAS on the head, so the stack stays linearizable LIFO.
///
/// The thread pool uses this as its task queue: many submitters, workers
/// popping as they go.
pub struct ConcurrentStack<T> {
    head: AtomicPtr<Node<T>>,
    pop_lock: Mutex<()>,
}

impl<T> ConcurrentStack<T> {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            pop_lock: Mutex::new(()),
        }
    }

    /// Pushes a value onto the top of the stack. Lock-free.
    pub fn push_front(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            // SAFETY: `node` is ours until the CAS publishes it.
            unsafe {
                (*node).next = head;
            }
            if self
                .head
                .compare_exchange_weak(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Pops the most recently pushed value, or `None` when empty.
    pub fn try_pop_front(&self) -> Option<T> {
        let _popper = self.pop_lock.lock().unwrap();
        loop {
            let head = self.head.load(Ordering::Acquire);
            if head.is_null() {
                return None;
            }
            // SAFETY: nodes are only freed by the (single, serialized)
            // popper, so `head` cannot have been deallocated under us.
            let next = unsafe { (*head).next };
            if self
                .head
                .compare_exchange_weak(head, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                // SAFETY: the CAS unlinked `head`; we own it exclusively.
                let node = unsafe { Box::from_raw(head) };
                return Some(node.value);
            }
        }
    }

    /// Returns whether the stack looked empty at the time of the call.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }
}

impl<T> Default for ConcurrentStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ConcurrentStack<T> {
    fn drop(&mut self) {
        let mut current = *self.head.get_mut();
        while !current.is_null() {
            // SAFETY: exclusive access in drop; every node was allocated
            // by push_front and is freed exactly once here.
            let node = unsafe { Box::from_raw(current) };
            current = node.next;
        }
    }
}

// SAFETY: values move through the stack whole; the head CAS plus the popper
// mutex provide the necessary synchronization.
unsafe impl<T: Send> Send for ConcurrentStack<T> {}
unsafe impl<T: Send> Sync for ConcurrentStack<T> {}

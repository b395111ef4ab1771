//! Single-thread guard.
//!
//! Nothing in the allocator is synchronised. Instead of locking, the process
//! is terminated as soon as a second thread shows up: the C build intercepts
//! `pthread_create` (see `ffi`), and every entry into the process-wide heap
//! checks that it runs on the thread that first used it.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Exit status used when a second thread is refused.
pub const EXIT_STATUS: i32 = -libc::ENOSYS;

/// Records the one thread allowed to use the allocator.
///
/// Thread id 0 means "not claimed yet".
pub struct ThreadOwner(AtomicUsize);

impl ThreadOwner {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// Claim ownership for `thread`, or confirm it already owns.
    ///
    /// Returns `false` if a different thread owns the allocator.
    #[inline]
    pub fn claim(&self, thread: usize) -> bool {
        let owner = self.0.load(Ordering::Relaxed);
        if owner == thread {
            return true;
        }
        owner == 0
            && self
                .0
                .compare_exchange(0, thread, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
    }
}

impl Default for ThreadOwner {
    fn default() -> Self {
        Self::new()
    }
}

static OWNER: ThreadOwner = ThreadOwner::new();

#[inline]
fn current_thread() -> usize {
    unsafe { libc::pthread_self() as usize }
}

/// Terminate the process unless the caller is the allocator's thread.
#[inline]
pub fn ensure_single_thread() {
    if !OWNER.claim(current_thread()) {
        refuse_thread();
    }
}

/// Report the violation and exit immediately.
///
/// Uses raw `write(2)` and `_exit(2)`: formatting or unwinding could
/// allocate, and exit handlers could re-enter the allocator.
#[cold]
#[inline(never)]
pub fn refuse_thread() -> ! {
    const MESSAGE: &[u8] = b"pagehoard: the allocator is single-threaded; refusing a second thread\n";
    unsafe {
        libc::write(libc::STDERR_FILENO, MESSAGE.as_ptr().cast(), MESSAGE.len());
        libc::_exit(EXIT_STATUS)
    }
}

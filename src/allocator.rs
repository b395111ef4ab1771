//! Process-wide allocator: one [`Heap`] shared by the whole process.
//!
//! The `PageHoard` struct is zero-sized; the state is a module-level static
//! with no lock around it. Every entry goes through [`guard`] first, which
//! terminates the process if a second thread ever gets here.
//!
//! Heap events are emitted only after the heap operation has returned. A
//! subscriber that allocates re-enters the allocator at that point, which is
//! safe; events caused by those nested calls are dropped.

use crate::error::AllocError;
use crate::events::EventLog;
use crate::guard;
use crate::heap::Heap;
use crate::pool::PoolStats;
use core::alloc::{GlobalAlloc, Layout};
use core::cell::UnsafeCell;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicBool, Ordering};

// =============================================================================
// Global static state
// =============================================================================

struct GlobalHeap(UnsafeCell<Heap>);

// SAFETY: only reached through `with_heap`, which refuses every thread but one.
unsafe impl Sync for GlobalHeap {}

static HEAP: GlobalHeap = GlobalHeap(UnsafeCell::new(Heap::new()));

/// Run `f` on the process-wide heap, then emit the events it recorded.
///
/// The heap reference is dead by the time events are emitted, so a nested
/// allocator call from a subscriber gets the heap to itself.
#[inline(always)]
fn with_heap<R>(f: impl FnOnce(&mut Heap) -> R) -> R {
    guard::ensure_single_thread();
    let (result, events) = {
        // SAFETY: single thread, and no other reference to the heap is live.
        let heap = unsafe { &mut *HEAP.0.get() };
        let result = f(heap);
        (result, heap.take_events())
    };
    if !events.is_empty() {
        emit(events);
    }
    result
}

static EMITTING: AtomicBool = AtomicBool::new(false);

struct EmitGuard;

impl Drop for EmitGuard {
    fn drop(&mut self) {
        EMITTING.store(false, Ordering::Relaxed);
    }
}

#[inline]
fn enter_emit_guard() -> Option<EmitGuard> {
    if EMITTING.swap(true, Ordering::Relaxed) {
        None
    } else {
        Some(EmitGuard)
    }
}

#[cold]
#[inline(never)]
fn emit(events: EventLog) {
    // Nested: the subscriber is allocating while handling an event.
    let Some(_guard) = enter_emit_guard() else {
        return;
    };
    events.emit();
}

/// Size to request for `layout`.
///
/// Pooled objects are aligned to their class size and large objects to the
/// page, so rounding the size up to the alignment is enough for any
/// alignment up to a page.
#[inline]
fn request_size(layout: Layout, page_size: usize) -> Result<usize, AllocError> {
    if layout.align() > page_size {
        return Err(AllocError::UnsupportedAlignment { align: layout.align() });
    }
    Ok(layout.size().max(layout.align()))
}

// =============================================================================
// The allocator
// =============================================================================

/// Hoard-style page allocator for Rust.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: pagehoard::PageHoard = pagehoard::PageHoard;
/// ```
///
/// The allocator is single-threaded: the first thread to use it owns it and
/// the process exits if any other thread calls in.
pub struct PageHoard;

impl PageHoard {
    /// Allocate `size` bytes, filled with [`crate::ALLOC_POISON`].
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        with_heap(|heap| heap.allocate(size))
    }

    /// Allocate `count * size` zeroed bytes.
    pub fn allocate_zeroed(&self, count: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        let len = count.checked_mul(size).ok_or(AllocError::SizeOverflow)?;
        with_heap(|heap| heap.allocate_zeroed(len))
    }

    /// Free an allocation. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation made by this allocator.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        with_heap(|heap| unsafe { heap.deallocate(ptr) })
    }

    /// Resize an allocation. See [`Heap::reallocate`].
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation made by this allocator.
    pub unsafe fn reallocate(
        &self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        with_heap(|heap| unsafe { heap.reallocate(ptr, new_size) })
    }

    /// Bytes usable through `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation made by this allocator.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        with_heap(|heap| unsafe { heap.usable_size(ptr) })
    }

    /// Counters of the pool serving `level`.
    pub fn pool_stats(&self, level: usize) -> PoolStats {
        with_heap(|heap| heap.pool_stats(level))
    }

    /// Number of live large objects.
    pub fn large_objects(&self) -> usize {
        with_heap(|heap| heap.large_objects())
    }

    /// See [`Heap::check_invariants`].
    pub fn check_invariants(&self) -> bool {
        with_heap(|heap| heap.check_invariants())
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        with_heap(|heap| heap.page_size())
    }
}

unsafe impl GlobalAlloc for PageHoard {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        with_heap(|heap| {
            request_size(layout, heap.page_size())
                .and_then(|size| heap.allocate(size))
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        })
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        with_heap(|heap| unsafe { heap.deallocate(ptr) })
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        with_heap(|heap| {
            request_size(layout, heap.page_size())
                .and_then(|size| heap.allocate_zeroed(size))
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        })
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(old) = NonNull::new(ptr) else {
            let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        };
        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        with_heap(|heap| {
            request_size(new_layout, heap.page_size())
                .and_then(|size| unsafe { heap.reallocate(old, size) })
                .map_or(ptr::null_mut(), NonNull::as_ptr)
        })
    }
}

//! C-ABI exports for use through `LD_PRELOAD`.
//!
//! Gated behind `features = ["ffi"]`. Replaces the C allocation entry points
//! with the process-wide [`PageHoard`], and `pthread_create` with a refusal:
//! the allocator is single-threaded, so a program that starts a thread is
//! terminated before the thread exists.
//!
//! The unmangled symbols are not emitted in this crate's own unit-test build,
//! where they would take over the test runner's threads and `malloc`.

use crate::allocator::PageHoard;
use crate::error::AllocError;
use crate::guard;
use crate::size_class;
use core::ffi::{c_int, c_void};
use core::ptr::{self, NonNull};

static ALLOC: PageHoard = PageHoard;

/// Report a failure the C way: null result, `errno` set to `ENOMEM`.
#[cold]
fn fail(_err: AllocError) -> *mut c_void {
    set_errno(libc::ENOMEM);
    ptr::null_mut()
}

fn set_errno(value: c_int) {
    cfg_if::cfg_if! {
        if #[cfg(any(target_os = "linux", target_os = "android"))] {
            unsafe { *libc::__errno_location() = value };
        } else if #[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd"))] {
            unsafe { *libc::__error() = value };
        } else {
            let _ = value;
        }
    }
}

#[inline]
fn to_c(result: Result<NonNull<u8>, AllocError>) -> *mut c_void {
    match result {
        Ok(ptr) => ptr.as_ptr().cast(),
        Err(err) => fail(err),
    }
}

#[cfg_attr(not(test), unsafe(no_mangle))]
pub extern "C" fn malloc(size: usize) -> *mut c_void {
    to_c(ALLOC.allocate(size))
}

#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn free(ptr: *mut c_void) {
    unsafe { ALLOC.deallocate(ptr.cast()) }
}

#[cfg_attr(not(test), unsafe(no_mangle))]
pub extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    to_c(ALLOC.allocate_zeroed(count, size))
}

/// `realloc(NULL, n)` allocates; `realloc(p, 0)` frees `p` and returns null.
#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    let Some(old) = NonNull::new(ptr.cast::<u8>()) else {
        return malloc(size);
    };
    if size == 0 {
        unsafe { ALLOC.deallocate(old.as_ptr()) };
        return ptr::null_mut();
    }
    to_c(unsafe { ALLOC.reallocate(old, size) })
}

#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn malloc_usable_size(ptr: *mut c_void) -> usize {
    match NonNull::new(ptr.cast::<u8>()) {
        Some(ptr) => unsafe { ALLOC.usable_size(ptr) },
        None => 0,
    }
}

/// Size-class level for `size`, or -1 if it is served by a direct mapping.
#[cfg_attr(not(test), unsafe(no_mangle))]
#[inline(never)]
pub extern "C" fn classify(size: usize) -> c_int {
    size_class::classify(size).map_or(-1, |level| level as c_int)
}

#[cfg_attr(not(test), unsafe(no_mangle))]
pub unsafe extern "C" fn pthread_create(
    _thread: *mut libc::pthread_t,
    _attr: *const libc::pthread_attr_t,
    _start: extern "C" fn(*mut c_void) -> *mut c_void,
    _arg: *mut c_void,
) -> c_int {
    guard::refuse_thread()
}

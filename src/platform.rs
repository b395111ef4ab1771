//! OS memory provider: anonymous page mappings.
//!
//! This is the only module that asks the OS for memory. Every mapping and
//! unmapping is announced to the instrumentation bridge as a malloc-like or
//! free-like event.

use crate::error::AllocError;
use crate::instrument;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicUsize, Ordering};

/// Source of page-aligned backing memory.
///
/// # Safety
///
/// `map` must return regions aligned to `page_size()`, which must be a power
/// of two. Superblock recovery masks pointers with the page size and relies
/// on this.
pub unsafe trait PageSource {
    /// Granularity of mappings; one superblock is one page.
    fn page_size(&self) -> usize;

    /// Map `len` bytes of zero-filled read/write memory.
    fn map(&self, len: usize) -> Result<NonNull<u8>, AllocError>;

    /// Return a region obtained from `map`.
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must describe exactly one live mapping from `map`.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize);
}

/// Pages straight from `mmap(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsMemory;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// The platform page size, queried once and cached.
pub fn page_size() -> usize {
    let cached = PAGE_SIZE.load(Ordering::Relaxed);
    if cached != 0 {
        return cached;
    }
    let size = query_page_size();
    PAGE_SIZE.store(size, Ordering::Relaxed);
    size
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        /// Fallback when `sysconf` reports nothing usable.
        const DEFAULT_PAGE_SIZE: usize = 4096;

        fn query_page_size() -> usize {
            let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            match usize::try_from(size) {
                Ok(size) if size.is_power_of_two() => size,
                _ => DEFAULT_PAGE_SIZE,
            }
        }

        unsafe fn os_map(len: usize) -> *mut u8 {
            let ptr = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    len,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                    -1,
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                ptr::null_mut()
            } else {
                ptr.cast()
            }
        }

        unsafe fn os_unmap(ptr: *mut u8, len: usize) {
            unsafe { libc::munmap(ptr.cast(), len) };
        }

        /// Number of resident pages in `[ptr, ptr + len)`, or `None` if any
        /// page of the range is unmapped.
        ///
        /// Uses `mincore(2)`, which fails with `ENOMEM` on unmapped ranges.
        /// `ptr` must be page aligned. Test support only.
        #[doc(hidden)]
        pub fn resident_pages(ptr: *const u8, len: usize) -> Option<usize> {
            let page = page_size();
            let pages = len.div_ceil(page).max(1);
            let mut residency = [0u8; 64];
            let mut resident = 0;
            let mut offset = 0;
            while offset < pages {
                let chunk = (pages - offset).min(residency.len());
                let rc = unsafe {
                    libc::mincore(
                        ptr.wrapping_add(offset * page).cast_mut().cast(),
                        chunk * page,
                        residency.as_mut_ptr().cast(),
                    )
                };
                if rc != 0 {
                    return None;
                }
                resident += residency[..chunk].iter().filter(|&&r| r & 1 != 0).count();
                offset += chunk;
            }
            Some(resident)
        }

        /// Whether every page of `[ptr, ptr + len)` is currently mapped.
        /// Test support only.
        #[doc(hidden)]
        pub fn is_mapped(ptr: *const u8, len: usize) -> bool {
            resident_pages(ptr, len).is_some()
        }
    } else {
        compile_error!("pagehoard needs mmap; only unix targets are supported");
    }
}

unsafe impl PageSource for OsMemory {
    #[inline]
    fn page_size(&self) -> usize {
        page_size()
    }

    fn map(&self, len: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = unsafe { os_map(len) };
        match NonNull::new(ptr) {
            Some(ptr) => {
                instrument::malloc_like(ptr.as_ptr(), len);
                Ok(ptr)
            }
            None => Err(AllocError::OutOfMemory { len }),
        }
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) {
        unsafe { os_unmap(ptr.as_ptr(), len) };
        instrument::free_like(ptr.as_ptr());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_is_power_of_two() {
        let size = page_size();
        assert!(size.is_power_of_two());
        assert!(size >= 4096);
        assert_eq!(page_size(), size);
    }

    #[test]
    fn test_map_is_page_aligned() {
        let os = OsMemory;
        let ptr = os.map(os.page_size()).unwrap();
        assert_eq!(ptr.as_ptr() as usize % os.page_size(), 0);
        unsafe { os.unmap(ptr, os.page_size()) };
    }

    // Unmapped ranges are checked in tests/properties.rs, where no other
    // thread can map the same addresses again in between.
    #[test]
    fn test_mapped_range_is_reported() {
        let os = OsMemory;
        let len = os.page_size() * 3;
        let ptr = os.map(len).unwrap();
        unsafe { ptr.as_ptr().write_bytes(0x5a, len) };
        assert!(is_mapped(ptr.as_ptr(), len));
        assert_eq!(resident_pages(ptr.as_ptr(), len), Some(3));
        unsafe { os.unmap(ptr, len) };
    }

    #[test]
    fn test_fresh_mapping_is_zeroed_and_untouched() {
        let os = OsMemory;
        let len = os.page_size() * 4;
        let ptr = os.map(len).unwrap();
        assert_eq!(resident_pages(ptr.as_ptr(), len), Some(0));
        let bytes = unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) };
        assert!(bytes.iter().all(|&b| b == 0));
        unsafe { os.unmap(ptr, len) };
    }

    #[test]
    fn test_map_odd_length() {
        let os = OsMemory;
        let ptr = os.map(5000).unwrap();
        unsafe {
            ptr.as_ptr().write_bytes(1, 5000);
            assert_eq!(*ptr.as_ptr().add(4999), 1);
            os.unmap(ptr, 5000);
        }
    }
}

//! Large objects: requests above the largest size class.
//!
//! Each one is a direct OS mapping. The mappings are tracked in a singly
//! linked list whose records are ordinary level-0 objects handed out by the
//! pools, so the allocator never needs a second source of metadata memory.

use core::mem::size_of;
use core::ptr::{self, NonNull};

/// Tracking record for one mapping.
#[repr(C)]
struct LargeObject {
    next: *mut LargeObject,
    addr: *mut u8,
    len: usize,
}

/// Bytes needed for one record.
pub const RECORD_SIZE: usize = size_of::<LargeObject>();

const _: () = assert!(RECORD_SIZE <= crate::size_class::MIN_ALLOC);

pub struct LargeList {
    head: *mut LargeObject,
    len: usize,
}

impl LargeList {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            len: 0,
        }
    }

    /// Number of live large objects.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Record the mapping `[addr, addr + len)` in `record`.
    ///
    /// # Safety
    ///
    /// `record` must point to `RECORD_SIZE` writable bytes, aligned for a
    /// pointer, that stay reserved until [`LargeList::remove`] hands them back.
    pub unsafe fn insert(&mut self, record: NonNull<u8>, addr: NonNull<u8>, len: usize) {
        let record = record.cast::<LargeObject>();
        unsafe {
            record.write(LargeObject {
                next: self.head,
                addr: addr.as_ptr(),
                len,
            });
        }
        self.head = record.as_ptr();
        self.len += 1;
    }

    /// Length of the mapping starting at `addr`, if it is tracked.
    ///
    /// # Safety
    ///
    /// Every record on the list must be live.
    pub unsafe fn find(&self, addr: *mut u8) -> Option<usize> {
        let mut cursor = self.head;
        while let Some(record) = NonNull::new(cursor) {
            let record = unsafe { record.as_ref() };
            if record.addr == addr {
                return Some(record.len);
            }
            cursor = record.next;
        }
        None
    }

    /// Unlink the record for the mapping starting at `addr`.
    ///
    /// Returns the record's storage and the mapping length.
    ///
    /// # Safety
    ///
    /// Every record on the list must be live.
    pub unsafe fn remove(&mut self, addr: *mut u8) -> Option<(NonNull<u8>, usize)> {
        let mut link: *mut *mut LargeObject = &mut self.head;
        unsafe {
            while let Some(record) = NonNull::new(*link) {
                let entry = record.as_ptr();
                if (*entry).addr == addr {
                    *link = (*entry).next;
                    self.len -= 1;
                    return Some((record.cast(), (*entry).len));
                }
                link = &mut (*entry).next;
            }
        }
        None
    }
}

impl Default for LargeList {
    fn default() -> Self {
        Self::new()
    }
}

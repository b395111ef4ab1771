//! Size-class pool: the superblocks serving one level.
//!
//! A pool keeps its superblocks on a singly linked list threaded through the
//! headers, together with two aggregate counters: free objects across all of
//! its superblocks, and superblocks that are wholly free. The second counter
//! drives the release policy that hands surplus pages back to the OS.

use crate::error::AllocError;
use crate::instrument;
use crate::platform::PageSource;
use crate::superblock::{Superblock, HEADER_SIZE};
use core::ptr::{self, NonNull};

/// Snapshot of one pool's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Free objects across all superblocks of the pool.
    pub free_objects: usize,
    /// Superblocks with every object free.
    pub whole_superblocks: usize,
    /// Superblocks currently mapped for the pool.
    pub superblocks: usize,
}

pub struct Pool {
    head: *mut Superblock,
    free_objects: usize,
    whole_superblocks: usize,
    superblocks: usize,
}

impl Pool {
    pub const fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            free_objects: 0,
            whole_superblocks: 0,
            superblocks: 0,
        }
    }

    #[inline]
    pub fn free_objects(&self) -> usize {
        self.free_objects
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            free_objects: self.free_objects,
            whole_superblocks: self.whole_superblocks,
            superblocks: self.superblocks,
        }
    }

    /// Map one more superblock for `level` and put it at the head of the list.
    ///
    /// On failure the pool is left untouched.
    pub fn grow<M: PageSource>(
        &mut self,
        level: usize,
        source: &M,
    ) -> Result<NonNull<Superblock>, AllocError> {
        let page_size = source.page_size();
        let page = source.map(page_size)?;
        let mut header = unsafe { Superblock::carve(page, level, page_size) };

        let sb = unsafe { header.as_mut() };
        sb.next = self.head;
        self.head = header.as_ptr();
        self.superblocks += 1;
        self.whole_superblocks += 1;
        self.free_objects += sb.free_count();
        Ok(header)
    }

    /// Take one object from the first superblock, in list order, that has any.
    ///
    /// # Safety
    ///
    /// Every header on the list must be live and accessible.
    pub unsafe fn take(&mut self, page_size: usize) -> Option<NonNull<u8>> {
        let mut cursor = self.head;
        while let Some(mut header) = NonNull::new(cursor) {
            let sb = unsafe { header.as_mut() };
            if sb.free_count() > 0 {
                let was_whole = sb.is_whole(page_size);
                let obj = unsafe { sb.pop() }?;
                self.free_objects -= 1;
                if was_whole {
                    self.whole_superblocks -= 1;
                }
                return Some(obj);
            }
            cursor = sb.next;
        }
        None
    }

    /// Return `obj` to its superblock `sb`, which must belong to this pool.
    ///
    /// # Safety
    ///
    /// `obj` must be a live object of `sb`.
    pub unsafe fn give_back(&mut self, sb: &mut Superblock, obj: NonNull<u8>, page_size: usize) {
        unsafe { sb.push(obj) };
        self.free_objects += 1;
        if sb.is_whole(page_size) {
            self.whole_superblocks += 1;
        }
    }

    /// Unmap wholly free superblocks until at most `retain` are left.
    ///
    /// Returns how many were unmapped.
    ///
    /// # Safety
    ///
    /// Every header on the list must be live and accessible.
    pub unsafe fn release_surplus<M: PageSource>(&mut self, retain: usize, source: &M) -> usize {
        let page_size = source.page_size();
        let mut released = 0;
        while self.whole_superblocks > retain {
            let Some(mut header) = (unsafe { self.unlink_whole(page_size) }) else {
                break;
            };
            let sb = unsafe { header.as_mut() };
            let page = sb.page();
            self.free_objects -= sb.capacity(page_size);
            self.whole_superblocks -= 1;
            self.superblocks -= 1;
            unsafe { source.unmap(page, page_size) };
            released += 1;
        }
        released
    }

    /// Unlink the first wholly free superblock from the list.
    unsafe fn unlink_whole(&mut self, page_size: usize) -> Option<NonNull<Superblock>> {
        let mut link: *mut *mut Superblock = &mut self.head;
        unsafe {
            while let Some(mut header) = NonNull::new(*link) {
                let sb = header.as_mut();
                if sb.is_whole(page_size) {
                    *link = sb.next;
                    sb.next = ptr::null_mut();
                    return Some(header);
                }
                link = &mut sb.next;
            }
        }
        None
    }

    /// Make every header of the pool accessible to the memory checker.
    ///
    /// # Safety
    ///
    /// Every header on the list must be live.
    pub unsafe fn expose_headers(&self) {
        let mut cursor = self.head;
        while !cursor.is_null() {
            instrument::make_defined(cursor.cast(), HEADER_SIZE);
            cursor = unsafe { (*cursor).next };
        }
    }

    /// Make every header of the pool inaccessible to the memory checker.
    ///
    /// # Safety
    ///
    /// Every header on the list must be live and currently exposed.
    pub unsafe fn hide_headers(&self) {
        let mut cursor = self.head;
        while !cursor.is_null() {
            let next = unsafe { (*cursor).next };
            instrument::make_noaccess(cursor.cast(), HEADER_SIZE);
            cursor = next;
        }
    }

    /// Recompute the counters by walking the superblock list.
    ///
    /// Also checks that every header records `level`, returning `None` if
    /// one does not.
    ///
    /// # Safety
    ///
    /// Every header on the list must be live and accessible.
    pub unsafe fn recount(&self, level: usize, page_size: usize) -> Option<PoolStats> {
        let mut stats = PoolStats::default();
        let mut cursor = self.head;
        while let Some(header) = NonNull::new(cursor) {
            let sb = unsafe { header.as_ref() };
            if sb.level() != level {
                return None;
            }
            stats.superblocks += 1;
            stats.free_objects += sb.free_count();
            if sb.is_whole(page_size) {
                stats.whole_superblocks += 1;
            }
            cursor = sb.next;
        }
        Some(stats)
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

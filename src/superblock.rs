//! Superblock: one page carved into same-size objects.
//!
//! The first object slot of every superblock is sacrificed for its
//! [`Superblock`] header, so the header of any object is recovered by masking
//! the object's address down to the page boundary. Free objects are threaded
//! through their first word as an intrusive singly linked list.

use crate::instrument;
use crate::size_class::{level_to_size, objects_per_superblock, MIN_ALLOC};
use core::mem::size_of;
use core::ptr::{self, NonNull};

/// A free object. Only the first word is meaningful, and only while the
/// object sits on its superblock's free list.
#[repr(C)]
pub struct FreeObject {
    pub next: *mut FreeObject,
}

/// Bookkeeping header stored at the start of every superblock.
#[repr(C)]
pub struct Superblock {
    /// Next superblock in the same pool.
    pub next: *mut Superblock,
    free_list: *mut FreeObject,
    free_count: u32,
    level: u8,
}

/// Bytes of the header slot that hold bookkeeping.
pub const HEADER_SIZE: usize = size_of::<Superblock>();

/// Bytes of a free object reused for the free-list link.
pub const LINK_SIZE: usize = size_of::<FreeObject>();

const _: () = assert!(HEADER_SIZE <= MIN_ALLOC);
const _: () = assert!(LINK_SIZE <= MIN_ALLOC);

impl Superblock {
    /// Lay out a superblock for `level` over a freshly mapped page.
    ///
    /// Every slot but the first goes on the free list, lowest address first.
    ///
    /// # Safety
    ///
    /// `page` must be a writable, unused, `page_size`-aligned region of
    /// `page_size` bytes.
    pub unsafe fn carve(page: NonNull<u8>, level: usize, page_size: usize) -> NonNull<Superblock> {
        let size = level_to_size(level);
        let count = objects_per_superblock(level, page_size);
        let base = page.as_ptr();

        let mut head: *mut FreeObject = ptr::null_mut();
        for slot in (1..=count).rev() {
            let obj = unsafe { base.add(slot * size) }.cast::<FreeObject>();
            unsafe { obj.write(FreeObject { next: head }) };
            head = obj;
        }

        let header = page.cast::<Superblock>();
        unsafe {
            header.write(Superblock {
                next: ptr::null_mut(),
                free_list: head,
                free_count: count as u32,
                level: level as u8,
            });
        }

        instrument::make_noaccess(unsafe { base.add(HEADER_SIZE) }, page_size - HEADER_SIZE);
        header
    }

    /// Header of the superblock containing `ptr`.
    #[inline]
    pub fn containing(ptr: *mut u8, page_size: usize) -> *mut Superblock {
        let offset = ptr as usize & (page_size - 1);
        ptr.wrapping_sub(offset).cast()
    }

    /// Base address of the page this header lives in.
    #[inline]
    pub fn page(&mut self) -> NonNull<u8> {
        NonNull::from(self).cast()
    }

    #[inline]
    pub fn level(&self) -> usize {
        self.level as usize
    }

    #[inline]
    pub fn object_size(&self) -> usize {
        level_to_size(self.level())
    }

    #[inline]
    pub fn free_count(&self) -> usize {
        self.free_count as usize
    }

    #[inline]
    pub fn capacity(&self, page_size: usize) -> usize {
        objects_per_superblock(self.level(), page_size)
    }

    /// Every object of this superblock is free.
    #[inline]
    pub fn is_whole(&self, page_size: usize) -> bool {
        self.free_count() == self.capacity(page_size)
    }

    /// Take one object off the local free list.
    ///
    /// # Safety
    ///
    /// The header must be live and its free list intact.
    #[inline]
    pub unsafe fn pop(&mut self) -> Option<NonNull<u8>> {
        let obj = NonNull::new(self.free_list)?;
        instrument::make_defined(obj.as_ptr().cast(), self.object_size());
        self.free_list = unsafe { (*obj.as_ptr()).next };
        self.free_count -= 1;
        Some(obj.cast())
    }

    /// Put an object back on the local free list.
    ///
    /// # Safety
    ///
    /// `obj` must be an object of this superblock that is not already free.
    #[inline]
    pub unsafe fn push(&mut self, obj: NonNull<u8>) {
        let obj = obj.cast::<FreeObject>();
        unsafe { obj.write(FreeObject { next: self.free_list }) };
        self.free_list = obj.as_ptr();
        self.free_count += 1;
    }
}

//! Allocation engine: routes each request to a size-class pool or to the
//! large-object list, and poisons memory on the way in and out.
//!
//! A `Heap` owns all allocator state. The process-wide instance lives in
//! [`crate::allocator`]; tests build private instances.
//!
//! Nothing here logs directly. Operations record [`Event`]s, and the owner
//! drains them with [`Heap::take_events`] once the heap is idle again.

use crate::error::AllocError;
use crate::events::{Event, EventLog};
use crate::instrument;
use crate::large::{LargeList, RECORD_SIZE};
use crate::platform::{OsMemory, PageSource};
use crate::pool::{Pool, PoolStats};
use crate::size_class::{self, LEVELS, MAX_ALLOC};
use crate::superblock::{Superblock, LINK_SIZE};
use core::ptr::{self, NonNull};

/// Written over every object handed out, so reads of uninitialised memory
/// show up as 0xcd.
pub const ALLOC_POISON: u8 = 0xcd;

/// Written over every freed object past its link word, so use-after-free
/// reads show up as 0xab.
pub const FREE_POISON: u8 = 0xab;

/// What a fresh object is filled with.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Fill {
    Poison,
    /// Pooled objects are zeroed; fresh mappings already are.
    Zero,
}

/// Level of the objects that hold large-object records.
const RECORD_LEVEL: usize = 0;

const _: () = assert!(RECORD_SIZE <= size_class::level_to_size(RECORD_LEVEL));

/// Tunables of a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Wholly free superblocks each pool keeps before returning pages to
    /// the OS.
    pub retain_whole: usize,
}

impl Config {
    pub const DEFAULT: Self = Self { retain_whole: 2 };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}

pub struct Heap<M: PageSource = OsMemory> {
    pools: [Pool; LEVELS],
    large: LargeList,
    source: M,
    config: Config,
    events: EventLog,
}

impl Heap<OsMemory> {
    pub const fn new() -> Self {
        Self::with_config(OsMemory, Config::DEFAULT)
    }
}

impl Default for Heap<OsMemory> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: PageSource> Heap<M> {
    pub const fn with_config(source: M, config: Config) -> Self {
        Self {
            pools: [const { Pool::new() }; LEVELS],
            large: LargeList::new(),
            source,
            config,
            events: EventLog::new(),
        }
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    #[inline]
    pub fn page_size(&self) -> usize {
        self.source.page_size()
    }

    /// Counters of the pool serving `level`.
    pub fn pool_stats(&self, level: usize) -> PoolStats {
        self.pools[level].stats()
    }

    /// Number of live large objects.
    pub fn large_objects(&self) -> usize {
        self.large.len()
    }

    /// Events recorded since the last call, leaving the log empty.
    ///
    /// Emitting them may allocate, so callers that route allocations back
    /// into this heap must drain first and emit afterwards.
    pub fn take_events(&mut self) -> EventLog {
        self.events.take()
    }

    /// Allocate `size` bytes, filled with [`ALLOC_POISON`].
    ///
    /// Sizes up to [`MAX_ALLOC`] come from the pools, naturally aligned to
    /// their size class; larger sizes are mapped directly and page aligned.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_filled(size, Fill::Poison)
    }

    /// Allocate `size` zeroed bytes.
    ///
    /// Large objects are fresh mappings and are not written at all, so their
    /// pages stay uncommitted until first use.
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_filled(size, Fill::Zero)
    }

    fn allocate_filled(&mut self, size: usize, fill: Fill) -> Result<NonNull<u8>, AllocError> {
        self.expose_headers();
        let result = match size_class::classify(size) {
            Some(level) => self.allocate_small(level, fill),
            None => self.allocate_large(size, fill),
        };
        self.hide_headers();
        result
    }

    /// Free an allocation made by this heap. Null is ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live allocation returned by this heap.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };
        self.expose_headers();
        // Large objects never live inside a superblock, so look them up before
        // masking the pointer.
        if let Some((record, len)) = unsafe { self.large.remove(ptr.as_ptr()) } {
            unsafe { self.source.unmap(ptr, len) };
            self.events.record(Event::LargeUnmapped { len, live: self.large.len() });
            unsafe { self.deallocate_small(record) };
        } else {
            unsafe { self.deallocate_small(ptr) };
        }
        self.hide_headers();
    }

    /// Bytes usable through `ptr`: its class size, or the mapping length of
    /// a large object.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation returned by this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.expose_headers();
        let size = match unsafe { self.large.find(ptr.as_ptr()) } {
            Some(len) => len,
            None => {
                let sb = Superblock::containing(ptr.as_ptr(), self.page_size());
                unsafe { (*sb).object_size() }
            }
        };
        self.hide_headers();
        size
    }

    /// Resize an allocation, moving it when the new size no longer belongs
    /// where it lives now.
    ///
    /// The object stays in place while the new size classifies to the same
    /// level, or, for a large object, while it is still large and fits the
    /// mapping. On failure the original allocation is untouched.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation returned by this heap.
    pub unsafe fn reallocate(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        let old_size = unsafe { self.usable_size(ptr) };
        let stays = if old_size > MAX_ALLOC {
            new_size > MAX_ALLOC && new_size <= old_size
        } else {
            size_class::classify(new_size) == size_class::classify(old_size)
        };
        if stays {
            return Ok(ptr);
        }

        let new_ptr = self.allocate(new_size)?;
        unsafe {
            ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old_size.min(new_size));
            self.deallocate(ptr.as_ptr());
        }
        Ok(new_ptr)
    }

    /// Recount every pool from its superblock headers and compare with the
    /// aggregate counters.
    pub fn check_invariants(&self) -> bool {
        let page_size = self.page_size();
        self.expose_headers();
        let ok = self.pools.iter().enumerate().all(|(level, pool)| {
            let walked = unsafe { pool.recount(level, page_size) };
            walked == Some(pool.stats())
        });
        self.hide_headers();
        ok
    }

    /// Pooled path. Also used for large-object records, so it must leave the
    /// pool fully consistent and never touch the header window.
    fn allocate_small(&mut self, level: usize, fill: Fill) -> Result<NonNull<u8>, AllocError> {
        let page_size = self.source.page_size();
        let pool = &mut self.pools[level];
        if pool.free_objects() == 0 {
            if let Err(err) = pool.grow(level, &self.source) {
                self.events.record(Event::MapFailed { len: page_size });
                return Err(err);
            }
            let superblocks = pool.stats().superblocks;
            self.events.record(Event::SuperblockMapped { level, superblocks });
        }
        let obj = unsafe { pool.take(page_size) };
        debug_assert!(obj.is_some(), "pool {level} counted free objects it does not have");
        let obj = obj.ok_or(AllocError::OutOfMemory { len: page_size })?;

        let byte = match fill {
            Fill::Poison => ALLOC_POISON,
            Fill::Zero => 0,
        };
        unsafe { obj.as_ptr().write_bytes(byte, size_class::level_to_size(level)) };
        Ok(obj)
    }

    fn allocate_large(&mut self, size: usize, fill: Fill) -> Result<NonNull<u8>, AllocError> {
        let record = self.allocate_small(RECORD_LEVEL, Fill::Poison)?;
        let addr = match self.source.map(size) {
            Ok(addr) => addr,
            Err(err) => {
                self.events.record(Event::MapFailed { len: size });
                unsafe { self.deallocate_small(record) };
                return Err(err);
            }
        };
        if fill == Fill::Poison {
            unsafe { addr.as_ptr().write_bytes(ALLOC_POISON, size) };
        }
        unsafe { self.large.insert(record, addr, size) };
        self.events.record(Event::LargeMapped { len: size, live: self.large.len() });
        Ok(addr)
    }

    /// Pooled free path, followed by the pool's release policy.
    unsafe fn deallocate_small(&mut self, obj: NonNull<u8>) {
        let page_size = self.source.page_size();
        let sb = unsafe { &mut *Superblock::containing(obj.as_ptr(), page_size) };
        let level = sb.level();
        let size = sb.object_size();

        unsafe { obj.as_ptr().add(LINK_SIZE).write_bytes(FREE_POISON, size - LINK_SIZE) };
        let pool = &mut self.pools[level];
        unsafe { pool.give_back(sb, obj, page_size) };
        instrument::make_noaccess(obj.as_ptr(), size);

        let released = unsafe { pool.release_surplus(self.config.retain_whole, &self.source) };
        if released > 0 {
            let superblocks = pool.stats().superblocks;
            self.events.record(Event::SuperblocksReleased { level, released, superblocks });
        }
    }

    fn expose_headers(&self) {
        if !instrument::active() {
            return;
        }
        for pool in &self.pools {
            unsafe { pool.expose_headers() };
        }
    }

    fn hide_headers(&self) {
        if !instrument::active() {
            return;
        }
        for pool in &self.pools {
            unsafe { pool.hide_headers() };
        }
    }
}

//! Size class lookup for the superblock pools.
//!
//! Objects are bucketed into seven power-of-two levels, 32 bytes up to 2 KiB.
//! Anything larger is a "large" allocation mapped directly from the OS.

/// log2 of the smallest object size.
pub const MIN_SHIFT: usize = 5;

/// Smallest real allocation. Smaller requests are rounded up.
pub const MIN_ALLOC: usize = 1 << MIN_SHIFT;

/// Number of size classes served from pools.
pub const LEVELS: usize = 7;

/// Largest size served from a pool.
pub const MAX_ALLOC: usize = MIN_ALLOC << (LEVELS - 1);

const _: () = assert!(MAX_ALLOC == 2048);

/// Map a request size to its level, or `None` if the request is oversized.
///
/// Level 0 holds `0..=32`; level `k` holds `(32 << (k - 1), 32 << k]`.
/// Kept out of line so it stays an addressable symbol for the C export.
#[inline(never)]
pub fn classify(size: usize) -> Option<usize> {
    if size > MAX_ALLOC {
        return None;
    }
    if size <= MIN_ALLOC {
        return Some(0);
    }
    // ceil(log2(size)) relative to MIN_SHIFT
    let bits = (usize::BITS - (size - 1).leading_zeros()) as usize;
    Some(bits - MIN_SHIFT)
}

/// Object size served by `level`.
#[inline]
pub const fn level_to_size(level: usize) -> usize {
    MIN_ALLOC << level
}

/// Number of usable objects in one superblock of `level`.
///
/// The first slot of every superblock holds its header.
#[inline]
pub const fn objects_per_superblock(level: usize, page_size: usize) -> usize {
    page_size / level_to_size(level) - 1
}

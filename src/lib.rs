//! pagehoard: a Hoard-style segregated free list allocator.
//!
//! Memory comes from the OS one page at a time. Each page ("superblock")
//! serves a single power-of-two size class and stores its own bookkeeping
//! header in its first object slot, so the owner of any pointer is found by
//! masking the pointer down to its page:
//! - Size classes (32 B .. 2 KiB, seven levels)
//! - Per-class pools with a bounded number of wholly free superblocks
//! - Directly mapped large objects tracked in a side list
//!
//! The allocator is single-threaded by contract and refuses to run with a
//! second thread.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: pagehoard::PageHoard = pagehoard::PageHoard;
//! ```
//!
//! Built with `--features ffi`, the cdylib exports `malloc`, `free` and
//! friends for use through `LD_PRELOAD`.

pub mod error;
pub mod events;
pub mod size_class;
pub mod platform;
pub mod instrument;
pub mod superblock;
pub mod pool;
pub mod large;
pub mod heap;
pub mod guard;
pub mod allocator;
#[cfg(feature = "ffi")]
pub mod ffi;

// Re-export the allocator at crate root for convenience
pub use allocator::PageHoard;
pub use error::AllocError;
pub use events::{Event, EventLog};
pub use heap::{Config, Heap, ALLOC_POISON, FREE_POISON};
pub use platform::{OsMemory, PageSource};
pub use pool::PoolStats;
pub use size_class::classify;

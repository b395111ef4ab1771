//! Deferred allocator events.
//!
//! A `tracing` subscriber may allocate, and the heap cannot be re-entered
//! while one of its operations is running. The heap therefore never calls
//! into `tracing` itself: it records what happened in a fixed-size
//! [`EventLog`], and the caller emits the log once the operation is over.

/// Something worth logging that happened inside the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A page was mapped and carved into a superblock.
    SuperblockMapped { level: usize, superblocks: usize },
    /// Wholly free superblocks were handed back to the OS.
    SuperblocksReleased { level: usize, released: usize, superblocks: usize },
    LargeMapped { len: usize, live: usize },
    LargeUnmapped { len: usize, live: usize },
    /// The OS refused a mapping.
    MapFailed { len: usize },
}

impl Event {
    pub fn emit(&self) {
        match *self {
            Event::SuperblockMapped { level, superblocks } => {
                tracing::debug!(level, superblocks, "superblock mapped");
            }
            Event::SuperblocksReleased { level, released, superblocks } => {
                tracing::debug!(level, released, superblocks, "superblocks released");
            }
            Event::LargeMapped { len, live } => {
                tracing::trace!(len, live, "large object mapped");
            }
            Event::LargeUnmapped { len, live } => {
                tracing::trace!(len, live, "large object unmapped");
            }
            Event::MapFailed { len } => {
                tracing::warn!(len, "mmap failed");
            }
        }
    }
}

/// Events kept between two drains. Later events are counted, not stored.
pub const CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLog {
    events: [Option<Event>; CAPACITY],
    len: usize,
    dropped: usize,
}

impl EventLog {
    pub const fn new() -> Self {
        Self {
            events: [None; CAPACITY],
            len: 0,
            dropped: 0,
        }
    }

    #[inline]
    pub fn record(&mut self, event: Event) {
        if self.len < CAPACITY {
            self.events[self.len] = Some(event);
            self.len += 1;
        } else {
            self.dropped += 1;
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0 && self.dropped == 0
    }

    /// Events that did not fit.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn iter(&self) -> impl Iterator<Item = &Event> {
        self.events[..self.len].iter().flatten()
    }

    /// Move the recorded events out, leaving this log empty.
    #[inline]
    pub fn take(&mut self) -> EventLog {
        core::mem::replace(self, Self::new())
    }

    /// Hand every recorded event to `tracing`.
    pub fn emit(&self) {
        for event in self.iter() {
            event.emit();
        }
        if self.dropped > 0 {
            tracing::debug!(dropped = self.dropped, "allocator events dropped");
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

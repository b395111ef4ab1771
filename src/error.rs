use thiserror::Error;

/// Failure of an allocation request.
///
/// Caller contract violations (double free, foreign pointers) are not
/// represented here: they are undefined behaviour and never detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AllocError {
    /// The OS refused to map backing memory.
    #[error("out of memory: could not map {len} bytes")]
    OutOfMemory { len: usize },
    /// `count * size` does not fit in `usize`.
    #[error("allocation size overflows")]
    SizeOverflow,
    /// Alignment above the page size is not supported.
    #[error("unsupported alignment {align}")]
    UnsupportedAlignment { align: usize },
}

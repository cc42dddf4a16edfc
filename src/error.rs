//! Errors reported by the fallible allocation paths.

use core::alloc::Layout;

use thiserror::Error;

/// The error type for `try_*` methods that may allocate a new bucket array.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryReserveError {
    /// The requested bucket count exceeds what can be addressed, or its
    /// memory size overflows `isize`.
    #[error("capacity overflow")]
    CapacityOverflow,

    /// The allocator refused to provide the bucket array.
    #[error("memory allocation of {size} bytes failed", size = .layout.size())]
    AllocError {
        /// Layout of the allocation that failed.
        layout: Layout,
    },
}

impl TryReserveError {
    /// Escalates the error the way infallible collection methods do.
    pub(crate) fn handle(self) -> ! {
        match self {
            TryReserveError::CapacityOverflow => panic!("capacity overflow"),
            TryReserveError::AllocError { layout } => alloc::alloc::handle_alloc_error(layout),
        }
    }
}

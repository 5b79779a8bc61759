use derive_more::{Display, IsVariant};

/// Classification of memory-management failures.
///
/// The kernel keeps the kind of the last failure as its error indicator, and
/// reports it to tasks as an errno value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IsVariant)]
pub enum ErrorKind {
    /// Bad algorithm, unknown pool or region, or a region that cannot hold a
    /// pool.
    #[display("invalid argument")]
    InvalidArgument,
    /// No free block is large enough for the request.
    #[display("out of memory")]
    OutOfMemory,
    /// A deallocated address lies outside of its pool.
    #[display("address out of range")]
    AddressOutOfRange,
    /// A task id beyond the number of reserved stacks.
    #[display("out of range")]
    OutOfRange,
}

impl ErrorKind {
    /// Returns the errno value reported for this kind.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument => 22,   // EINVAL
            Self::OutOfMemory => 12,       // ENOMEM
            Self::AddressOutOfRange => 14, // EFAULT
            Self::OutOfRange => 11,        // EAGAIN
        }
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno() {
        assert_eq!(ErrorKind::InvalidArgument.errno(), 22);
        assert_eq!(ErrorKind::OutOfMemory.errno(), 12);
        assert_eq!(ErrorKind::AddressOutOfRange.errno(), 14);
        assert_eq!(ErrorKind::OutOfRange.errno(), 11);
    }

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::OutOfMemory.to_string(), "out of memory");
        assert!(ErrorKind::OutOfRange.is_out_of_range());
    }
}

//! Buffer ownership state machine.
//!
//! # State Machine
//! ```text
//!     FREE ──alloc()──> DRIVER_OWNED ──submit()──> DEVICE_OWNED
//!       ▲                     │                         │
//!       └────free()───────────┴──────────reap()─────────┘
//! ```
//!
//! INVARIANT: Accessing DEVICE_OWNED buffer is instant UB.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferOwnership {
    #[default]
    Free,
    DriverOwned,
    DeviceOwned,
}

impl BufferOwnership {
    #[inline]
    pub fn is_free(self) -> bool {
        self == Self::Free
    }

    /// CPU may read or write the buffer.
    #[inline]
    pub fn can_access(self) -> bool {
        self == Self::DriverOwned
    }

    #[inline]
    pub fn is_device_owned(self) -> bool {
        self == Self::DeviceOwned
    }
}

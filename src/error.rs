//! Status taxonomy (§7), the packed callsite identifier (§4.F), and the
//! local `Result` error type for fallible constructors and registrations.
//!
//! Design Notes §9 prefers a bit-flag set over a tagged byte for status:
//! `StatusFlags` follows the `bitbybit` packed-bitfield idiom instead of
//! overlaying a struct on a raw byte.

use bitbybit::bitfield;

/// One bit per entry in the §7 error taxonomy. Multiple bits can be set
/// at once: each is a distinct bit in a status word so multiple can be
/// reported together.
#[bitfield(u32, default = 0x0000_0000)]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusFlags {
    #[bit(0, rw)]
    pub deactivated: bool,
    #[bit(1, rw)]
    pub invalid_input_parameters: bool,
    #[bit(2, rw)]
    pub driver_error: bool,
    #[bit(3, rw)]
    pub locked_bus: bool,
    #[bit(4, rw)]
    pub timed_out: bool,
    #[bit(5, rw)]
    pub nak: bool,
    #[bit(6, rw)]
    pub invalid_read: bool,
    #[bit(7, rw)]
    pub queue_full: bool,
    #[bit(8, rw)]
    pub slave_reset_failed: bool,
    #[bit(9, rw)]
    pub memory_leak: bool,
    #[bit(10, rw)]
    pub translate_error: bool,
    #[bit(11, rw)]
    pub update_error: bool,
    #[bit(12, rw)]
    pub invalid_scratch_offset: bool,
    #[bit(13, rw)]
    pub invalid_scratch_buffer: bool,
    #[bit(14, rw)]
    pub flash_row_checksum_error: bool,
    #[bit(15, rw)]
    pub flash_protection_error: bool,
    #[bit(16, rw)]
    pub packet_checksum_error: bool,
    #[bit(17, rw)]
    pub invalid_key: bool,
    #[bit(18, rw)]
    pub invalid_command: bool,
    #[bit(19, rw)]
    pub split_packet_error: bool,
}

impl StatusFlags {
    /// Derived view: true if any bit is set (Design Notes §9).
    pub fn is_error(&self) -> bool {
        self.raw_value() != 0
    }
}

/// Identifies which top-level call, sub-call, and low-level driver call
/// produced an I2C error (§4.F "error surfacing"). Diagnostic only
/// (§5 "Shared resources") — it is overwritten by every top-level
/// entrypoint.
#[bitfield(u16, default = 0x0000)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Callsite {
    #[bits(0..=7, rw)]
    pub top_call: u8,
    #[bits(8..=11, rw)]
    pub sub_call: u4,
    #[bit(12, rw)]
    pub recover_from_locked_bus: bool,
    #[bit(13, rw)]
    pub is_bus_ready: bool,
    #[bits(14..=15, rw)]
    pub low_level_call: u2,
}

use arbitrary_int::{u2, u4};

/// Top-level call identifiers stamped into a [`Callsite`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum TopCall {
    Process = 0,
    IrqRead = 1,
    XferDispatch = 2,
    LockedBusRecovery = 3,
}

/// Local error type for fallible, non-sticky operations (construction,
/// registration) that don't need a `StatusFlags` bit of their own.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BridgeError {
    #[error("queue is full")]
    QueueFull,
    #[error("element exceeds slot capacity")]
    ElementTooLarge,
    #[error("arena has insufficient remaining capacity")]
    ArenaExhausted,
    #[error("mode is not active")]
    Deactivated,
    #[error("malformed sub-chunk")]
    InvalidSubChunk,
}

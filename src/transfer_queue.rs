//! Component G: pending master-side I2C transfers (§3, §4.G).
//!
//! An element is a packed address/direction header byte followed by
//! either write data or a single read-length byte. That's exactly the
//! shape [`crate::queue::PacketQueue`] stores, so this module is a thin,
//! typed front onto one, the same way `codec.rs` layers a typed decoder
//! over [`crate::queue::ByteQueue`].

use crate::config::{TRANSFER_QUEUE_ELEMS, TRANSFER_SLOT_CAP};
use crate::queue::PacketQueue;
use bitbybit::bitfield;

/// Packed 7-bit address + 1-bit direction header (§3 "transfer element").
#[bitfield(u8)]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferHeader {
    #[bits(0..=6, rw)]
    pub addr: u7,
    #[bit(7, rw)]
    pub read: bool,
}

use arbitrary_int::u7;

/// A decoded transfer element ready for dispatch by the I2C FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer<'a> {
    Write { addr: u8, data: &'a [u8] },
    Read { addr: u8, len: u8 },
}

pub type TransferRing = PacketQueue<TRANSFER_SLOT_CAP, TRANSFER_QUEUE_ELEMS>;

/// Queues and decodes transfer elements. Owns no storage of its own —
/// wraps a [`TransferRing`] the caller holds, the way [`crate::codec`]'s
/// `TranslateRx` wraps an externally-owned `TranslateRxQueue`.
#[derive(Debug, Default)]
pub struct TransferQueue;

impl TransferQueue {
    pub const fn new() -> Self {
        Self
    }

    /// Queues a master write of `data` to `addr`. Fails if the ring is
    /// full or `data` doesn't fit alongside the header byte.
    pub fn enqueue_write(&self, ring: &mut TransferRing, addr: u8, data: &[u8]) -> bool {
        if ring.is_full() || !ring.enqueue_byte_incremental(TransferHeader::new(u7::new(addr & 0x7F), false).raw_value()) {
            return false;
        }
        for &b in data {
            if !ring.enqueue_byte_incremental(b) {
                ring.abort_incremental();
                return false;
            }
        }
        ring.finalize_incremental()
    }

    /// Queues a master read of `len` bytes from `addr`.
    pub fn enqueue_read(&self, ring: &mut TransferRing, addr: u8, len: u8) -> bool {
        if ring.is_full() {
            return false;
        }
        ring.enqueue_byte_incremental(TransferHeader::new(u7::new(addr & 0x7F), true).raw_value())
            && ring.enqueue_byte_incremental(len)
            && ring.finalize_incremental()
    }

    /// Borrows and decodes the head element, without releasing it — the
    /// I2C FSM calls [`TransferRing::pop_front`] itself once the
    /// transfer has actually completed on the bus (§4.F "at most one
    /// transfer in flight").
    pub fn peek<'a>(&self, ring: &'a TransferRing) -> Option<Transfer<'a>> {
        let (bytes, len) = ring.dequeue()?;
        if len == 0 {
            return None;
        }
        let header = TransferHeader::new_with_raw_value(bytes[0]);
        let addr = header.addr().value();
        if header.read() {
            Some(Transfer::Read {
                addr,
                len: *bytes.get(1)?,
            })
        } else {
            Some(Transfer::Write {
                addr,
                data: &bytes[1..len],
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn write_round_trips_through_header() {
        let q = TransferQueue::new();
        let mut ring: TransferRing = PacketQueue::new();
        assert!(q.enqueue_write(&mut ring, 0x48, &[1, 2, 3]));
        match q.peek(&ring).unwrap() {
            Transfer::Write { addr, data } => {
                assert_eq!(addr, 0x48);
                assert_eq!(data, &[1, 2, 3]);
            }
            Transfer::Read { .. } => panic!("expected write"),
        }
    }

    #[test]
    fn read_round_trips_through_header() {
        let q = TransferQueue::new();
        let mut ring: TransferRing = PacketQueue::new();
        assert!(q.enqueue_read(&mut ring, 0x10, 5));
        match q.peek(&ring).unwrap() {
            Transfer::Read { addr, len } => {
                assert_eq!(addr, 0x10);
                assert_eq!(len, 5);
            }
            Transfer::Write { .. } => panic!("expected read"),
        }
    }

    #[test]
    fn address_is_masked_to_seven_bits() {
        let q = TransferQueue::new();
        let mut ring: TransferRing = PacketQueue::new();
        assert!(q.enqueue_write(&mut ring, 0xFF, &[9]));
        match q.peek(&ring).unwrap() {
            Transfer::Write { addr, .. } => assert_eq!(addr, 0x7F),
            Transfer::Read { .. } => unreachable!(),
        }
    }

    #[test]
    fn full_ring_rejects_enqueue() {
        let q = TransferQueue::new();
        let mut ring: TransferRing = PacketQueue::new();
        for _ in 0..crate::config::TRANSFER_QUEUE_ELEMS {
            assert!(q.enqueue_read(&mut ring, 1, 1));
        }
        assert!(!q.enqueue_read(&mut ring, 1, 1));
    }
}

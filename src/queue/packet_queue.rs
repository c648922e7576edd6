//! Component B: fixed-capacity ring of variable-length elements (§3,
//! §4.B).
//!
//! Each element gets its own fixed-capacity slot (`SLOT_CAP` bytes) in a
//! ring of `N_ELEMS` slots, so "offset" is simply `slot_index *
//! SLOT_CAP` and "sum of element lengths ≤ maxDataSize" holds trivially
//! (`maxDataSize = N_ELEMS * SLOT_CAP`). This is the fixed-max-size
//! shape the wire format needs anyway (a host frame or an update
//! sub-chunk both have a bounded maximum size), and it sidesteps the
//! aliasing hazard of packing variable-length elements into one shared
//! byte array while one is still being incrementally filled by an ISR
//! and another is being drained by the main loop.

/// Encode callback invoked once per non-incremental `enqueue` when
/// registered (§4.B). Receives the destination slot and the bytes to
/// encode, returns the written length, or `None` on overflow.
pub type EncodeFn = fn(dst: &mut [u8], src: &[u8]) -> Option<usize>;

pub struct PacketQueue<const SLOT_CAP: usize, const N_ELEMS: usize> {
    slots: [[u8; SLOT_CAP]; N_ELEMS],
    lens: [usize; N_ELEMS],
    head: usize,
    tail: usize,
    count: usize,
    encode: Option<EncodeFn>,
    /// Byte count written so far into `slots[tail]` by
    /// `enqueue_byte_incremental`, before `finalize_incremental` commits
    /// it as a queued element.
    incremental_len: usize,
    incremental_active: bool,
}

impl<const SLOT_CAP: usize, const N_ELEMS: usize> Default for PacketQueue<SLOT_CAP, N_ELEMS> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOT_CAP: usize, const N_ELEMS: usize> PacketQueue<SLOT_CAP, N_ELEMS> {
    pub const fn new() -> Self {
        Self {
            slots: [[0; SLOT_CAP]; N_ELEMS],
            lens: [0; N_ELEMS],
            head: 0,
            tail: 0,
            count: 0,
            encode: None,
            incremental_len: 0,
            incremental_active: false,
        }
    }

    pub fn register_encode(&mut self, cb: EncodeFn) {
        self.encode = Some(cb);
    }

    pub fn is_full(&self) -> bool {
        self.count == N_ELEMS
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    /// Non-incremental enqueue. If an encode callback is registered it
    /// is invoked exactly once, transforming `src` into the slot's wire
    /// form; otherwise `src` is copied verbatim. Fails (queue unchanged)
    /// if the element ring is full or the encoded/raw size would
    /// overflow the slot.
    pub fn enqueue(&mut self, src: &[u8]) -> bool {
        if self.is_full() || self.incremental_active {
            return false;
        }
        let slot = &mut self.slots[self.tail];
        let written = match self.encode {
            Some(cb) => match cb(slot, src) {
                Some(n) => n,
                None => return false,
            },
            None => {
                if src.len() > SLOT_CAP {
                    return false;
                }
                slot[..src.len()].copy_from_slice(src);
                src.len()
            }
        };
        self.lens[self.tail] = written;
        self.tail = (self.tail + 1) % N_ELEMS;
        self.count += 1;
        true
    }

    /// Appends one byte to the element currently being incrementally
    /// filled, starting a new incremental element on the first call
    /// after a `finalize_incremental`/fresh queue. Returns `false`
    /// (byte dropped, state otherwise unchanged) on slot overflow or a
    /// full ring.
    pub fn enqueue_byte_incremental(&mut self, byte: u8) -> bool {
        if !self.incremental_active {
            if self.is_full() {
                return false;
            }
            self.incremental_active = true;
            self.incremental_len = 0;
        }
        if self.incremental_len >= SLOT_CAP {
            return false;
        }
        self.slots[self.tail][self.incremental_len] = byte;
        self.incremental_len += 1;
        true
    }

    /// Commits the in-progress incremental element as a queued element.
    /// Returns `false` if no incremental fill was in progress.
    pub fn finalize_incremental(&mut self) -> bool {
        if !self.incremental_active {
            return false;
        }
        self.lens[self.tail] = self.incremental_len;
        self.tail = (self.tail + 1) % N_ELEMS;
        self.count += 1;
        self.incremental_active = false;
        self.incremental_len = 0;
        true
    }

    /// Discards the in-progress incremental element without queuing it
    /// (used when a frame is reset mid-receive, §4.E).
    pub fn abort_incremental(&mut self) {
        self.incremental_active = false;
        self.incremental_len = 0;
    }

    /// Borrowed view of the head element, without removing it — a
    /// finalized element is immutable until the caller has fully drained
    /// it and calls [`Self::pop_front`] (§3 "a finalized element is
    /// immutable until dequeued").
    pub fn dequeue(&self) -> Option<(&[u8], usize)> {
        if self.is_empty() {
            return None;
        }
        let len = self.lens[self.head];
        Some((&self.slots[self.head][..len], len))
    }

    /// Releases the head element back to the ring once the caller has
    /// finished draining it.
    pub fn pop_front(&mut self) {
        if self.count == 0 {
            return;
        }
        self.head = (self.head + 1) % N_ELEMS;
        self.count -= 1;
    }
}

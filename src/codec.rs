//! Component E: frame codec and RX state machine (§4.E), both the
//! translate and update wire dialects.
//!
//! The decode side is driven one byte at a time (`on_byte`), matching
//! how it is fed from an RX interrupt (§2, §5): it never blocks and
//! never holds a borrow across calls. The encode side (`encode_translate`)
//! is a pure function the translate/update controllers call right
//! before pushing a frame into their outbound packet queue (component
//! B) — the pending command marker is passed in as an explicit
//! `Option<u8>` argument here rather than threaded through
//! `PacketQueue`'s generic `register_encode` hook, since it is naturally
//! a per-call argument, not shared mutable state two callbacks need to
//! rendezvous on (Design Notes §9's cyclic-ownership caution).

use crate::config::TRANSLATE_MAX_PAYLOAD;
use crate::queue::PacketQueue;

/// `0xAA`: both start-of-frame and end-of-frame (§4.E).
pub const SOF_EOF: u8 = 0xAA;
/// `0x55`: escapes a following `0xAA`/`0x55` payload byte, and — only in
/// the position immediately after SOF — doubled to introduce a command
/// marker.
pub const ESCAPE: u8 = 0x55;

/// True for the two bytes that must never appear literally in a payload
/// (§4.E "Payload bytes that equal 0xAA or 0x55 are preceded by one
/// escape byte").
pub const fn needs_escape(byte: u8) -> bool {
    byte == SOF_EOF || byte == ESCAPE
}

/// Observer for bytes the RX state machine doesn't turn into packet
/// data: stray bytes seen outside a frame, and payload bytes dropped
/// because the current element's slot is full (§4.E "Overflow policy").
/// Borrowed for the duration of a single `on_byte` call — see the module
/// doc for why this isn't a stored callback.
pub trait FrameEvents {
    fn on_out_of_frame_byte(&mut self, byte: u8);
    fn on_overflow_byte(&mut self, byte: u8);
}

/// A `FrameEvents` that does nothing; useful in tests and for the
/// common case where stray/overflow bytes are only worth a ring-buffer
/// log entry the caller doesn't need this trait to provide.
pub struct NullFrameEvents;
impl FrameEvents for NullFrameEvents {
    fn on_out_of_frame_byte(&mut self, _byte: u8) {}
    fn on_overflow_byte(&mut self, _byte: u8) {}
}

/// Result of feeding one byte to a decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DecodeEvent {
    /// Byte consumed, no packet-level event.
    None,
    /// A complete packet was pushed into the RX queue.
    PacketFinalized,
    /// A packet finalized but the element ring was full; it was
    /// dropped (maps to the `queueFull` status bit, §7).
    QueueFull,
    /// The inter-byte timeout (§4.E) fired; the frame in progress was
    /// abandoned and the state machine reset to `OutOfFrame`.
    TimedOut,
}

pub type TranslateRxQueue = PacketQueue<TRANSLATE_MAX_PAYLOAD, { crate::config::TRANSLATE_RX_QUEUE_ELEMS }>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    OutOfFrame,
    FrameStart,
    FrameStartEscape,
    AwaitingCommand,
    InFrame,
    Escape,
}

/// Translate-dialect decoder (§4.E "Decoding states (translate
/// dialect)"). A decoded element is stored in the RX queue as `[cmd,
/// payload...]`, where `cmd` is `0x00` if the frame carried no command
/// marker — no listed command byte is `0x00`, so that sentinel is
/// inert at the translate-mode dispatch stage (§4.H "unknown commands
/// are ignored").
pub struct TranslateRx {
    state: RxState,
    last_byte_ms: u32,
    timeout_ms: u32,
}

impl TranslateRx {
    pub const fn new(timeout_ms: u32) -> Self {
        Self {
            state: RxState::OutOfFrame,
            last_byte_ms: 0,
            timeout_ms,
        }
    }

    pub fn reset(&mut self) {
        self.state = RxState::OutOfFrame;
    }

    fn append(
        &mut self,
        byte: u8,
        rx: &mut TranslateRxQueue,
        events: &mut impl FrameEvents,
    ) {
        if !rx.enqueue_byte_incremental(byte) {
            events.on_overflow_byte(byte);
        }
    }

    fn finalize(&mut self, rx: &mut TranslateRxQueue) -> DecodeEvent {
        if rx.finalize_incremental() {
            DecodeEvent::PacketFinalized
        } else {
            rx.abort_incremental();
            DecodeEvent::QueueFull
        }
    }

    /// Feeds one received byte to the decoder.
    pub fn on_byte(
        &mut self,
        byte: u8,
        now_ms: u32,
        rx: &mut TranslateRxQueue,
        events: &mut impl FrameEvents,
    ) -> DecodeEvent {
        let mut timed_out = false;
        if self.state != RxState::OutOfFrame
            && now_ms.wrapping_sub(self.last_byte_ms) > self.timeout_ms
        {
            rx.abort_incremental();
            self.state = RxState::OutOfFrame;
            timed_out = true;
        }
        self.last_byte_ms = now_ms;

        match self.state {
            RxState::OutOfFrame => {
                if byte == SOF_EOF {
                    rx.abort_incremental();
                    self.state = RxState::FrameStart;
                } else {
                    events.on_out_of_frame_byte(byte);
                }
            }
            RxState::FrameStart => match byte {
                SOF_EOF => return self.finalize(rx),
                ESCAPE => self.state = RxState::FrameStartEscape,
                b => {
                    self.append(0x00, rx, events);
                    self.append(b, rx, events);
                    self.state = RxState::InFrame;
                }
            },
            RxState::FrameStartEscape => match byte {
                ESCAPE => self.state = RxState::AwaitingCommand,
                b => {
                    self.append(0x00, rx, events);
                    self.append(b, rx, events);
                    self.state = RxState::InFrame;
                }
            },
            RxState::AwaitingCommand => {
                self.append(byte, rx, events);
                self.state = RxState::InFrame;
            }
            RxState::InFrame => match byte {
                SOF_EOF => return self.finalize(rx),
                ESCAPE => self.state = RxState::Escape,
                b => self.append(b, rx, events),
            },
            RxState::Escape => {
                self.append(byte, rx, events);
                self.state = RxState::InFrame;
            }
        }

        if timed_out {
            DecodeEvent::TimedOut
        } else {
            DecodeEvent::None
        }
    }
}

/// Encodes `payload` into `dst`, producing `0xAA, [0x55 0x55 cmd,]
/// payload* (escaped), 0xAA` (§4.E "Encoding"). Returns the written
/// length, or `None` on overflow (the caller must treat the slot as
/// empty).
pub fn encode_translate(dst: &mut [u8], cmd: Option<u8>, payload: &[u8]) -> Option<usize> {
    let mut n = 0;
    let mut put = |dst: &mut [u8], n: &mut usize, b: u8| -> bool {
        if *n >= dst.len() {
            return false;
        }
        dst[*n] = b;
        *n += 1;
        true
    };
    if !put(dst, &mut n, SOF_EOF) {
        return None;
    }
    if let Some(cmd) = cmd {
        if !put(dst, &mut n, ESCAPE) || !put(dst, &mut n, ESCAPE) || !put(dst, &mut n, cmd) {
            return None;
        }
    }
    for &b in payload {
        if needs_escape(b) && !put(dst, &mut n, ESCAPE) {
            return None;
        }
        if !put(dst, &mut n, b) {
            return None;
        }
    }
    if !put(dst, &mut n, SOF_EOF) {
        return None;
    }
    Some(n)
}

pub type UpdateRxQueue =
    PacketQueue<{ crate::config::UPDATE_MAX_SUBCHUNK }, { crate::config::UPDATE_RX_QUEUE_ELEMS }>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateRxState {
    OutOfFrame,
    SizeHi,
    SizeLo,
    Payload,
}

/// Update-dialect decoder (§4.E "Decoding states (update dialect)").
/// Unlike the translate dialect there is no byte stuffing; the per-chunk
/// size header is consumed, then raw bytes are counted against three
/// concurrent running totals (sub-chunk/chunk/file), driven from the
/// `UpdateCounters` the caller (the update-mode controller, component I)
/// owns.
pub struct UpdateRx {
    state: UpdateRxState,
    size_hi: u8,
}

/// Per-chunk/per-file byte counters (§3 "Update descriptor"), owned by
/// the update-mode controller and passed in by `&mut` so the decoder
/// doesn't need to know the whole `UpdateFile` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateCounters {
    pub subchunk_bytes: usize,
    pub subchunk_size: usize,
    pub chunk_bytes_seen: usize,
    pub chunk_total_size: usize,
    pub file_bytes_seen: usize,
    pub file_total_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateDecodeEvent {
    None,
    SubchunkFinalized,
    QueueFull,
    ChunkComplete,
    FileComplete,
}

impl UpdateRx {
    pub const fn new() -> Self {
        Self {
            state: UpdateRxState::OutOfFrame,
            size_hi: 0,
        }
    }

    pub fn reset(&mut self) {
        self.state = UpdateRxState::OutOfFrame;
    }

    pub fn on_byte(
        &mut self,
        byte: u8,
        rx: &mut UpdateRxQueue,
        counters: &mut UpdateCounters,
    ) -> UpdateDecodeEvent {
        match self.state {
            UpdateRxState::OutOfFrame => {
                if byte == SOF_EOF {
                    rx.abort_incremental();
                    counters.chunk_bytes_seen = 0;
                    self.state = UpdateRxState::SizeHi;
                }
                UpdateDecodeEvent::None
            }
            UpdateRxState::SizeHi => {
                self.size_hi = byte;
                self.state = UpdateRxState::SizeLo;
                UpdateDecodeEvent::None
            }
            UpdateRxState::SizeLo => {
                counters.chunk_total_size = u16::from_be_bytes([self.size_hi, byte]) as usize;
                counters.subchunk_bytes = 0;
                self.state = UpdateRxState::Payload;
                UpdateDecodeEvent::None
            }
            UpdateRxState::Payload => self.on_payload_byte(byte, rx, counters),
        }
    }

    fn on_payload_byte(
        &mut self,
        byte: u8,
        rx: &mut UpdateRxQueue,
        counters: &mut UpdateCounters,
    ) -> UpdateDecodeEvent {
        let _ = rx.enqueue_byte_incremental(byte);
        counters.subchunk_bytes += 1;
        counters.chunk_bytes_seen += 1;
        counters.file_bytes_seen += 1;

        let subchunk_done = counters.subchunk_bytes >= counters.subchunk_size;
        let chunk_done = counters.chunk_bytes_seen >= counters.chunk_total_size;
        let file_done = counters.file_bytes_seen >= counters.file_total_size;

        if subchunk_done || chunk_done || file_done {
            counters.subchunk_bytes = 0;
            let finalized = rx.finalize_incremental();
            if !finalized {
                rx.abort_incremental();
            }
            self.state = if chunk_done {
                UpdateRxState::OutOfFrame
            } else {
                UpdateRxState::Payload
            };
            if !finalized {
                return UpdateDecodeEvent::QueueFull;
            }
            if file_done {
                return UpdateDecodeEvent::FileComplete;
            }
            if chunk_done {
                return UpdateDecodeEvent::ChunkComplete;
            }
            return UpdateDecodeEvent::SubchunkFinalized;
        }
        UpdateDecodeEvent::None
    }
}

impl Default for UpdateRx {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ack_command_round_trip() {
        let mut rx: TranslateRxQueue = PacketQueue::new();
        let mut dec = TranslateRx::new(2000);
        let mut events = NullFrameEvents;
        let frame = [0xAA, 0x55, 0x55, b'A', 0xAA];
        let mut last = DecodeEvent::None;
        for &b in &frame {
            last = dec.on_byte(b, 0, &mut rx, &mut events);
        }
        assert_eq!(last, DecodeEvent::PacketFinalized);
        let (view, n) = rx.dequeue().unwrap();
        assert_eq!(n, 1);
        assert_eq!(view[0], b'A');
    }

    #[test]
    fn slave_write_escapes_payload() {
        // Command 'W' to address 0x48 with data [0xAA, 0x55]: each
        // special byte is preceded by one escape (§4.E "Encoding").
        let mut rx: TranslateRxQueue = PacketQueue::new();
        let mut dec = TranslateRx::new(2000);
        let mut events = NullFrameEvents;
        let frame = [
            0xAA, 0x55, 0x55, b'W', 0x48, 0x55, 0xAA, 0x55, 0x55, 0xAA,
        ];
        for &b in &frame {
            dec.on_byte(b, 0, &mut rx, &mut events);
        }
        let (view, n) = rx.dequeue().unwrap();
        assert_eq!(n, 4);
        assert_eq!(view, &[b'W', 0x48, 0xAA, 0x55]);
    }

    #[test]
    fn stray_second_escape_mid_payload_is_literal_not_a_marker() {
        // §9(c): 0x55 0x55 appearing mid-payload (not right after SOF)
        // must decode as one literal 0x55 data byte, not a command
        // marker.
        let mut rx: TranslateRxQueue = PacketQueue::new();
        let mut dec = TranslateRx::new(2000);
        let mut events = NullFrameEvents;
        let frame = [0xAA, 0x55, 0x55, b'W', 0x48, 0x55, 0x55, 0xAA];
        for &b in &frame {
            dec.on_byte(b, 0, &mut rx, &mut events);
        }
        let (view, n) = rx.dequeue().unwrap();
        assert_eq!(n, 3);
        assert_eq!(view, &[b'W', 0x48, 0x55]);
    }

    #[test]
    fn frame_without_marker_uses_sentinel_command() {
        let mut rx: TranslateRxQueue = PacketQueue::new();
        let mut dec = TranslateRx::new(2000);
        let mut events = NullFrameEvents;
        let frame = [0xAA, 0x01, 0x02, 0xAA];
        for &b in &frame {
            dec.on_byte(b, 0, &mut rx, &mut events);
        }
        let (view, _) = rx.dequeue().unwrap();
        assert_eq!(view, &[0x00, 0x01, 0x02]);
    }

    #[test]
    fn inter_byte_timeout_resets_state_machine() {
        let mut rx: TranslateRxQueue = PacketQueue::new();
        let mut dec = TranslateRx::new(100);
        let mut events = NullFrameEvents;
        dec.on_byte(0xAA, 0, &mut rx, &mut events);
        dec.on_byte(b'W', 10, &mut rx, &mut events);
        let ev = dec.on_byte(0x48, 5000, &mut rx, &mut events);
        assert_eq!(ev, DecodeEvent::TimedOut);
        // The byte that caused the reset is then treated as out-of-frame.
        assert!(rx.is_empty());
    }

    #[test]
    fn encode_escapes_interior_sentinels_and_brackets_with_sof() {
        let mut buf = [0u8; 16];
        let n = encode_translate(&mut buf, Some(b'A'), &[]).unwrap();
        assert_eq!(&buf[..n], &[0xAA, 0x55, 0x55, b'A', 0xAA]);

        let n2 = encode_translate(&mut buf, None, &[0xAA, 0x55, 0x01]).unwrap();
        assert_eq!(&buf[..n2], &[0xAA, 0x55, 0xAA, 0x55, 0x55, 0x01, 0xAA]);
    }

    #[test]
    fn encode_overflow_returns_none() {
        let mut buf = [0u8; 3];
        assert!(encode_translate(&mut buf, Some(b'A'), &[1, 2, 3]).is_none());
    }

    #[test]
    fn update_dialect_splits_on_subchunk_boundary() {
        let mut rx: UpdateRxQueue = PacketQueue::new();
        let mut dec = UpdateRx::new();
        let mut counters = UpdateCounters {
            subchunk_bytes: 0,
            subchunk_size: 2,
            chunk_bytes_seen: 0,
            chunk_total_size: 0,
            file_bytes_seen: 0,
            file_total_size: 1000,
        };
        let mut bytes = vec_header(4);
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        let mut events = std::vec::Vec::new();
        for &b in &bytes {
            events.push(dec.on_byte(b, &mut rx, &mut counters));
        }
        assert_eq!(
            events[events.len() - 3..],
            [
                UpdateDecodeEvent::SubchunkFinalized,
                UpdateDecodeEvent::None,
                UpdateDecodeEvent::ChunkComplete,
            ]
        );
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn update_dialect_signals_file_complete() {
        let mut rx: UpdateRxQueue = PacketQueue::new();
        let mut dec = UpdateRx::new();
        let mut counters = UpdateCounters {
            subchunk_bytes: 0,
            subchunk_size: 100,
            chunk_bytes_seen: 0,
            chunk_total_size: 0,
            file_bytes_seen: 0,
            file_total_size: 2,
        };
        let bytes = vec_header(2)
            .into_iter()
            .chain([7, 8])
            .collect::<std::vec::Vec<u8>>();
        let mut last = UpdateDecodeEvent::None;
        for &b in &bytes {
            last = dec.on_byte(b, &mut rx, &mut counters);
        }
        assert_eq!(last, UpdateDecodeEvent::FileComplete);
    }

    fn vec_header(chunk_size: u16) -> std::vec::Vec<u8> {
        let mut v = std::vec![SOF_EOF];
        v.extend_from_slice(&chunk_size.to_be_bytes());
        v
    }
}

//! Component I: the update-mode controller (§4.I).
//!
//! Seeded by the host's `'B'` SlaveUpdate command (parsed by `translate.rs`
//! into [`crate::translate::UpdateParams`]); from then on, `codec.rs`'s
//! update-dialect decoder slices the incoming byte stream into sub-chunks
//! against this controller's [`crate::codec::UpdateCounters`], and each
//! finalized sub-chunk is validated and forwarded here.

use crate::codec::{UpdateCounters, UpdateDecodeEvent, UpdateRxQueue};
use crate::config::{
    BOOTLOADER_DRAIN_LEN, BOOTLOADER_I2C_ADDR, MIN_UPDATE_SUBCHUNK_SIZE, SUBCHUNK_HEADER_LEN,
    UPDATE_SUBCHUNK_SIZE_BUMP,
};
use crate::transfer_queue::{TransferQueue, TransferRing};
use crate::translate::UpdateParams;
use bitbybit::bitfield;

/// `'B'` payload flags: purpose unknown, treated as no-ops and logged.
#[bitfield(u8, default = 0x00)]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateFlags {
    #[bit(0, r)]
    pub initiate: bool,
    #[bit(1, r)]
    pub test: bool,
    #[bit(2, r)]
    pub text_stream: bool,
}

/// Result of handing a decode event to [`UpdateController::on_decode_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateOutcome {
    /// No sub-chunk boundary reached yet.
    Idle,
    /// A validated sub-chunk was forwarded to the bootloader.
    SubchunkForwarded,
    /// As above, and this was the last sub-chunk of its chunk.
    ChunkComplete,
    /// As above, and the whole file has now been received.
    FileComplete,
    /// The sub-chunk failed §4.I layout validation (`updateError`).
    InvalidSubChunk,
    /// The transfer queue (G) was full; the sub-chunk was dropped.
    QueueFull,
    /// The element ring (B) was full before a sub-chunk could finalize.
    ElementQueueFull,
}

/// Component I proper. §3's "`chunk == null`" data-model state maps to
/// `active == false` here.
#[derive(Debug)]
pub struct UpdateController {
    active: bool,
    counters: UpdateCounters,
    flags: UpdateFlags,
    total_chunks: usize,
    chunks_seen: usize,
    delay_ms: u8,
}

impl UpdateController {
    pub fn new() -> Self {
        Self {
            active: false,
            counters: UpdateCounters {
                subchunk_bytes: 0,
                subchunk_size: 0,
                chunk_bytes_seen: 0,
                chunk_total_size: 0,
                file_bytes_seen: 0,
                file_total_size: 0,
            },
            flags: UpdateFlags::new_with_raw_value(0),
            total_chunks: 0,
            chunks_seen: 0,
            delay_ms: 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn counters(&self) -> &UpdateCounters {
        &self.counters
    }

    pub fn delay_ms(&self) -> u8 {
        self.delay_ms
    }

    /// Seeds update-mode state from the host's `'B'` command (§4.I).
    /// Bumps `subchunkSize` by [`UPDATE_SUBCHUNK_SIZE_BUMP`] if the host
    /// asked for less than [`MIN_UPDATE_SUBCHUNK_SIZE`].
    pub fn begin(&mut self, params: UpdateParams) {
        let mut subchunk_size = params.subchunk_size as usize;
        if subchunk_size < MIN_UPDATE_SUBCHUNK_SIZE {
            subchunk_size += UPDATE_SUBCHUNK_SIZE_BUMP;
        }
        self.flags = UpdateFlags::new_with_raw_value(params.flags);
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "update flags (purpose unknown, logged only): initiate={=bool} test={=bool} text_stream={=bool}",
            self.flags.initiate(),
            self.flags.test(),
            self.flags.text_stream()
        );
        self.counters = UpdateCounters {
            subchunk_bytes: 0,
            subchunk_size,
            chunk_bytes_seen: 0,
            chunk_total_size: 0,
            file_bytes_seen: 0,
            file_total_size: params.file_size as usize,
        };
        self.total_chunks = params.chunks as usize;
        self.chunks_seen = 0;
        self.delay_ms = params.delay_ms;
        self.active = true;
    }

    pub fn counters_mut(&mut self) -> &mut UpdateCounters {
        &mut self.counters
    }

    /// Handles one [`UpdateDecodeEvent`] from `codec::UpdateRx::on_byte`.
    pub fn on_decode_event(
        &mut self,
        event: UpdateDecodeEvent,
        rx: &mut UpdateRxQueue,
        transfers: &mut TransferRing,
    ) -> UpdateOutcome {
        match event {
            UpdateDecodeEvent::None => UpdateOutcome::Idle,
            UpdateDecodeEvent::QueueFull => UpdateOutcome::ElementQueueFull,
            UpdateDecodeEvent::SubchunkFinalized => self.forward_head(rx, transfers),
            UpdateDecodeEvent::ChunkComplete => {
                self.chunks_seen += 1;
                self.forward_head(rx, transfers);
                UpdateOutcome::ChunkComplete
            }
            UpdateDecodeEvent::FileComplete => {
                self.chunks_seen += 1;
                self.forward_head(rx, transfers);
                self.active = false;
                UpdateOutcome::FileComplete
            }
        }
    }

    fn forward_head(&self, rx: &mut UpdateRxQueue, transfers: &mut TransferRing) -> UpdateOutcome {
        let Some((view, len)) = rx.dequeue() else {
            return UpdateOutcome::Idle;
        };
        let outcome = validate_subchunk(&view[..len])
            .map(|()| {
                let queue = TransferQueue::new();
                let forwarded = queue.enqueue_write(transfers, BOOTLOADER_I2C_ADDR, &view[..len])
                    && queue.enqueue_read(transfers, BOOTLOADER_I2C_ADDR, BOOTLOADER_DRAIN_LEN);
                if forwarded {
                    UpdateOutcome::SubchunkForwarded
                } else {
                    UpdateOutcome::QueueFull
                }
            })
            .unwrap_or(UpdateOutcome::InvalidSubChunk);
        rx.pop_front();
        outcome
    }
}

impl Default for UpdateController {
    fn default() -> Self {
        Self::new()
    }
}

/// §4.I "Sub-chunk layout": `[code=0xFF, command ∈ 0x30..0x3F,
/// key(8)={0..7}, payload...]`.
fn validate_subchunk(bytes: &[u8]) -> Result<(), ()> {
    if bytes.len() < SUBCHUNK_HEADER_LEN {
        return Err(());
    }
    if bytes[0] != 0xFF {
        return Err(());
    }
    if !(0x30..=0x3F).contains(&bytes[1]) {
        return Err(());
    }
    let key = &bytes[2..10];
    if key.iter().enumerate().any(|(i, &b)| b as usize != i) {
        return Err(());
    }
    Ok(())
}

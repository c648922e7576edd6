//! Component H: the translate-mode controller (§4.H, §6).
//!
//! Dispatches a decoded host packet by its one-byte command field. Each
//! recognized command either enqueues an I²C transfer (§4.G) or an
//! immediate response frame, or both. Commands this controller cannot
//! settle by itself (switching the FSM's slave address, entering update
//! mode, resetting) are surfaced to the caller as a [`DispatchOutcome`]
//! rather than reached into directly, the same way `codec.rs` hands a
//! decoded frame back instead of owning the queues it decodes into.

use crate::config::{TRANSLATE_TX_QUEUE_ELEMS, TRANSLATE_TX_SLOT_CAP};
use crate::error::{Callsite, StatusFlags};
use crate::hal::DriverStatus;
use crate::queue::PacketQueue;
use crate::transfer_queue::{TransferQueue, TransferRing};

pub type TranslateTxQueue = PacketQueue<TRANSLATE_TX_SLOT_CAP, TRANSLATE_TX_QUEUE_ELEMS>;

/// §7 "Surfaced to host": legacy one-byte error commands, or a single
/// packed binary record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorMode {
    #[default]
    Legacy,
    Global,
}

/// Parsed payload of the `'B'` SlaveUpdate command (§6). `subchunk_size`
/// is passed through unadjusted — the §4.I minimum-size bump is that
/// component's job, not this one's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpdateParams {
    pub flags: u8,
    pub file_size: u16,
    pub subchunk_size: u8,
    pub chunks: u8,
    pub delay_ms: u8,
}

/// What the caller (`bridge.rs`/the orchestrator) must do after a
/// dispatched command, beyond what `Translate` already did to `tx`/
/// `transfers` itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Fully handled; nothing further required.
    Handled,
    /// Ignored: either genuinely unrecognized, or a command this
    /// controller only ever emits (`'N'`, `'T'`, `'a'`) arriving
    /// in the wrong direction.
    Ignored,
    /// `'I'` SlaveAddress: the caller must repoint the I2C FSM.
    SetSlaveAddress(u8),
    /// `'B'` SlaveUpdate: the caller must activate update mode.
    EnterUpdate(UpdateParams),
    /// `'r'` Reset: the caller must perform the externalized reset.
    Reset,
}

/// Command bytes (§6). Kept as named constants rather than an enum
/// since the wire value *is* the dispatch key. A couple (`SLAVE_ACK`)
/// only ever appear as replies this controller never dispatches on, but
/// are named here anyway to keep the full command table in one place.
#[allow(dead_code)]
mod cmd {
    pub const ACK: u8 = b'A';
    pub const ERROR: u8 = b'E';
    pub const SLAVE_ADDRESS: u8 = b'I';
    pub const SLAVE_NAK: u8 = b'N';
    pub const SLAVE_READ: u8 = b'R';
    pub const SLAVE_TIMEOUT: u8 = b'T';
    pub const LEGACY_VERSION: u8 = b'V';
    pub const SLAVE_WRITE: u8 = b'W';
    pub const SLAVE_ACK: u8 = b'a';
    pub const SLAVE_UPDATE: u8 = b'B';
    pub const RESET: u8 = b'r';
    pub const VERSION: u8 = b'v';
}

/// Component H proper: the error-mode setting and version identity it
/// needs to answer queries with. Everything else is borrowed per call.
#[derive(Debug)]
pub struct Translate {
    error_mode: ErrorMode,
    version_major: u8,
    version_minor: u8,
}

impl Translate {
    pub const fn new(version_major: u8, version_minor: u8) -> Self {
        Self {
            error_mode: ErrorMode::Legacy,
            version_major,
            version_minor,
        }
    }

    pub fn error_mode(&self) -> ErrorMode {
        self.error_mode
    }

    /// Dispatches one decoded host frame (`[cmd_or_0, payload...]`, the
    /// convention `codec::TranslateRx` queues elements under).
    pub fn dispatch(
        &mut self,
        frame: &[u8],
        transfers: &mut TransferRing,
        tx: &mut TranslateTxQueue,
    ) -> DispatchOutcome {
        let Some((&command, payload)) = frame.split_first() else {
            return DispatchOutcome::Ignored;
        };
        match command {
            cmd::ACK => {
                self.reply(tx, cmd::ACK, &[]);
                DispatchOutcome::Handled
            }
            cmd::ERROR => {
                if let Some(&mode_byte) = payload.first() {
                    self.error_mode = if mode_byte == 0 {
                        ErrorMode::Legacy
                    } else {
                        ErrorMode::Global
                    };
                }
                self.reply(tx, cmd::ACK, &[]);
                DispatchOutcome::Handled
            }
            cmd::SLAVE_ADDRESS => {
                let Some(&addr) = payload.first() else {
                    return DispatchOutcome::Ignored;
                };
                self.reply(tx, cmd::ACK, &[]);
                DispatchOutcome::SetSlaveAddress(addr)
            }
            cmd::SLAVE_READ => {
                let Some(&addr) = payload.first() else {
                    return DispatchOutcome::Ignored;
                };
                let size = payload.get(1).copied().unwrap_or(1);
                let queue = TransferQueue::new();
                if queue.enqueue_read(transfers, addr, size) {
                    self.reply(tx, cmd::ACK, &[]);
                } else {
                    self.emit_queue_full(tx);
                }
                DispatchOutcome::Handled
            }
            cmd::SLAVE_WRITE => {
                let Some(&addr) = payload.first() else {
                    return DispatchOutcome::Ignored;
                };
                let data = &payload[1..];
                let queue = TransferQueue::new();
                if queue.enqueue_write(transfers, addr, data) {
                    self.reply(tx, cmd::ACK, &[]);
                } else {
                    self.emit_queue_full(tx);
                }
                DispatchOutcome::Handled
            }
            cmd::LEGACY_VERSION => {
                let baud = 1_000_000u32.to_be_bytes();
                let mut body = [0u8; 6];
                body[0] = self.version_major;
                body[1] = self.version_minor;
                body[2..].copy_from_slice(&baud);
                self.reply(tx, cmd::LEGACY_VERSION, &body);
                DispatchOutcome::Handled
            }
            cmd::VERSION => {
                let body = [
                    self.version_major / 10,
                    self.version_major % 10,
                    self.version_minor / 10,
                    self.version_minor % 10,
                ];
                self.reply(tx, cmd::VERSION, &body);
                DispatchOutcome::Handled
            }
            cmd::SLAVE_UPDATE => {
                if payload.len() < 6 {
                    return DispatchOutcome::Ignored;
                }
                let params = UpdateParams {
                    flags: payload[0],
                    file_size: u16::from_be_bytes([payload[1], payload[2]]),
                    subchunk_size: payload[3],
                    chunks: payload[4],
                    delay_ms: payload[5],
                };
                self.reply(tx, cmd::ACK, &[]);
                DispatchOutcome::EnterUpdate(params)
            }
            cmd::RESET => {
                self.reply(tx, cmd::ACK, &[]);
                DispatchOutcome::Reset
            }
            // `'N'`/`'T'`/`'a'` are bridge-to-host-only responses;
            // receiving them from the host isn't meaningful. Any other
            // byte is a genuinely unrecognized command. Both are
            // ignored (§4.H "unknown commands are ignored").
            _ => DispatchOutcome::Ignored,
        }
    }

    /// Forwards an asynchronous slave push (§4.F step 5, §8 scenario 3)
    /// to the host as a marker-less frame — it already carries its own
    /// command/length header from the slave.
    pub fn forward_slave_push(&self, tx: &mut TranslateTxQueue, raw: &[u8]) {
        self.encode_and_enqueue(tx, None, raw);
    }

    /// §7 "Surfaced to host": a legacy one-byte code in `Legacy` mode, a
    /// packed binary record in `Global` mode (§6 "Error mode").
    pub fn emit_error(
        &self,
        tx: &mut TranslateTxQueue,
        status: StatusFlags,
        driver_status: DriverStatus,
        callsite: Callsite,
    ) {
        match self.error_mode {
            ErrorMode::Legacy => {
                if status.timed_out() {
                    self.reply(tx, cmd::SLAVE_TIMEOUT, &[]);
                } else if status.nak() {
                    self.reply(tx, cmd::SLAVE_NAK, &[]);
                }
            }
            ErrorMode::Global => {
                // §6 "a packed binary error record [type, statusByte,
                // driverStatus(4 BE), callsite(2 BE)]". `driverStatus`
                // here carries the full `StatusFlags` word (the low-level
                // register this crate models is a byte, already folded
                // into `statusByte`); `type` is fixed since this crate
                // has one error-record shape, not several.
                let mut record = [0u8; 8];
                record[0] = 1;
                record[1] = driver_status.raw_value();
                record[2..6].copy_from_slice(&status.raw_value().to_be_bytes());
                record[6..8].copy_from_slice(&callsite.raw_value().to_be_bytes());
                self.reply(tx, cmd::ERROR, &record);
            }
        }
    }

    fn emit_queue_full(&self, tx: &mut TranslateTxQueue) {
        let status = StatusFlags::new().with_queue_full(true);
        self.emit_error(tx, status, DriverStatus::new(), Callsite::new());
    }

    fn reply(&self, tx: &mut TranslateTxQueue, command: u8, payload: &[u8]) {
        self.encode_and_enqueue(tx, Some(command), payload);
    }

    fn encode_and_enqueue(&self, tx: &mut TranslateTxQueue, command: Option<u8>, payload: &[u8]) {
        let mut framed = [0u8; TRANSLATE_TX_SLOT_CAP];
        if let Some(n) = crate::codec::encode_translate(&mut framed, command, payload) {
            let _ = tx.enqueue(&framed[..n]);
        }
    }
}

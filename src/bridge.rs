//! Top-level `Bridge` value (Design Notes §9): the single owner of
//! every component's state. The ISR-facing surface is the small set of
//! methods that take `&mut self` and nothing else (`on_uart_rx_byte`,
//! `on_slave_irq`) — everything they touch is guarded by
//! `critical_section::with`, the same discipline `queue::byte_queue`
//! documents at its call sites.
//!
//! *Dual-mode heap* (Design Notes §9): `Translate`/`UpdateController`
//! are ordinary owned fields rather than arena-backed pointers, so the
//! tagged union collapses to reading [`OrchestratorState`] itself as the
//! tag: `SlaveUpdate` means the update fields are live, anything else
//! means the translate fields are. `arena`'s word accounting still runs
//! per §3 "Arena", sized off `size_of::<Translate>()`/
//! `size_of::<UpdateController>()` as each mode's word requirement.

use crate::arena::Arena;
use crate::codec::{
    DecodeEvent, NullFrameEvents, TranslateRx, TranslateRxQueue, UpdateDecodeEvent, UpdateRx,
    UpdateRxQueue,
};
use crate::config::{BridgeConfig, I2C_RX_BUFFER_CAP, TRANSLATE_MAX_PAYLOAD};
use crate::error::{Callsite, StatusFlags};
use crate::hal::{DriverStatus, I2cBus, InputPin, OutputPin, Uart};
use crate::i2c_fsm::{I2cFsm, ProcessOutcome};
use crate::orchestrator::{ModeRequest, ModeTransition, Orchestrator, OrchestratorState};
use crate::queue::{ByteQueue, PacketQueue};
use crate::transfer_queue::TransferRing;
use crate::translate::{DispatchOutcome, Translate, TranslateTxQueue, UpdateParams};
use crate::update::{UpdateController, UpdateOutcome};

/// `ARENA_WORDS`/`I2C_RX_CAP`/`UART_RX_CAP` are the only sizes a user of
/// this crate needs to pick; everything else is a compiled-in default
/// from `config.rs`.
pub struct Bridge<const ARENA_WORDS: usize, const I2C_RX_CAP: usize, const UART_RX_CAP: usize> {
    config: BridgeConfig,
    version_major: u8,
    version_minor: u8,

    arena: Arena<ARENA_WORDS>,
    orchestrator: Orchestrator<ARENA_WORDS>,
    i2c: I2cFsm<I2C_RX_CAP>,

    // ISR-safe subset (§5 "Interrupt boundaries").
    uart_rx: ByteQueue<UART_RX_CAP>,
    rx_pending: bool,
    last_rx_time_ms: u32,

    translate: Translate,
    translate_decoder: TranslateRx,
    translate_rx_queue: TranslateRxQueue,
    translate_tx_queue: TranslateTxQueue,
    tx_byte_offset: usize,

    update: UpdateController,
    update_decoder: UpdateRx,
    update_rx_queue: UpdateRxQueue,
    pending_update_params: Option<UpdateParams>,

    transfers: TransferRing,
}

impl<const ARENA_WORDS: usize, const I2C_RX_CAP: usize, const UART_RX_CAP: usize>
    Bridge<ARENA_WORDS, I2C_RX_CAP, UART_RX_CAP>
{
    pub fn new(config: BridgeConfig, version_major: u8, version_minor: u8) -> Self {
        Self {
            orchestrator: Orchestrator::new(config.error_message_period_ms),
            i2c: I2cFsm::new(config.max_recovery_attempts, config.detect_timeout_ms),
            translate_decoder: TranslateRx::new(config.rx_reset_timeout_ms),
            config,
            version_major,
            version_minor,
            arena: Arena::new(),
            uart_rx: ByteQueue::new(),
            rx_pending: false,
            last_rx_time_ms: 0,
            translate: Translate::new(version_major, version_minor),
            translate_rx_queue: PacketQueue::new(),
            translate_tx_queue: PacketQueue::new(),
            tx_byte_offset: 0,
            update: UpdateController::new(),
            update_decoder: UpdateRx::new(),
            update_rx_queue: PacketQueue::new(),
            pending_update_params: None,
            transfers: PacketQueue::new(),
        }
    }

    pub fn orchestrator_state(&self) -> OrchestratorState {
        self.orchestrator.state()
    }

    /// Combined fault taxonomy (§7): whatever the orchestrator has
    /// latched, plus the I2C FSM's locked-bus bit, which lives on that
    /// FSM rather than being mirrored into `orchestrator` on every poll.
    pub fn status(&self) -> StatusFlags {
        self.orchestrator.status().with_locked_bus(self.i2c.is_locked())
    }

    pub fn last_rx_time_ms(&self) -> u32 {
        self.last_rx_time_ms
    }

    /// UART RX interrupt handler (§5). Stashes the byte and stamps
    /// `lastRxTimeMs`; decoding happens later, off the interrupt path,
    /// in [`Self::process`].
    pub fn on_uart_rx_byte(&mut self, byte: u8, now_ms: u32) {
        critical_section::with(|_| {
            self.uart_rx.enqueue_byte(byte);
        });
        self.last_rx_time_ms = now_ms;
    }

    /// Slave-IRQ interrupt handler (§5): the only writer of `rxPending`.
    pub fn on_slave_irq(&mut self) {
        critical_section::with(|_| {
            self.rx_pending = true;
        });
    }

    /// One iteration of the main loop (§5): `orchestrator.process() →
    /// mode.process_rx() → i2c_fsm.process() → mode.process_tx()`.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        now_ms: u32,
        uart: &mut impl Uart,
        i2c_bus: &mut impl I2cBus,
        slave_irq: &impl InputPin,
        reset_pin: &mut impl OutputPin,
        reset_sense: &impl InputPin,
    ) {
        let transition = self.orchestrator.process(
            now_ms,
            reset_pin,
            reset_sense,
            uart,
            &mut self.arena,
            core::mem::size_of::<Translate>(),
            core::mem::size_of::<UpdateController>(),
        );
        self.apply_transition(transition);

        if self.orchestrator.state().is_fault() {
            return;
        }

        self.process_rx(now_ms);
        self.drive_i2c(now_ms, i2c_bus, slave_irq);
        self.process_tx(uart);
    }

    fn apply_transition(&mut self, transition: ModeTransition) {
        match transition {
            ModeTransition::ActivatedTranslate => {
                self.translate = Translate::new(self.version_major, self.version_minor);
                self.translate_decoder.reset();
            }
            ModeTransition::ActivatedUpdate => {
                self.update = UpdateController::new();
                if let Some(params) = self.pending_update_params.take() {
                    self.update.begin(params);
                }
                self.update_decoder.reset();
            }
            ModeTransition::None | ModeTransition::Faulted => {}
        }
    }

    /// Drains up to a bounded number of already-received bytes into
    /// whichever dialect the orchestrator currently owns. Bounded the
    /// same way `i2c_fsm::process`'s inner loop is, so one starved
    /// direction can't make a single call run unboundedly long.
    fn process_rx(&mut self, now_ms: u32) {
        let mut byte = [0u8; 1];
        for _ in 0..32 {
            let n = critical_section::with(|_| self.uart_rx.dequeue(&mut byte));
            if n == 0 {
                break;
            }
            if matches!(self.orchestrator.state(), OrchestratorState::SlaveUpdate) {
                self.process_update_byte(byte[0]);
            } else {
                // §4.J "while reset is pending, translate RX/TX continue
                // to be serviced" — every non-update state speaks the
                // translate dialect.
                self.process_translate_byte(byte[0], now_ms);
            }
        }
    }

    fn process_translate_byte(&mut self, byte: u8, now_ms: u32) {
        let mut events = NullFrameEvents;
        let event =
            self.translate_decoder
                .on_byte(byte, now_ms, &mut self.translate_rx_queue, &mut events);
        if !matches!(event, DecodeEvent::PacketFinalized) {
            return;
        }
        let Some((view, len)) = self.translate_rx_queue.dequeue() else {
            return;
        };
        let mut frame: heapless::Vec<u8, TRANSLATE_MAX_PAYLOAD> = heapless::Vec::new();
        let _ = frame.extend_from_slice(&view[..len]);
        self.translate_rx_queue.pop_front();

        let outcome = self.translate.dispatch(&frame, &mut self.transfers, &mut self.translate_tx_queue);
        match outcome {
            DispatchOutcome::SetSlaveAddress(addr) => self.i2c.set_slave_addr(addr),
            DispatchOutcome::EnterUpdate(params) => {
                self.pending_update_params = Some(params);
                self.orchestrator
                    .request_mode_switch(ModeRequest::Update, &mut self.arena);
            }
            DispatchOutcome::Reset => self.orchestrator.request_reset(&mut self.arena),
            DispatchOutcome::Handled | DispatchOutcome::Ignored => {}
        }
    }

    fn process_update_byte(&mut self, byte: u8) {
        let counters = self.update.counters_mut();
        let event = self
            .update_decoder
            .on_byte(byte, &mut self.update_rx_queue, counters);
        if matches!(event, UpdateDecodeEvent::None) {
            return;
        }
        let outcome = self
            .update
            .on_decode_event(event, &mut self.update_rx_queue, &mut self.transfers);
        match outcome {
            UpdateOutcome::FileComplete => {
                self.orchestrator
                    .request_mode_switch(ModeRequest::Translate, &mut self.arena);
            }
            UpdateOutcome::InvalidSubChunk => self.orchestrator.latch_update_error(),
            UpdateOutcome::SubchunkForwarded
            | UpdateOutcome::ChunkComplete
            | UpdateOutcome::QueueFull
            | UpdateOutcome::ElementQueueFull
            | UpdateOutcome::Idle => {}
        }
    }

    fn drive_i2c(&mut self, now_ms: u32, i2c_bus: &mut impl I2cBus, slave_irq: &impl InputPin) {
        let mut forwarded: Option<heapless::Vec<u8, I2C_RX_BUFFER_CAP>> = None;
        let mut faulted: Option<(DriverStatus, Callsite)> = None;
        let mut timed_out = false;
        {
            let mut rx_sink = |payload: &[u8]| {
                forwarded = heapless::Vec::from_slice(payload).ok();
            };
            let mut error_sink = |driver_status: DriverStatus, callsite: Callsite| {
                faulted = Some((driver_status, callsite));
            };
            let outcome = self.i2c.process(
                now_ms,
                self.config.rx_reset_timeout_ms,
                i2c_bus,
                slave_irq,
                &mut self.rx_pending,
                &mut self.transfers,
                &mut rx_sink,
                &mut error_sink,
            );
            timed_out = matches!(outcome, ProcessOutcome::TimedOut);
        }

        let translate_active = !matches!(self.orchestrator.state(), OrchestratorState::SlaveUpdate);
        if translate_active {
            if let Some(payload) = forwarded {
                self.translate.forward_slave_push(&mut self.translate_tx_queue, &payload);
            }
            if let Some((driver_status, callsite)) = faulted {
                let status = StatusFlags::new()
                    .with_driver_error(driver_status.is_hard_error())
                    .with_nak(driver_status.addr_nak())
                    .with_locked_bus(self.i2c.is_locked());
                self.translate
                    .emit_error(&mut self.translate_tx_queue, status, driver_status, callsite);
            }
            if timed_out {
                let status = StatusFlags::new().with_timed_out(true);
                self.translate.emit_error(
                    &mut self.translate_tx_queue,
                    status,
                    DriverStatus::new(),
                    Callsite::new(),
                );
            }
        }
    }

    /// Drains the translate outbound queue onto the host UART, resuming
    /// mid-frame across calls via `tx_byte_offset` rather than blocking
    /// (§5 "Cancellation" — a pending transfer yields, it isn't
    /// re-sent). Update mode has nothing to send back over this path.
    fn process_tx(&mut self, uart: &mut impl Uart) {
        if matches!(self.orchestrator.state(), OrchestratorState::SlaveUpdate) {
            return;
        }
        loop {
            let Some((view, len)) = self.translate_tx_queue.dequeue() else {
                return;
            };
            while self.tx_byte_offset < len {
                match uart.write(view[self.tx_byte_offset]) {
                    Ok(()) => self.tx_byte_offset += 1,
                    Err(_) => return,
                }
            }
            self.tx_byte_offset = 0;
            self.translate_tx_queue.pop_front();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::SLAVE_RESET_LOW_MS;
    use core::cell::RefCell;
    use std::collections::VecDeque;
    use std::vec::Vec;

    struct MockUart {
        in_buf: RefCell<VecDeque<u8>>,
        out_buf: RefCell<Vec<u8>>,
    }

    impl Uart for MockUart {
        fn read(&mut self) -> nb::Result<u8, core::convert::Infallible> {
            self.in_buf.borrow_mut().pop_front().ok_or(nb::Error::WouldBlock)
        }
        fn write(&mut self, byte: u8) -> nb::Result<(), core::convert::Infallible> {
            self.out_buf.borrow_mut().push(byte);
            Ok(())
        }
    }

    struct MockI2c {
        writes: RefCell<Vec<(u8, Vec<u8>)>>,
        replies: RefCell<VecDeque<Vec<u8>>>,
    }

    impl I2cBus for MockI2c {
        fn start_write(&mut self, addr: u8, data: &[u8]) {
            self.writes.borrow_mut().push((addr, data.to_vec()));
        }
        fn start_read(&mut self, _addr: u8, _len: usize) {}
        fn poll_write(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }
        fn poll_read(&mut self, buf: &mut [u8]) -> nb::Result<usize, ()> {
            let reply = self.replies.borrow_mut().pop_front().unwrap_or_default();
            let n = reply.len().min(buf.len());
            buf[..n].copy_from_slice(&reply[..n]);
            Ok(n)
        }
        fn take_status(&mut self) -> DriverStatus {
            DriverStatus::new()
        }
        fn reinit(&mut self) {}
    }

    struct FixedPin(bool);
    impl InputPin for FixedPin {
        fn is_low(&self) -> bool {
            self.0
        }
    }
    struct NullOutput;
    impl OutputPin for NullOutput {
        fn set_low(&mut self) {}
        fn set_high(&mut self) {}
    }

    fn encode_host_frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut dst = [0u8; 64];
        let n = crate::codec::encode_translate(&mut dst, Some(cmd), payload).unwrap();
        dst[..n].to_vec()
    }

    fn bring_up(bridge: &mut Bridge<64, 16, 128>) {
        let mut i2c = MockI2c { writes: RefCell::new(Vec::new()), replies: RefCell::new(VecDeque::new()) };
        let irq = FixedPin(false);
        let reset_sense = FixedPin(false);
        let mut reset_pin = NullOutput;
        let mut uart = MockUart { in_buf: RefCell::new(VecDeque::new()), out_buf: RefCell::new(Vec::new()) };
        let mut now = 0u32;
        for _ in 0..8 {
            bridge.process(now, &mut uart, &mut i2c, &irq, &mut reset_pin, &reset_sense);
            now += SLAVE_RESET_LOW_MS + 10;
        }
    }

    #[test]
    fn bring_up_reaches_slave_translate() {
        let mut bridge: Bridge<64, 16, 128> = Bridge::new(BridgeConfig::new(), 1, 0);
        bring_up(&mut bridge);
        assert_eq!(bridge.orchestrator_state(), OrchestratorState::SlaveTranslate);
    }

    #[test]
    fn host_ack_command_round_trips_through_uart_queues() {
        let mut bridge: Bridge<64, 16, 128> = Bridge::new(BridgeConfig::new(), 1, 0);
        bring_up(&mut bridge);

        let frame = encode_host_frame(b'A', &[]);
        for &b in &frame {
            bridge.on_uart_rx_byte(b, 0);
        }

        let mut i2c = MockI2c { writes: RefCell::new(Vec::new()), replies: RefCell::new(VecDeque::new()) };
        let irq = FixedPin(false);
        let reset_sense = FixedPin(false);
        let mut reset_pin = NullOutput;
        let mut uart = MockUart { in_buf: RefCell::new(VecDeque::new()), out_buf: RefCell::new(Vec::new()) };
        bridge.process(1_000_000, &mut uart, &mut i2c, &irq, &mut reset_pin, &reset_sense);

        let out = uart.out_buf.borrow();
        assert!(!out.is_empty());
        assert_eq!(out[0], crate::codec::SOF_EOF);
    }

    #[test]
    fn slave_update_command_switches_orchestrator_into_update_mode() {
        let mut bridge: Bridge<64, 16, 128> = Bridge::new(BridgeConfig::new(), 1, 0);
        bring_up(&mut bridge);

        let frame = encode_host_frame(b'B', &[0x10, 0x00, 0x10, 22, 0x02, 0]);
        for &b in &frame {
            bridge.on_uart_rx_byte(b, 0);
        }
        let mut i2c = MockI2c { writes: RefCell::new(Vec::new()), replies: RefCell::new(VecDeque::new()) };
        let irq = FixedPin(false);
        let reset_sense = FixedPin(false);
        let mut reset_pin = NullOutput;
        let mut uart = MockUart { in_buf: RefCell::new(VecDeque::new()), out_buf: RefCell::new(Vec::new()) };
        let mut now = 2_000_000u32;
        for _ in 0..4 {
            bridge.process(now, &mut uart, &mut i2c, &irq, &mut reset_pin, &reset_sense);
            now += 10;
        }
        assert_eq!(bridge.orchestrator_state(), OrchestratorState::SlaveUpdate);
    }
}

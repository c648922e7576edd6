//! Component F: the non-blocking I2C communication FSM (§4.F).
//!
//! Split between "submit" and "poll" on the `I2cBus` trait: every bus
//! action here is a `start_*` followed by repeated `poll_*` calls across
//! `process()` invocations, never a blocking wait. One call to `process`
//! walks the state word forward as far as the deadline and the bus
//! allow, returning to `Waiting` (or `WouldBlock`-ing out mid-sequence
//! to be resumed on the next call).

use crate::error::{Callsite, TopCall};
use crate::hal::{DriverStatus, I2cBus, InputPin};
use crate::time::{Alarm, AlarmKind};
use crate::transfer_queue::{Transfer, TransferQueue, TransferRing};

use arbitrary_int::u2;

/// §3 "FSM state word (comms)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FsmState {
    Waiting,
    RxPending,
    RxSwitchToResponse,
    RxReadLength,
    RxProcessLength,
    RxReadExtra,
    RxProcessExtra,
    RxClearIrq,
    RxCheckComplete,
    XferDequeueAndAct,
    XferTxCheckComplete,
    XferRxCheckComplete,
}

/// Which bus action, if any, is currently outstanding. A state stays on
/// the same [`FsmState`] across `process()` calls while its action is
/// in flight; this tracks whether `start_write`/`start_read` has already
/// been issued for the current state so it isn't resubmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Idle,
    Write,
    Read { len: usize },
}

/// Outcome of one `process()` call, surfaced to the orchestrator (§4.J).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProcessOutcome {
    /// Back at `Waiting`; nothing left to do this call.
    Idle,
    /// Made progress but is still mid-sequence (waiting on the bus).
    InProgress,
    /// The deadline alarm elapsed before returning to `Waiting`.
    TimedOut,
}

const RESPONSE_SELECT: [u8; 2] = [0x20, 0x00];
const CLEAR_IRQ: [u8; 2] = [0x20, 0x00];
const LENGTH_FIELD_LEN: usize = crate::config::APP_RX_PACKET_LENGTH_SIZE;

/// §4.F "extending the timeout": bit time for `length` bytes at the
/// conventional 100 kHz/9-bits-per-byte budget, converted from µs to ms
/// with the fixed-point `/1024` approximation (cheap on hardware with no
/// integer divider), rounded up, plus one millisecond of margin.
pub fn bit_time_extension_ms(length: usize) -> u32 {
    let total_us = (length as u32) * 9 * 10;
    (total_us + 1023) / 1024 + 1
}

/// Locked-bus detection/recovery bookkeeping (§4.F, §8 "Locked-bus
/// detection").
#[derive(Debug)]
struct LockedBus {
    detect_alarm: Alarm,
    recover_alarm: Alarm,
    locked: bool,
    recovery_attempts: u32,
    max_recovery_attempts: u32,
    detect_ms: u32,
    exhausted: bool,
}

impl LockedBus {
    fn new(max_recovery_attempts: u32, detect_ms: u32) -> Self {
        Self {
            detect_alarm: Alarm::new(AlarmKind::OneShot),
            recover_alarm: Alarm::new(AlarmKind::OneShot),
            locked: false,
            recovery_attempts: 0,
            max_recovery_attempts,
            detect_ms,
            exhausted: false,
        }
    }

    /// Call on every `BUS_BUSY`/`NOT_READY` status observation. Returns
    /// true the instant the bus transitions to locked.
    fn observe_busy(&mut self, now_ms: u32) -> bool {
        if self.locked {
            return false;
        }
        if !self.detect_alarm.is_armed() {
            self.detect_alarm.arm(now_ms, self.detect_ms);
            return false;
        }
        if self.detect_alarm.has_elapsed(now_ms) {
            self.locked = true;
            self.recover_alarm.arm(now_ms, self.detect_ms);
            return true;
        }
        false
    }

    fn observe_clear(&mut self) {
        self.detect_alarm.disarm();
    }

    /// True once a recovery attempt is due. Does not itself perform one.
    fn recovery_due(&self, now_ms: u32) -> bool {
        self.locked && !self.exhausted && self.recover_alarm.has_elapsed(now_ms)
    }

    fn record_attempt(&mut self, now_ms: u32) {
        self.recovery_attempts += 1;
        if self.recovery_attempts >= self.max_recovery_attempts {
            self.exhausted = true;
        }
        self.recover_alarm.arm(now_ms, self.detect_ms);
    }

    fn record_recovered(&mut self) {
        self.locked = false;
        self.recovery_attempts = 0;
        self.exhausted = false;
        self.detect_alarm.disarm();
        self.recover_alarm.disarm();
    }
}

/// Component F proper. Generic over the inbound-read scratch capacity so
/// the caller picks its own buffer size (§4.F step 2/4, "read length
/// byte is `u8`, so 255 is the true ceiling").
pub struct I2cFsm<const RX_CAP: usize> {
    state: FsmState,
    inflight: InFlight,
    deadline: Alarm,
    locked_bus: LockedBus,
    slave_addr: u8,
    response_mode_valid: bool,
    retry_done: bool,
    rx_buf: [u8; RX_CAP],
    rx_len: usize,
    command: u8,
    extra_len: usize,
}

impl<const RX_CAP: usize> I2cFsm<RX_CAP> {
    pub fn new(max_recovery_attempts: u32, detect_timeout_ms: u32) -> Self {
        Self {
            state: FsmState::Waiting,
            inflight: InFlight::Idle,
            deadline: Alarm::new(AlarmKind::OneShot),
            locked_bus: LockedBus::new(max_recovery_attempts, detect_timeout_ms),
            slave_addr: 0,
            response_mode_valid: false,
            retry_done: false,
            rx_buf: [0; RX_CAP],
            rx_len: 0,
            command: 0,
            extra_len: 0,
        }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    pub fn is_locked(&self) -> bool {
        self.locked_bus.locked
    }

    pub fn is_recovery_exhausted(&self) -> bool {
        self.locked_bus.exhausted
    }

    /// Sets the fixed slave address used for IRQ-triggered inbound
    /// reads. Invalidates the response-buffer-select heuristic, since a
    /// new slave hasn't necessarily been put in response mode (§4.F).
    pub fn set_slave_addr(&mut self, addr: u8) {
        self.slave_addr = addr;
        self.response_mode_valid = false;
    }

    /// Drives the FSM forward. `timeout_ms` arms the deadline on entry
    /// from `Waiting`; an already-armed deadline (mid-sequence) is left
    /// alone. Returns once the bus would block, the deadline elapses, or
    /// `Waiting` is reached with nothing left to do.
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        now_ms: u32,
        timeout_ms: u32,
        bus: &mut impl I2cBus,
        irq: &impl InputPin,
        rx_pending: &mut bool,
        transfers: &mut TransferRing,
        rx_sink: &mut dyn FnMut(&[u8]),
        error_sink: &mut dyn FnMut(DriverStatus, Callsite),
    ) -> ProcessOutcome {
        if self.state == FsmState::Waiting {
            if self.maybe_recover(now_ms, bus, error_sink) {
                return ProcessOutcome::InProgress;
            }
            if irq.is_low() && *rx_pending {
                self.state = FsmState::RxPending;
                self.deadline.arm(now_ms, timeout_ms);
            } else if !transfers.is_empty() {
                self.state = FsmState::XferDequeueAndAct;
                self.deadline.arm(now_ms, timeout_ms);
            } else {
                return ProcessOutcome::Idle;
            }
        }

        // Bounded: each branch below either advances the state or
        // returns, so this can't spin forever even if every step is
        // non-blocking.
        for _ in 0..16 {
            if self.deadline.has_elapsed(now_ms) {
                transfers_abort_if_needed(&self.state, transfers);
                *rx_pending = false;
                self.state = FsmState::Waiting;
                self.deadline.disarm();
                return ProcessOutcome::TimedOut;
            }

            match self.step(now_ms, bus, irq, rx_pending, transfers, rx_sink, error_sink) {
                StepResult::Continue => continue,
                StepResult::Block => return ProcessOutcome::InProgress,
                StepResult::Done => {
                    self.state = FsmState::Waiting;
                    self.deadline.disarm();
                    return ProcessOutcome::Idle;
                }
            }
        }
        ProcessOutcome::InProgress
    }

    fn maybe_recover(
        &mut self,
        now_ms: u32,
        bus: &mut impl I2cBus,
        error_sink: &mut dyn FnMut(DriverStatus, Callsite),
    ) -> bool {
        if !self.locked_bus.recovery_due(now_ms) {
            return false;
        }
        bus.reinit();
        let status = bus.take_status();
        self.locked_bus.record_attempt(now_ms);
        if !status.bus_busy() && !status.not_ready() {
            self.locked_bus.record_recovered();
        } else {
            let site = Callsite::new()
                .with_top_call(TopCall::LockedBusRecovery as u8)
                .with_recover_from_locked_bus(true);
            error_sink(status, site);
        }
        true
    }

    fn step(
        &mut self,
        now_ms: u32,
        bus: &mut impl I2cBus,
        irq: &impl InputPin,
        rx_pending: &mut bool,
        transfers: &mut TransferRing,
        rx_sink: &mut dyn FnMut(&[u8]),
        error_sink: &mut dyn FnMut(DriverStatus, Callsite),
    ) -> StepResult {
        match self.state {
            FsmState::Waiting => StepResult::Done,

            FsmState::RxPending => {
                self.retry_done = false;
                if self.response_mode_valid {
                    self.state = FsmState::RxReadLength;
                } else {
                    self.state = FsmState::RxSwitchToResponse;
                }
                StepResult::Continue
            }

            FsmState::RxSwitchToResponse => self.drive_write(
                now_ms,
                bus,
                self.slave_addr,
                &RESPONSE_SELECT,
                FsmState::RxReadLength,
                TopCall::IrqRead,
                u2::new(0),
                error_sink,
            ),

            FsmState::RxReadLength => {
                match self.inflight {
                    InFlight::Idle => {
                        bus.start_read(self.slave_addr, LENGTH_FIELD_LEN);
                        self.inflight = InFlight::Read { len: LENGTH_FIELD_LEN };
                        StepResult::Block
                    }
                    InFlight::Read { len } => match bus.poll_read(&mut self.rx_buf[..len]) {
                        Ok(n) => {
                            self.rx_len = n;
                            self.inflight = InFlight::Idle;
                            self.state = FsmState::RxProcessLength;
                            StepResult::Continue
                        }
                        Err(nb::Error::WouldBlock) => StepResult::Block,
                        Err(nb::Error::Other(())) => {
                            self.inflight = InFlight::Idle;
                            self.report_status(now_ms, bus, TopCall::IrqRead, u2::new(1), error_sink)
                        }
                    },
                    InFlight::Write => unreachable!("RxReadLength never issues a write"),
                }
            }

            FsmState::RxProcessLength => {
                self.response_mode_valid = true;
                self.command = self.rx_buf[0];
                let length = self.rx_buf[1];
                let implausible = (self.command & 0x7F) == 0 || length == 0xFF;
                if implausible {
                    if self.retry_done {
                        self.state = FsmState::RxClearIrq;
                    } else {
                        self.retry_done = true;
                        self.response_mode_valid = false;
                        self.state = FsmState::RxSwitchToResponse;
                    }
                } else if length == 0 {
                    self.extra_len = 0;
                    self.state = FsmState::RxProcessExtra;
                } else {
                    self.extra_len = length as usize;
                    self.deadline.snooze(bit_time_extension_ms(self.extra_len));
                    self.state = FsmState::RxReadExtra;
                }
                StepResult::Continue
            }

            FsmState::RxReadExtra => {
                let want = self.extra_len.min(RX_CAP.saturating_sub(LENGTH_FIELD_LEN));
                match self.inflight {
                    InFlight::Idle => {
                        bus.start_read(self.slave_addr, want);
                        self.inflight = InFlight::Read { len: want };
                        StepResult::Block
                    }
                    InFlight::Read { len } => {
                        match bus.poll_read(&mut self.rx_buf[LENGTH_FIELD_LEN..LENGTH_FIELD_LEN + len]) {
                            Ok(n) => {
                                self.rx_len = LENGTH_FIELD_LEN + n;
                                self.inflight = InFlight::Idle;
                                self.state = FsmState::RxProcessExtra;
                                StepResult::Continue
                            }
                            Err(nb::Error::WouldBlock) => StepResult::Block,
                            Err(nb::Error::Other(())) => {
                                self.inflight = InFlight::Idle;
                                self.report_status(now_ms, bus, TopCall::IrqRead, u2::new(1), error_sink)
                            }
                        }
                    }
                    InFlight::Write => unreachable!("RxReadExtra never issues a write"),
                }
            }

            FsmState::RxProcessExtra => {
                rx_sink(&self.rx_buf[..self.rx_len]);
                self.state = FsmState::RxClearIrq;
                StepResult::Continue
            }

            FsmState::RxClearIrq => self.drive_write(
                now_ms,
                bus,
                self.slave_addr,
                &CLEAR_IRQ,
                FsmState::RxCheckComplete,
                TopCall::IrqRead,
                u2::new(2),
                error_sink,
            ),

            FsmState::RxCheckComplete => {
                *rx_pending = false;
                StepResult::Done
            }

            FsmState::XferDequeueAndAct => {
                let queue = TransferQueue::new();
                match queue.peek(transfers) {
                    None => StepResult::Done,
                    Some(Transfer::Write { addr, data }) => {
                        bus.start_write(addr, data);
                        self.inflight = InFlight::Write;
                        self.state = FsmState::XferTxCheckComplete;
                        StepResult::Block
                    }
                    Some(Transfer::Read { addr, len }) => {
                        bus.start_read(addr, len as usize);
                        self.inflight = InFlight::Read { len: len as usize };
                        self.state = FsmState::XferRxCheckComplete;
                        StepResult::Block
                    }
                }
            }

            FsmState::XferTxCheckComplete => match bus.poll_write() {
                Ok(()) => {
                    self.inflight = InFlight::Idle;
                    transfers.pop_front();
                    StepResult::Done
                }
                Err(nb::Error::WouldBlock) => StepResult::Block,
                Err(nb::Error::Other(())) => {
                    self.inflight = InFlight::Idle;
                    transfers.pop_front();
                    self.report_status(now_ms, bus, TopCall::XferDispatch, u2::new(0), error_sink)
                }
            },

            FsmState::XferRxCheckComplete => {
                let len = match self.inflight {
                    InFlight::Read { len } => len.min(RX_CAP),
                    _ => unreachable!("XferRxCheckComplete entered without a read in flight"),
                };
                match bus.poll_read(&mut self.rx_buf[..len]) {
                    Ok(n) => {
                        self.inflight = InFlight::Idle;
                        transfers.pop_front();
                        rx_sink(&self.rx_buf[..n]);
                        StepResult::Done
                    }
                    Err(nb::Error::WouldBlock) => StepResult::Block,
                    Err(nb::Error::Other(())) => {
                        self.inflight = InFlight::Idle;
                        transfers.pop_front();
                        self.report_status(now_ms, bus, TopCall::XferDispatch, u2::new(1), error_sink)
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn drive_write(
        &mut self,
        now_ms: u32,
        bus: &mut impl I2cBus,
        addr: u8,
        data: &[u8],
        next: FsmState,
        top_call: TopCall,
        low_level_call: u2,
        error_sink: &mut dyn FnMut(DriverStatus, Callsite),
    ) -> StepResult {
        match self.inflight {
            InFlight::Idle => {
                bus.start_write(addr, data);
                self.inflight = InFlight::Write;
                StepResult::Block
            }
            InFlight::Write => match bus.poll_write() {
                Ok(()) => {
                    self.inflight = InFlight::Idle;
                    self.state = next;
                    StepResult::Continue
                }
                Err(nb::Error::WouldBlock) => StepResult::Block,
                Err(nb::Error::Other(())) => {
                    self.inflight = InFlight::Idle;
                    self.report_status(now_ms, bus, top_call, low_level_call, error_sink)
                }
            },
            InFlight::Read { .. } => unreachable!("drive_write never issues a read"),
        }
    }

    fn report_status(
        &mut self,
        now_ms: u32,
        bus: &mut impl I2cBus,
        top_call: TopCall,
        low_level_call: u2,
        error_sink: &mut dyn FnMut(DriverStatus, Callsite),
    ) -> StepResult {
        let status = bus.take_status();
        let site = Callsite::new()
            .with_top_call(top_call as u8)
            .with_low_level_call(low_level_call);
        if status.bus_busy() || status.not_ready() {
            self.locked_bus.observe_busy(now_ms);
        } else {
            self.locked_bus.observe_clear();
        }
        error_sink(status, site);
        StepResult::Done
    }
}

enum StepResult {
    Continue,
    Block,
    Done,
}

fn transfers_abort_if_needed(state: &FsmState, transfers: &mut TransferRing) {
    if matches!(
        state,
        FsmState::XferDequeueAndAct | FsmState::XferTxCheckComplete | FsmState::XferRxCheckComplete
    ) {
        transfers.pop_front();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transfer_queue::TransferQueue;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    struct MockBus {
        status: DriverStatus,
        write_log: RefCell<Vec<(u8, Vec<u8>)>>,
        read_reply: RefCell<VecDeque<Vec<u8>>>,
        pending_read_len: RefCell<usize>,
    }

    impl MockBus {
        fn new() -> Self {
            Self {
                status: DriverStatus::new(),
                write_log: RefCell::new(Vec::new()),
                read_reply: RefCell::new(VecDeque::new()),
                pending_read_len: RefCell::new(0),
            }
        }

        fn push_reply(&self, bytes: &[u8]) {
            self.read_reply.borrow_mut().push_back(bytes.to_vec());
        }
    }

    impl I2cBus for MockBus {
        fn start_write(&mut self, addr: u8, data: &[u8]) {
            self.write_log.borrow_mut().push((addr, data.to_vec()));
        }

        fn start_read(&mut self, _addr: u8, len: usize) {
            *self.pending_read_len.borrow_mut() = len;
        }

        fn poll_write(&mut self) -> nb::Result<(), ()> {
            Ok(())
        }

        fn poll_read(&mut self, buf: &mut [u8]) -> nb::Result<usize, ()> {
            let mut q = self.read_reply.borrow_mut();
            match q.pop_front() {
                Some(bytes) => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    Ok(n)
                }
                None => Err(nb::Error::WouldBlock),
            }
        }

        fn take_status(&mut self) -> DriverStatus {
            self.status
        }

        fn reinit(&mut self) {}
    }

    struct AlwaysHigh;
    impl InputPin for AlwaysHigh {
        fn is_low(&self) -> bool {
            false
        }
    }

    struct AlwaysLow;
    impl InputPin for AlwaysLow {
        fn is_low(&self) -> bool {
            true
        }
    }

    #[test]
    fn bit_time_extension_grows_with_length() {
        assert!(bit_time_extension_ms(255) > bit_time_extension_ms(1));
        assert_eq!(bit_time_extension_ms(0), 1);
    }

    #[test]
    fn idle_with_no_irq_and_no_transfers_is_idle() {
        let mut fsm: I2cFsm<16> = I2cFsm::new(10, 100);
        let mut bus = MockBus::new();
        let mut transfers: TransferRing = crate::queue::PacketQueue::new();
        let mut rx_pending = false;
        let mut rx_buf = Vec::new();
        let mut errs = Vec::new();
        let outcome = fsm.process(
            0,
            100,
            &mut bus,
            &AlwaysHigh,
            &mut rx_pending,
            &mut transfers,
            &mut |b| rx_buf.extend_from_slice(b),
            &mut |s, c| errs.push((s, c)),
        );
        assert_eq!(outcome, ProcessOutcome::Idle);
    }

    #[test]
    fn irq_triggered_read_delivers_full_frame_to_sink() {
        let mut fsm: I2cFsm<16> = I2cFsm::new(10, 100);
        fsm.set_slave_addr(0x20);
        fsm.response_mode_valid = true; // skip the select step for this test
        let mut bus = MockBus::new();
        bus.push_reply(&[0x01, 0x03]); // command, length
        bus.push_reply(&[0xDE, 0xAD, 0xBE]); // extra payload
        bus.push_reply(&CLEAR_IRQ); // clear-irq ack (content unused)
        let mut transfers: TransferRing = crate::queue::PacketQueue::new();
        let mut rx_pending = true;
        let mut rx_buf: Vec<u8> = Vec::new();
        let mut errs = Vec::new();
        let mut now = 0u32;
        for _ in 0..10 {
            let outcome = fsm.process(
                now,
                1000,
                &mut bus,
                &AlwaysLow,
                &mut rx_pending,
                &mut transfers,
                &mut |b| rx_buf = b.to_vec(),
                &mut |s, c| errs.push((s, c)),
            );
            if outcome == ProcessOutcome::Idle {
                break;
            }
            now += 1;
        }
        assert_eq!(rx_buf, vec![0x01, 0x03, 0xDE, 0xAD, 0xBE]);
        assert!(!rx_pending);
        assert_eq!(fsm.state(), FsmState::Waiting);
    }

    #[test]
    fn outbound_write_dequeues_on_completion() {
        let mut fsm: I2cFsm<16> = I2cFsm::new(10, 100);
        let mut bus = MockBus::new();
        let queue = TransferQueue::new();
        let mut transfers: TransferRing = crate::queue::PacketQueue::new();
        assert!(queue.enqueue_write(&mut transfers, 0x48, &[1, 2, 3]));
        let mut rx_pending = false;
        let mut errs = Vec::new();
        let outcome = fsm.process(
            0,
            1000,
            &mut bus,
            &AlwaysHigh,
            &mut rx_pending,
            &mut transfers,
            &mut |_| {},
            &mut |s, c| errs.push((s, c)),
        );
        assert_eq!(outcome, ProcessOutcome::Idle);
        assert!(transfers.is_empty());
        assert_eq!(bus.write_log.borrow()[0], (0x48, vec![1, 2, 3]));
    }

    #[test]
    fn timeout_returns_to_waiting_and_clears_rx_pending() {
        let mut fsm: I2cFsm<16> = I2cFsm::new(10, 100);
        fsm.set_slave_addr(0x20);
        let mut bus = MockBus::new(); // no replies queued: bus never completes
        let mut transfers: TransferRing = crate::queue::PacketQueue::new();
        let mut rx_pending = true;
        let mut errs = Vec::new();
        let outcome = fsm.process(
            0,
            10,
            &mut bus,
            &AlwaysLow,
            &mut rx_pending,
            &mut transfers,
            &mut |_| {},
            &mut |s, c| errs.push((s, c)),
        );
        assert_eq!(outcome, ProcessOutcome::InProgress);
        let outcome = fsm.process(
            50,
            10,
            &mut bus,
            &AlwaysLow,
            &mut rx_pending,
            &mut transfers,
            &mut |_| {},
            &mut |s, c| errs.push((s, c)),
        );
        assert_eq!(outcome, ProcessOutcome::TimedOut);
        assert!(!rx_pending);
        assert_eq!(fsm.state(), FsmState::Waiting);
    }
}

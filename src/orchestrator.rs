//! Component J: the bridge orchestrator FSM (§4.J).
//!
//! Owns nothing but control flow and the arena accounting §4.J assigns
//! it; the mode-specific state (`Translate`/`UpdateController`)
//! and the `Arena` itself are assembled one level up, in `bridge.rs`
//! (Design Notes §9's single `Bridge` value), and passed in by
//! reference each `process` call the same way `i2c_fsm.rs` borrows its
//! collaborators instead of owning them.

use crate::arena::{round_up_words, Arena};
use crate::config::SLAVE_RESET_LOW_MS;
use crate::error::StatusFlags;
use crate::hal::{InputPin, OutputPin, Uart};
use crate::time::{Alarm, AlarmKind};
use core::fmt::Write as _;

/// §4.J's "waits 50 µs" settle, rounded up to this crate's millisecond
/// tick granularity (`Alarm` has no finer resolution than `now_ms`).
const RESET_SETTLE_MS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OrchestratorState {
    InitHostComm,
    InitSlaveReset,
    CheckSlaveResetComplete,
    InitSlaveTranslate,
    InitSlaveUpdate,
    SlaveTranslate,
    SlaveUpdate,
    HostCommFailed,
    SlaveTranslateFailed,
    SlaveUpdateFailed,
}

impl OrchestratorState {
    /// Latched terminal states (§4.J "no transition out").
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::HostCommFailed | Self::SlaveTranslateFailed | Self::SlaveUpdateFailed
        )
    }
}

/// Which steady-state mode the host wants the wire switched to. Fed
/// into [`Orchestrator::request_mode_switch`] by `bridge.rs` when
/// `translate::DispatchOutcome::EnterUpdate` is seen, or when update
/// mode's `UpdateOutcome::FileComplete` hands the wire back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeRequest {
    Translate,
    Update,
}

/// What the caller must do to its `ModeHeap` tagged union as a result of
/// one `process` call (Design Notes §9 — this module doesn't hold that
/// union itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    None,
    ActivatedTranslate,
    ActivatedUpdate,
    Faulted,
}

/// Component J proper, generic over the arena's word capacity so it can
/// be exercised against a small `Arena` in tests.
pub struct Orchestrator<const WORDS: usize> {
    state: OrchestratorState,
    reset_deadline: Alarm,
    error_report: Alarm,
    status: StatusFlags,
    active_bytes: Option<usize>,
    failed_mode_words: usize,
    error_period_ms: u32,
}

impl<const WORDS: usize> Orchestrator<WORDS> {
    pub fn new(error_period_ms: u32) -> Self {
        Self {
            state: OrchestratorState::InitHostComm,
            reset_deadline: Alarm::new(AlarmKind::OneShot),
            error_report: Alarm::new(AlarmKind::Continuous),
            status: StatusFlags::new(),
            active_bytes: None,
            failed_mode_words: 0,
            error_period_ms,
        }
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn status(&self) -> StatusFlags {
        self.status
    }

    /// Latches `updateError` (§4.I "Invalid sub-chunks raise an update
    /// error"), observed by the update-mode controller rather than by
    /// this FSM. Non-fatal: doesn't change `state`.
    pub fn latch_update_error(&mut self) {
        self.status = self.status.with_update_error(true);
    }

    /// Bridge.rs calls this if UART bring-up (out of scope, §1) failed
    /// before this FSM ever ran — the one fault this module can't
    /// detect on its own, since it never programs the UART itself.
    pub fn fail_host_comm(&mut self, now_ms: u32) {
        self.state = OrchestratorState::HostCommFailed;
        self.status = self.status.with_deactivated(true);
        self.failed_mode_words = 0;
        self.error_report.arm(now_ms, self.error_period_ms);
    }

    /// Requests the wire hand itself to a different mode (§4.J
    /// "InitSlaveTranslate ↔ InitSlaveUpdate"). Deactivates the
    /// currently active mode's arena claim immediately; the caller
    /// observes `ModeTransition::Activated*` on a later `process` call
    /// once the `Init*` state runs.
    pub fn request_mode_switch(&mut self, to: ModeRequest, arena: &mut Arena<WORDS>) {
        self.deactivate_current(arena);
        self.state = match to {
            ModeRequest::Translate => OrchestratorState::InitSlaveTranslate,
            ModeRequest::Update => OrchestratorState::InitSlaveUpdate,
        };
    }

    /// `'r'` Reset (§6): re-runs the whole bring-up sequence, including
    /// the slave-reset pulse.
    pub fn request_reset(&mut self, arena: &mut Arena<WORDS>) {
        self.deactivate_current(arena);
        self.state = OrchestratorState::InitHostComm;
    }

    fn deactivate_current(&mut self, arena: &mut Arena<WORDS>) {
        if let Some(bytes) = self.active_bytes.take() {
            if !arena.deactivate(bytes) {
                self.status = self.status.with_memory_leak(true);
            }
        }
    }

    /// Advances the FSM by at most one transition (bring-up states
    /// settle over several calls; the two steady states are no-ops
    /// here — `bridge.rs` drives the actual mode/I2C processing around
    /// this call per §5's `orchestrator.process() → mode.process_rx() →
    /// i2c_fsm.process() → mode.process_tx()` chain).
    #[allow(clippy::too_many_arguments)]
    pub fn process(
        &mut self,
        now_ms: u32,
        reset_pin: &mut impl OutputPin,
        reset_sense: &impl InputPin,
        diag_uart: &mut impl Uart,
        arena: &mut Arena<WORDS>,
        translate_bytes_needed: usize,
        update_bytes_needed: usize,
    ) -> ModeTransition {
        if self.state.is_fault() {
            self.report_fault(now_ms, diag_uart, arena);
            return ModeTransition::None;
        }

        match self.state {
            OrchestratorState::InitHostComm => {
                reset_pin.set_low();
                self.reset_deadline.arm(now_ms, SLAVE_RESET_LOW_MS);
                self.state = OrchestratorState::InitSlaveReset;
                ModeTransition::None
            }
            OrchestratorState::InitSlaveReset => {
                if self.reset_deadline.has_elapsed(now_ms) {
                    reset_pin.set_high();
                    self.reset_deadline.arm(now_ms, RESET_SETTLE_MS);
                    self.state = OrchestratorState::CheckSlaveResetComplete;
                }
                ModeTransition::None
            }
            OrchestratorState::CheckSlaveResetComplete => {
                if self.reset_deadline.has_elapsed(now_ms) {
                    if reset_sense.is_low() {
                        self.status = self.status.with_slave_reset_failed(true);
                    }
                    self.state = OrchestratorState::InitSlaveTranslate;
                }
                ModeTransition::None
            }
            OrchestratorState::InitSlaveTranslate => {
                self.activate(arena, translate_bytes_needed, true, now_ms)
            }
            OrchestratorState::InitSlaveUpdate => {
                self.activate(arena, update_bytes_needed, false, now_ms)
            }
            OrchestratorState::SlaveTranslate | OrchestratorState::SlaveUpdate => {
                ModeTransition::None
            }
            OrchestratorState::HostCommFailed
            | OrchestratorState::SlaveTranslateFailed
            | OrchestratorState::SlaveUpdateFailed => {
                unreachable!("fault states handled above")
            }
        }
    }

    fn activate(
        &mut self,
        arena: &mut Arena<WORDS>,
        bytes_needed: usize,
        translate: bool,
        now_ms: u32,
    ) -> ModeTransition {
        match arena.activate(bytes_needed) {
            Some(_) => {
                self.active_bytes = Some(bytes_needed);
                self.state = if translate {
                    OrchestratorState::SlaveTranslate
                } else {
                    OrchestratorState::SlaveUpdate
                };
                if translate {
                    ModeTransition::ActivatedTranslate
                } else {
                    ModeTransition::ActivatedUpdate
                }
            }
            None => {
                *arena = Arena::new();
                self.failed_mode_words = round_up_words(bytes_needed);
                self.state = if translate {
                    OrchestratorState::SlaveTranslateFailed
                } else {
                    OrchestratorState::SlaveUpdateFailed
                };
                self.error_report.arm(now_ms, self.error_period_ms);
                ModeTransition::Faulted
            }
        }
    }

    fn report_fault(&mut self, now_ms: u32, diag_uart: &mut impl Uart, arena: &Arena<WORDS>) {
        if !self.error_report.tick(now_ms) {
            return;
        }
        let mut line: heapless::String<96> = heapless::String::new();
        let _ = write!(
            line,
            "FAULT state={:?} arena_capacity_words={} failed_mode_words={}\r\n",
            self.state,
            arena.capacity_words(),
            self.failed_mode_words,
        );
        diag_uart.write_all_blocking(line.as_bytes());
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cell::RefCell;
    use std::vec::Vec;

    struct RecordingPin {
        low: bool,
    }
    impl OutputPin for RecordingPin {
        fn set_low(&mut self) {
            self.low = true;
        }
        fn set_high(&mut self) {
            self.low = false;
        }
    }

    struct FixedInput(bool);
    impl InputPin for FixedInput {
        fn is_low(&self) -> bool {
            self.0
        }
    }

    struct RecordingUart {
        out: RefCell<Vec<u8>>,
    }
    impl Uart for RecordingUart {
        fn read(&mut self) -> nb::Result<u8, core::convert::Infallible> {
            Err(nb::Error::WouldBlock)
        }
        fn write(&mut self, byte: u8) -> nb::Result<(), core::convert::Infallible> {
            self.out.borrow_mut().push(byte);
            Ok(())
        }
    }

    fn fresh() -> (Orchestrator<64>, Arena<64>, RecordingPin, FixedInput, RecordingUart) {
        (
            Orchestrator::new(5000),
            Arena::new(),
            RecordingPin { low: false },
            FixedInput(false), // reset sense reads high: reset succeeded
            RecordingUart { out: RefCell::new(Vec::new()) },
        )
    }

    fn run_to_steady(o: &mut Orchestrator<64>, arena: &mut Arena<64>, pin: &mut RecordingPin, sense: &FixedInput, uart: &mut RecordingUart) {
        let mut now = 0u32;
        for _ in 0..8 {
            o.process(now, pin, sense, uart, arena, 8, 16);
            now += SLAVE_RESET_LOW_MS + 10;
        }
    }

    #[test]
    fn bring_up_reaches_slave_translate_and_claims_arena() {
        let (mut o, mut arena, mut pin, sense, mut uart) = fresh();
        run_to_steady(&mut o, &mut arena, &mut pin, &sense, &mut uart);
        assert_eq!(o.state(), OrchestratorState::SlaveTranslate);
        assert_eq!(arena.free_offset_words(), round_up_words(8));
        assert!(!o.status().slave_reset_failed());
    }

    #[test]
    fn reset_sense_still_low_latches_failed_flag_but_continues() {
        let (mut o, mut arena, mut pin, _sense, mut uart) = fresh();
        let sense = FixedInput(true); // still low after release: reset failed
        run_to_steady(&mut o, &mut arena, &mut pin, &sense, &mut uart);
        assert_eq!(o.state(), OrchestratorState::SlaveTranslate);
        assert!(o.status().slave_reset_failed());
    }

    #[test]
    fn mode_switch_deactivates_then_reactivates_other_mode() {
        let (mut o, mut arena, mut pin, sense, mut uart) = fresh();
        run_to_steady(&mut o, &mut arena, &mut pin, &sense, &mut uart);
        o.request_mode_switch(ModeRequest::Update, &mut arena);
        assert_eq!(arena.free_offset_words(), 0);
        let transition = o.process(1_000_000, &mut pin, &sense, &mut uart, &mut arena, 8, 16);
        assert_eq!(transition, ModeTransition::ActivatedUpdate);
        assert_eq!(o.state(), OrchestratorState::SlaveUpdate);
        assert_eq!(arena.free_offset_words(), round_up_words(16));
    }

    #[test]
    fn activation_over_capacity_faults_and_resets_arena() {
        let mut o: Orchestrator<2> = Orchestrator::new(5000);
        let mut arena: Arena<2> = Arena::new();
        let mut pin = RecordingPin { low: false };
        let sense = FixedInput(false);
        let mut uart = RecordingUart { out: RefCell::new(Vec::new()) };
        let mut now = 0u32;
        for _ in 0..8 {
            let transition = o.process(now, &mut pin, &sense, &mut uart, &mut arena, 1000, 16);
            if transition == ModeTransition::Faulted {
                break;
            }
            now += SLAVE_RESET_LOW_MS + 10;
        }
        assert_eq!(o.state(), OrchestratorState::SlaveTranslateFailed);
        assert_eq!(arena.free_offset_words(), 0);
    }

    #[test]
    fn fault_state_emits_periodic_diagnostic() {
        let mut o: Orchestrator<2> = Orchestrator::new(100);
        let mut arena: Arena<2> = Arena::new();
        let mut pin = RecordingPin { low: false };
        let sense = FixedInput(false);
        let mut uart = RecordingUart { out: RefCell::new(Vec::new()) };
        o.fail_host_comm(0);
        o.process(0, &mut pin, &sense, &mut uart, &mut arena, 8, 16);
        assert!(uart.out.borrow().is_empty());
        o.process(150, &mut pin, &sense, &mut uart, &mut arena, 8, 16);
        assert!(!uart.out.borrow().is_empty());
    }
}

//! Trait seam onto the collaborators this crate treats as out of scope
//! (§1): UART/I2C/IRQ/GPIO register programming, the millisecond tick
//! counter, and raw debug/diagnostic output. The rest of the crate is
//! generic over these traits instead of depending on a concrete MCU HAL,
//! keeping driver code behind small traits rather than inlining PAC
//! types.

use bitbybit::bitfield;

/// Non-blocking byte-oriented UART, used for both the framed host
/// protocol and (in a fault state) raw diagnostic output.
pub trait Uart {
    /// Non-blocking single-byte read. `Err(nb::Error::WouldBlock)` when
    /// no byte is available.
    fn read(&mut self) -> nb::Result<u8, core::convert::Infallible>;

    /// Non-blocking single-byte write. `Err(nb::Error::WouldBlock)` when
    /// the transmit path is not ready.
    fn write(&mut self, byte: u8) -> nb::Result<(), core::convert::Infallible>;

    /// Blocks until every byte in `bytes` has been accepted by `write`.
    /// Used for the fault-state diagnostic line (§7) and is the only
    /// place this crate blocks on the UART.
    fn write_all_blocking(&mut self, bytes: &[u8]) {
        for &b in bytes {
            while self.write(b).is_err() {}
        }
    }
}

/// Direction of a transfer queue element's I2C transaction (§3, §4.G).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cDirection {
    Write,
    Read,
}

/// Low-level I2C master driver status, read-and-cleared after every call
/// (§4.F "driver status translation"). One bit per condition so more than
/// one can be reported together, as the component design requires.
#[bitfield(u8, default = 0x00)]
#[derive(Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DriverStatus {
    #[bit(0, rw)]
    pub addr_nak: bool,
    #[bit(1, rw)]
    pub data_nak: bool,
    #[bit(2, rw)]
    pub bus_busy: bool,
    #[bit(3, rw)]
    pub not_ready: bool,
    #[bit(4, rw)]
    pub arbitration_lost: bool,
    #[bit(5, rw)]
    pub other_error: bool,
}

impl DriverStatus {
    /// True if any bit other than `bus_busy`/`not_ready` is set — these
    /// two are handled by the locked-bus state machine, everything else
    /// maps straight to `driverError` (§4.F).
    pub fn is_hard_error(&self) -> bool {
        self.other_error() || self.arbitration_lost() || self.data_nak()
    }
}

/// Non-blocking I2C master, driven by the §4.F communication FSM.
///
/// Submission and polling are split so the FSM can interleave waiting on
/// the bus with servicing other states (§4.F "Purpose"). A transfer is
/// "in flight" from `start_write`/`start_read` until `poll_write`/
/// `poll_read` stops returning `WouldBlock`.
pub trait I2cBus {
    fn start_write(&mut self, addr: u8, data: &[u8]);
    fn start_read(&mut self, addr: u8, len: usize);

    /// Polls a previously-started write. Must be called until it returns
    /// `Ok(())` or an error.
    fn poll_write(&mut self) -> nb::Result<(), ()>;

    /// Polls a previously-started read, writing received bytes into
    /// `buf[..len]` where `len` was passed to `start_read`. Returns the
    /// number of bytes written once complete.
    fn poll_read(&mut self, buf: &mut [u8]) -> nb::Result<usize, ()>;

    /// Reads and clears the driver status register (§4.F).
    fn take_status(&mut self) -> DriverStatus;

    /// Stops the peripheral, clears its status, and reinitializes it —
    /// used only by locked-bus recovery (§4.F).
    fn reinit(&mut self);
}

/// Monotonic millisecond tick counter (out of scope per §1; the bridge
/// only ever reads it).
pub trait TickSource {
    fn now_ms(&self) -> u32;
}

/// A GPIO output pin, used for the open-drain slave-reset line (§4.J,
/// §6).
pub trait OutputPin {
    fn set_low(&mut self);
    fn set_high(&mut self);
}

/// A GPIO input pin, used to read back the slave-reset line and the
/// slave IRQ line (§6).
pub trait InputPin {
    fn is_low(&self) -> bool;
}

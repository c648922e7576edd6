//! Compiled-in defaults for every tunable named in §4/§7, plus the
//! runtime `BridgeConfig` builder that can override the timing-related
//! ones. Buffer/ring capacities stay `const` (they size fixed arrays),
//! keeping shape type-level while exposing runtime knobs (timeouts,
//! retry counts) through a small `with_*` builder.

/// §4.E "Inter-byte timeout" default.
pub const RX_RESET_TIMEOUT_MS_DEFAULT: u32 = 2000;
/// §4.F step 2: `[command, length]`.
pub const APP_RX_PACKET_LENGTH_SIZE: usize = 2;
/// §8 "Locked-bus detection" / §4.F `DetectTimeoutMs`.
pub const DETECT_TIMEOUT_MS_DEFAULT: u32 = 100;
/// §4.F locked-bus recovery default max attempts.
pub const MAX_RECOVERY_ATTEMPTS_DEFAULT: u32 = 10;
/// §4.J / §7 fault-state diagnostic period default.
pub const ERROR_MESSAGE_PERIOD_MS_DEFAULT: u32 = 5000;
/// §4.J slave-reset pulse width.
pub const SLAVE_RESET_LOW_MS: u32 = 100;
/// §4.I minimum sub-chunk size (14-byte header + 8-byte minimum payload).
pub const MIN_UPDATE_SUBCHUNK_SIZE: usize = 22;
/// §4.I adjustment applied when the host requests a sub-chunk size below
/// the minimum.
pub const UPDATE_SUBCHUNK_SIZE_BUMP: usize = 256;

/// Arena capacity in 32-bit words (implementer choice — §2 component D).
pub const HEAP_WORDS: usize = 1024;

/// Translate-mode: max host-frame / response payload (§4.E).
pub const TRANSLATE_MAX_PAYLOAD: usize = 64;
/// Translate-mode: decoded-RX and outbound packet-queue depth (§3, §4.B).
pub const TRANSLATE_RX_QUEUE_ELEMS: usize = 8;
pub const TRANSLATE_TX_QUEUE_ELEMS: usize = 8;
/// Worst case: every payload byte escaped (`2x`), plus SOF/marker(3)/EOF.
pub const TRANSLATE_TX_SLOT_CAP: usize = 2 * TRANSLATE_MAX_PAYLOAD + 6;
/// Component G: pending master-side transfers. Each element is a header
/// byte (packed addr/dir) plus write data (or the single read-length
/// byte). Shared by both modes, so it's sized for update mode's larger
/// sub-chunks (§4.I), not just translate mode's `TRANSLATE_MAX_PAYLOAD`.
pub const TRANSFER_QUEUE_ELEMS: usize = 8;
pub const TRANSFER_SLOT_CAP: usize = UPDATE_MAX_SUBCHUNK + 1;
/// §4.F max bytes read in one IRQ-triggered inbound read (length byte is
/// `u8`, so 255 is the true ceiling; this is the buffer we size for it).
pub const I2C_RX_BUFFER_CAP: usize = 255;

/// Update-mode: max sub-chunk size this firmware is willing to buffer.
/// Must cover the worst-case bumped size (§4.I): a requested size just
/// under `MIN_UPDATE_SUBCHUNK_SIZE` gets `UPDATE_SUBCHUNK_SIZE_BUMP`
/// added, so the ceiling is `(MIN_UPDATE_SUBCHUNK_SIZE - 1) +
/// UPDATE_SUBCHUNK_SIZE_BUMP` = 277, rounded up.
pub const UPDATE_MAX_SUBCHUNK: usize = 280;
pub const UPDATE_RX_QUEUE_ELEMS: usize = 4;
pub const UPDATE_TX_QUEUE_ELEMS: usize = 4;

/// §4.I "written to the slave bootloader at a fixed address" — the
/// slave bootloader protocol itself is out of scope (§1), so this is
/// the one address it's addressed at, an otherwise-unconstrained
/// implementer choice.
pub const BOOTLOADER_I2C_ADDR: u8 = 0x55;
/// Bytes read back to drain the bootloader's per-sub-chunk response.
pub const BOOTLOADER_DRAIN_LEN: u8 = 1;
/// §4.I sub-chunk header: `code(1) + command(1) + key(8)`.
pub const SUBCHUNK_HEADER_LEN: usize = 10;

/// Runtime-overridable tunables (§4, §7). Buffer capacities above stay
/// compile-time `const` because they size fixed arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BridgeConfig {
    pub rx_reset_timeout_ms: u32,
    pub detect_timeout_ms: u32,
    pub max_recovery_attempts: u32,
    pub error_message_period_ms: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            rx_reset_timeout_ms: RX_RESET_TIMEOUT_MS_DEFAULT,
            detect_timeout_ms: DETECT_TIMEOUT_MS_DEFAULT,
            max_recovery_attempts: MAX_RECOVERY_ATTEMPTS_DEFAULT,
            error_message_period_ms: ERROR_MESSAGE_PERIOD_MS_DEFAULT,
        }
    }
}

impl BridgeConfig {
    pub const fn new() -> Self {
        Self {
            rx_reset_timeout_ms: RX_RESET_TIMEOUT_MS_DEFAULT,
            detect_timeout_ms: DETECT_TIMEOUT_MS_DEFAULT,
            max_recovery_attempts: MAX_RECOVERY_ATTEMPTS_DEFAULT,
            error_message_period_ms: ERROR_MESSAGE_PERIOD_MS_DEFAULT,
        }
    }

    pub const fn with_rx_reset_timeout_ms(mut self, ms: u32) -> Self {
        self.rx_reset_timeout_ms = ms;
        self
    }

    pub const fn with_detect_timeout_ms(mut self, ms: u32) -> Self {
        self.detect_timeout_ms = ms;
        self
    }

    pub const fn with_max_recovery_attempts(mut self, n: u32) -> Self {
        self.max_recovery_attempts = n;
        self
    }

    pub const fn with_error_message_period_ms(mut self, ms: u32) -> Self {
        self.error_message_period_ms = ms;
        self
    }
}

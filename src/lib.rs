//! Firmware core for a UART-to-I2C bridge microcontroller.
//!
//! A host speaks a byte-stuffed framing protocol over UART; this crate
//! decodes it, drives a single I2C slave through a non-blocking
//! transfer queue, and re-encodes replies back onto the UART. A second
//! protocol dialect lets the host push firmware sub-chunks through to
//! an I2C-attached bootloader ("update mode"); the two dialects never
//! run at once, arbitrated by [`orchestrator`]'s bring-up/steady-state
//! FSM. [`bridge::Bridge`] is the single value a user of this crate
//! owns; everything else is a component it wires together.
//!
//! This crate has no opinion on the MCU it runs on — [`hal`] is the
//! trait boundary a board support crate implements (`Uart`, `I2cBus`,
//! `OutputPin`, `InputPin`) in place of concrete register access.
#![cfg_attr(not(test), no_std)]

pub mod arena;
pub mod bridge;
pub mod codec;
pub mod config;
pub mod error;
pub mod hal;
pub mod i2c_fsm;
pub mod orchestrator;
pub mod queue;
pub mod time;
pub mod transfer_queue;
pub mod translate;
pub mod update;

pub use bridge::Bridge;
pub use config::BridgeConfig;
pub use error::{Callsite, StatusFlags};
pub use hal::{DriverStatus, I2cBus, I2cDirection, InputPin, OutputPin, TickSource, Uart};
pub use orchestrator::OrchestratorState;

//! Upper MAC of a dual-processor 802.11 access point.
//!
//! The MAC is split across two CPUs: MAC-LOW owns all PHY timing,
//! this crate is MAC-HIGH, the management and data plane. The two
//! cooperate through 32 shared packet buffer slots guarded by a
//! hardware mutex core and a framed message protocol over a bounded
//! word mailbox.
//!
//! The crate is hardware-independent: the mailbox, the mutex core,
//! the slot memory, the countdown timers and the Ethernet MAC enter
//! through the traits in [`hal`], which also makes the whole control
//! drivable by the host-run unit tests.
//!
//! Data flow in one line each way:
//!
//! - Ethernet RX → low priority queue → egress copy into the current
//!   TX slot → `TX_MPDU_READY` → MAC-LOW
//! - MAC-LOW → `RX_MPDU_READY` → receive state machine → association
//!   table update and/or management reply at high priority

#![no_std]

// EXTERNAL CRATES
extern crate alloc;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[cfg(test)]
#[macro_use]
extern crate std;

pub mod ap;
pub mod assoc;
pub mod config;
pub mod event;
pub mod hal;
pub mod ipc;
pub mod pktbuf;
pub mod queue;
pub mod scheduler;
pub mod wire;

pub use crate::ap::{ApConfig, MacError, MacHigh, TimerEvent};
pub use crate::event::{EventQueue, IrqEvent};

//! Hardware seams of the upper MAC.
//!
//! MAC-HIGH touches five devices: the inter-processor mailbox, the
//! packet buffer mutex core, the shared packet buffer memory, two
//! one-shot countdown timers and the wired Ethernet MAC. Each is
//! modeled as a trait so the MAC core stays independent of the
//! interconnect and can be driven by mock devices in tests.

use core::ptr::NonNull;

use thiserror::Error;

use crate::assoc::StationInfo;
use crate::config::PKT_BUF_SIZE;
use crate::wire::PhyRate;

/// Blocking, bounded, word-oriented inter-processor mailbox.
///
/// Words written by one CPU are read by the other in FIFO order.
pub trait Mailbox {
	/// Attempts to read one word without blocking.
	fn try_read(&mut self) -> Option<u32>;

	/// Reads one word, blocking until one is available.
	fn read_blocking(&mut self) -> u32;

	/// Writes one word, blocking while the mailbox is full.
	fn write_blocking(&mut self, word: u32);

	/// Discards all words currently buffered for this receiver.
	fn flush(&mut self);
}

/// Lock state of one hardware mutex, for diagnostics.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MutexStatus {
	pub locked: bool,
	pub owner: u32,
}

/// Hardware mutex core guarding the shared packet buffers.
///
/// Ids are flat across both slot classes, see
/// [`PKT_BUF_MUTEX_TX_BASE`](crate::config::PKT_BUF_MUTEX_TX_BASE) and
/// [`PKT_BUF_MUTEX_RX_BASE`](crate::config::PKT_BUF_MUTEX_RX_BASE).
/// Only try-lock is offered; a blocking acquire could deadlock
/// MAC-HIGH against a slot MAC-LOW is actively processing.
pub trait PktBufMutex {
	/// Attempts to take mutex `id`. Returns `false` if it is held.
	fn try_lock(&mut self, id: u8) -> bool;

	/// Releases mutex `id`. Returns `false` if the caller is not the
	/// current owner.
	fn unlock(&mut self, id: u8) -> bool;

	fn status(&self, id: u8) -> MutexStatus;
}

/// Shared packet buffer memory, addressed by slot index.
///
/// # Safety
///
/// Implementors must return pointers to `PKT_BUF_SIZE`-byte regions
/// that are valid for the lifetime of the implementor, mutually
/// disjoint, and shared with MAC-LOW only under the ownership
/// protocol enforced by the mutex core.
pub unsafe trait SharedPktMem {
	/// Base of TX slot `index`. `index < NUM_TX_PKT_BUFS`.
	fn tx_slot(&self, index: usize) -> NonNull<[u8; PKT_BUF_SIZE]>;

	/// Base of RX slot `index`. `index < NUM_RX_PKT_BUFS`.
	fn rx_slot(&self, index: usize) -> NonNull<[u8; PKT_BUF_SIZE]>;
}

/// One-shot countdown timer backing a scheduler wheel.
pub trait OneShotTimer {
	/// Arms the timer to fire once after `duration_us` microseconds.
	/// Re-arming an armed timer restarts the countdown.
	fn arm(&mut self, duration_us: u32);

	fn stop(&mut self);
}

/// Source of the 64-bit microsecond MAC timestamp.
pub trait Clock {
	fn now_usec(&self) -> u64;
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum EthError {
	#[error("ethernet link is down")]
	LinkDown,
	#[error("transmit resources exhausted")]
	Exhausted,
	#[error("frame exceeds the device MTU")]
	Oversized,
}

/// Wired Ethernet MAC on the distribution system side.
pub trait EthDevice {
	/// Copies the next received frame into `buf` and returns its
	/// length, or `None` if nothing is pending.
	fn recv(&mut self, buf: &mut [u8]) -> Option<usize>;

	fn send(&mut self, frame: &[u8]) -> Result<(), EthError>;
}

/// Transmit rate selection hook.
///
/// Called once per unicast MPDU submission; a rate adaptation layer
/// can use the per-station counters to steer this.
pub trait RateSelect {
	fn tx_rate(&self, station: &StationInfo) -> PhyRate;
}

/// Default policy: use the rate recorded in the station entry.
pub struct StationRate;

impl RateSelect for StationRate {
	fn tx_rate(&self, station: &StationInfo) -> PhyRate {
		station.tx_rate
	}
}

/// The full set of devices MAC-HIGH is built on.
pub trait Platform {
	type Mailbox: Mailbox;
	type PktMutex: PktBufMutex;
	type PktMem: SharedPktMem;
	type Timer: OneShotTimer;
	type Clock: Clock;
	type Eth: EthDevice;
	type Rate: RateSelect;
}

/// Device handles handed to [`MacHigh::new`](crate::ap::MacHigh::new).
pub struct Devices<P: Platform> {
	pub mailbox: P::Mailbox,
	pub pkt_mutex: P::PktMutex,
	pub pkt_mem: P::PktMem,
	pub fine_timer: P::Timer,
	pub coarse_timer: P::Timer,
	pub clock: P::Clock,
	pub eth: P::Eth,
	pub rate: P::Rate,
}

//! Shared packet buffer slots and their arbiter.
//!
//! 16 TX and 16 RX slots of 4 KiB live in shared memory between the
//! two MAC processors. Each slot starts with a frame info header,
//! followed by the PHY pre-header pad and the frame itself. A slot has
//! exactly one logical owner at a time, named by the holder of its
//! hardware mutex; the arbiter maps slot indices onto the flat mutex
//! id space and enforces the index bounds.

use core::ptr::NonNull;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::config::{
	NUM_RX_PKT_BUFS, NUM_TX_PKT_BUFS, PHY_HDR_PAD, PKT_BUF_MUTEX_RX_BASE, PKT_BUF_MUTEX_TX_BASE,
	PKT_BUF_SIZE,
};
use crate::hal::{MutexStatus, PktBufMutex, SharedPktMem};
use crate::wire::PhyRate;

pub const TX_FRAME_INFO_LEN: usize = 16;
pub const RX_FRAME_INFO_LEN: usize = 16;

/// Offset of the MPDU within a slot: frame info, then PHY pad.
pub const PKT_BUF_MPDU_OFFSET: usize = TX_FRAME_INFO_LEN + PHY_HDR_PAD;

/// Largest MPDU a slot can carry.
pub const MAX_MPDU_LEN: usize = PKT_BUF_SIZE - PKT_BUF_MPDU_OFFSET;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum PktBufError {
	#[error("packet buffer index out of range")]
	InvalidIndex,
	#[error("packet buffer is locked by the other CPU")]
	AlreadyLocked,
	#[error("packet buffer lock is not held by this CPU")]
	NotLockOwner,
}

/// TX slot lifecycle. `TxPending` slots are owned by MAC-HIGH,
/// `Ready` slots have been handed to MAC-LOW via IPC.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TxSlotState {
	#[default]
	Empty = 0,
	TxPending = 1,
	Ready = 2,
}

/// Transmission outcome reported by MAC-LOW in `state_verbose`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum TxOutcome {
	Success = 0,
	#[default]
	Failure = 1,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RxSlotState {
	#[default]
	Empty = 0,
	RxPending = 1,
	FcsGood = 2,
}

bitflags! {
	/// Per-frame requests to the MAC-LOW transmit path.
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
	pub struct TxFlags: u8 {
		/// Expect an ACK and retransmit on timeout.
		const REQ_TO = 0x01;
		/// Stamp the MAC timestamp field at the antenna.
		const FILL_TIMESTAMP = 0x02;
		/// Compute and fill the duration field.
		const FILL_DURATION = 0x04;
	}
}

/// Header of a TX slot and of every queue descriptor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TxFrameInfo {
	pub state: TxSlotState,
	pub rate: PhyRate,
	pub length: u16,
	pub flags: TxFlags,
	pub retry_count: u8,
	pub retry_max: u8,
	pub state_verbose: TxOutcome,
	pub aid: u16,
}

impl Default for TxFrameInfo {
	fn default() -> Self {
		Self {
			state: TxSlotState::Empty,
			rate: PhyRate::Bpsk12,
			length: 0,
			flags: TxFlags::empty(),
			retry_count: 0,
			retry_max: 0,
			state_verbose: TxOutcome::Success,
			aid: 0,
		}
	}
}

impl TxFrameInfo {
	pub fn write_to(&self, buf: &mut [u8]) {
		buf[..TX_FRAME_INFO_LEN].fill(0);
		buf[0] = self.state.into();
		buf[1] = self.rate.into();
		buf[2..4].copy_from_slice(&self.length.to_le_bytes());
		buf[4] = self.flags.bits();
		buf[5] = self.retry_count;
		buf[6] = self.retry_max;
		buf[7] = self.state_verbose.into();
		buf[8..10].copy_from_slice(&self.aid.to_le_bytes());
	}

	/// Decodes a header written by either CPU. Unknown discriminants
	/// fall back to the conservative variant instead of poisoning the
	/// slot.
	pub fn from_bytes(buf: &[u8]) -> Self {
		Self {
			state: TxSlotState::try_from(buf[0]).unwrap_or_default(),
			rate: PhyRate::try_from(buf[1]).unwrap_or(PhyRate::Bpsk12),
			length: u16::from_le_bytes([buf[2], buf[3]]),
			flags: TxFlags::from_bits_truncate(buf[4]),
			retry_count: buf[5],
			retry_max: buf[6],
			state_verbose: TxOutcome::try_from(buf[7]).unwrap_or_default(),
			aid: u16::from_le_bytes([buf[8], buf[9]]),
		}
	}
}

/// Header of an RX slot, written by MAC-LOW.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RxFrameInfo {
	pub state: RxSlotState,
	pub rate: PhyRate,
	pub length: u16,
	pub rssi: u16,
}

impl RxFrameInfo {
	pub fn write_to(&self, buf: &mut [u8]) {
		buf[..RX_FRAME_INFO_LEN].fill(0);
		buf[0] = self.state.into();
		buf[1] = self.rate.into();
		buf[2..4].copy_from_slice(&self.length.to_le_bytes());
		buf[4..6].copy_from_slice(&self.rssi.to_le_bytes());
	}

	pub fn from_bytes(buf: &[u8]) -> Self {
		Self {
			state: RxSlotState::try_from(buf[0]).unwrap_or_default(),
			rate: PhyRate::try_from(buf[1]).unwrap_or(PhyRate::Bpsk12),
			length: u16::from_le_bytes([buf[2], buf[3]]),
			rssi: u16::from_le_bytes([buf[4], buf[5]]),
		}
	}
}

impl Default for RxFrameInfo {
	fn default() -> Self {
		Self {
			state: RxSlotState::Empty,
			rate: PhyRate::Bpsk12,
			length: 0,
			rssi: 0,
		}
	}
}

/// Arbiter over the shared slots: couples the hardware mutex core
/// with the slot memory and validates all indices.
///
/// Locking is try-only. RX slots are handed out as [`RxSlot`] guards
/// whose drop performs the unlock, so a guard can never outlive the
/// handler invocation that took it. The current TX slot is held
/// across main-loop iterations, so the TX side keeps the explicit
/// `lock_tx`/`unlock_tx` pairing and hands out scoped [`TxSlotView`]s.
pub struct PktBufArbiter<X: PktBufMutex, S: SharedPktMem> {
	mutex: X,
	mem: S,
}

impl<X: PktBufMutex, S: SharedPktMem> PktBufArbiter<X, S> {
	pub fn new(mutex: X, mem: S) -> Self {
		Self { mutex, mem }
	}

	pub fn lock_tx(&mut self, index: u8) -> Result<(), PktBufError> {
		if usize::from(index) >= NUM_TX_PKT_BUFS {
			return Err(PktBufError::InvalidIndex);
		}

		if self.mutex.try_lock(PKT_BUF_MUTEX_TX_BASE + index) {
			Ok(())
		} else {
			Err(PktBufError::AlreadyLocked)
		}
	}

	pub fn unlock_tx(&mut self, index: u8) -> Result<(), PktBufError> {
		if usize::from(index) >= NUM_TX_PKT_BUFS {
			return Err(PktBufError::InvalidIndex);
		}

		if self.mutex.unlock(PKT_BUF_MUTEX_TX_BASE + index) {
			Ok(())
		} else {
			Err(PktBufError::NotLockOwner)
		}
	}

	pub fn status_tx(&self, index: u8) -> Result<MutexStatus, PktBufError> {
		if usize::from(index) >= NUM_TX_PKT_BUFS {
			return Err(PktBufError::InvalidIndex);
		}

		Ok(self.mutex.status(PKT_BUF_MUTEX_TX_BASE + index))
	}

	/// Locks RX slot `index`. Dropping the returned guard unlocks it.
	pub fn lock_rx(&mut self, index: u8) -> Result<RxSlot<'_, X>, PktBufError> {
		if usize::from(index) >= NUM_RX_PKT_BUFS {
			return Err(PktBufError::InvalidIndex);
		}

		let Self { mutex, mem } = self;
		if !mutex.try_lock(PKT_BUF_MUTEX_RX_BASE + index) {
			return Err(PktBufError::AlreadyLocked);
		}

		Ok(RxSlot {
			mutex,
			index,
			buf: mem.rx_slot(usize::from(index)),
		})
	}

	pub fn status_rx(&self, index: u8) -> Result<MutexStatus, PktBufError> {
		if usize::from(index) >= NUM_RX_PKT_BUFS {
			return Err(PktBufError::InvalidIndex);
		}

		Ok(self.mutex.status(PKT_BUF_MUTEX_RX_BASE + index))
	}

	/// Scoped view into TX slot `index`.
	///
	/// The arbiter cannot tell whether the caller holds the slot; the
	/// ownership protocol of §TX lifecycle is the callers contract.
	pub fn tx_slot(&mut self, index: u8) -> Result<TxSlotView<'_>, PktBufError> {
		if usize::from(index) >= NUM_TX_PKT_BUFS {
			return Err(PktBufError::InvalidIndex);
		}

		// Valid per the SharedPktMem contract; exclusive per the slot
		// ownership protocol and the &mut borrow of the arbiter.
		let buf = unsafe { &mut *self.mem.tx_slot(usize::from(index)).as_ptr() };
		Ok(TxSlotView { buf })
	}
}

/// Mutable view into one TX slot.
pub struct TxSlotView<'a> {
	buf: &'a mut [u8; PKT_BUF_SIZE],
}

impl TxSlotView<'_> {
	pub fn frame_info(&self) -> TxFrameInfo {
		TxFrameInfo::from_bytes(&self.buf[..TX_FRAME_INFO_LEN])
	}

	pub fn set_frame_info(&mut self, info: &TxFrameInfo) {
		info.write_to(&mut self.buf[..TX_FRAME_INFO_LEN]);
	}

	pub fn set_state(&mut self, state: TxSlotState) {
		self.buf[0] = state.into();
	}

	pub fn mpdu(&self, length: u16) -> &[u8] {
		let length = usize::from(length).min(MAX_MPDU_LEN);
		&self.buf[PKT_BUF_MPDU_OFFSET..PKT_BUF_MPDU_OFFSET + length]
	}

	/// The egress bulk copy: frame info header, zeroed PHY pad and
	/// the frame bytes in one pass.
	pub fn fill(&mut self, info: &TxFrameInfo, frame: &[u8]) {
		let length = frame.len().min(MAX_MPDU_LEN);
		self.set_frame_info(info);
		self.buf[TX_FRAME_INFO_LEN..PKT_BUF_MPDU_OFFSET].fill(0);
		self.buf[PKT_BUF_MPDU_OFFSET..PKT_BUF_MPDU_OFFSET + length]
			.copy_from_slice(&frame[..length]);
	}
}

/// Capability for one locked RX slot. Dropping it releases the
/// hardware mutex; it is never held across the return from the RX
/// handler.
pub struct RxSlot<'a, X: PktBufMutex> {
	mutex: &'a mut X,
	index: u8,
	buf: NonNull<[u8; PKT_BUF_SIZE]>,
}

impl<X: PktBufMutex> RxSlot<'_, X> {
	pub fn index(&self) -> u8 {
		self.index
	}

	fn bytes(&self) -> &[u8; PKT_BUF_SIZE] {
		// Valid per the SharedPktMem contract; MAC-LOW released the
		// slot before signalling RX_MPDU_READY and the mutex is held.
		unsafe { self.buf.as_ref() }
	}

	pub fn frame_info(&self) -> RxFrameInfo {
		RxFrameInfo::from_bytes(&self.bytes()[..RX_FRAME_INFO_LEN])
	}

	pub fn set_state(&mut self, state: RxSlotState) {
		// See bytes(); the &mut receiver keeps this exclusive.
		let buf = unsafe { self.buf.as_mut() };
		buf[0] = state.into();
	}

	pub fn mpdu(&self, length: u16) -> &[u8] {
		let length = usize::from(length).min(MAX_MPDU_LEN);
		&self.bytes()[PKT_BUF_MPDU_OFFSET..PKT_BUF_MPDU_OFFSET + length]
	}
}

impl<X: PktBufMutex> Drop for RxSlot<'_, X> {
	fn drop(&mut self) {
		if !self.mutex.unlock(PKT_BUF_MUTEX_RX_BASE + self.index) {
			error!("lost ownership of rx pkt_buf {} while holding it", self.index);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::hal::mock::{TestMutex, TestPktMem};

	fn arbiter() -> PktBufArbiter<TestMutex, TestPktMem> {
		PktBufArbiter::new(TestMutex::default(), TestPktMem::default())
	}

	#[test]
	fn indices_are_validated() {
		let mut arb = arbiter();
		assert_eq!(arb.lock_tx(16), Err(PktBufError::InvalidIndex));
		assert_eq!(arb.unlock_tx(200), Err(PktBufError::InvalidIndex));
		assert!(arb.lock_rx(16).is_err());
		assert_eq!(arb.status_rx(16).unwrap_err(), PktBufError::InvalidIndex);
	}

	#[test]
	fn tx_lock_is_try_only() {
		let mut arb = arbiter();
		assert_eq!(arb.lock_tx(3), Ok(()));
		assert_eq!(arb.lock_tx(3), Err(PktBufError::AlreadyLocked));
		assert!(arb.status_tx(3).unwrap().locked);
		assert_eq!(arb.unlock_tx(3), Ok(()));
		assert_eq!(arb.unlock_tx(3), Err(PktBufError::NotLockOwner));
	}

	#[test]
	fn rx_guard_unlocks_on_drop() {
		let mut arb = arbiter();
		{
			let mut slot = arb.lock_rx(5).unwrap();
			slot.set_state(RxSlotState::Empty);
		}
		// Empty at rest implies unlocked.
		assert!(!arb.status_rx(5).unwrap().locked);
		assert!(arb.lock_rx(5).is_ok());
	}

	#[test]
	fn rx_and_tx_mutex_ids_do_not_overlap() {
		let mut arb = arbiter();
		assert_eq!(arb.lock_tx(0), Ok(()));
		// RX slot 0 maps to mutex id 16 and stays available.
		assert!(arb.lock_rx(0).is_ok());
	}

	#[test]
	fn frame_info_round_trip() {
		let info = TxFrameInfo {
			state: TxSlotState::Ready,
			rate: PhyRate::Qpsk34,
			length: 1432,
			flags: TxFlags::REQ_TO | TxFlags::FILL_DURATION,
			retry_count: 2,
			retry_max: 7,
			state_verbose: TxOutcome::Success,
			aid: 3,
		};

		let mut buf = [0xA5u8; TX_FRAME_INFO_LEN];
		info.write_to(&mut buf);
		assert_eq!(TxFrameInfo::from_bytes(&buf), info);
	}

	#[test]
	fn unknown_state_bytes_decode_conservatively() {
		let mut buf = [0u8; TX_FRAME_INFO_LEN];
		buf[0] = 0x7F;
		buf[7] = 0x7F;
		let info = TxFrameInfo::from_bytes(&buf);
		assert_eq!(info.state, TxSlotState::Empty);
		assert_eq!(info.state_verbose, TxOutcome::Failure);
	}

	#[test]
	fn slot_fill_places_mpdu_after_phy_pad() {
		let mut arb = arbiter();
		let mut slot = arb.tx_slot(1).unwrap();
		let frame = [0xEEu8; 100];
		let info = TxFrameInfo {
			state: TxSlotState::Ready,
			length: frame.len() as u16,
			..TxFrameInfo::default()
		};

		slot.fill(&info, &frame);
		assert_eq!(slot.frame_info().length, 100);
		assert_eq!(slot.mpdu(100), &frame);
	}
}

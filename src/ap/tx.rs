//! Egress pipeline and the TX handshake with MAC-LOW, plus the
//! periodic transmit tasks (beacon, association timeout).
//!
//! Two TX slots form a double buffer. At any moment MAC-HIGH owns
//! exactly one slot in `TxPending`; `WAIT_FOR_IPC_ACCEPT` is clear iff
//! it is free to submit a new frame. Submitting copies one queue
//! descriptor into the slot, hands ownership to MAC-LOW and waits for
//! the matching `TX_MPDU_ACCEPT` before touching the next slot.

use heapless::Vec;
use smoltcp::wire::EthernetAddress;

use super::{MacHigh, TimerEvent};
use crate::config::{
	ASSOCIATION_CHECK_INTERVAL_US, MAX_ASSOCIATIONS, MAX_RETRY, PQUEUE_MAX_FRAME_SIZE,
	TX_BUFFER_NUM,
};
use crate::hal::{Clock, Platform, RateSelect};
use crate::ipc::{Command, CpuStatus, MsgId};
use crate::pktbuf::{TxFlags, TxFrameInfo, TxOutcome, TxSlotState};
use crate::queue::QueuePriority;
use crate::scheduler::Wheel;
use crate::wire::mgmt::{self, ReasonCode};
use crate::wire::{FrameSubtype, PhyRate, WireError};

impl<P: Platform> MacHigh<P> {
	pub(super) fn handle_timer_event(&mut self, event: TimerEvent) {
		match event {
			TimerEvent::BeaconTransmit => self.beacon_transmit(),
			TimerEvent::AssociationCheck => self.association_timestamp_check(),
		}
	}

	pub(super) fn schedule_coarse(&mut self, delay_us: u64, event: TimerEvent) {
		let now = self.clock.now_usec();
		// Overflow is logged by the scheduler and the task is lost;
		// the wheel has a slot per periodic task, so this only
		// happens when an embedder floods the wheel.
		self.scheduler
			.schedule(Wheel::Coarse, now, delay_us, event)
			.ok();
	}

	/// Checks out one descriptor, lets `build` serialize a management
	/// frame into it and queues it at `prio`.
	pub(super) fn enqueue_mgmt<F>(
		&mut self,
		prio: QueuePriority,
		retry_max: u8,
		flags: TxFlags,
		build: F,
	) where
		F: FnOnce(&mut [u8], u16) -> Result<usize, WireError>,
	{
		let mut ring = self.queue.checkout(1);
		let Some(index) = ring.first() else {
			// Queue exhaustion is loggable for management frames.
			warn!("no free queue descriptor, dropping management frame");
			return;
		};

		let seq = self.next_seq();
		let bd = self.queue.bd_mut(index);
		match build(&mut bd.frame, seq) {
			Ok(length) => {
				bd.station = None;
				bd.frame_info = TxFrameInfo {
					length: length as u16,
					flags,
					retry_max,
					..TxFrameInfo::default()
				};
				self.queue.enqueue(prio, &mut ring);
			}
			Err(err) => {
				error!("management frame build failed: {}", err);
				self.queue.checkin(&mut ring);
			}
		}
	}

	/// The periodic beacon task. Queues one beacon at low priority
	/// and re-arms itself.
	pub(super) fn beacon_transmit(&mut self) {
		let bssid = self.mac_addr;
		let channel = self.config.channel;
		let interval = self.config.beacon_interval_ms;
		let ssid = self.config.ssid.clone();

		self.enqueue_mgmt(
			QueuePriority::Low,
			0,
			TxFlags::FILL_TIMESTAMP,
			|frame, seq| {
				mgmt::beacon_probe_frame(
					frame,
					FrameSubtype::Beacon,
					EthernetAddress::BROADCAST,
					bssid,
					seq,
					interval,
					&ssid,
					channel,
				)
			},
		);

		let beacon_interval_us = u64::from(self.config.beacon_interval_ms) * 1000;
		self.schedule_coarse(beacon_interval_us, TimerEvent::BeaconTransmit);
	}

	/// The periodic inactivity check. Stations that have been silent
	/// past the timeout get a de-authentication and are removed.
	pub(super) fn association_timestamp_check(&mut self) {
		let now = self.clock.now_usec();
		let timeout = self.config.association_timeout_us;

		let mut expired: Vec<EthernetAddress, MAX_ASSOCIATIONS> = Vec::new();
		for station in self.assoc.occupied() {
			if now - station.rx_timestamp > timeout {
				expired.push(station.addr).ok();
			}
		}

		let bssid = self.mac_addr;
		for &addr in &expired {
			self.enqueue_mgmt(
				QueuePriority::Low,
				MAX_RETRY,
				TxFlags::FILL_DURATION | TxFlags::REQ_TO,
				|frame, seq| mgmt::deauth_frame(frame, addr, bssid, seq, ReasonCode::Inactivity),
			);
			self.assoc.remove(addr);
		}

		if !expired.is_empty() {
			info!("Disassociation due to inactivity:");
			self.assoc.log_associations(now);
		}

		self.schedule_coarse(ASSOCIATION_CHECK_INTERVAL_US, TimerEvent::AssociationCheck);
	}

	/// Polls the transmit queues for at most one frame, high priority
	/// ring first. The descriptor returns to the free ring afterwards
	/// in every case.
	pub(super) fn poll_tx_queue(&mut self) {
		let mut ring = self.queue.dequeue(QueuePriority::High, 1);
		if ring.is_empty() {
			ring = self.queue.dequeue(QueuePriority::Low, 1);
		}

		if let Some(index) = ring.first() {
			self.mpdu_transmit(index);
		}
		self.queue.checkin(&mut ring);
	}

	/// Whether the current TX slot can take a new frame.
	fn is_tx_buffer_empty(&mut self) -> bool {
		if self.cpu_high_status.contains(CpuStatus::WAIT_FOR_IPC_ACCEPT) {
			return false;
		}

		match self.pkt_bufs.tx_slot(self.tx_pkt_buf) {
			Ok(slot) => slot.frame_info().state == TxSlotState::TxPending,
			Err(_) => false,
		}
	}

	/// Submits one queue descriptor to MAC-LOW: bulk copy into the
	/// current TX slot, AID and rate stamping, ownership transfer via
	/// `TX_MPDU_READY`.
	fn mpdu_transmit(&mut self, bd_index: u16) {
		if !self.is_tx_buffer_empty() {
			error!(
				"bad state in mpdu_transmit: tx_buffer {} is not empty",
				self.tx_pkt_buf
			);
			return;
		}

		// Broadcast frames have no station entry and go out at the
		// nominal rate. A station that disappeared while the frame
		// was queued degrades to the same defaults.
		let (aid, rate) = match self.queue.bd(bd_index).station {
			None => (0, PhyRate::Bpsk12),
			Some(addr) => match self.assoc.find(addr) {
				None => (0, PhyRate::Bpsk12),
				Some(station) => (station.aid, self.rate.tx_rate(station)),
			},
		};

		let tx_pkt_buf = self.tx_pkt_buf;
		let Self {
			queue, pkt_bufs, ..
		} = self;
		let bd = queue.bd(bd_index);
		let length = usize::from(bd.frame_info.length).min(PQUEUE_MAX_FRAME_SIZE);
		let info = TxFrameInfo {
			state: TxSlotState::Ready,
			rate,
			retry_count: 0,
			state_verbose: TxOutcome::Success,
			aid,
			..bd.frame_info
		};

		// The bulk copy into the slot; synchronous from this CPU's
		// point of view whether the platform backs it with a DMA
		// engine or a memcpy.
		match pkt_bufs.tx_slot(tx_pkt_buf) {
			Ok(mut slot) => slot.fill(&info, &bd.frame[..length]),
			Err(err) => {
				error!("no view into tx pkt_buf {}: {}", tx_pkt_buf, err);
				return;
			}
		}

		if self.pkt_bufs.unlock_tx(self.tx_pkt_buf).is_err() {
			error!("unable to unlock tx pkt_buf {}", self.tx_pkt_buf);
			return;
		}

		self.cpu_high_status |= CpuStatus::WAIT_FOR_IPC_ACCEPT;
		if self
			.ipc
			.write(MsgId::command(Command::TxMpduReady), self.tx_pkt_buf, &[])
			.is_err()
		{
			error!("unable to signal TX_MPDU_READY for slot {}", self.tx_pkt_buf);
		}
	}

	/// MAC-LOW accepted the submitted slot: advance the double
	/// buffer, take ownership of the new current slot and re-drive
	/// the queue poll.
	pub(super) fn process_tx_accept(&mut self, slot_index: u8) {
		if self.tx_pkt_buf != slot_index {
			error!(
				"received acceptance of buffer {}, but was expecting buffer {}",
				slot_index, self.tx_pkt_buf
			);
		}

		self.tx_pkt_buf = (self.tx_pkt_buf + 1) % TX_BUFFER_NUM;
		self.cpu_high_status -= CpuStatus::WAIT_FOR_IPC_ACCEPT;

		match self.pkt_bufs.lock_tx(self.tx_pkt_buf) {
			Ok(()) => {
				if let Ok(mut slot) = self.pkt_bufs.tx_slot(self.tx_pkt_buf) {
					slot.set_state(TxSlotState::TxPending);
				}
				self.poll_tx_queue();
			}
			Err(err) => {
				error!("unable to lock tx pkt_buf {}: {}", self.tx_pkt_buf, err);
			}
		}
	}

	/// MAC-LOW finished transmitting a slot: update the per-station
	/// counters and recycle the slot header.
	pub(super) fn process_tx_done(&mut self, slot_index: u8) {
		let Self {
			pkt_bufs, assoc, ..
		} = self;

		// MAC-LOW has released the buffer before signalling DONE.
		let Ok(mut slot) = pkt_bufs.tx_slot(slot_index) else {
			error!("TX_MPDU_DONE for invalid slot {}", slot_index);
			return;
		};

		let info = slot.frame_info();
		slot.set_state(TxSlotState::Empty);

		if info.aid != 0 {
			if let Some(station) = assoc.find_by_aid(info.aid) {
				station.num_tx_total += 1;
				if info.state_verbose == TxOutcome::Success {
					station.num_tx_success += 1;
				}
			}
		}
	}
}

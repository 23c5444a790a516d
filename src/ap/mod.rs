//! The MAC-HIGH control of the access point.
//!
//! [`MacHigh`] owns every piece of management and data plane state:
//! the association table, the transmit queues, the scheduler wheels,
//! the IPC endpoint and the packet buffer arbiter. It runs as a
//! single-threaded cooperative loop; interrupt handlers communicate
//! with it exclusively through the [`EventQueue`](crate::event::EventQueue).
//!
//! The split of responsibilities with MAC-LOW: MAC-HIGH decides what
//! to send and to whom, MAC-LOW owns all PHY timing. The two meet at
//! the shared packet buffers, with the mailbox serializing every
//! ownership transfer.

mod eth;
mod rx;
#[cfg(test)]
mod tests;
mod tx;

use heapless::String;
use smoltcp::wire::EthernetAddress;
use thiserror::Error;

use crate::assoc::AssociationTable;
use crate::config::{
	ASSOCIATION_CHECK_INTERVAL_US, ASSOCIATION_TIMEOUT_US, BEACON_INTERVAL_MS, DEFAULT_CHANNEL,
	NUM_TX_PKT_BUFS, SSID_MAX_LEN,
};
use crate::event::{EventQueue, IrqEvent};
use crate::hal::{Clock, Devices, Platform};
use crate::ipc::{Command, CpuStatus, IpcChannel, MsgGroup, MsgId, Param, Received};
use crate::pktbuf::{PktBufArbiter, TxFrameInfo, TxSlotState};
use crate::queue::PacketQueue;
use crate::scheduler::Scheduler;

/// Words of IPC payload the control keeps around for one message.
const IPC_PAYLOAD_WORDS: usize = 10;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum MacError {
	#[error("MAC-LOW raised an unrecoverable exception (reason {0})")]
	CpuLowException(u32),
	/// Returned by every poll after a fatal error was reported once.
	#[error("the MAC has halted after a fatal error")]
	Halted,
}

/// Events the MAC schedules for itself.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TimerEvent {
	BeaconTransmit,
	AssociationCheck,
}

/// Static configuration of the BSS.
#[derive(Clone, Debug)]
pub struct ApConfig {
	pub ssid: String<SSID_MAX_LEN>,
	pub channel: u8,
	pub beacon_interval_ms: u16,
	pub association_timeout_us: u64,
}

impl Default for ApConfig {
	fn default() -> Self {
		let mut ssid = String::new();
		ssid.push_str("SPLITMAC-AP").unwrap();
		Self {
			ssid,
			channel: DEFAULT_CHANNEL,
			beacon_interval_ms: BEACON_INTERVAL_MS as u16,
			association_timeout_us: ASSOCIATION_TIMEOUT_US,
		}
	}
}

pub struct MacHigh<P: Platform> {
	config: ApConfig,
	ipc: IpcChannel<P::Mailbox>,
	pkt_bufs: PktBufArbiter<P::PktMutex, P::PktMem>,
	scheduler: Scheduler<TimerEvent, P::Timer>,
	clock: P::Clock,
	eth: P::Eth,
	rate: P::Rate,
	queue: PacketQueue,
	assoc: AssociationTable,
	/// Own MAC address and BSSID, reported by MAC-LOW from EEPROM.
	mac_addr: EthernetAddress,
	seq_num: u16,
	/// Index of the TX slot currently owned for the next submission.
	tx_pkt_buf: u8,
	cpu_low_status: CpuStatus,
	cpu_high_status: CpuStatus,
	/// Reason code of a fatal MAC-LOW exception, once seen.
	halted: Option<u32>,
}

impl<P: Platform> MacHigh<P> {
	pub fn new(config: ApConfig, devices: Devices<P>) -> Self {
		Self {
			config,
			ipc: IpcChannel::new(devices.mailbox),
			pkt_bufs: PktBufArbiter::new(devices.pkt_mutex, devices.pkt_mem),
			scheduler: Scheduler::new(devices.fine_timer, devices.coarse_timer),
			clock: devices.clock,
			eth: devices.eth,
			rate: devices.rate,
			queue: PacketQueue::new(),
			assoc: AssociationTable::new(),
			mac_addr: EthernetAddress([0; 6]),
			seq_num: 0,
			tx_pkt_buf: 0,
			cpu_low_status: CpuStatus::empty(),
			cpu_high_status: CpuStatus::empty(),
			halted: None,
		}
	}

	/// Boot handshake with MAC-LOW.
	///
	/// Blocks polling the mailbox until MAC-LOW reports that it has
	/// fully initialized and is ready for traffic, then takes
	/// ownership of the first TX slot, pushes the channel selection
	/// down and arms the periodic beacon and association check.
	pub fn start(&mut self) -> Result<(), MacError> {
		// Before the handshake every TX slot header reads as empty.
		for i in 0..NUM_TX_PKT_BUFS as u8 {
			if let Ok(mut slot) = self.pkt_bufs.tx_slot(i) {
				slot.set_frame_info(&TxFrameInfo::default());
			}
		}

		while !self.cpu_low_status.contains(CpuStatus::INITIALIZED) {
			self.poll_ipc()?;
		}
		info!("MAC-LOW reports initialized");

		self.tx_pkt_buf = 0;
		match self.pkt_bufs.lock_tx(self.tx_pkt_buf) {
			Ok(()) => {
				if let Ok(mut slot) = self.pkt_bufs.tx_slot(self.tx_pkt_buf) {
					slot.set_state(TxSlotState::TxPending);
				}
			}
			Err(err) => {
				error!("unable to lock pkt_buf {}: {}", self.tx_pkt_buf, err);
			}
		}

		self.cpu_high_status |= CpuStatus::INITIALIZED;

		// Tell the other processor to switch channels.
		if self
			.ipc
			.write(
				MsgId::param(Param::SetChannel),
				0,
				&[u32::from(self.config.channel)],
			)
			.is_err()
		{
			error!("unable to push channel selection to MAC-LOW");
		}

		let beacon_interval_us = u64::from(self.config.beacon_interval_ms) * 1000;
		self.schedule_coarse(beacon_interval_us, TimerEvent::BeaconTransmit);
		self.schedule_coarse(ASSOCIATION_CHECK_INTERVAL_US, TimerEvent::AssociationCheck);

		Ok(())
	}

	/// One iteration of the cooperative main loop: scheduler,
	/// Ethernet RX, at most one queued transmit frame, IPC inbox.
	pub fn poll(&mut self) -> Result<(), MacError> {
		self.fatal()?;

		let fired = self.scheduler.poll(self.clock.now_usec());
		for event in fired {
			self.handle_timer_event(event);
		}

		self.poll_eth();

		if !self.cpu_high_status.contains(CpuStatus::WAIT_FOR_IPC_ACCEPT) {
			self.poll_tx_queue();
		}

		self.poll_ipc()
	}

	/// Runs the main loop until a fatal error stops it.
	pub fn run(&mut self) -> MacError {
		loop {
			if let Err(err) = self.poll() {
				return err;
			}
		}
	}

	/// Drains the bounded event queue fed by interrupt handlers and
	/// performs the matching sub-polls.
	pub fn handle_irq_events(&mut self, events: &EventQueue) -> Result<(), MacError> {
		while let Some(event) = events.pop() {
			match event {
				IrqEvent::Timer(wheel) => {
					let fired = self.scheduler.service_wheel(wheel, self.clock.now_usec());
					for event in fired {
						self.handle_timer_event(event);
					}
				}
				IrqEvent::EthRx => self.poll_eth(),
				IrqEvent::IpcRx => self.poll_ipc()?,
			}
		}

		Ok(())
	}

	pub fn mac_addr(&self) -> EthernetAddress {
		self.mac_addr
	}

	pub fn associations(&self) -> &crate::assoc::AssociationTable {
		&self.assoc
	}

	fn fatal(&self) -> Result<(), MacError> {
		if self.halted.is_some() {
			Err(MacError::Halted)
		} else {
			Ok(())
		}
	}

	fn next_seq(&mut self) -> u16 {
		let seq = self.seq_num;
		self.seq_num = self.seq_num.wrapping_add(1);
		seq
	}

	fn poll_ipc(&mut self) -> Result<(), MacError> {
		let mut payload = [0u32; IPC_PAYLOAD_WORDS];
		match self.ipc.read(&mut payload) {
			Ok(Some(msg)) => self.process_ipc_msg(msg, &payload),
			Ok(None) => Ok(()),
			Err(err) => {
				// The channel was drained; the next valid header will
				// re-synchronize the stream.
				error!("ipc framing error ({}), channel drained", err);
				Ok(())
			}
		}
	}

	fn process_ipc_msg(
		&mut self,
		msg: Received,
		payload: &[u32; IPC_PAYLOAD_WORDS],
	) -> Result<(), MacError> {
		match msg.id.group() {
			Ok(MsgGroup::Cmd) => {
				match Command::try_from(msg.id.msg()) {
					Ok(Command::RxMpduReady) => self.process_rx_ready(msg.arg0),
					Ok(Command::TxMpduAccept) => self.process_tx_accept(msg.arg0),
					Ok(Command::TxMpduDone) => self.process_tx_done(msg.arg0),
					Ok(Command::TxMpduReady) => {
						error!("TX_MPDU_READY is only sent by this CPU");
					}
					Err(_) => error!("unknown IPC command {}", msg.id.msg()),
				}
				Ok(())
			}
			Ok(MsgGroup::MacAddr) => {
				// 6-byte MAC in the first one and a half words.
				if msg.payload_len >= 2 {
					let low = payload[0].to_le_bytes();
					let high = payload[1].to_le_bytes();
					self.mac_addr = EthernetAddress([
						low[0], low[1], low[2], low[3], high[0], high[1],
					]);
					info!("MAC address {}", self.mac_addr);
				} else {
					error!("short MAC address message");
				}
				Ok(())
			}
			Ok(MsgGroup::CpuStatus) => {
				if msg.payload_len == 0 {
					error!("empty CPU status message");
					return Ok(());
				}

				self.cpu_low_status = CpuStatus::from_bits_retain(payload[0]);
				if self.cpu_low_status.contains(CpuStatus::EXCEPTION) {
					let reason = if msg.payload_len >= 2 { payload[1] } else { 0 };
					error!("an unrecoverable exception has occurred in MAC-LOW, halting");
					error!("reason code: {}", reason);
					self.halted = Some(reason);
					return Err(MacError::CpuLowException(reason));
				}
				Ok(())
			}
			Ok(MsgGroup::Param) => {
				error!("unexpected parameter message {} from MAC-LOW", msg.id.msg());
				Ok(())
			}
			Err(_) => {
				error!("unknown IPC message group in id {:#06x}", msg.id.raw());
				Ok(())
			}
		}
	}
}

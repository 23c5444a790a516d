//! The 802.11 receive state machine.
//!
//! Runs on `RX_MPDU_READY` from MAC-LOW: lock the slot, copy the
//! MPDU out, release the slot, then dispatch on the frame subtype.
//! An RX slot is never held across the return from this handler.

use super::MacHigh;
use crate::config::{MAX_RETRY, PQUEUE_MAX_FRAME_SIZE};
use crate::hal::{Clock, Platform};
use crate::pktbuf::{RxSlotState, TxFlags};
use crate::queue::QueuePriority;
use smoltcp::wire::EthernetAddress;

use crate::assoc::RxUpdate;
use crate::wire::mgmt::{
	self, AUTH_ALGO_OPEN_SYSTEM, AUTH_SEQ_REQ, AUTH_SEQ_RESP, AuthBody, ReasonCode,
	STATUS_AUTH_REJECT_CHALLENGE_FAILURE, STATUS_SUCCESS, TaggedParams,
};
use crate::wire::{
	FrameControl2, FrameSubtype, MAC_HEADER_LEN, MacHeader, TAG_SSID_PARAMS, is_ipv6_multicast,
};

impl<P: Platform> MacHigh<P> {
	/// Handler for `RX_MPDU_READY`: MAC-LOW has received an MPDU
	/// addressed to this node or to the broadcast address and
	/// released the slot.
	pub(super) fn process_rx_ready(&mut self, slot_index: u8) {
		let mut mpdu_buf = [0u8; PQUEUE_MAX_FRAME_SIZE];

		// MAC-LOW unlocks the slot before sending the message, so a
		// lock failure means contention and the frame is dropped.
		let (rate, length) = match self.pkt_bufs.lock_rx(slot_index) {
			Err(err) => {
				error!("unable to lock pkt_buf {}: {}", slot_index, err);
				return;
			}
			Ok(mut slot) => {
				let info = slot.frame_info();
				let length = usize::from(info.length).min(PQUEUE_MAX_FRAME_SIZE);
				mpdu_buf[..length].copy_from_slice(slot.mpdu(length as u16));
				slot.set_state(RxSlotState::Empty);
				(info.rate, length)
			}
		};

		trace!(
			"processing rx buffer {}, length = {}, rate = {:?}",
			slot_index, length, rate
		);
		self.mpdu_rx_process(&mpdu_buf[..length]);
	}

	fn mpdu_rx_process(&mut self, mpdu: &[u8]) {
		let Ok(header) = MacHeader::parse(mpdu) else {
			warn!("runt mpdu of {} bytes", mpdu.len());
			return;
		};

		let now = self.clock.now_usec();
		let subtype = header.subtype();

		// Refresh the table entry of a known source; duplicates of
		// the previous data frame are dropped without side effects.
		let data_seq =
			(subtype == Some(FrameSubtype::Data)).then(|| header.sequence());
		let is_associated = match self.assoc.update_rx(header.address_2, now, data_seq) {
			RxUpdate::Duplicate => return,
			RxUpdate::Fresh => true,
			RxUpdate::Unknown => false,
		};

		match subtype {
			Some(FrameSubtype::Data) => self.process_data(&header, mpdu, is_associated),
			Some(FrameSubtype::ProbeReq) => {
				if header.address_3 == EthernetAddress::BROADCAST {
					self.process_probe_req(&header, mpdu);
				}
			}
			Some(FrameSubtype::Auth) => {
				if header.address_3 == self.mac_addr {
					self.process_auth(&header, mpdu);
				}
			}
			Some(FrameSubtype::AssocReq) | Some(FrameSubtype::ReassocReq) => {
				if header.address_3 == self.mac_addr {
					self.process_assoc_req(&header);
				}
			}
			Some(FrameSubtype::Disassoc) => {
				if header.address_3 == self.mac_addr && self.assoc.remove(header.address_2)
				{
					info!("Disassociation:");
					self.assoc.log_associations(now);
				}
			}
			_ => {
				// Frequent in practice: mobile stations send null
				// data frames for power management.
				trace!(
					"received unhandled frame control type/subtype {:#04x}",
					header.frame_control_1
				);
			}
		}
	}

	fn process_data(&mut self, header: &MacHeader, mpdu: &[u8], is_associated: bool) {
		if is_associated {
			if header.frame_control_2.contains(FrameControl2::TO_DS) {
				// Destined to the DS: de-encapsulate onto Ethernet.
				self.forward_to_eth(mpdu);
			}
		} else if is_ipv6_multicast(&header.address_3) {
			// IPv6 multicast is forward-eligible without association.
			self.forward_to_eth(mpdu);
		} else {
			// A station that believes it is associated but is not in
			// the table; a de-authentication triggers re-association.
			warn!(
				"data from non-associated station {}, issuing de-authentication",
				header.address_2
			);

			let dst = header.address_2;
			let bssid = self.mac_addr;
			self.enqueue_mgmt(
				QueuePriority::High,
				MAX_RETRY,
				TxFlags::FILL_DURATION | TxFlags::REQ_TO,
				|frame, seq| {
					mgmt::deauth_frame(frame, dst, bssid, seq, ReasonCode::NonassociatedSta)
				},
			);
		}
	}

	fn process_probe_req(&mut self, header: &MacHeader, mpdu: &[u8]) {
		// Only an SSID tag that is empty (wildcard) or names this BSS
		// elicits a response.
		let mut send_response = false;
		for (tag, data) in TaggedParams::new(&mpdu[MAC_HEADER_LEN..]) {
			if tag == TAG_SSID_PARAMS
				&& (data.is_empty() || data == self.config.ssid.as_bytes())
			{
				send_response = true;
			}
		}

		if !send_response {
			return;
		}

		let dst = header.address_2;
		let bssid = self.mac_addr;
		let channel = self.config.channel;
		let interval = self.config.beacon_interval_ms;
		let ssid = self.config.ssid.clone();
		self.enqueue_mgmt(
			QueuePriority::High,
			MAX_RETRY,
			TxFlags::FILL_TIMESTAMP | TxFlags::FILL_DURATION | TxFlags::REQ_TO,
			|frame, seq| {
				mgmt::beacon_probe_frame(
					frame,
					FrameSubtype::ProbeResp,
					dst,
					bssid,
					seq,
					interval,
					&ssid,
					channel,
				)
			},
		);
	}

	fn process_auth(&mut self, header: &MacHeader, mpdu: &[u8]) {
		let Ok(body) = AuthBody::parse(&mpdu[MAC_HEADER_LEN..]) else {
			warn!("truncated authentication frame from {}", header.address_2);
			return;
		};

		let dst = header.address_2;
		let bssid = self.mac_addr;
		match body.algorithm {
			AUTH_ALGO_OPEN_SYSTEM => {
				if body.sequence == AUTH_SEQ_REQ {
					self.enqueue_mgmt(
						QueuePriority::High,
						MAX_RETRY,
						TxFlags::FILL_DURATION | TxFlags::REQ_TO,
						|frame, seq| {
							mgmt::auth_frame(
								frame,
								dst,
								bssid,
								seq,
								AUTH_ALGO_OPEN_SYSTEM,
								AUTH_SEQ_RESP,
								STATUS_SUCCESS,
							)
						},
					);
				}
			}
			algorithm => {
				// Anything but open system is rejected, not ignored.
				warn!("unsupported authentication algorithm ({:#x})", algorithm);
				self.enqueue_mgmt(
					QueuePriority::High,
					MAX_RETRY,
					TxFlags::FILL_DURATION | TxFlags::REQ_TO,
					|frame, seq| {
						mgmt::auth_frame(
							frame,
							dst,
							bssid,
							seq,
							AUTH_ALGO_OPEN_SYSTEM,
							AUTH_SEQ_RESP,
							STATUS_AUTH_REJECT_CHALLENGE_FAILURE,
						)
					},
				);
			}
		}
	}

	fn process_assoc_req(&mut self, header: &MacHeader) {
		let now = self.clock.now_usec();
		let Some(admission) = self.assoc.admit(header.address_2, now) else {
			// Table full: no admission and no response.
			warn!("association table full, ignoring request from {}", header.address_2);
			return;
		};

		let dst = header.address_2;
		let bssid = self.mac_addr;
		let aid = admission.aid;
		self.enqueue_mgmt(
			QueuePriority::High,
			MAX_RETRY,
			TxFlags::FILL_DURATION | TxFlags::REQ_TO,
			|frame, seq| {
				mgmt::association_response_frame(frame, dst, bssid, seq, STATUS_SUCCESS, aid)
			},
		);

		if admission.new_association {
			info!("New Association - ID {}", aid);
			self.assoc.log_associations(now);
		}
	}
}

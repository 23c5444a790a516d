//! Bridging between the wired Ethernet interface and the wireless
//! link: 802.11 encapsulation on the way out, LLC/SNAP
//! de-encapsulation on the way in.

use smoltcp::wire::{EthernetAddress, EthernetFrame, EthernetProtocol};

use super::MacHigh;
use crate::config::{MAX_RETRY, PQUEUE_MAX_FRAME_SIZE};
use crate::hal::{EthDevice, Platform};
use crate::pktbuf::{TxFlags, TxFrameInfo};
use crate::queue::QueuePriority;
use crate::wire::mgmt;
use crate::wire::{FrameControl2, LLC_HEADER_LEN, LlcHeader, MAC_HEADER_LEN, MacHeader};

/// Scratch size for one Ethernet frame, with headroom over the MTU.
const ETH_FRAME_BUF_LEN: usize = 1600;

impl<P: Platform> MacHigh<P> {
	/// Pulls at most one frame off the Ethernet MAC per call; the
	/// main loop comes around continuously.
	pub(super) fn poll_eth(&mut self) {
		let mut buf = [0u8; ETH_FRAME_BUF_LEN];
		let Some(length) = self.eth.recv(&mut buf) else {
			return;
		};

		self.ethernet_receive(&buf[..length]);
	}

	/// Encapsulates one Ethernet frame for the wireless link and
	/// queues it at low priority.
	///
	/// Broadcast traffic goes out without retries or a duration
	/// request; unicast traffic to a station not in the association
	/// table is dropped.
	fn ethernet_receive(&mut self, eth_frame: &[u8]) {
		let Ok(frame) = EthernetFrame::new_checked(eth_frame) else {
			debug!("dropping runt ethernet frame of {} bytes", eth_frame.len());
			return;
		};

		let dst = frame.dst_addr();
		let payload = frame.payload();
		if MAC_HEADER_LEN + LLC_HEADER_LEN + payload.len() > PQUEUE_MAX_FRAME_SIZE {
			debug!("dropping oversized ethernet frame to {}", dst);
			return;
		}

		let (station, retry_max, flags) = if dst == EthernetAddress::BROADCAST {
			(None, 0, TxFlags::empty())
		} else if self.assoc.find(dst).is_some() {
			(
				Some(dst),
				MAX_RETRY,
				TxFlags::FILL_DURATION | TxFlags::REQ_TO,
			)
		} else {
			// Not associated: nothing on the wireless side wants it.
			return;
		};

		let mut ring = self.queue.checkout(1);
		let Some(index) = ring.first() else {
			// Queue exhaustion drops data silently.
			return;
		};

		let bssid = self.mac_addr;
		let src = frame.src_addr();
		let ethertype = u16::from(frame.ethertype());
		let seq = self.next_seq();

		let bd = self.queue.bd_mut(index);
		let header_len = match mgmt::data_header(
			&mut bd.frame,
			FrameControl2::FROM_DS,
			dst,
			bssid,
			src,
			seq,
		) {
			Ok(len) => len,
			Err(err) => {
				error!("data frame build failed: {}", err);
				self.queue.checkin(&mut ring);
				return;
			}
		};

		let llc_len = match (LlcHeader { ethertype }).write_to(&mut bd.frame[header_len..]) {
			Ok(len) => len,
			Err(err) => {
				error!("llc header build failed: {}", err);
				self.queue.checkin(&mut ring);
				return;
			}
		};

		let total = header_len + llc_len + payload.len();
		bd.frame[header_len + llc_len..total].copy_from_slice(payload);

		bd.station = station;
		bd.frame_info = TxFrameInfo {
			length: total as u16,
			flags,
			retry_max,
			..TxFrameInfo::default()
		};

		self.queue.enqueue(QueuePriority::Low, &mut ring);
	}

	/// De-encapsulates a TO_DS data MPDU back into an Ethernet II
	/// frame and sends it out the wired interface.
	pub(super) fn forward_to_eth(&mut self, mpdu: &[u8]) {
		let Ok(header) = MacHeader::parse(mpdu) else {
			return;
		};

		let Ok(llc) = LlcHeader::parse(&mpdu[MAC_HEADER_LEN..]) else {
			debug!("data frame from {} without llc header", header.address_2);
			return;
		};

		let payload = &mpdu[MAC_HEADER_LEN + LLC_HEADER_LEN..];
		let total = EthernetFrame::<&[u8]>::buffer_len(payload.len());
		if total > ETH_FRAME_BUF_LEN {
			debug!("dropping oversized mpdu from {}", header.address_2);
			return;
		}

		let mut buf = [0u8; ETH_FRAME_BUF_LEN];
		let mut frame = EthernetFrame::new_unchecked(&mut buf[..total]);
		// TO_DS addressing: address 3 is the destination, address 2
		// the transmitting station.
		frame.set_dst_addr(header.address_3);
		frame.set_src_addr(header.address_2);
		frame.set_ethertype(EthernetProtocol::from(llc.ethertype));
		frame.payload_mut().copy_from_slice(payload);

		if let Err(err) = self.eth.send(&buf[..total]) {
			error!("ethernet tx failed: {}", err);
		}
	}
}

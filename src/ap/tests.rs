use std::vec::Vec;

use smoltcp::wire::{EthernetAddress, EthernetFrame};

use super::{ApConfig, MacError, MacHigh};
use crate::assoc::DEFAULT_TX_RATE;
use crate::config::{
	ASSOCIATION_TIMEOUT_US, PKT_BUF_MUTEX_RX_BASE,
};
use crate::hal::mock::{TestClock, TestEth, TestMailbox, TestMutex, TestPktMem, TestTimer};
use crate::hal::{Devices, Platform, StationRate};
use crate::ipc::{Command, CpuStatus, MsgGroup, MsgId, Param};
use crate::pktbuf::{
	PKT_BUF_MPDU_OFFSET, RxFrameInfo, RxSlotState, TX_FRAME_INFO_LEN, TxFlags, TxFrameInfo,
	TxSlotState,
};
use crate::wire::mgmt::{
	AUTH_ALGO_OPEN_SYSTEM, AUTH_SEQ_REQ, AUTH_SEQ_RESP, AuthBody, STATUS_SUCCESS, TaggedParams,
};
use crate::wire::{
	FrameControl2, FrameSubtype, LLC_HEADER_LEN, LlcHeader, MAC_HEADER_LEN, MacHeader, PhyRate,
	TAG_SSID_PARAMS, sequence_control,
};

struct MockPlatform;

impl Platform for MockPlatform {
	type Mailbox = TestMailbox;
	type PktMutex = TestMutex;
	type PktMem = TestPktMem;
	type Timer = TestTimer;
	type Clock = TestClock;
	type Eth = TestEth;
	type Rate = StationRate;
}

const AP: EthernetAddress = EthernetAddress([0x40, 0xD8, 0x55, 0x04, 0x20, 0x00]);
const STA: EthernetAddress = EthernetAddress([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const WIRED_HOST: EthernetAddress = EthernetAddress([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);

#[derive(Debug)]
struct OutMsg {
	id: MsgId,
	arg0: u8,
	payload: Vec<u32>,
}

struct Harness {
	mac: MacHigh<MockPlatform>,
	mbox: TestMailbox,
	mutex: TestMutex,
	mem: TestPktMem,
	clock: TestClock,
	eth: TestEth,
	boot_msgs: Vec<OutMsg>,
}

fn ipc_word(id: MsgId, num_payload_words: u8, arg0: u8) -> u32 {
	u32::from(id.raw()) | (u32::from(num_payload_words) << 16) | (u32::from(arg0) << 24)
}

impl Harness {
	fn new() -> Self {
		let mbox = TestMailbox::default();
		let mutex = TestMutex::default();
		let mem = TestPktMem::default();
		let clock = TestClock::default();
		let eth = TestEth::default();

		let devices = Devices::<MockPlatform> {
			mailbox: mbox.clone(),
			pkt_mutex: mutex.clone(),
			pkt_mem: mem.clone(),
			fine_timer: TestTimer::default(),
			coarse_timer: TestTimer::default(),
			clock: clock.clone(),
			eth: eth.clone(),
			rate: StationRate,
		};
		let mut mac = MacHigh::new(ApConfig::default(), devices);

		// MAC-LOW reports its EEPROM MAC address and then readiness.
		mbox.push_inbox(&[
			ipc_word(MsgId::new(MsgGroup::MacAddr, 0), 2, 0),
			u32::from_le_bytes([AP.0[0], AP.0[1], AP.0[2], AP.0[3]]),
			u32::from_le_bytes([AP.0[4], AP.0[5], 0, 0]),
		]);
		mbox.push_inbox(&[
			ipc_word(MsgId::new(MsgGroup::CpuStatus, 0), 1, 0),
			CpuStatus::INITIALIZED.bits(),
		]);
		mac.start().unwrap();

		let mut harness = Self {
			mac,
			mbox,
			mutex,
			mem,
			clock,
			eth,
			boot_msgs: Vec::new(),
		};
		harness.boot_msgs = harness.read_outbox();
		harness
	}

	fn read_outbox(&self) -> Vec<OutMsg> {
		let words = self.mbox.take_outbox();
		let mut msgs = Vec::new();
		let mut i = 0;
		while i < words.len() {
			let header = words[i];
			let id = MsgId::from_raw((header & 0xFFFF) as u16);
			let num = ((header >> 16) & 0xFF) as usize;
			let arg0 = (header >> 24) as u8;
			msgs.push(OutMsg {
				id,
				arg0,
				payload: words[i + 1..i + 1 + num].to_vec(),
			});
			i += 1 + num;
		}
		msgs
	}

	/// Places an MPDU into an RX slot and signals `RX_MPDU_READY`.
	fn deliver_mpdu(&mut self, slot: u8, mpdu: &[u8]) {
		let bytes = self.mem.rx_bytes(usize::from(slot));
		RxFrameInfo {
			state: RxSlotState::FcsGood,
			rate: PhyRate::Qpsk12,
			length: mpdu.len() as u16,
			rssi: 0,
		}
		.write_to(&mut bytes[..]);
		bytes[PKT_BUF_MPDU_OFFSET..PKT_BUF_MPDU_OFFSET + mpdu.len()].copy_from_slice(mpdu);

		self.mbox
			.push_inbox(&[ipc_word(MsgId::command(Command::RxMpduReady), 0, slot)]);
		self.mac.poll().unwrap();
	}

	fn tx_slot_frame(&self, slot: u8) -> (TxFrameInfo, Vec<u8>) {
		let bytes = self.mem.tx_bytes(usize::from(slot));
		let info = TxFrameInfo::from_bytes(&bytes[..TX_FRAME_INFO_LEN]);
		let length = usize::from(info.length);
		let mpdu = bytes[PKT_BUF_MPDU_OFFSET..PKT_BUF_MPDU_OFFSET + length].to_vec();
		(info, mpdu)
	}

	/// Polls until the egress pipeline runs dry, accepting every
	/// submission like MAC-LOW would. Returns the transmitted frames
	/// in transmission order.
	fn drain_tx(&mut self) -> Vec<(TxFrameInfo, Vec<u8>)> {
		let mut transmitted = Vec::new();
		for _ in 0..64 {
			self.mac.poll().unwrap();

			let ready: Vec<u8> = self
				.read_outbox()
				.into_iter()
				.filter(|msg| msg.id == MsgId::command(Command::TxMpduReady))
				.map(|msg| msg.arg0)
				.collect();
			if ready.is_empty() {
				break;
			}

			for slot in ready {
				transmitted.push(self.tx_slot_frame(slot));
				self.mbox
					.push_inbox(&[ipc_word(MsgId::command(Command::TxMpduAccept), 0, slot)]);
			}
		}
		transmitted
	}

	fn associate(&mut self, sta: EthernetAddress) {
		self.deliver_mpdu(
			0,
			&frame(
				FrameSubtype::Auth.into(),
				FrameControl2::empty(),
				AP,
				sta,
				AP,
				10,
				&auth_body(AUTH_ALGO_OPEN_SYSTEM, AUTH_SEQ_REQ),
			),
		);
		self.drain_tx();

		self.deliver_mpdu(
			0,
			&frame(
				FrameSubtype::AssocReq.into(),
				FrameControl2::empty(),
				AP,
				sta,
				AP,
				11,
				&[0x01, 0x00, 0x0A, 0x00],
			),
		);
		self.drain_tx();
	}
}

fn frame(
	fc1: u8,
	fc2: FrameControl2,
	a1: EthernetAddress,
	a2: EthernetAddress,
	a3: EthernetAddress,
	seq: u16,
	body: &[u8],
) -> Vec<u8> {
	let mut buf = vec![0u8; MAC_HEADER_LEN + body.len()];
	MacHeader {
		frame_control_1: fc1,
		frame_control_2: fc2,
		duration: 0,
		address_1: a1,
		address_2: a2,
		address_3: a3,
		sequence_control: sequence_control(seq),
	}
	.write_to(&mut buf)
	.unwrap();
	buf[MAC_HEADER_LEN..].copy_from_slice(body);
	buf
}

fn auth_body(algorithm: u16, sequence: u16) -> [u8; 6] {
	let mut body = [0u8; 6];
	body[..2].copy_from_slice(&algorithm.to_le_bytes());
	body[2..4].copy_from_slice(&sequence.to_le_bytes());
	body
}

fn data_frame(sta: EthernetAddress, dest: EthernetAddress, seq: u16, payload: &[u8]) -> Vec<u8> {
	let mut body = vec![0u8; LLC_HEADER_LEN + payload.len()];
	LlcHeader { ethertype: 0x0800 }.write_to(&mut body).unwrap();
	body[LLC_HEADER_LEN..].copy_from_slice(payload);
	frame(
		FrameSubtype::Data.into(),
		FrameControl2::TO_DS,
		AP,
		sta,
		dest,
		seq,
		&body,
	)
}

fn eth_frame(
	dst: EthernetAddress,
	src: EthernetAddress,
	ethertype: u16,
	payload: &[u8],
) -> Vec<u8> {
	let mut buf = vec![0u8; EthernetFrame::<&[u8]>::buffer_len(payload.len())];
	let mut frame = EthernetFrame::new_unchecked(&mut buf[..]);
	frame.set_dst_addr(dst);
	frame.set_src_addr(src);
	frame.set_ethertype(ethertype.into());
	frame.payload_mut().copy_from_slice(payload);
	buf
}

#[test]
fn boot_pushes_channel_and_takes_tx_slot_zero() {
	let harness = Harness::new();

	assert_eq!(harness.boot_msgs.len(), 1);
	let msg = &harness.boot_msgs[0];
	assert_eq!(msg.id, MsgId::param(Param::SetChannel));
	assert_eq!(msg.payload, vec![9]);

	assert_eq!(harness.mac.mac_addr(), AP);
	assert!(harness.mac.pkt_bufs.status_tx(0).unwrap().locked);

	let (info, _) = harness.tx_slot_frame(0);
	assert_eq!(info.state, TxSlotState::TxPending);
}

#[test]
fn beacon_goes_out_every_interval() {
	let mut harness = Harness::new();
	harness.clock.advance(100_001);

	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);

	let (info, mpdu) = &transmitted[0];
	assert!(info.flags.contains(TxFlags::FILL_TIMESTAMP));
	assert_eq!(info.aid, 0);
	assert_eq!(info.rate, PhyRate::Bpsk12);

	let header = MacHeader::parse(mpdu).unwrap();
	assert_eq!(header.subtype(), Some(FrameSubtype::Beacon));
	assert_eq!(header.address_1, EthernetAddress::BROADCAST);
	assert_eq!(header.address_2, AP);

	let tags: Vec<_> = TaggedParams::new(&mpdu[MAC_HEADER_LEN + 12..]).collect();
	assert_eq!(tags[0], (TAG_SSID_PARAMS, "SPLITMAC-AP".as_bytes()));

	// The next interval produces the next beacon.
	harness.clock.advance(100_001);
	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);
}

#[test]
fn open_system_association() {
	let mut harness = Harness::new();

	harness.deliver_mpdu(
		0,
		&frame(
			FrameSubtype::Auth.into(),
			FrameControl2::empty(),
			AP,
			STA,
			AP,
			1,
			&auth_body(AUTH_ALGO_OPEN_SYSTEM, AUTH_SEQ_REQ),
		),
	);

	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);
	let (info, mpdu) = &transmitted[0];
	assert!(info.flags.contains(TxFlags::REQ_TO));
	assert_eq!(info.retry_max, 7);

	let header = MacHeader::parse(mpdu).unwrap();
	assert_eq!(header.subtype(), Some(FrameSubtype::Auth));
	assert_eq!(header.address_1, STA);
	let body = AuthBody::parse(&mpdu[MAC_HEADER_LEN..]).unwrap();
	assert_eq!(body.algorithm, AUTH_ALGO_OPEN_SYSTEM);
	assert_eq!(body.sequence, AUTH_SEQ_RESP);
	assert_eq!(body.status, STATUS_SUCCESS);

	harness.deliver_mpdu(
		0,
		&frame(
			FrameSubtype::AssocReq.into(),
			FrameControl2::empty(),
			AP,
			STA,
			AP,
			2,
			&[0x01, 0x00, 0x0A, 0x00],
		),
	);

	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);
	let (_, mpdu) = &transmitted[0];
	let header = MacHeader::parse(mpdu).unwrap();
	assert_eq!(header.subtype(), Some(FrameSubtype::AssocResp));
	assert_eq!(header.address_1, STA);
	let status = u16::from_le_bytes([mpdu[MAC_HEADER_LEN + 2], mpdu[MAC_HEADER_LEN + 3]]);
	let aid = u16::from_le_bytes([mpdu[MAC_HEADER_LEN + 4], mpdu[MAC_HEADER_LEN + 5]]);
	assert_eq!(status, STATUS_SUCCESS);
	assert_eq!(aid, 0xC001);

	let table = harness.mac.associations();
	assert_eq!(table.next_free_index(), 1);
	assert_eq!(table.occupied()[0].addr, STA);
	assert_eq!(table.occupied()[0].aid, 1);
}

#[test]
fn duplicate_sequence_data_is_dropped() {
	let mut harness = Harness::new();
	harness.associate(STA);

	harness.deliver_mpdu(0, &data_frame(STA, WIRED_HOST, 1, b"hello"));
	let forwarded = harness.eth.take_tx();
	assert_eq!(forwarded.len(), 1);

	let eth = EthernetFrame::new_checked(&forwarded[0][..]).unwrap();
	assert_eq!(eth.dst_addr(), WIRED_HOST);
	assert_eq!(eth.src_addr(), STA);
	assert_eq!(u16::from(eth.ethertype()), 0x0800);
	assert_eq!(eth.payload(), b"hello");

	// Same 12-bit sequence number again: dropped without side
	// effects.
	harness.deliver_mpdu(0, &data_frame(STA, WIRED_HOST, 1, b"hello"));
	assert!(harness.eth.take_tx().is_empty());
	assert!(harness.drain_tx().is_empty());

	// The next sequence number goes through again.
	harness.deliver_mpdu(0, &data_frame(STA, WIRED_HOST, 2, b"again"));
	assert_eq!(harness.eth.take_tx().len(), 1);
}

#[test]
fn inactive_station_is_deauthenticated_and_removed() {
	let mut harness = Harness::new();
	harness.associate(STA);
	assert_eq!(harness.mac.associations().next_free_index(), 1);

	// Past the inactivity threshold with no traffic from the STA.
	harness.clock.advance(ASSOCIATION_TIMEOUT_US + 1_000_000);
	let transmitted = harness.drain_tx();

	let deauth = transmitted
		.iter()
		.find(|(_, mpdu)| {
			MacHeader::parse(mpdu).unwrap().subtype() == Some(FrameSubtype::Deauth)
		})
		.expect("no deauthentication transmitted");
	let header = MacHeader::parse(&deauth.1).unwrap();
	assert_eq!(header.address_1, STA);
	let reason = u16::from_le_bytes([deauth.1[MAC_HEADER_LEN], deauth.1[MAC_HEADER_LEN + 1]]);
	assert_eq!(reason, 4);

	assert_eq!(harness.mac.associations().next_free_index(), 0);

	// The freed AID is handed out again on the next admission.
	harness.associate(STA);
	assert_eq!(harness.mac.associations().occupied()[0].aid, 1);
}

#[test]
fn wildcard_probe_request_gets_a_response() {
	let mut harness = Harness::new();

	// SSID tag with zero length, BSS id broadcast.
	harness.deliver_mpdu(
		0,
		&frame(
			FrameSubtype::ProbeReq.into(),
			FrameControl2::empty(),
			EthernetAddress::BROADCAST,
			STA,
			EthernetAddress::BROADCAST,
			1,
			&[TAG_SSID_PARAMS, 0],
		),
	);

	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);
	let (info, mpdu) = &transmitted[0];
	assert!(info.flags.contains(TxFlags::FILL_TIMESTAMP));

	let header = MacHeader::parse(mpdu).unwrap();
	assert_eq!(header.subtype(), Some(FrameSubtype::ProbeResp));
	assert_eq!(header.address_1, STA);

	let tags: Vec<_> = TaggedParams::new(&mpdu[MAC_HEADER_LEN + 12..]).collect();
	assert_eq!(tags[0], (TAG_SSID_PARAMS, "SPLITMAC-AP".as_bytes()));
	assert!(tags.iter().any(|(tag, data)| *tag == 3 && *data == [9u8]));
}

#[test]
fn foreign_ssid_probe_request_is_ignored() {
	let mut harness = Harness::new();

	let mut body = vec![TAG_SSID_PARAMS, 5];
	body.extend_from_slice(b"OTHER");
	harness.deliver_mpdu(
		0,
		&frame(
			FrameSubtype::ProbeReq.into(),
			FrameControl2::empty(),
			EthernetAddress::BROADCAST,
			STA,
			EthernetAddress::BROADCAST,
			1,
			&body,
		),
	);

	assert!(harness.drain_tx().is_empty());
}

#[test]
fn non_open_auth_is_rejected_not_ignored() {
	let mut harness = Harness::new();

	// Shared-key authentication (algorithm 1).
	harness.deliver_mpdu(
		0,
		&frame(
			FrameSubtype::Auth.into(),
			FrameControl2::empty(),
			AP,
			STA,
			AP,
			1,
			&auth_body(1, AUTH_SEQ_REQ),
		),
	);

	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);
	let body = AuthBody::parse(&transmitted[0].1[MAC_HEADER_LEN..]).unwrap();
	assert_eq!(body.status, 15);
}

#[test]
fn data_from_non_associated_station_draws_deauth() {
	let mut harness = Harness::new();

	harness.deliver_mpdu(0, &data_frame(STA, WIRED_HOST, 1, b"rogue"));

	// Nothing reaches the wire.
	assert!(harness.eth.take_tx().is_empty());

	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);
	let (_, mpdu) = &transmitted[0];
	let header = MacHeader::parse(mpdu).unwrap();
	assert_eq!(header.subtype(), Some(FrameSubtype::Deauth));
	assert_eq!(header.address_1, STA);
	let reason = u16::from_le_bytes([mpdu[MAC_HEADER_LEN], mpdu[MAC_HEADER_LEN + 1]]);
	assert_eq!(reason, 7);
}

#[test]
fn ipv6_multicast_data_is_forwarded_without_association() {
	let mut harness = Harness::new();

	let mcast = EthernetAddress([0x33, 0x33, 0, 0, 0, 0x16]);
	harness.deliver_mpdu(0, &data_frame(STA, mcast, 1, b"mldv2"));

	let forwarded = harness.eth.take_tx();
	assert_eq!(forwarded.len(), 1);
	let eth = EthernetFrame::new_checked(&forwarded[0][..]).unwrap();
	assert_eq!(eth.dst_addr(), mcast);
	// No deauthentication was produced.
	assert!(harness.drain_tx().is_empty());
}

#[test]
fn tx_handshake_toggles_the_double_buffer() {
	let mut harness = Harness::new();
	harness.associate(STA);

	harness
		.eth
		.push_rx(&eth_frame(EthernetAddress::BROADCAST, WIRED_HOST, 0x0800, b"bcast"));
	harness.eth.push_rx(&eth_frame(STA, WIRED_HOST, 0x0800, b"unicast"));

	// First poll: the broadcast frame is queued and submitted.
	harness.mac.poll().unwrap();
	let msgs = harness.read_outbox();
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].id, MsgId::command(Command::TxMpduReady));
	assert_eq!(msgs[0].arg0, 0);

	let (info, mpdu) = harness.tx_slot_frame(0);
	assert_eq!(info.state, TxSlotState::Ready);
	assert_eq!(info.aid, 0);
	assert_eq!(info.rate, PhyRate::Bpsk12);
	let header = MacHeader::parse(&mpdu).unwrap();
	assert!(header.frame_control_2.contains(FrameControl2::FROM_DS));
	assert_eq!(header.address_1, EthernetAddress::BROADCAST);

	// Second poll: the unicast frame is queued but held back while
	// the acceptance is outstanding.
	harness.mac.poll().unwrap();
	assert!(harness.read_outbox().is_empty());

	// Acceptance advances the double buffer and releases the next
	// submission into slot 1.
	harness
		.mbox
		.push_inbox(&[ipc_word(MsgId::command(Command::TxMpduAccept), 0, 0)]);
	harness.mac.poll().unwrap();
	let msgs = harness.read_outbox();
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].arg0, 1);

	let (info, mpdu) = harness.tx_slot_frame(1);
	assert_eq!(info.aid, 1);
	assert_eq!(info.rate, DEFAULT_TX_RATE);
	let header = MacHeader::parse(&mpdu).unwrap();
	assert_eq!(header.address_1, STA);

	// After the second acceptance the cursor is back at slot 0.
	harness
		.mbox
		.push_inbox(&[ipc_word(MsgId::command(Command::TxMpduAccept), 0, 1)]);
	harness.mac.poll().unwrap();

	harness
		.eth
		.push_rx(&eth_frame(EthernetAddress::BROADCAST, WIRED_HOST, 0x0800, b"more"));
	harness.mac.poll().unwrap();
	let msgs = harness.read_outbox();
	assert_eq!(msgs.len(), 1);
	assert_eq!(msgs[0].arg0, 0);
}

#[test]
fn tx_done_updates_station_counters() {
	let mut harness = Harness::new();
	harness.associate(STA);

	harness.eth.push_rx(&eth_frame(STA, WIRED_HOST, 0x0800, b"payload"));
	let transmitted = harness.drain_tx();
	assert_eq!(transmitted.len(), 1);

	// MAC-LOW reports the transmission complete and successful; the
	// frame went out of slot 0.
	harness
		.mbox
		.push_inbox(&[ipc_word(MsgId::command(Command::TxMpduDone), 0, 0)]);
	harness.mac.poll().unwrap();

	let table = harness.mac.associations();
	assert_eq!(table.occupied()[0].num_tx_total, 1);
	assert_eq!(table.occupied()[0].num_tx_success, 1);
}

#[test]
fn contended_rx_slot_drops_the_frame() {
	let mut harness = Harness::new();
	harness.associate(STA);

	// MAC-LOW still holds the slot mutex: the frame is dropped.
	harness.mutex.lock_as_low(PKT_BUF_MUTEX_RX_BASE + 3);
	harness.deliver_mpdu(3, &data_frame(STA, WIRED_HOST, 1, b"held"));

	assert!(harness.eth.take_tx().is_empty());
	harness.mutex.release_as_low(PKT_BUF_MUTEX_RX_BASE + 3);

	// The same slot works again once released.
	harness.deliver_mpdu(3, &data_frame(STA, WIRED_HOST, 2, b"freed"));
	assert_eq!(harness.eth.take_tx().len(), 1);
}

#[test]
fn cpu_low_exception_halts_the_control() {
	let mut harness = Harness::new();

	harness.mbox.push_inbox(&[
		ipc_word(MsgId::new(MsgGroup::CpuStatus, 0), 2, 0),
		(CpuStatus::INITIALIZED | CpuStatus::EXCEPTION).bits(),
		2,
	]);

	assert_eq!(harness.mac.poll(), Err(MacError::CpuLowException(2)));
	// Every further poll refuses to drive the egress.
	assert_eq!(harness.mac.poll(), Err(MacError::Halted));
}

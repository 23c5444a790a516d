//! 802.11 wire formats shared between MAC-HIGH and MAC-LOW.
//!
//! All multi-byte MAC header fields are little-endian per IEEE
//! 802.11-2012 §8.2.2; the SNAP ethertype is network order.

pub mod mgmt;

use bit_field::BitField;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use smoltcp::wire::EthernetAddress;
use thiserror::Error;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum WireError {
	#[error("buffer too short for frame")]
	Truncated,
}

/// PHY rate selector bytes understood by MAC-LOW.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PhyRate {
	Bpsk12 = 1,
	Bpsk34 = 2,
	Qpsk12 = 3,
	Qpsk34 = 4,
	Qam16_12 = 5,
	Qam16_34 = 6,
	Qam64_23 = 7,
	Qam64_34 = 8,
	/// DSSS 1 Mbps. Valid on receive only; the PHY has no DSSS
	/// transmitter. The value is arbitrary but must not collide with
	/// an OFDM selector.
	Dsss1M = 0x66,
}

pub const MAC_HEADER_LEN: usize = 24;

pub const MAC_FRAME_CTRL1_MASK_TYPE: u8 = 0x0C;
pub const MAC_FRAME_CTRL1_TYPE_MGMT: u8 = 0x00;
pub const MAC_FRAME_CTRL1_TYPE_CTRL: u8 = 0x04;
pub const MAC_FRAME_CTRL1_TYPE_DATA: u8 = 0x08;

/// Frame type/subtype dispatch values, as the full first
/// frame-control byte (protocol version 0).
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum FrameSubtype {
	AssocReq = MAC_FRAME_CTRL1_TYPE_MGMT,
	AssocResp = MAC_FRAME_CTRL1_TYPE_MGMT | 0x10,
	ReassocReq = MAC_FRAME_CTRL1_TYPE_MGMT | 0x20,
	ReassocResp = MAC_FRAME_CTRL1_TYPE_MGMT | 0x30,
	ProbeReq = MAC_FRAME_CTRL1_TYPE_MGMT | 0x40,
	ProbeResp = MAC_FRAME_CTRL1_TYPE_MGMT | 0x50,
	Beacon = MAC_FRAME_CTRL1_TYPE_MGMT | 0x80,
	Atim = MAC_FRAME_CTRL1_TYPE_MGMT | 0x90,
	Disassoc = MAC_FRAME_CTRL1_TYPE_MGMT | 0xA0,
	Auth = MAC_FRAME_CTRL1_TYPE_MGMT | 0xB0,
	Deauth = MAC_FRAME_CTRL1_TYPE_MGMT | 0xC0,
	Action = MAC_FRAME_CTRL1_TYPE_MGMT | 0xD0,
	Data = MAC_FRAME_CTRL1_TYPE_DATA,
}

bitflags! {
	/// Flags of the second frame-control byte (802.11-2012 §8.2.4).
	#[derive(Copy, Clone, Debug, Eq, PartialEq)]
	pub struct FrameControl2: u8 {
		const TO_DS = 0x01;
		const FROM_DS = 0x02;
		const MORE_FLAGS = 0x04;
		const RETRY = 0x08;
		const POWER_MGMT = 0x10;
		const MORE_DATA = 0x20;
		const PROTECTED = 0x40;
		const ORDER = 0x80;
	}
}

bitflags! {
	/// Capability information advertised in beacons and responses.
	#[derive(Copy, Clone, Debug, Eq, PartialEq)]
	pub struct Capabilities: u16 {
		const ESS = 0x0001;
		const IBSS = 0x0002;
		const PRIVACY = 0x0010;
		const SHORT_PREAMBLE = 0x0020;
		const PBCC = 0x0040;
		const CHAN_AGILITY = 0x0080;
		const SPEC_MGMT = 0x0100;
		const SHORT_TIMESLOT = 0x0400;
		const APSD = 0x0800;
		const DSSS_OFDM = 0x2000;
		const DELAYED_BLOCK_ACK = 0x4000;
		const IMMEDIATE_BLOCK_ACK = 0x8000;
	}
}

// Management frame tag numbers.
pub const TAG_SSID_PARAMS: u8 = 0x00;
pub const TAG_SUPPORTED_RATES: u8 = 0x01;
pub const TAG_DS_PARAMS: u8 = 0x03;
pub const TAG_EXT_SUPPORTED_RATES: u8 = 0x32;

/// Marks a rate as basic in a Supported Rates tag.
pub const RATE_BASIC: u8 = 0x80;

/// The 24-byte MAC header common to all frames this design handles
/// (the fourth address of WDS frames is not supported).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MacHeader {
	pub frame_control_1: u8,
	pub frame_control_2: FrameControl2,
	pub duration: u16,
	pub address_1: EthernetAddress,
	pub address_2: EthernetAddress,
	pub address_3: EthernetAddress,
	pub sequence_control: u16,
}

impl MacHeader {
	pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
		if buf.len() < MAC_HEADER_LEN {
			return Err(WireError::Truncated);
		}

		Ok(Self {
			frame_control_1: buf[0],
			frame_control_2: FrameControl2::from_bits_retain(buf[1]),
			duration: u16::from_le_bytes([buf[2], buf[3]]),
			address_1: EthernetAddress::from_bytes(&buf[4..10]),
			address_2: EthernetAddress::from_bytes(&buf[10..16]),
			address_3: EthernetAddress::from_bytes(&buf[16..22]),
			sequence_control: u16::from_le_bytes([buf[22], buf[23]]),
		})
	}

	pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, WireError> {
		if buf.len() < MAC_HEADER_LEN {
			return Err(WireError::Truncated);
		}

		buf[0] = self.frame_control_1;
		buf[1] = self.frame_control_2.bits();
		buf[2..4].copy_from_slice(&self.duration.to_le_bytes());
		buf[4..10].copy_from_slice(self.address_1.as_bytes());
		buf[10..16].copy_from_slice(self.address_2.as_bytes());
		buf[16..22].copy_from_slice(self.address_3.as_bytes());
		buf[22..24].copy_from_slice(&self.sequence_control.to_le_bytes());

		Ok(MAC_HEADER_LEN)
	}

	/// The 12-bit sequence number of the sequence-control field.
	pub fn sequence(&self) -> u16 {
		self.sequence_control.get_bits(4..16)
	}

	pub fn subtype(&self) -> Option<FrameSubtype> {
		FrameSubtype::try_from(self.frame_control_1).ok()
	}
}

/// Packs a 12-bit sequence number into a sequence-control field with
/// fragment number zero.
pub fn sequence_control(seq: u16) -> u16 {
	*0u16.set_bits(4..16, seq & 0x0FFF)
}

/// IPv6 multicast groups map onto Ethernet addresses starting 33:33.
pub fn is_ipv6_multicast(addr: &EthernetAddress) -> bool {
	addr.as_bytes()[0] == 0x33 && addr.as_bytes()[1] == 0x33
}

pub const LLC_HEADER_LEN: usize = 8;

pub const LLC_SNAP: u8 = 0xAA;
pub const LLC_CNTRL_UNNUMBERED: u8 = 0x03;

/// LLC/SNAP encapsulation header carried by data frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LlcHeader {
	/// Encapsulated ethertype, host order.
	pub ethertype: u16,
}

impl LlcHeader {
	pub fn parse(buf: &[u8]) -> Result<Self, WireError> {
		if buf.len() < LLC_HEADER_LEN {
			return Err(WireError::Truncated);
		}

		Ok(Self {
			ethertype: u16::from_be_bytes([buf[6], buf[7]]),
		})
	}

	pub fn write_to(&self, buf: &mut [u8]) -> Result<usize, WireError> {
		if buf.len() < LLC_HEADER_LEN {
			return Err(WireError::Truncated);
		}

		buf[0] = LLC_SNAP;
		buf[1] = LLC_SNAP;
		buf[2] = LLC_CNTRL_UNNUMBERED;
		buf[3..6].fill(0);
		buf[6..8].copy_from_slice(&self.ethertype.to_be_bytes());

		Ok(LLC_HEADER_LEN)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn header_round_trip() {
		let hdr = MacHeader {
			frame_control_1: FrameSubtype::Data.into(),
			frame_control_2: FrameControl2::TO_DS,
			duration: 0,
			address_1: EthernetAddress([0xFF; 6]),
			address_2: EthernetAddress([2, 0, 0, 0, 0, 1]),
			address_3: EthernetAddress([2, 0, 0, 0, 0, 2]),
			sequence_control: sequence_control(17),
		};

		let mut buf = [0u8; MAC_HEADER_LEN];
		assert_eq!(hdr.write_to(&mut buf).unwrap(), MAC_HEADER_LEN);

		let parsed = MacHeader::parse(&buf).unwrap();
		assert_eq!(parsed, hdr);
		assert_eq!(parsed.sequence(), 17);
		assert_eq!(parsed.subtype(), Some(FrameSubtype::Data));
	}

	#[test]
	fn short_header_is_rejected() {
		assert_eq!(
			MacHeader::parse(&[0u8; MAC_HEADER_LEN - 1]),
			Err(WireError::Truncated)
		);
	}

	#[test]
	fn sequence_ignores_fragment_number() {
		let mut hdr = MacHeader::parse(&[0u8; MAC_HEADER_LEN]).unwrap();
		hdr.sequence_control = sequence_control(0xFFF) | 0x000F;
		assert_eq!(hdr.sequence(), 0xFFF);
	}

	#[test]
	fn llc_ethertype_is_network_order() {
		let llc = LlcHeader { ethertype: 0x0800 };
		let mut buf = [0u8; LLC_HEADER_LEN];
		llc.write_to(&mut buf).unwrap();
		assert_eq!(&buf[..3], &[LLC_SNAP, LLC_SNAP, LLC_CNTRL_UNNUMBERED]);
		assert_eq!(&buf[6..8], &[0x08, 0x00]);
		assert_eq!(LlcHeader::parse(&buf).unwrap(), llc);
	}

	#[test]
	fn ipv6_multicast_prefix() {
		assert!(is_ipv6_multicast(&EthernetAddress([
			0x33, 0x33, 0, 0, 0, 1
		])));
		assert!(!is_ipv6_multicast(&EthernetAddress::BROADCAST));
	}
}

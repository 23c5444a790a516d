//! Builders and parsers for the management frames this AP speaks.
//!
//! Each builder writes a complete MPDU (without FCS) into the caller's
//! buffer and returns the frame length. Fields MAC-LOW fills on the
//! way out (timestamp, duration) are written as zero.

use num_enum::IntoPrimitive;
use smoltcp::wire::EthernetAddress;

use super::{
	Capabilities, FrameControl2, FrameSubtype, MacHeader, RATE_BASIC, TAG_DS_PARAMS,
	TAG_SSID_PARAMS, TAG_SUPPORTED_RATES, WireError, sequence_control,
};

pub const AUTH_ALGO_OPEN_SYSTEM: u16 = 0x00;

pub const AUTH_SEQ_REQ: u16 = 0x01;
pub const AUTH_SEQ_RESP: u16 = 0x02;

// Status codes, 802.11-2007 Table 7-23.
pub const STATUS_SUCCESS: u16 = 0;
pub const STATUS_AUTH_REJECT_CHALLENGE_FAILURE: u16 = 15;

/// AID values in association responses carry the two reserved MSBs.
pub const AID_MSB_FLAGS: u16 = 0xC000;

/// Reason codes carried in deauthentication frames.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive)]
#[repr(u16)]
pub enum ReasonCode {
	Inactivity = 4,
	NonassociatedSta = 7,
}

/// The OFDM rate set advertised in beacons and responses: 6, 9, 12,
/// 18, 24, 36, 48 and 54 Mbps with 6/12/24 marked basic.
pub const SUPPORTED_RATES: [u8; 8] = [
	RATE_BASIC | 12,
	18,
	RATE_BASIC | 24,
	36,
	RATE_BASIC | 48,
	72,
	96,
	108,
];

fn mgmt_header(
	subtype: FrameSubtype,
	dst: EthernetAddress,
	bssid: EthernetAddress,
	seq: u16,
) -> MacHeader {
	MacHeader {
		frame_control_1: subtype.into(),
		frame_control_2: FrameControl2::empty(),
		duration: 0,
		address_1: dst,
		address_2: bssid,
		address_3: bssid,
		sequence_control: sequence_control(seq),
	}
}

struct Writer<'a> {
	buf: &'a mut [u8],
	len: usize,
}

impl<'a> Writer<'a> {
	fn new(buf: &'a mut [u8]) -> Self {
		Self { buf, len: 0 }
	}

	fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
		let end = self.len + bytes.len();
		if end > self.buf.len() {
			return Err(WireError::Truncated);
		}
		self.buf[self.len..end].copy_from_slice(bytes);
		self.len = end;
		Ok(())
	}

	fn put_u16(&mut self, value: u16) -> Result<(), WireError> {
		self.put(&value.to_le_bytes())
	}

	fn put_tag(&mut self, tag: u8, data: &[u8]) -> Result<(), WireError> {
		self.put(&[tag, data.len() as u8])?;
		self.put(data)
	}

	fn put_header(&mut self, header: &MacHeader) -> Result<(), WireError> {
		self.len += header.write_to(self.buf)?;
		Ok(())
	}
}

/// Builds a beacon or a unicast probe response.
pub fn beacon_probe_frame(
	buf: &mut [u8],
	subtype: FrameSubtype,
	dst: EthernetAddress,
	bssid: EthernetAddress,
	seq: u16,
	beacon_interval_ms: u16,
	ssid: &str,
	channel: u8,
) -> Result<usize, WireError> {
	let mut w = Writer::new(buf);
	w.put_header(&mgmt_header(subtype, dst, bssid, seq))?;
	// Timestamp is stamped by MAC-LOW at the antenna (FILL_TIMESTAMP).
	w.put(&0u64.to_le_bytes())?;
	w.put_u16(beacon_interval_ms)?;
	w.put_u16((Capabilities::ESS | Capabilities::SHORT_TIMESLOT).bits())?;
	w.put_tag(TAG_SSID_PARAMS, ssid.as_bytes())?;
	w.put_tag(TAG_SUPPORTED_RATES, &SUPPORTED_RATES)?;
	w.put_tag(TAG_DS_PARAMS, &[channel])?;
	Ok(w.len)
}

/// Builds an authentication frame.
pub fn auth_frame(
	buf: &mut [u8],
	dst: EthernetAddress,
	bssid: EthernetAddress,
	seq: u16,
	algorithm: u16,
	auth_seq: u16,
	status: u16,
) -> Result<usize, WireError> {
	let mut w = Writer::new(buf);
	w.put_header(&mgmt_header(FrameSubtype::Auth, dst, bssid, seq))?;
	w.put_u16(algorithm)?;
	w.put_u16(auth_seq)?;
	w.put_u16(status)?;
	Ok(w.len)
}

/// Builds an association response. `aid` is the bare table AID; the
/// reserved MSBs are set here.
pub fn association_response_frame(
	buf: &mut [u8],
	dst: EthernetAddress,
	bssid: EthernetAddress,
	seq: u16,
	status: u16,
	aid: u16,
) -> Result<usize, WireError> {
	let mut w = Writer::new(buf);
	w.put_header(&mgmt_header(FrameSubtype::AssocResp, dst, bssid, seq))?;
	w.put_u16((Capabilities::ESS | Capabilities::SHORT_TIMESLOT).bits())?;
	w.put_u16(status)?;
	w.put_u16(AID_MSB_FLAGS | aid)?;
	w.put_tag(TAG_SUPPORTED_RATES, &SUPPORTED_RATES)?;
	Ok(w.len)
}

/// Builds a deauthentication frame.
pub fn deauth_frame(
	buf: &mut [u8],
	dst: EthernetAddress,
	bssid: EthernetAddress,
	seq: u16,
	reason: ReasonCode,
) -> Result<usize, WireError> {
	let mut w = Writer::new(buf);
	w.put_header(&mgmt_header(FrameSubtype::Deauth, dst, bssid, seq))?;
	w.put_u16(reason.into())?;
	Ok(w.len)
}

/// Writes the MAC header of a data frame and returns its length.
pub fn data_header(
	buf: &mut [u8],
	flags: FrameControl2,
	address_1: EthernetAddress,
	address_2: EthernetAddress,
	address_3: EthernetAddress,
	seq: u16,
) -> Result<usize, WireError> {
	MacHeader {
		frame_control_1: FrameSubtype::Data.into(),
		frame_control_2: flags,
		duration: 0,
		address_1,
		address_2,
		address_3,
		sequence_control: sequence_control(seq),
	}
	.write_to(buf)
}

/// Fixed body of an authentication frame.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AuthBody {
	pub algorithm: u16,
	pub sequence: u16,
	pub status: u16,
}

impl AuthBody {
	pub fn parse(body: &[u8]) -> Result<Self, WireError> {
		if body.len() < 6 {
			return Err(WireError::Truncated);
		}

		Ok(Self {
			algorithm: u16::from_le_bytes([body[0], body[1]]),
			sequence: u16::from_le_bytes([body[2], body[3]]),
			status: u16::from_le_bytes([body[4], body[5]]),
		})
	}
}

/// Iterator over the tagged parameters of a management frame body.
///
/// Stops cleanly at the end of the buffer or at a truncated tag, so a
/// malformed frame cannot run the parser past the MPDU.
pub struct TaggedParams<'a> {
	body: &'a [u8],
}

impl<'a> TaggedParams<'a> {
	pub fn new(body: &'a [u8]) -> Self {
		Self { body }
	}
}

impl<'a> Iterator for TaggedParams<'a> {
	type Item = (u8, &'a [u8]);

	fn next(&mut self) -> Option<Self::Item> {
		if self.body.len() < 2 {
			return None;
		}

		let tag = self.body[0];
		let len = self.body[1] as usize;
		if self.body.len() < 2 + len {
			return None;
		}

		let data = &self.body[2..2 + len];
		self.body = &self.body[2 + len..];
		Some((tag, data))
	}
}

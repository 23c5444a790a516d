//! Framed messages over the inter-processor mailbox.
//!
//! A message is one header word followed by up to 255 payload words.
//! The header packs the 16-bit message id (whose upper nibble is a
//! fixed delimiter), the payload word count and a small argument
//! byte. Any word read from the mailbox that does not carry the
//! delimiter is a framing error; the channel is drained so the stream
//! can re-synchronize at the next valid header.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::config::IPC_MAX_MSG_WORDS;
use crate::hal::Mailbox;

/// Fixed delimiter in the upper nibble of every message id.
pub const MSG_ID_DELIM: u16 = 0xF000;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum IpcError {
	#[error("message fails framing validation")]
	InvalidMsg,
}

/// Message groups, bits 11..8 of the message id.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum MsgGroup {
	Cmd = 0,
	MacAddr = 1,
	CpuStatus = 2,
	Param = 3,
}

/// Commands of the `Cmd` group.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Command {
	RxMpduReady = 0,
	TxMpduReady = 2,
	TxMpduAccept = 3,
	TxMpduDone = 4,
}

/// Parameters of the `Param` group.
#[derive(Copy, Clone, Debug, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Param {
	SetChannel = 0,
}

bitflags! {
	/// CPU status words exchanged in the `CpuStatus` group.
	#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
	pub struct CpuStatus: u32 {
		const INITIALIZED = 0x0000_0001;
		const WAIT_FOR_IPC_ACCEPT = 0x0000_0002;
		/// Fatal indication; the peer CPU cannot continue.
		const EXCEPTION = 0x8000_0000;
	}
}

/// A 16-bit message id: delimiter, group nibble, subtype byte.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MsgId(u16);

impl MsgId {
	pub fn new(group: MsgGroup, msg: u8) -> Self {
		Self(MSG_ID_DELIM | (u16::from(u8::from(group)) << 8) | u16::from(msg))
	}

	pub fn command(cmd: Command) -> Self {
		Self::new(MsgGroup::Cmd, cmd.into())
	}

	pub fn param(param: Param) -> Self {
		Self::new(MsgGroup::Param, param.into())
	}

	/// Wraps a raw id without validation; [`IpcChannel::write`]
	/// rejects ids that do not carry the delimiter.
	pub fn from_raw(raw: u16) -> Self {
		Self(raw)
	}

	pub fn raw(self) -> u16 {
		self.0
	}

	pub fn group(self) -> Result<MsgGroup, IpcError> {
		MsgGroup::try_from(((self.0 >> 8) & 0x0F) as u8).map_err(|_| IpcError::InvalidMsg)
	}

	pub fn msg(self) -> u8 {
		(self.0 & 0xFF) as u8
	}

	fn is_delimited(self) -> bool {
		self.0 & MSG_ID_DELIM == MSG_ID_DELIM
	}
}

/// A received message header; the payload words were copied into the
/// buffer passed to [`IpcChannel::read`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Received {
	pub id: MsgId,
	pub arg0: u8,
	/// Number of payload words copied out.
	pub payload_len: usize,
}

/// The MAC-HIGH endpoint of the mailbox.
pub struct IpcChannel<B: Mailbox> {
	mbox: B,
}

impl<B: Mailbox> IpcChannel<B> {
	pub fn new(mbox: B) -> Self {
		Self { mbox }
	}

	/// Sends one message. Validation happens before the first word is
	/// written, so an invalid message never reaches the pipe.
	pub fn write(&mut self, id: MsgId, arg0: u8, payload: &[u32]) -> Result<(), IpcError> {
		if !id.is_delimited() || payload.len() > IPC_MAX_MSG_WORDS {
			return Err(IpcError::InvalidMsg);
		}

		self.mbox.write_blocking(header_word(id, payload.len() as u8, arg0));
		for &word in payload {
			self.mbox.write_blocking(word);
		}

		Ok(())
	}

	/// Attempts to read one message. Returns `Ok(None)` when the
	/// mailbox is empty. Once a valid header has been read, the
	/// stated payload words are read blocking, so a message is
	/// consumed atomically. Payload words beyond `payload.len()` are
	/// consumed and dropped.
	pub fn read(&mut self, payload: &mut [u32]) -> Result<Option<Received>, IpcError> {
		let Some(header) = self.mbox.try_read() else {
			return Ok(None);
		};

		let id = MsgId::from_raw((header & 0xFFFF) as u16);
		let num_payload_words = ((header >> 16) & 0xFF) as usize;
		let arg0 = (header >> 24) as u8;

		if !id.is_delimited() || num_payload_words > IPC_MAX_MSG_WORDS {
			self.mbox.flush();
			return Err(IpcError::InvalidMsg);
		}

		let copied = num_payload_words.min(payload.len());
		for i in 0..num_payload_words {
			let word = self.mbox.read_blocking();
			if i < copied {
				payload[i] = word;
			}
		}
		if copied < num_payload_words {
			warn!(
				"ipc message {:#06x} truncated from {} to {} payload words",
				id.raw(),
				num_payload_words,
				copied
			);
		}

		Ok(Some(Received {
			id,
			arg0,
			payload_len: copied,
		}))
	}
}

fn header_word(id: MsgId, num_payload_words: u8, arg0: u8) -> u32 {
	u32::from(id.raw()) | (u32::from(num_payload_words) << 16) | (u32::from(arg0) << 24)
}

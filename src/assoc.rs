//! The association table of the BSS.
//!
//! A densely packed array of station records: all occupied entries
//! precede all free entries, a free entry is marked by the broadcast
//! address, and every entry keeps the AID that was pre-assigned to
//! its slot at initialization (802.11-2007 §7.3.1.8). Removal
//! compacts the table through the reserved trailing swap slot, which
//! returns the freed slot's AID to the pool for the next admission.

use smoltcp::wire::EthernetAddress;

use crate::config::MAX_ASSOCIATIONS;
use crate::wire::PhyRate;

/// Transmit rate given to a freshly admitted station. Rate adaptation
/// may change the per-station value afterwards.
pub const DEFAULT_TX_RATE: PhyRate = PhyRate::Qpsk34;

/// One station record.
#[derive(Copy, Clone, Debug)]
pub struct StationInfo {
	pub addr: EthernetAddress,
	/// Stable for the lifetime of the entry.
	pub aid: u16,
	/// Last received 12-bit sequence number; 0 means none seen yet.
	pub seq: u16,
	/// MAC time of the last frame received from this station.
	pub rx_timestamp: u64,
	pub tx_rate: PhyRate,
	pub num_tx_total: u32,
	pub num_tx_success: u32,
}

impl StationInfo {
	const fn free(aid: u16) -> Self {
		Self {
			addr: EthernetAddress::BROADCAST,
			aid,
			seq: 0,
			rx_timestamp: 0,
			tx_rate: DEFAULT_TX_RATE,
			num_tx_total: 0,
			num_tx_success: 0,
		}
	}
}

/// Result of admitting a station.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Admission {
	pub aid: u16,
	/// `false` for a re-association that reused the existing entry.
	pub new_association: bool,
}

/// Outcome of the per-frame table update.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RxUpdate {
	/// The source address is not in the table.
	Unknown,
	Fresh,
	/// Same 12-bit sequence number as the previous data frame from
	/// this station; the frame is to be dropped silently.
	Duplicate,
}

pub struct AssociationTable {
	/// The trailing entry is the swap scratch for compaction.
	stations: [StationInfo; MAX_ASSOCIATIONS + 1],
	next_free_index: usize,
}

impl AssociationTable {
	pub fn new() -> Self {
		Self {
			stations: core::array::from_fn(|i| {
				if i < MAX_ASSOCIATIONS {
					StationInfo::free(i as u16 + 1)
				} else {
					StationInfo::free(0)
				}
			}),
			next_free_index: 0,
		}
	}

	pub fn next_free_index(&self) -> usize {
		self.next_free_index
	}

	/// Number of leading occupied entries.
	fn occupied_count(&self) -> usize {
		self.stations[..MAX_ASSOCIATIONS]
			.iter()
			.take_while(|station| station.addr != EthernetAddress::BROADCAST)
			.count()
	}

	pub fn occupied(&self) -> &[StationInfo] {
		&self.stations[..self.occupied_count()]
	}

	pub fn find(&self, addr: EthernetAddress) -> Option<&StationInfo> {
		let n = self.occupied_count();
		self.stations[..n].iter().find(|station| station.addr == addr)
	}

	pub fn find_mut(&mut self, addr: EthernetAddress) -> Option<&mut StationInfo> {
		let n = self.occupied_count();
		self.stations[..n]
			.iter_mut()
			.find(|station| station.addr == addr)
	}

	pub fn find_by_aid(&mut self, aid: u16) -> Option<&mut StationInfo> {
		let n = self.occupied_count();
		self.stations[..n].iter_mut().find(|station| station.aid == aid)
	}

	/// Admits `addr`, reusing its existing entry on re-association.
	///
	/// The cursor only advances while below `MAX_ASSOCIATIONS - 2`;
	/// at the bound the admission still takes the final free slot.
	/// Returns `None` when no entry is free.
	pub fn admit(&mut self, addr: EthernetAddress, now: u64) -> Option<Admission> {
		for i in 0..=self.next_free_index.min(MAX_ASSOCIATIONS - 1) {
			let station = &mut self.stations[i];
			if station.addr == addr {
				// Re-association keeps the AID and the entry.
				return Some(Admission {
					aid: station.aid,
					new_association: false,
				});
			}

			if station.addr == EthernetAddress::BROADCAST {
				let aid = station.aid;
				*station = StationInfo::free(aid);
				station.addr = addr;
				station.rx_timestamp = now;

				if self.next_free_index < MAX_ASSOCIATIONS - 2 {
					self.next_free_index += 1;
				}

				return Some(Admission {
					aid,
					new_association: true,
				});
			}
		}

		None
	}

	/// Removes the entry of `addr`, compacting the table. The freed
	/// slot's record moves behind the remaining entries through the
	/// swap slot, preserving its AID for the next admission.
	pub fn remove(&mut self, addr: EthernetAddress) -> bool {
		let occupied = self.occupied_count();
		let Some(i) = self.stations[..occupied]
			.iter()
			.position(|station| station.addr == addr)
		else {
			return false;
		};

		self.stations[MAX_ASSOCIATIONS] = self.stations[i];
		self.stations[MAX_ASSOCIATIONS].addr = EthernetAddress::BROADCAST;

		self.stations.copy_within(i + 1..occupied, i);
		self.stations[occupied - 1] = self.stations[MAX_ASSOCIATIONS];

		self.next_free_index = self.next_free_index.min(occupied - 1);
		true
	}

	/// Table update for a received frame: refreshes the last-receive
	/// timestamp of a known source and, for data frames, performs the
	/// duplicate-sequence check.
	pub fn update_rx(
		&mut self,
		addr: EthernetAddress,
		now: u64,
		data_seq: Option<u16>,
	) -> RxUpdate {
		let Some(station) = self.find_mut(addr) else {
			return RxUpdate::Unknown;
		};

		station.rx_timestamp = now;

		if let Some(seq) = data_seq {
			if station.seq != 0 && station.seq == seq {
				return RxUpdate::Duplicate;
			}
			station.seq = seq;
		}

		RxUpdate::Fresh
	}

	/// Dumps the table, the successor of the original UART printout.
	pub fn log_associations(&self, now: u64) {
		info!("Current associations (MAC time = {} usec)", now);
		info!("|-AID-|------ MAC ADDR -----|");
		for station in self.occupied() {
			info!("| {:3}  | {} |", station.aid, station.addr);
		}
	}
}

impl Default for AssociationTable {
	fn default() -> Self {
		Self::new()
	}
}

//! Transmit packet queue.
//!
//! A static pool of [`PQUEUE_LEN`] buffer descriptors, each with a
//! fixed 2 KiB frame buffer, arranged as one free ring plus one FIFO
//! ring per transmit priority. Rings are doubly linked lists over
//! index handles into the flat pool, so descriptors can be spliced
//! between rings in O(1) without aliasing the pool storage.
//!
//! A descriptor belongs to at most one ring at any time, and a ring's
//! cached `length` always equals the number of descriptors reachable
//! from its `first` link.

use alloc::boxed::Box;
use alloc::vec::Vec;

use smoltcp::wire::EthernetAddress;

use crate::config::{NUM_QUEUES, PQUEUE_LEN, PQUEUE_MAX_FRAME_SIZE};
use crate::pktbuf::TxFrameInfo;

/// Transmit priority classes, drained high before low.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum QueuePriority {
	High,
	Low,
}

impl QueuePriority {
	fn index(self) -> usize {
		match self {
			QueuePriority::High => 0,
			QueuePriority::Low => 1,
		}
	}
}

/// One queue buffer descriptor.
///
/// `station` names the station this frame is addressed to by its MAC
/// address; it is resolved against the association table at transmit
/// time, so a station removed while the frame was queued simply
/// degrades to the no-station defaults.
pub struct PacketBd {
	pub station: Option<EthernetAddress>,
	pub frame_info: TxFrameInfo,
	pub frame: [u8; PQUEUE_MAX_FRAME_SIZE],
	prev: Option<u16>,
	next: Option<u16>,
}

impl PacketBd {
	fn new() -> Self {
		Self {
			station: None,
			frame_info: TxFrameInfo::default(),
			frame: [0; PQUEUE_MAX_FRAME_SIZE],
			prev: None,
			next: None,
		}
	}
}

/// A doubly linked ring of descriptors with cached endpoints and
/// length. Rings own no storage; all links live in the pool.
#[derive(Debug)]
pub struct BdRing {
	first: Option<u16>,
	last: Option<u16>,
	length: u16,
}

impl BdRing {
	pub const fn new() -> Self {
		Self {
			first: None,
			last: None,
			length: 0,
		}
	}

	pub fn len(&self) -> usize {
		usize::from(self.length)
	}

	pub fn is_empty(&self) -> bool {
		self.length == 0
	}

	pub fn first(&self) -> Option<u16> {
		self.first
	}
}

impl Default for BdRing {
	fn default() -> Self {
		Self::new()
	}
}

/// The descriptor pool with its free ring and priority rings.
pub struct PacketQueue {
	pool: Box<[PacketBd]>,
	free: BdRing,
	queues: [BdRing; NUM_QUEUES],
}

impl PacketQueue {
	/// At boot every descriptor sits in the free ring and all
	/// priority rings are empty.
	pub fn new() -> Self {
		let pool = (0..PQUEUE_LEN)
			.map(|_| PacketBd::new())
			.collect::<Vec<_>>()
			.into_boxed_slice();

		let mut queue = Self {
			pool,
			free: BdRing::new(),
			queues: [BdRing::new(), BdRing::new()],
		};
		for i in 0..PQUEUE_LEN as u16 {
			Self::insert_end(&mut queue.pool, &mut queue.free, i);
		}

		queue
	}

	pub fn bd(&self, index: u16) -> &PacketBd {
		&self.pool[usize::from(index)]
	}

	pub fn bd_mut(&mut self, index: u16) -> &mut PacketBd {
		&mut self.pool[usize::from(index)]
	}

	pub fn free_len(&self) -> usize {
		self.free.len()
	}

	pub fn queue_len(&self, prio: QueuePriority) -> usize {
		self.queues[prio.index()].len()
	}

	/// Detaches up to `n` descriptors from the head of the free ring
	/// into a private ring. Never blocks; the ring is shorter than
	/// `n` when the pool is running dry.
	pub fn checkout(&mut self, n: usize) -> BdRing {
		let mut ring = BdRing::new();
		for _ in 0..n {
			let Some(index) = self.free.first else {
				break;
			};
			Self::remove(&mut self.pool, &mut self.free, index);
			Self::insert_end(&mut self.pool, &mut ring, index);
		}

		ring
	}

	/// Drains a private ring back into the tail of the free ring.
	pub fn checkin(&mut self, ring: &mut BdRing) {
		while let Some(index) = ring.first {
			Self::remove(&mut self.pool, ring, index);
			Self::insert_end(&mut self.pool, &mut self.free, index);
		}
	}

	/// Moves a private ring's descriptors to the tail of priority
	/// ring `prio`, preserving their order.
	pub fn enqueue(&mut self, prio: QueuePriority, ring: &mut BdRing) {
		while let Some(index) = ring.first {
			Self::remove(&mut self.pool, ring, index);
			Self::insert_end(&mut self.pool, &mut self.queues[prio.index()], index);
		}
	}

	/// Detaches up to `n` descriptors from the head of priority ring
	/// `prio` into a private ring.
	pub fn dequeue(&mut self, prio: QueuePriority, n: usize) -> BdRing {
		let mut ring = BdRing::new();
		for _ in 0..n {
			let Some(index) = self.queues[prio.index()].first else {
				break;
			};
			Self::remove(&mut self.pool, &mut self.queues[prio.index()], index);
			Self::insert_end(&mut self.pool, &mut ring, index);
		}

		ring
	}

	fn insert_after(pool: &mut [PacketBd], ring: &mut BdRing, at: u16, new: u16) {
		let at_next = pool[usize::from(at)].next;
		pool[usize::from(new)].prev = Some(at);
		pool[usize::from(new)].next = at_next;
		match at_next {
			None => ring.last = Some(new),
			Some(next) => pool[usize::from(next)].prev = Some(new),
		}
		pool[usize::from(at)].next = Some(new);
		ring.length += 1;
	}

	fn insert_before(pool: &mut [PacketBd], ring: &mut BdRing, at: u16, new: u16) {
		let at_prev = pool[usize::from(at)].prev;
		pool[usize::from(new)].prev = at_prev;
		pool[usize::from(new)].next = Some(at);
		match at_prev {
			None => ring.first = Some(new),
			Some(prev) => pool[usize::from(prev)].next = Some(new),
		}
		pool[usize::from(at)].prev = Some(new);
		ring.length += 1;
	}

	fn insert_beginning(pool: &mut [PacketBd], ring: &mut BdRing, new: u16) {
		match ring.first {
			None => {
				ring.first = Some(new);
				ring.last = Some(new);
				pool[usize::from(new)].prev = None;
				pool[usize::from(new)].next = None;
				ring.length += 1;
			}
			Some(first) => Self::insert_before(pool, ring, first, new),
		}
	}

	fn insert_end(pool: &mut [PacketBd], ring: &mut BdRing, new: u16) {
		match ring.last {
			None => Self::insert_beginning(pool, ring, new),
			Some(last) => Self::insert_after(pool, ring, last, new),
		}
	}

	fn remove(pool: &mut [PacketBd], ring: &mut BdRing, index: u16) {
		let (prev, next) = {
			let bd = &pool[usize::from(index)];
			(bd.prev, bd.next)
		};

		match prev {
			None => ring.first = next,
			Some(prev) => pool[usize::from(prev)].next = next,
		}
		match next {
			None => ring.last = prev,
			Some(next) => pool[usize::from(next)].prev = prev,
		}

		pool[usize::from(index)].prev = None;
		pool[usize::from(index)].next = None;
		ring.length -= 1;
	}

	/// Walks a ring front to back. Test and diagnostic helper.
	pub fn iter<'a>(&'a self, ring: &'a BdRing) -> impl Iterator<Item = u16> + 'a {
		let mut cursor = ring.first;
		core::iter::from_fn(move || {
			let index = cursor?;
			cursor = self.pool[usize::from(index)].next;
			Some(index)
		})
	}
}

//! Bounded event queue between interrupt context and the main loop.
//!
//! Interrupt handlers never call into the MAC directly; they push an
//! event here and the main loop performs the matching poll. The queue
//! is the only structure shared with interrupt context, so it sits
//! behind a spinning mutex and all pushes are non-blocking.

use heapless::Deque;
use hermit_sync::TicketMutex;

use crate::config::EVENT_QUEUE_LEN;
use crate::scheduler::Wheel;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IrqEvent {
	/// The countdown timer of a scheduler wheel expired.
	Timer(Wheel),
	/// The Ethernet MAC has received frames pending.
	EthRx,
	/// MAC-LOW wrote to the mailbox.
	IpcRx,
}

pub struct EventQueue {
	queue: TicketMutex<Deque<IrqEvent, EVENT_QUEUE_LEN>>,
}

impl EventQueue {
	pub const fn new() -> Self {
		Self {
			queue: TicketMutex::new(Deque::new()),
		}
	}

	/// Push from interrupt context. A full queue drops the event;
	/// the main loop's polling rotation covers the loss.
	pub fn push(&self, event: IrqEvent) {
		if self.queue.lock().push_back(event).is_err() {
			warn!("irq event queue full, dropping {:?}", event);
		}
	}

	pub fn pop(&self) -> Option<IrqEvent> {
		self.queue.lock().pop_front()
	}
}

impl Default for EventQueue {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn events_drain_in_fifo_order() {
		let queue = EventQueue::new();
		queue.push(IrqEvent::EthRx);
		queue.push(IrqEvent::Timer(Wheel::Coarse));

		assert_eq!(queue.pop(), Some(IrqEvent::EthRx));
		assert_eq!(queue.pop(), Some(IrqEvent::Timer(Wheel::Coarse)));
		assert_eq!(queue.pop(), None);
	}

	#[test]
	fn full_queue_drops_instead_of_blocking() {
		let queue = EventQueue::new();
		for _ in 0..EVENT_QUEUE_LEN + 4 {
			queue.push(IrqEvent::IpcRx);
		}

		let mut drained = 0;
		while queue.pop().is_some() {
			drained += 1;
		}
		assert_eq!(drained, EVENT_QUEUE_LEN);
	}
}

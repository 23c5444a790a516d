//! One-shot event scheduler.
//!
//! Two independent wheels, fine and coarse, each a flat array of
//! [`SCHEDULER_NUM_EVENTS`] one-shot slots backed by a countdown
//! timer. The timer is armed only while at least one slot is
//! occupied. Events are plain `Copy` values chosen by the embedder;
//! the caller dispatches what [`Scheduler::poll`] surfaces, which
//! keeps all handler invocations serialized in the main loop.
//!
//! A slot is cleared *before* its event is surfaced, so a handler may
//! immediately reschedule into the slot it just vacated.

use thiserror::Error;

use crate::config::{COARSE_TIMER_DUR_US, FINE_TIMER_DUR_US, SCHEDULER_NUM_EVENTS};
use crate::hal::OneShotTimer;

/// Upper bound of events a single poll can surface.
pub const MAX_FIRED_EVENTS: usize = 2 * SCHEDULER_NUM_EVENTS;

pub type FiredEvents<E> = heapless::Vec<E, MAX_FIRED_EVENTS>;

#[derive(Error, Debug, Eq, PartialEq)]
pub enum SchedulerError {
	#[error("all scheduler event slots are in use")]
	Overflow,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Wheel {
	/// Sub-millisecond granularity.
	Fine,
	/// Tens of milliseconds granularity.
	Coarse,
}

struct EventSlot<E> {
	deadline_usec: u64,
	event: E,
}

struct TimerWheel<E, T: OneShotTimer> {
	slots: [Option<EventSlot<E>>; SCHEDULER_NUM_EVENTS],
	timer: T,
	tick_us: u32,
	timer_running: bool,
}

impl<E: Copy, T: OneShotTimer> TimerWheel<E, T> {
	fn new(timer: T, tick_us: u32) -> Self {
		Self {
			slots: [const { None }; SCHEDULER_NUM_EVENTS],
			timer,
			tick_us,
			timer_running: false,
		}
	}

	fn schedule(&mut self, now: u64, delay_us: u64, event: E) -> Result<(), SchedulerError> {
		let Some(slot) = self.slots.iter_mut().find(|slot| slot.is_none()) else {
			error!("{} schedule slots already filled", SCHEDULER_NUM_EVENTS);
			return Err(SchedulerError::Overflow);
		};

		*slot = Some(EventSlot {
			deadline_usec: now + delay_us,
			event,
		});

		if !self.timer_running {
			self.timer_running = true;
			self.timer.arm(self.tick_us);
		}

		Ok(())
	}

	fn service<const N: usize>(&mut self, now: u64, fired: &mut heapless::Vec<E, N>) {
		for slot in &mut self.slots {
			if let Some(pending) = slot {
				if now > pending.deadline_usec {
					let event = pending.event;
					// Free the slot before surfacing the event so the
					// handler can reschedule into it.
					*slot = None;
					fired.push(event).ok();
				}
			}
		}

		if self.slots.iter().any(|slot| slot.is_some()) {
			self.timer_running = true;
			self.timer.arm(self.tick_us);
		} else {
			self.timer_running = false;
			self.timer.stop();
		}
	}
}

/// The fine and coarse wheels of the MAC.
pub struct Scheduler<E, T: OneShotTimer> {
	fine: TimerWheel<E, T>,
	coarse: TimerWheel<E, T>,
}

impl<E: Copy, T: OneShotTimer> Scheduler<E, T> {
	pub fn new(fine_timer: T, coarse_timer: T) -> Self {
		Self {
			fine: TimerWheel::new(fine_timer, FINE_TIMER_DUR_US),
			coarse: TimerWheel::new(coarse_timer, COARSE_TIMER_DUR_US),
		}
	}

	/// Submits `event` to fire once, no earlier than `delay_us` from
	/// `now`. Fails without side effects when the wheel is full.
	pub fn schedule(
		&mut self,
		wheel: Wheel,
		now: u64,
		delay_us: u64,
		event: E,
	) -> Result<(), SchedulerError> {
		match wheel {
			Wheel::Fine => self.fine.schedule(now, delay_us, event),
			Wheel::Coarse => self.coarse.schedule(now, delay_us, event),
		}
	}

	/// Sweeps both wheels and returns the expired events in slot
	/// order, fine wheel first.
	pub fn poll(&mut self, now: u64) -> FiredEvents<E> {
		let mut fired = FiredEvents::new();
		self.fine.service(now, &mut fired);
		self.coarse.service(now, &mut fired);
		fired
	}

	/// Sweeps a single wheel, for the wheel's timer interrupt.
	pub fn service_wheel(&mut self, wheel: Wheel, now: u64) -> FiredEvents<E> {
		let mut fired = FiredEvents::new();
		match wheel {
			Wheel::Fine => self.fine.service(now, &mut fired),
			Wheel::Coarse => self.coarse.service(now, &mut fired),
		}
		fired
	}
}

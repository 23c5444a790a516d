//! Operational constants of the MAC-HIGH design.
//!
//! The shared-memory and IPC constants are part of the contract with
//! MAC-LOW and must match the values compiled into its firmware.

/// Number of transmit packet buffers in shared memory.
pub const NUM_TX_PKT_BUFS: usize = 16;
/// Number of receive packet buffers in shared memory.
pub const NUM_RX_PKT_BUFS: usize = 16;

/// Size of one shared packet buffer slot.
pub const PKT_BUF_SIZE: usize = 4096;

/// Padding between the frame info header and the frame, reserved for
/// the PHY preamble bytes written by MAC-LOW.
pub const PHY_HDR_PAD: usize = 8;

/// Flat mutex id of TX slot 0.
pub const PKT_BUF_MUTEX_TX_BASE: u8 = 0;
/// Flat mutex id of RX slot 0.
pub const PKT_BUF_MUTEX_RX_BASE: u8 = NUM_TX_PKT_BUFS as u8;

/// Total number of queue buffer descriptors.
pub const PQUEUE_LEN: usize = 20;
/// Frame capacity of one queue buffer descriptor.
pub const PQUEUE_MAX_FRAME_SIZE: usize = 0x800;

/// Number of transmit priority rings (high and low).
pub const NUM_QUEUES: usize = 2;

/// Number of event slots per scheduler wheel.
pub const SCHEDULER_NUM_EVENTS: usize = 8;

/// Tick of the fine scheduler wheel in microseconds.
pub const FINE_TIMER_DUR_US: u32 = 100;
/// Tick of the coarse scheduler wheel in microseconds.
pub const COARSE_TIMER_DUR_US: u32 = 10_000;

/// Capacity of the interrupt-to-main-loop event queue.
pub const EVENT_QUEUE_LEN: usize = 16;

/// Maximum number of payload words in one IPC message.
pub const IPC_MAX_MSG_WORDS: usize = 255;

pub const BEACON_INTERVAL_MS: u64 = 100;
pub const BEACON_INTERVAL_US: u64 = BEACON_INTERVAL_MS * 1000;

pub const ASSOCIATION_CHECK_INTERVAL_MS: u64 = 10_000;
pub const ASSOCIATION_CHECK_INTERVAL_US: u64 = ASSOCIATION_CHECK_INTERVAL_MS * 1000;

/// A station that has been silent for longer than this is
/// de-authenticated by the periodic association check.
pub const ASSOCIATION_TIMEOUT_US: u64 = 30_000_000;

/// Maximum number of associated stations.
pub const MAX_ASSOCIATIONS: usize = 8;

pub const MAX_RETRY: u8 = 7;

pub const DEFAULT_CHANNEL: u8 = 9;

/// Number of TX slots cycled by the egress double buffer.
pub const TX_BUFFER_NUM: u8 = 2;

/// Maximum length of the configured SSID.
pub const SSID_MAX_LEN: usize = 32;

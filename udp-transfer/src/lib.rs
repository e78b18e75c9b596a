//! `udp-transfer`: reliable single-file transfer over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────┐  NAME SIZE HASH×32 STRT   ┌──────────────┐
//!  │    sender    │──────────────────────────▶│   receiver   │
//!  │              │◀──────── ACK / NACK ──────│              │
//!  │ SlidingWindow│  DATA (window in flight)  │ Reassembler  │
//!  │              │──────────────────────────▶│              │
//!  │              │◀──── per-offset ACK ──────│              │
//!  │              │  STOP                     │ digest check │
//!  └──────┬───────┘                           └──────┬───────┘
//!         │ frames (tag, offset, CRC-32, payload)    │
//!  ┌──────▼──────────────────────────────────────────▼──────┐
//!  │  Transport: Socket (tokio UdpSocket) or Simulator      │
//!  └────────────────────────────────────────────────────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`checksum`]: CRC-32 over frame payloads
//! - [`digest`]: SHA-256 over the whole file
//! - [`handshake`]: control offsets, payload encoding, receiver manifest
//! - [`exchange`]: one control packet at a time with exponential back-off
//! - [`window`]: sender sliding-window state machine
//! - [`reassembler`]: receiver in-order reassembly with a reorder stash
//! - [`sender`]: sending session driver
//! - [`receiver`]: receiving session driver
//! - [`state`]: session phase types
//! - [`timer`]: back-off and retransmission deadlines
//! - [`config`]: tunable parameters
//! - [`error`]: session failure reasons and exit codes
//! - [`store`]: reading input and writing output files
//! - [`simulator`]: lossy / reordering transport for testing
//! - [`socket`]: async UDP transport abstraction

pub mod checksum;
pub mod config;
pub mod digest;
pub mod error;
pub mod exchange;
pub mod handshake;
pub mod packet;
pub mod reassembler;
pub mod receiver;
pub mod sender;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod store;
pub mod timer;
pub mod window;

pub use config::TransferConfig;
pub use error::TransferError;
pub use receiver::{receive_file, ReceivedFile};
pub use sender::{send_file, Outgoing};

//! Hublink-Core: host side of the programmable hub's serial JSON protocol.
//!
//! The hub speaks newline-free JSON over a serial line: every message ends
//! with a carriage return, replies are matched to requests by a short
//! correlation id, and device errors arrive base64 encoded.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Transport**: byte channel abstraction (serial port, mock)
//! - **Transaction**: one request/response exchange with a deadline
//! - **Protocol**: wire constants, line framing, message envelopes
//! - **RPC**: correlated requests and the structured mode handshake
//! - **State**: interactive/structured mode tracking
//! - **Storage**: slots, storage snapshot and hub identity
//! - **Payload**: program upload blocks
//! - **Events**: observer pattern for UI decoupling
//! - **Session**: high-level device facade
//!
//! # Example
//!
//! ```no_run
//! use hublink_core::session::{HubSession, SessionConfig};
//! use hublink_core::transport::SerialChannel;
//!
//! let mut session: HubSession<SerialChannel> = HubSession::new(SessionConfig::default());
//! session.connect("/dev/ttyACM0").expect("connect failed");
//! session.run_program(0).expect("run failed");
//! ```

pub mod events;
pub mod payload;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod state;
pub mod storage;
pub mod transaction;
pub mod transport;
pub mod utils;

// Re-exports for convenience
pub use events::{HubEvent, HubObserver, LogLevel, NullObserver, SubscriptionId, TracingObserver};
pub use payload::{ProgramError, ProgramImage};
pub use protocol::DeviceError;
pub use rpc::Request;
pub use session::{HubCommand, HubError, HubSession, SessionConfig};
pub use state::DeviceMode;
pub use storage::{DeviceInfo, InvalidSlot, Slot, SlotFilter, SlotInfo, StorageSnapshot};
pub use transaction::{Resolution, TransactionError, send_and_process};
pub use transport::{Channel, ChannelError, MockChannel, PortInfo, SerialChannel, list_ports};

//! Transport layer module.

pub mod mock;
pub mod serial;
pub mod traits;

pub use mock::MockChannel;
pub use serial::{PortInfo, SerialChannel, list_ports};
pub use traits::{Channel, ChannelError};

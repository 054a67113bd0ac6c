//! Broadcast hub
//!
//! Single authority over the set of live client connections. Registration,
//! unregistration and fan-out are all serialized through one control loop.

mod actor;

pub use actor::{ConnectionId, Hub, HubHandle, Registration, HUB_MAILBOX_CAPACITY};

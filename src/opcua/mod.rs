//! OPC UA acquisition engine: session manager, polling worker and
//! subscription worker.
//!
//! Built on the `opcua` crate's client API (the `async-opcua` project),
//! covering session management, polling reads and subscription
//! notifications.

mod poll;
mod session;
mod subscribe;

pub use poll::run_opcua_poll_worker;
pub use session::OpcUaContext;
pub use subscribe::run_opcua_subscribe_worker;

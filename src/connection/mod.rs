//! Session management: lifecycle state, transports and the client facade.
//!
//! ## Session Lifecycle
//!
//! 1. **Closed** - Initial state; `connect` may be called
//! 2. **Connecting** - Transport connect and opening handshake
//! 3. **Open** - Messages flow both ways
//! 4. **Closing** - Close frame sent, waiting for the peer's Close
//!
//! From `Closing` the session returns to `Closed` when the peer answers or
//! the close wait elapses. Transport loss moves any state to `Closed`.

mod fragmenter;
mod role;
mod state;

pub use fragmenter::{Fragment, MessageFragmenter};
pub use role::Role;
pub use state::ConnectionState;

#[cfg(feature = "async-tokio")]
mod client;
#[cfg(feature = "async-tokio")]
mod transport;

#[cfg(feature = "async-tokio")]
pub use client::WebSocketClient;
#[cfg(feature = "async-tokio")]
pub use state::StateMachine;
#[cfg(feature = "async-tokio")]
pub use transport::{Connector, TcpConnector};

//! Agent tunnel lifecycle: authentication, activation, read loop and teardown.

mod heartbeat;
mod server;
mod state;
mod status;

pub use heartbeat::{DEFAULT_HEARTBEAT_INTERVAL, spawn_heartbeat};
pub use server::{DEFAULT_OUTBOUND_BUFFER, TunnelServer};
pub use state::TunnelState;

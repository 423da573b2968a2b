//! The tunnel: state machine, request routing and the public handle

mod handle;
mod machine;
mod pending;
pub mod router;
pub mod state;

#[cfg(test)]
mod testing;

pub use handle::Tunnel;
pub use machine::{Callbacks, ConnectedHook, ErrorHook, RequestHook, TunnelContext};
pub use state::{next_state, TunnelEvent, TunnelState};

pub mod auth;
pub mod reconnect;
pub mod transport;
pub mod tunnel;

// Re-export specific items for convenience
pub use transport::{Connector, Transport, TransportEvent, TransportEvents};
pub use tunnel::router::{Forward, ForwardRequest, ForwardedResponse};
pub use tunnel::{Callbacks, Tunnel, TunnelEvent, TunnelState};

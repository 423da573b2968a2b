//! `agentlink` wire protocol
//!
//! JSON messages exchanged with the proxy over the tunnel transport, one
//! object per WebSocket text frame, plus the header and body conventions
//! shared by the router and the local forwarder.

pub mod headers;
pub mod message;
pub mod validation;

pub use headers::{
    get_header, is_base64_encoded, is_hop_by_hop, is_text_content_type, strip_hop_by_hop,
    Headers, HOP_BY_HOP,
};
pub use message::{
    ClientMessage, ReconnectAck, Registration, RequestData, ResponseData, ServerMessage,
};
pub use validation::{validate_request, ValidationError};

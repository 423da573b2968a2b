//! Request/response routing between the proxy and the local forwarder

use agentlink_common::{Result, TunnelError};
use agentlink_protocol::headers::{is_base64_encoded, strip_hop_by_hop};
use agentlink_protocol::{validate_request, Headers, RequestData, ResponseData};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use futures::future::BoxFuture;
use tracing::{debug, warn};

/// A request ready to be replayed locally: hop-by-hop headers removed,
/// body decoded, `content-length` matching the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: Bytes,
}

/// A local response ready to be framed: body already text or base64,
/// headers cleaned, `content-length` matching the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}

/// Replays a request against the agent's local HTTP server.
pub trait Forward: Send + Sync + 'static {
    fn forward(
        &self,
        local_port: u16,
        request: ForwardRequest,
    ) -> BoxFuture<'static, Result<ForwardedResponse>>;
}

/// Turn an inbound descriptor into a [`ForwardRequest`].
pub fn prepare_request(request: RequestData) -> Result<ForwardRequest> {
    validate_request(&request).map_err(|e| TunnelError::Protocol(e.to_string()))?;

    let body = match request.body {
        None => Bytes::new(),
        Some(body) if is_base64_encoded(&request.headers) => STANDARD
            .decode(body.as_bytes())
            .map(Bytes::from)
            .map_err(|e| TunnelError::Protocol(format!("invalid base64 body: {e}")))?,
        Some(body) => Bytes::from(body),
    };

    let mut headers = strip_hop_by_hop(&request.headers);
    headers.insert("content-length".to_string(), body.len().to_string());

    Ok(ForwardRequest {
        method: request.method,
        path: request.path,
        headers,
        body,
    })
}

/// Forward one request and produce exactly one response for it.
///
/// Malformed requests get a 400, forwarding failures a 502; neither
/// propagates as an error.
pub async fn handle_request(
    forwarder: &dyn Forward,
    local_port: u16,
    request: RequestData,
) -> ResponseData {
    let id = request.id.clone();
    let method = request.method.clone();
    let path = request.path.clone();

    let prepared = match prepare_request(request) {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!(id = %id, "Rejecting malformed request: {e}");
            return error_response(id, 400, "Bad Request", &e.to_string());
        }
    };

    match forwarder.forward(local_port, prepared).await {
        Ok(response) => {
            debug!(id = %id, %method, %path, status = response.status, "Forwarded request");
            ResponseData {
                id,
                status: response.status,
                headers: response.headers,
                body: response.body,
            }
        }
        Err(e) => {
            warn!(id = %id, %method, %path, "Forwarding failed: {e}");
            error_response(id, 502, "Bad Gateway", &e.to_string())
        }
    }
}

/// JSON error response with a matching `content-length`.
pub fn error_response(id: String, status: u16, error: &str, message: &str) -> ResponseData {
    let body = serde_json::json!({ "error": error, "message": message }).to_string();
    let headers = Headers::from([
        ("content-type".to_string(), "application/json".to_string()),
        ("content-length".to_string(), body.len().to_string()),
    ]);
    ResponseData {
        id,
        status,
        headers,
        body,
    }
}

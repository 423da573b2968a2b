//! Replays tunnel requests against the agent's local HTTP server

use crate::pool::{ConnectionPool, PoolConfig};
use agentlink_common::{ForwardConfig, Result, TunnelError, ENCODING_BASE64, ENCODING_HEADER};
use agentlink_core::{Forward, ForwardRequest, ForwardedResponse};
use agentlink_protocol::{get_header, is_text_content_type, strip_hop_by_hop, Headers};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::future::BoxFuture;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue, CONTENT_LENGTH, HOST};
use hyper::{Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// [`Forward`] implementation backed by pooled hyper connections
pub struct LocalForwarder {
    config: ForwardConfig,
    pools: DashMap<u16, Arc<ConnectionPool>>,
}

impl LocalForwarder {
    pub fn new(config: ForwardConfig) -> Self {
        Self {
            config,
            pools: DashMap::new(),
        }
    }

    fn pool(&self, local_port: u16) -> Arc<ConnectionPool> {
        self.pools
            .entry(local_port)
            .or_insert_with(|| {
                let addr = format!("{}:{}", self.config.host, local_port);
                Arc::new(ConnectionPool::new(addr, PoolConfig::from(&self.config)))
            })
            .clone()
    }
}

impl Default for LocalForwarder {
    fn default() -> Self {
        Self::new(ForwardConfig::default())
    }
}

impl Forward for LocalForwarder {
    fn forward(
        &self,
        local_port: u16,
        request: ForwardRequest,
    ) -> BoxFuture<'static, Result<ForwardedResponse>> {
        let pool = self.pool(local_port);
        let host = format!("{}:{}", self.config.host, local_port);
        let timeout = self.config.request_timeout;
        let limit = self.config.max_response_bytes;

        Box::pin(async move {
            match tokio::time::timeout(timeout, exchange(&pool, &host, request, limit)).await {
                Ok(result) => result,
                Err(_) => Err(TunnelError::Timeout(format!(
                    "local server at {} did not respond within {}",
                    host,
                    describe(timeout)
                ))),
            }
        })
    }
}

async fn exchange(
    pool: &ConnectionPool,
    host: &str,
    request: ForwardRequest,
    limit: usize,
) -> Result<ForwardedResponse> {
    let method = request.method.clone();
    let path = request.path.clone();
    let http_request = build_request(host, request)?;

    let mut sender = pool.acquire().await?;
    let response = sender
        .send_request(http_request)
        .await
        .map_err(|e| TunnelError::Forward(format!("{method} {path} failed: {e}")))?;

    let status = response.status().as_u16();
    let (headers, body) = read_response(response, limit).await?;
    pool.release(sender).await;

    debug!("{} {} -> {} ({} bytes)", method, path, status, body.len());
    Ok(encode_response(status, headers, &body))
}

fn build_request(host: &str, request: ForwardRequest) -> Result<Request<Full<Bytes>>> {
    let mut builder = Request::builder()
        .method(request.method.as_str())
        .uri(request.path.as_str());

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &request.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!("Skipping unrepresentable header {}", name),
            }
        }
        let host = HeaderValue::from_str(host)
            .map_err(|e| TunnelError::Forward(format!("invalid host {host}: {e}")))?;
        headers.insert(HOST, host);
    }

    builder
        .body(Full::new(request.body))
        .map_err(|e| TunnelError::Forward(format!("invalid request: {e}")))
}

/// Buffer the body, failing as soon as it outgrows `limit`.
///
/// On failure the response body is dropped mid-stream, which tears down
/// the connection instead of returning it to the pool.
async fn read_response(response: Response<Incoming>, limit: usize) -> Result<(Headers, Bytes)> {
    let declared = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|len| len > limit as u64) {
        warn!("Local response declares {:?} bytes; limit is {}", declared, limit);
        return Err(TunnelError::ResponseTooLarge { limit });
    }

    let (parts, mut body) = response.into_parts();
    let raw: Vec<(String, String)> = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect();
    let headers = strip_hop_by_hop(raw.iter().map(|(name, value)| (name, value)));

    let mut buf = BytesMut::new();
    while let Some(frame) = body.frame().await {
        let frame =
            frame.map_err(|e| TunnelError::Forward(format!("reading local response: {e}")))?;
        if let Ok(data) = frame.into_data() {
            if buf.len() + data.len() > limit {
                warn!("Local response exceeded {} bytes; aborting", limit);
                return Err(TunnelError::ResponseTooLarge { limit });
            }
            buf.extend_from_slice(&data);
        }
    }

    Ok((headers, buf.freeze()))
}

/// Carry text bodies as-is and everything else as base64 with the
/// encoding marker. `content-length` always matches the final body.
pub fn encode_response(status: u16, mut headers: Headers, body: &[u8]) -> ForwardedResponse {
    let text = if body.is_empty() || is_text_content_type(get_header(&headers, "content-type")) {
        std::str::from_utf8(body).ok().map(str::to_string)
    } else {
        None
    };

    let body = match text {
        Some(text) => text,
        None => {
            headers.insert(ENCODING_HEADER.to_string(), ENCODING_BASE64.to_string());
            STANDARD.encode(body)
        }
    };
    headers.insert("content-length".to_string(), body.len().to_string());

    ForwardedResponse {
        status,
        headers,
        body,
    }
}

fn describe(timeout: Duration) -> String {
    if timeout.subsec_millis() == 0 {
        format!("{}s", timeout.as_secs())
    } else {
        format!("{}ms", timeout.as_millis())
    }
}

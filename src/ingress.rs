//! Secondary ingestion listener speaking bare HTTP/1.1 over TCP.
//!
//! Devices that cannot reach the main API post readings here. The listener
//! only frames requests; validation and storage go through the shared
//! [`Ingestor`].

use crate::api::handlers::ingest_response;
use crate::pipeline::Ingestor;
use axum::http::StatusCode;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub const MAX_HEAD_BYTES: usize = 8 * 1024;
pub const MAX_BODY_BYTES: usize = 64 * 1024;

const GET_MESSAGE: &str = "GET request handled successfully";
const BAD_REQUEST_MESSAGE: &str = "Invalid data format";
const METHOD_NOT_ALLOWED_MESSAGE: &str = "Method not allowed";

const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(100);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RawHttpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed before request head was complete")]
    Incomplete,
    #[error("request head exceeds {MAX_HEAD_BYTES} bytes")]
    HeadTooLarge,
    #[error("request body of {0} bytes exceeds {MAX_BODY_BYTES}")]
    BodyTooLarge(usize),
    #[error("invalid request line: {0}")]
    RequestLine(String),
    #[error("invalid content-length: {0}")]
    ContentLength(String),
    #[error("chunked transfer encoding is not supported")]
    Chunked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

/// Accept connections until the listener fails, one task per connection.
pub async fn serve(listener: TcpListener, ingestor: Ingestor) {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Raw ingest listener running");
    }
    let mut failures = 0u32;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(err) => {
                failures = failures.saturating_add(1);
                let delay = accept_backoff(failures);
                warn!(error = %err, failures, ?delay, "Failed to accept raw ingest connection");
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        let ingestor = ingestor.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, &ingestor, peer).await {
                debug!(%peer, error = %err, "Raw ingest connection ended with error");
            }
        });
    }
}

pub async fn handle_connection<S>(
    mut stream: S,
    ingestor: &Ingestor,
    peer: SocketAddr,
) -> Result<(), RawHttpError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (status, message) = match read_request(&mut stream).await {
        Ok(request) => match request.method.as_str() {
            "GET" => (StatusCode::OK, GET_MESSAGE),
            "POST" => {
                debug!(%peer, path = %request.path, bytes = request.body.len(), "Raw ingest request");
                ingest_response(ingestor.ingest(&request.body).await)
            }
            _ => (StatusCode::METHOD_NOT_ALLOWED, METHOD_NOT_ALLOWED_MESSAGE),
        },
        Err(err @ (RawHttpError::Io(_) | RawHttpError::Incomplete)) => return Err(err),
        Err(err) => {
            warn!(%peer, error = %err, "Rejected raw ingest request");
            (StatusCode::BAD_REQUEST, BAD_REQUEST_MESSAGE)
        }
    };

    write_response(&mut stream, status, message).await
}

pub async fn read_request<R>(reader: &mut R) -> Result<RawRequest, RawHttpError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(position) = find_head_end(&buf) {
            break position;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(RawHttpError::HeadTooLarge);
        }
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            return Err(RawHttpError::Incomplete);
        }
        buf.extend_from_slice(&chunk[..read]);
    };
    if head_end > MAX_HEAD_BYTES {
        return Err(RawHttpError::HeadTooLarge);
    }

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, path) = match (parts.next(), parts.next()) {
        (Some(method), Some(path)) => (method.to_ascii_uppercase(), path.to_string()),
        _ => return Err(RawHttpError::RequestLine(request_line.to_string())),
    };

    let mut content_length = 0usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value
                .parse()
                .map_err(|_| RawHttpError::ContentLength(value.to_string()))?;
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Err(RawHttpError::Chunked);
        }
    }
    if content_length > MAX_BODY_BYTES {
        return Err(RawHttpError::BodyTooLarge(content_length));
    }

    let mut body = buf.split_off(head_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        reader.read_exact(&mut body[already..]).await?;
    }

    Ok(RawRequest { method, path, body })
}

async fn write_response<W>(
    writer: &mut W,
    status: StatusCode,
    body: &str,
) -> Result<(), RawHttpError>
where
    W: AsyncWrite + Unpin,
{
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        body.len(),
        body
    );
    writer.write_all(response.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

/// Delay before retrying after `failures` consecutive accept errors
/// (e.g. descriptor exhaustion): doubles from 100ms, capped at 1s.
fn accept_backoff(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(4);
    (ACCEPT_BACKOFF_MIN * 2u32.pow(exponent)).min(ACCEPT_BACKOFF_MAX)
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

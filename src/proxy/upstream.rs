//! Upstream connection and request forwarding
//!
//! An `Upstream` is bound to one origin URL. It opens a fresh connection per
//! request (TLS for `https` origins), rewrites the request for the origin and
//! reads the origin's response back without reinterpreting its status.

use crate::error::{ConfigError, ProxyError};
use crate::http::headers::Headers;
use crate::http::parser::{decode_chunked, ParseError, MAX_BODY_BYTES, MAX_HEADER_BYTES, MAX_MESSAGE_BYTES};
use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use bytes::BytesMut;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use url::Url;

/// Default buffer size for upstream reads
const BUFFER_SIZE: usize = 8192;

/// Headers that describe a single connection and are never relayed.
const HOP_BY_HOP: [&str; 8] = [
    "Connection",
    "Keep-Alive",
    "Proxy-Connection",
    "Proxy-Authenticate",
    "Transfer-Encoding",
    "Upgrade",
    "TE",
    "Trailer",
];

/// Forwarding handle for a single origin.
#[derive(Debug, Clone)]
pub struct Upstream {
    url: Url,
    /// Host as written in the URL (IPv6 literals keep their brackets)
    host: String,
    port: u16,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Upstream {
    pub fn new(
        url: Url,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let port = match url.scheme() {
            "http" | "https" => url.port_or_known_default().unwrap_or(80),
            other => {
                return Err(ConfigError::UnsupportedScheme {
                    address: url.to_string(),
                    scheme: other.to_string(),
                });
            }
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ConfigError::MissingHost(url.to_string()))?
            .to_string();

        Ok(Self {
            url,
            host,
            port,
            connect_timeout,
            request_timeout,
        })
    }

    /// Value sent in the Host header: the port is omitted when it is the
    /// scheme default.
    pub fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Forwards `request` and returns the origin's response.
    pub async fn forward(&self, request: &Request) -> Result<Response, ProxyError> {
        let stream = self.connect().await?;

        if self.url.scheme() == "https" {
            let tls = timeout(self.connect_timeout, self.handshake(stream))
                .await
                .map_err(|_| ProxyError::Timeout {
                    stage: "tls handshake",
                    after: self.connect_timeout,
                })??;
            self.within_deadline(self.exchange(tls, request)).await
        } else {
            self.within_deadline(self.exchange(stream, request)).await
        }
    }

    async fn connect(&self) -> Result<TcpStream, ProxyError> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProxyError::Timeout {
                stage: "connect",
                after: self.connect_timeout,
            })?
            .map_err(|source| ProxyError::Connect {
                addr: addr.clone(),
                source,
            })?;

        tracing::trace!(upstream = %addr, "Connected to upstream");
        Ok(stream)
    }

    async fn handshake(&self, stream: TcpStream) -> Result<TlsStream<TcpStream>, ProxyError> {
        let host = self
            .host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let name = ServerName::try_from(host.as_str())
            .map(|name| name.to_owned())
            .map_err(|e| ProxyError::Tls {
                host: host.clone(),
                reason: e.to_string(),
            })?;

        tls_connector()
            .connect(name, stream)
            .await
            .map_err(|e| ProxyError::Tls {
                host,
                reason: e.to_string(),
            })
    }

    async fn within_deadline<F>(&self, exchange: F) -> Result<Response, ProxyError>
    where
        F: Future<Output = Result<Response, ProxyError>>,
    {
        timeout(self.request_timeout, exchange)
            .await
            .map_err(|_| ProxyError::Timeout {
                stage: "request",
                after: self.request_timeout,
            })?
    }

    async fn exchange<S>(&self, mut stream: S, request: &Request) -> Result<Response, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request_bytes = self.build_http_request(request);
        stream.write_all(&request_bytes).await?;
        stream.flush().await?;

        tracing::trace!("Request sent to upstream");

        read_http_response(&mut stream, request.method == Method::HEAD).await
    }

    /// Request target on the origin: the origin's base path joined with the
    /// inbound path, queries from both kept.
    pub fn target_for(&self, inbound: &str) -> String {
        let inbound = origin_form(inbound);
        let (path, query) = match inbound.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (inbound.as_str(), None),
        };

        let base = self.url.path();
        let mut target = match (base.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{}{}", base, &path[1..]),
            (false, false) => format!("{}/{}", base, path),
            _ => format!("{}{}", base, path),
        };

        let base_query = self.url.query().filter(|q| !q.is_empty());
        match (base_query, query.filter(|q| !q.is_empty())) {
            (Some(a), Some(b)) => {
                target.push('?');
                target.push_str(a);
                target.push('&');
                target.push_str(b);
            }
            (Some(q), None) | (None, Some(q)) => {
                target.push('?');
                target.push_str(q);
            }
            (None, None) => {}
        }

        target
    }

    /// Serializes the request as it is sent to the origin.
    pub fn build_http_request(&self, request: &Request) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(512 + request.body.len());

        buffer.extend_from_slice(
            format!(
                "{} {} HTTP/1.1\r\n",
                request.method,
                self.target_for(&request.path)
            )
            .as_bytes(),
        );

        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        // the body is already buffered in full
        headers.remove("Expect");

        headers.insert("Host", self.host_header());

        if let Some(addr) = request.remote_addr {
            let client_ip = addr.ip().to_string();
            let forwarded = match headers.get("X-Forwarded-For") {
                Some(prior) => format!("{}, {}", prior, client_ip),
                None => client_ip,
            };
            headers.insert("X-Forwarded-For", forwarded);
        }

        if !request.body.is_empty() || headers.contains("Content-Length") {
            headers.insert("Content-Length", request.body.len().to_string());
        }

        // One request per upstream connection
        headers.insert("Connection", "close");

        for (key, value) in headers.iter() {
            buffer.extend_from_slice(format!("{}: {}\r\n", key, value).as_bytes());
        }
        buffer.extend_from_slice(b"\r\n");
        buffer.extend_from_slice(&request.body);

        buffer
    }
}

/// Renders a forwarding failure as the response the client receives.
pub fn error_response(error: &ProxyError) -> Response {
    match error {
        ProxyError::NoLiveBackend(_) => Response::service_unavailable(),
        ProxyError::Timeout { .. } => Response::gateway_timeout(),
        ProxyError::Connect { .. }
        | ProxyError::Tls { .. }
        | ProxyError::Io(_)
        | ProxyError::MalformedResponse(_) => Response::bad_gateway(),
    }
}

fn tls_connector() -> TlsConnector {
    static CONFIG: OnceLock<Arc<ClientConfig>> = OnceLock::new();

    let config = CONFIG.get_or_init(|| {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    });
    TlsConnector::from(Arc::clone(config))
}

/// Reduces an absolute-form target ("http://host/p?q") to origin form.
fn origin_form(target: &str) -> String {
    if target.is_empty() {
        return "/".to_string();
    }
    if target.starts_with("http://") || target.starts_with("https://") {
        if let Ok(url) = Url::parse(target) {
            return match url.query() {
                Some(q) => format!("{}?{}", url.path(), q),
                None => url.path().to_string(),
            };
        }
    }
    target.to_string()
}

fn strip_hop_by_hop(headers: &mut Headers) {
    let listed: Vec<String> = headers
        .get_all("Connection")
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    for name in listed {
        headers.remove(&name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Reads one final response from `stream`, skipping interim 1xx responses.
pub async fn read_http_response<S>(stream: &mut S, head_request: bool) -> Result<Response, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = BytesMut::with_capacity(BUFFER_SIZE);

    loop {
        let head = read_head(stream, &mut buffer).await?;
        let (status, reason, mut headers) = parse_response_head(&head)?;

        if (100..200).contains(&status.as_u16()) && status.as_u16() != 101 {
            tracing::trace!(status = status.as_u16(), "Skipping interim response");
            continue;
        }

        let body = if head_request || status.is_bodiless() {
            Vec::new()
        } else if headers.has_token("Transfer-Encoding", "chunked") {
            let body = read_chunked_body(stream, &mut buffer).await?;
            headers.insert("Content-Length", body.len().to_string());
            body
        } else if let Some(value) = headers.get("Content-Length") {
            let len = value.trim().parse::<usize>().map_err(|_| {
                ProxyError::MalformedResponse(format!("bad Content-Length {:?}", value))
            })?;
            read_sized_body(stream, &mut buffer, len).await?
        } else {
            let body = read_until_close(stream, &mut buffer).await?;
            headers.insert("Content-Length", body.len().to_string());
            body
        };

        strip_hop_by_hop(&mut headers);

        return Ok(Response {
            status,
            reason,
            headers,
            body,
        });
    }
}

async fn read_head<S>(stream: &mut S, buffer: &mut BytesMut) -> Result<BytesMut, ProxyError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(end) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            return Ok(buffer.split_to(end + 4));
        }

        // Prevent unbounded header growth
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(ProxyError::MalformedResponse("response headers too large".into()));
        }

        if stream.read_buf(buffer).await? == 0 {
            return Err(ProxyError::MalformedResponse(
                "connection closed before response headers".into(),
            ));
        }
    }
}

fn parse_response_head(head: &[u8]) -> Result<(StatusCode, Option<String>, Headers), ProxyError> {
    let text = std::str::from_utf8(head)
        .map_err(|_| ProxyError::MalformedResponse("non UTF-8 response headers".into()))?;
    let mut lines = text.split("\r\n");

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(ProxyError::MalformedResponse(format!(
            "invalid status line {:?}",
            status_line
        )));
    }

    let status = parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(StatusCode::from_u16)
        .ok_or_else(|| {
            ProxyError::MalformedResponse(format!("invalid status line {:?}", status_line))
        })?;
    let reason = parts
        .next()
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from);

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.append(key.trim(), value.trim());
        }
    }

    Ok((status, reason, headers))
}

async fn read_sized_body<S>(stream: &mut S, buffer: &mut BytesMut, len: usize) -> Result<Vec<u8>, ProxyError>
where
    S: AsyncRead + Unpin,
{
    if len > MAX_BODY_BYTES {
        return Err(ProxyError::MalformedResponse(format!(
            "body of {} bytes exceeds limit",
            len
        )));
    }
    while buffer.len() < len {
        buffer.reserve((len - buffer.len()).min(BUFFER_SIZE));
        if stream.read_buf(buffer).await? == 0 {
            return Err(ProxyError::MalformedResponse(
                "connection closed before complete body".into(),
            ));
        }
    }
    Ok(buffer.split_to(len).to_vec())
}

async fn read_chunked_body<S>(stream: &mut S, buffer: &mut BytesMut) -> Result<Vec<u8>, ProxyError>
where
    S: AsyncRead + Unpin,
{
    loop {
        match decode_chunked(&buffer[..]) {
            Ok((body, _)) => return Ok(body),
            Err(ParseError::Incomplete) if buffer.len() > MAX_MESSAGE_BYTES => {
                return Err(ProxyError::MalformedResponse(
                    "chunked body exceeds limit".into(),
                ));
            }
            Err(ParseError::Incomplete) => {
                if stream.read_buf(buffer).await? == 0 {
                    return Err(ProxyError::MalformedResponse(
                        "connection closed inside chunked body".into(),
                    ));
                }
            }
            Err(e) => {
                return Err(ProxyError::MalformedResponse(format!(
                    "bad chunked body: {:?}",
                    e
                )));
            }
        }
    }
}

async fn read_until_close<S>(stream: &mut S, buffer: &mut BytesMut) -> Result<Vec<u8>, ProxyError>
where
    S: AsyncRead + Unpin,
{
    while stream.read_buf(buffer).await? != 0 {
        if buffer.len() > MAX_BODY_BYTES {
            return Err(ProxyError::MalformedResponse(
                "close-delimited body exceeds limit".into(),
            ));
        }
    }
    Ok(buffer.split().to_vec())
}

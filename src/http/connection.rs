use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::http::parser::{parse_http_request, ParseError, MAX_MESSAGE_BYTES};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::proxy::balancer::Balancer;

/// One client connection, served until either side closes it.
pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    balancer: Arc<Balancer>,
    buffer: Vec<u8>,
    state: ConnectionState,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

enum Incoming {
    Request(Request),
    Malformed(ParseError),
    Eof,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, peer: Option<SocketAddr>, balancer: Arc<Balancer>) -> Self {
        Self {
            stream,
            peer,
            balancer,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    Incoming::Request(req) => ConnectionState::Processing(req),
                    Incoming::Malformed(e) => {
                        tracing::debug!(peer = ?self.peer, error = ?e, "Rejecting malformed request");
                        let mut response = match e {
                            ParseError::BodyTooLarge => Response::payload_too_large(),
                            _ => Response::bad_request(),
                        };
                        response.headers.insert("Connection", "close");
                        ConnectionState::Writing(ResponseWriter::new(&response), false)
                    }
                    Incoming::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let keep_alive = req.keep_alive();
                    let mut response = self.balancer.handle_request(&req).await;

                    if !keep_alive {
                        response.headers.insert("Connection", "close");
                    } else if req.version.eq_ignore_ascii_case("HTTP/1.0") {
                        response.headers.insert("Connection", "keep-alive");
                    }

                    ConnectionState::Writing(ResponseWriter::new(&response), keep_alive)
                }

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    async fn read_request(&mut self) -> anyhow::Result<Incoming> {
        loop {
            match parse_http_request(&self.buffer) {
                Ok((mut request, consumed)) => {
                    self.buffer.drain(..consumed);
                    request.remote_addr = self.peer;
                    return Ok(Incoming::Request(request));
                }

                Err(ParseError::Incomplete) if self.buffer.len() > MAX_MESSAGE_BYTES => {
                    return Ok(Incoming::Malformed(ParseError::BodyTooLarge));
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => return Ok(Incoming::Malformed(e)),
            }

            let mut temp = [0u8; 4096];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(peer = ?self.peer, "Client closed mid-request");
                }
                return Ok(Incoming::Eof);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

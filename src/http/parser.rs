use crate::http::headers::Headers;
use crate::http::request::{Method, Request};

/// Upper bound on the request line plus header section.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Upper bound on a message body, inbound or relayed.
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Upper bound on bytes buffered for one message, chunk framing included.
pub const MAX_MESSAGE_BYTES: usize = MAX_HEADER_BYTES + 2 * MAX_BODY_BYTES;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidVersion,
    InvalidHeader,
    InvalidContentLength,
    InvalidChunk,
    HeadersTooLarge,
    BodyTooLarge,
    Incomplete,
}

/// Parses one request from the front of `buf`.
///
/// Returns the request and the number of bytes it occupied. A chunked body
/// is decoded and the request is rewritten to carry a Content-Length instead.
pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    let headers_end = match find_headers_end(buf) {
        Some(end) if end <= MAX_HEADER_BYTES => end,
        Some(_) => return Err(ParseError::HeadersTooLarge),
        None if buf.len() > MAX_HEADER_BYTES => return Err(ParseError::HeadersTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    let header_bytes = &buf[..headers_end];
    let body_bytes = &buf[headers_end + 4..];

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| ParseError::InvalidRequest)?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split_whitespace();

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let path = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequest);
    }
    if !version.starts_with("HTTP/1.") {
        return Err(ParseError::InvalidVersion);
    }

    let method = Method::from_str(method_str).ok_or(ParseError::InvalidMethod)?;

    let mut headers = Headers::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }

        let (key, value) = line
            .split_once(':')
            .ok_or(ParseError::InvalidHeader)?;
        let key = key.trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(ParseError::InvalidHeader);
        }

        headers.append(key, value.trim());
    }

    let (body, body_consumed) = if headers.has_token("Transfer-Encoding", "chunked") {
        let (body, consumed) = decode_chunked(body_bytes)?;
        headers.remove("Transfer-Encoding");
        headers.insert("Content-Length", body.len().to_string());
        (body, consumed)
    } else {
        let content_length = headers
            .get("Content-Length")
            .map(|v| v.parse::<usize>().map_err(|_| ParseError::InvalidContentLength))
            .transpose()?
            .unwrap_or(0);

        if content_length > MAX_BODY_BYTES {
            return Err(ParseError::BodyTooLarge);
        }
        if body_bytes.len() < content_length {
            return Err(ParseError::Incomplete);
        }
        (body_bytes[..content_length].to_vec(), content_length)
    };

    let request = Request {
        method,
        path: path.to_string(),
        version: version.to_string(),
        headers,
        body,
        remote_addr: None,
    };

    Ok((request, headers_end + 4 + body_consumed))
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

/// Decodes a chunked body, returning the payload and the bytes consumed
/// including the terminating chunk and any trailers.
pub(crate) fn decode_chunked(buf: &[u8]) -> Result<(Vec<u8>, usize), ParseError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        let line_len = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)?;
        let line = std::str::from_utf8(&buf[pos..pos + line_len])
            .map_err(|_| ParseError::InvalidChunk)?;
        // chunk extensions after ';' are ignored
        let size_str = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(size_str, 16).map_err(|_| ParseError::InvalidChunk)?;
        pos += line_len + 2;

        if size == 0 {
            loop {
                let trailer_len = find_crlf(&buf[pos..]).ok_or(ParseError::Incomplete)?;
                pos += trailer_len + 2;
                if trailer_len == 0 {
                    return Ok((body, pos));
                }
            }
        }

        if size > MAX_BODY_BYTES - body.len() {
            return Err(ParseError::BodyTooLarge);
        }
        let end = pos.checked_add(size).ok_or(ParseError::BodyTooLarge)?;
        if buf.len() < end + 2 {
            return Err(ParseError::Incomplete);
        }
        body.extend_from_slice(&buf[pos..end]);
        pos = end;

        if &buf[pos..pos + 2] != b"\r\n" {
            return Err(ParseError::InvalidChunk);
        }
        pos += 2;
    }
}

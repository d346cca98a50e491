//! HTTP/1.1 codec
//!
//! One codec instance per connection, holding the in-flight parse state
//! across reads. Input is staged into a reassembly buffer, so a message
//! split at any byte offset decodes the same as one delivered whole.
//!
//! The server side decodes requests and encodes responses; the client
//! side does the reverse. Chunked transfer decoding is not implemented:
//! a chunked message fails with an explicit unsupported-feature error
//! instead of being truncated.

use bytes::BytesMut;
use longeron_core::alloc::{ByteBuf, PagePool};
use longeron_core::codec::{Codec, EncodeOutput};
use longeron_core::connection::Connection;
use longeron_core::error::{DecodeError, EncodeError};

use crate::config::HttpConfig;
use crate::frame::{Body, HttpFrame, HttpRequest, HttpResponse, Method, Status};
use crate::headers::{self, canonical_name, decimal, Headers};

const CRLF: &str = "\r\n";
const VERSION: &str = "HTTP/1.1";

/// Initial reassembly buffer capacity; grows on demand.
const STAGING_INITIAL_CAP: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Server,
    Client,
}

/// Parsed start line, one variant per side.
#[derive(Debug)]
enum StartLine {
    Request {
        method: Method,
        path: String,
        params: Vec<(String, String)>,
    },
    Response {
        status: Status,
    },
}

/// Message under construction while headers and body arrive.
#[derive(Debug)]
struct Partial {
    start: StartLine,
    headers: Headers,
    content_length: Option<usize>,
    chunked: bool,
}

impl Partial {
    fn new(start: StartLine) -> Self {
        Self {
            start,
            headers: Headers::new(),
            content_length: None,
            chunked: false,
        }
    }

    fn into_frame(self, body: Body) -> HttpFrame {
        match self.start {
            StartLine::Request {
                method,
                path,
                params,
            } => HttpFrame::Request(HttpRequest {
                method,
                path,
                params,
                headers: self.headers,
                body,
            }),
            StartLine::Response { status } => HttpFrame::Response(HttpResponse {
                status,
                headers: self.headers,
                body,
            }),
        }
    }
}

#[derive(Debug)]
enum DecodeState {
    /// Scanning for the request or status line.
    StartLine,
    /// Consuming `name: value` lines until the blank-line terminator.
    Headers(Partial),
    /// Counting down a `Content-Length` body.
    Body { partial: Partial, total: usize },
}

/// Stateful HTTP/1.1 parser and serializer for one connection.
pub struct HttpCodec {
    side: Side,
    config: HttpConfig,
    staging: BytesMut,
    state: DecodeState,
    /// Header bytes consumed for the in-flight message, counted against
    /// `config.header_limit` together with unparsed staged bytes.
    header_bytes: usize,
}

impl HttpCodec {
    /// Codec for an accepted connection: decodes requests, encodes
    /// responses.
    #[must_use]
    pub fn server(config: HttpConfig) -> Self {
        Self::with_side(Side::Server, config)
    }

    /// Codec for a dialed connection: encodes requests, decodes
    /// responses.
    #[must_use]
    pub fn client(config: HttpConfig) -> Self {
        Self::with_side(Side::Client, config)
    }

    fn with_side(side: Side, config: HttpConfig) -> Self {
        Self {
            side,
            config,
            staging: BytesMut::with_capacity(STAGING_INITIAL_CAP),
            state: DecodeState::StartLine,
            header_bytes: 0,
        }
    }

    /// Limits this codec enforces.
    #[must_use]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Pop one CRLF-terminated line off the staging buffer.
    fn next_line(&mut self) -> Result<Option<String>, DecodeError> {
        let Some(at) = find_crlf(&self.staging) else {
            return Ok(None);
        };
        self.header_bytes += at + 2;
        if self.header_bytes > self.config.header_limit {
            return Err(header_limit_exceeded(self.config.header_limit));
        }
        let line = self.staging.split_to(at);
        bytes::Buf::advance(&mut self.staging, 2);
        String::from_utf8(line.to_vec())
            .map(Some)
            .map_err(|_| DecodeError::malformed("header line is not valid UTF-8"))
    }

    /// Called when the staged bytes hold no complete line yet.
    fn check_header_limit(&self) -> Result<(), DecodeError> {
        if self.header_bytes + self.staging.len() > self.config.header_limit {
            return Err(header_limit_exceeded(self.config.header_limit));
        }
        Ok(())
    }

    fn parse_start_line(&self, line: &str) -> Result<StartLine, DecodeError> {
        let mut tokens = line.split_whitespace();
        let (first, second, third) = match (tokens.next(), tokens.next(), tokens.next()) {
            (Some(a), Some(b), Some(c)) => (a, b, c),
            _ => {
                return Err(DecodeError::malformed(format!(
                    "start line has fewer than three tokens: {line:?}"
                )))
            }
        };

        match self.side {
            Side::Server => {
                let method = Method::from_token(first).ok_or_else(|| {
                    DecodeError::malformed(format!("unknown request method {first:?}"))
                })?;
                if !third.starts_with("HTTP/1.") {
                    return Err(DecodeError::malformed(format!(
                        "unsupported protocol version {third:?}"
                    )));
                }
                let (path, params) = split_target(second);
                Ok(StartLine::Request {
                    method,
                    path,
                    params,
                })
            }
            Side::Client => {
                if !first.starts_with("HTTP/1.") {
                    return Err(DecodeError::malformed(format!(
                        "unsupported protocol version {first:?}"
                    )));
                }
                let code: u16 = second.parse().map_err(|_| {
                    DecodeError::malformed(format!("status code is not numeric: {second:?}"))
                })?;
                Ok(StartLine::Response {
                    status: Status(code),
                })
            }
        }
    }

    fn parse_header_line(&self, partial: &mut Partial, line: &str) -> Result<(), DecodeError> {
        if partial.headers.len() >= self.config.max_header_count {
            return Err(DecodeError::malformed(format!(
                "more than {} header lines",
                self.config.max_header_count
            )));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| DecodeError::malformed(format!("header line missing colon: {line:?}")))?;
        let name = name.trim();
        let value = value.trim();
        if name.is_empty() {
            return Err(DecodeError::malformed("header line with empty name"));
        }

        if name.eq_ignore_ascii_case(headers::CONTENT_LENGTH) {
            if partial.content_length.is_some() {
                return Err(DecodeError::malformed("duplicate Content-Length header"));
            }
            let length: usize = value.parse().map_err(|_| {
                DecodeError::malformed(format!("Content-Length is not a decimal length: {value:?}"))
            })?;
            partial.content_length = Some(length);
        } else if name.eq_ignore_ascii_case(headers::TRANSFER_ENCODING)
            && value.to_ascii_lowercase().contains("chunked")
        {
            partial.chunked = true;
        }

        partial.headers.insert(canonical_name(name), value);
        Ok(())
    }

    /// Decide body handling once the blank-line terminator arrives.
    fn body_length(&self, partial: &Partial) -> Result<usize, DecodeError> {
        if partial.chunked {
            if partial.content_length.is_some() {
                return Err(DecodeError::malformed(
                    "both Content-Length and chunked Transfer-Encoding present",
                ));
            }
            return Err(DecodeError::Unsupported("chunked transfer decoding"));
        }
        let length = partial.content_length.unwrap_or(0);
        if length > self.config.body_limit {
            return Err(DecodeError::PayloadTooLarge {
                size: length,
                limit: self.config.body_limit,
            });
        }
        Ok(length)
    }

    fn finish_message(&mut self, partial: Partial, body: Body) -> HttpFrame {
        self.header_bytes = 0;
        self.state = DecodeState::StartLine;
        partial.into_frame(body)
    }
}

impl Codec for HttpCodec {
    type Frame = HttpFrame;

    fn protocol(&self) -> &'static str {
        "http/1.1"
    }

    fn decode(
        &mut self,
        _conn: &mut Connection,
        input: &mut ByteBuf,
    ) -> Result<Option<HttpFrame>, DecodeError> {
        let readable = input.readable();
        if readable > 0 {
            self.staging.extend_from_slice(input.as_slice());
            input.advance(readable);
        }

        loop {
            match std::mem::replace(&mut self.state, DecodeState::StartLine) {
                DecodeState::StartLine => {
                    let Some(line) = self.next_line()? else {
                        self.check_header_limit()?;
                        return Ok(None);
                    };
                    let start = self.parse_start_line(&line)?;
                    self.state = DecodeState::Headers(Partial::new(start));
                }
                DecodeState::Headers(mut partial) => {
                    let Some(line) = self.next_line()? else {
                        self.state = DecodeState::Headers(partial);
                        self.check_header_limit()?;
                        return Ok(None);
                    };
                    if line.is_empty() {
                        let total = self.body_length(&partial)?;
                        if total == 0 {
                            return Ok(Some(self.finish_message(partial, Body::Empty)));
                        }
                        self.state = DecodeState::Body { partial, total };
                    } else {
                        self.parse_header_line(&mut partial, &line)?;
                        self.state = DecodeState::Headers(partial);
                    }
                }
                DecodeState::Body { partial, total } => {
                    if self.staging.len() < total {
                        self.state = DecodeState::Body { partial, total };
                        return Ok(None);
                    }
                    let body = self.staging.split_to(total).freeze();
                    return Ok(Some(self.finish_message(partial, Body::Bytes(body))));
                }
            }
        }
    }

    fn encode(
        &mut self,
        _conn: &mut Connection,
        pool: &PagePool,
        frame: HttpFrame,
    ) -> Result<EncodeOutput, EncodeError> {
        match (self.side, frame) {
            (Side::Server, HttpFrame::Response(resp)) => encode_response(pool, resp),
            (Side::Client, HttpFrame::Request(req)) => encode_request(pool, req),
            (Side::Server, HttpFrame::Request(_)) => Err(EncodeError::unencodable(
                "server connections send responses, got a request",
            )),
            (Side::Client, HttpFrame::Response(_)) => Err(EncodeError::unencodable(
                "client connections send requests, got a response",
            )),
        }
    }
}

/// Serialize a response: status line, synthesized `Content-Length`,
/// remaining headers, blank line, body.
fn encode_response(pool: &PagePool, mut resp: HttpResponse) -> Result<EncodeOutput, EncodeError> {
    resp.headers.remove(headers::CONTENT_LENGTH);
    let body_len = resp.body.len();
    let content_length = decimal(body_len);
    let code = decimal(resp.status.code() as usize);
    let reason = resp.status.reason();

    let mut size = VERSION.len() + 1 + code.len() + 1 + reason.len() + 2;
    size += header_line_len(headers::CONTENT_LENGTH, &content_length);
    for (name, value) in resp.headers.iter() {
        size += header_line_len(name, value);
    }
    size += 2;
    if matches!(resp.body, Body::Empty | Body::Bytes(_)) {
        size += body_len;
    }

    let mut buf = pool.allocate(size);
    put(&mut buf, VERSION.as_bytes())?;
    put(&mut buf, b" ")?;
    put(&mut buf, code.as_bytes())?;
    put(&mut buf, b" ")?;
    put(&mut buf, reason.as_bytes())?;
    put(&mut buf, CRLF.as_bytes())?;
    put_header_line(&mut buf, headers::CONTENT_LENGTH, &content_length)?;
    for (name, value) in resp.headers.iter() {
        put_header_line(&mut buf, name, value)?;
    }
    put(&mut buf, CRLF.as_bytes())?;

    finish_encode(buf, resp.body)
}

/// Serialize a request: request line with query parameters re-appended,
/// synthesized `Content-Length`, remaining headers, blank line, body.
fn encode_request(pool: &PagePool, mut req: HttpRequest) -> Result<EncodeOutput, EncodeError> {
    req.headers.remove(headers::CONTENT_LENGTH);
    let body_len = req.body.len();
    let content_length = decimal(body_len);
    let method = req.method.as_str();

    let mut size = method.len() + 1 + req.path.len();
    if !req.params.is_empty() {
        size += 1;
        for (key, value) in &req.params {
            size += key.len() + 1 + value.len() + 1;
        }
    }
    size += 1 + VERSION.len() + 2;
    size += header_line_len(headers::CONTENT_LENGTH, &content_length);
    for (name, value) in req.headers.iter() {
        size += header_line_len(name, value);
    }
    size += 2;
    if matches!(req.body, Body::Empty | Body::Bytes(_)) {
        size += body_len;
    }

    let mut buf = pool.allocate(size);
    put(&mut buf, method.as_bytes())?;
    put(&mut buf, b" ")?;
    put(&mut buf, req.path.as_bytes())?;
    if !req.params.is_empty() {
        put(&mut buf, b"?")?;
        for (key, value) in &req.params {
            put(&mut buf, key.as_bytes())?;
            put(&mut buf, b"=")?;
            put(&mut buf, value.as_bytes())?;
            put(&mut buf, b"&")?;
        }
    }
    put(&mut buf, b" ")?;
    put(&mut buf, VERSION.as_bytes())?;
    put(&mut buf, CRLF.as_bytes())?;
    put_header_line(&mut buf, headers::CONTENT_LENGTH, &content_length)?;
    for (name, value) in req.headers.iter() {
        put_header_line(&mut buf, name, value)?;
    }
    put(&mut buf, CRLF.as_bytes())?;

    finish_encode(buf, req.body)
}

/// Attach the body to the encoded header buffer: literal bytes are
/// copied in, a pooled body becomes its own zero-copy segment.
fn finish_encode(mut buf: ByteBuf, body: Body) -> Result<EncodeOutput, EncodeError> {
    match body {
        Body::Empty => Ok(EncodeOutput::Single(buf.freeze().into())),
        Body::Bytes(bytes) => {
            put(&mut buf, &bytes)?;
            Ok(EncodeOutput::Single(buf.freeze().into()))
        }
        Body::Pooled(view) => Ok(EncodeOutput::HeaderAndBody(
            buf.freeze().into(),
            view.into(),
        )),
    }
}

const fn header_line_len(name: &str, value: &str) -> usize {
    name.len() + 2 + value.len() + 2
}

fn put_header_line(buf: &mut ByteBuf, name: &str, value: &str) -> Result<(), EncodeError> {
    put(buf, name.as_bytes())?;
    put(buf, b": ")?;
    put(buf, value.as_bytes())?;
    put(buf, CRLF.as_bytes())
}

fn put(buf: &mut ByteBuf, bytes: &[u8]) -> Result<(), EncodeError> {
    buf.put_slice(bytes)
        .map_err(|overflow| EncodeError::unencodable(format!("encode buffer overflow: {overflow}")))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|pair| pair == b"\r\n")
}

/// Split a request target into its path and query parameters.
fn split_target(target: &str) -> (String, Vec<(String, String)>) {
    let Some((path, query)) = target.split_once('?') else {
        return (target.to_owned(), Vec::new());
    };
    let params = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            let (key, value) = segment.split_once('=').unwrap_or((segment, ""));
            (key.to_owned(), value.to_owned())
        })
        .collect();
    (path.to_owned(), params)
}

fn header_limit_exceeded(limit: usize) -> DecodeError {
    DecodeError::malformed(format!("header section exceeds {limit} bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use longeron_core::alloc::PoolConfig;

    fn conn() -> Connection {
        Connection::standalone(64 * 1024)
    }

    fn pool() -> PagePool {
        PagePool::new(PoolConfig::new(512, 8))
    }

    fn feed(
        codec: &mut HttpCodec,
        conn: &mut Connection,
        bytes: &[u8],
    ) -> Result<Option<HttpFrame>, DecodeError> {
        let mut input = ByteBuf::with_capacity(bytes.len().max(1));
        input.put_slice(bytes).unwrap();
        codec.decode(conn, &mut input)
    }

    fn wire(out: &EncodeOutput) -> Vec<u8> {
        match out {
            EncodeOutput::Single(buf) => buf.as_slice().to_vec(),
            EncodeOutput::HeaderAndBody(header, body) => {
                let mut bytes = header.as_slice().to_vec();
                bytes.extend_from_slice(body.as_slice());
                bytes
            }
        }
    }

    fn count_occurrences(haystack: &[u8], needle: &[u8]) -> usize {
        haystack
            .windows(needle.len())
            .filter(|window| *window == needle)
            .count()
    }

    #[test]
    fn decodes_a_plain_get() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let frame = feed(
            &mut codec,
            &mut conn,
            b"GET /plaintext HTTP/1.1\r\nHost: x\r\n\r\n",
        )
        .unwrap()
        .unwrap();

        let HttpFrame::Request(req) = frame else {
            panic!("expected a request");
        };
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/plaintext");
        assert!(req.params.is_empty());
        assert_eq!(req.headers.get("Host"), Some("x"));
        assert!(req.body.is_empty());
    }

    #[test]
    fn decodes_query_parameters_in_order() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let frame = feed(
            &mut codec,
            &mut conn,
            b"GET /search?q=rust&page=2 HTTP/1.1\r\n\r\n",
        )
        .unwrap()
        .unwrap();

        let req = frame.as_request().unwrap();
        assert_eq!(req.path, "/search");
        assert_eq!(req.param("q"), Some("rust"));
        assert_eq!(req.param("page"), Some("2"));
    }

    #[test]
    fn decodes_a_content_length_body() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let frame = feed(
            &mut codec,
            &mut conn,
            b"POST /submit HTTP/1.1\r\nContent-Length: 4\r\n\r\nname",
        )
        .unwrap()
        .unwrap();

        let req = frame.as_request().unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.body.as_slice(), b"name");
        assert_eq!(req.headers.get("content-length"), Some("4"));
    }

    #[test]
    fn pipelined_requests_decode_back_to_back() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let first = feed(
            &mut codec,
            &mut conn,
            b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(first.as_request().unwrap().path, "/a");

        // Second message is already staged; no new input needed.
        let second = feed(&mut codec, &mut conn, b"").unwrap().unwrap();
        assert_eq!(second.as_request().unwrap().path, "/b");

        assert!(feed(&mut codec, &mut conn, b"").unwrap().is_none());
    }

    #[test]
    fn split_at_every_offset_decodes_the_same_frame() {
        let raw: &[u8] = b"POST /submit HTTP/1.1\r\nHost: x\r\nContent-Length: 4\r\n\r\nname";
        for split in 1..raw.len() {
            let mut codec = HttpCodec::server(HttpConfig::default());
            let mut conn = conn();
            assert!(
                feed(&mut codec, &mut conn, &raw[..split]).unwrap().is_none(),
                "offset {split} produced a frame from a partial message"
            );
            let frame = feed(&mut codec, &mut conn, &raw[split..]).unwrap();
            let frame = frame.unwrap_or_else(|| panic!("offset {split} never completed"));
            let req = frame.as_request().unwrap();
            assert_eq!(req.method, Method::Post);
            assert_eq!(req.path, "/submit");
            assert_eq!(req.headers.get("Host"), Some("x"));
            assert_eq!(req.body.as_slice(), b"name");
        }
    }

    #[test]
    fn encoded_request_decodes_back_equal() {
        let mut client = HttpCodec::client(HttpConfig::default());
        let mut server = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let pool = pool();

        let req = HttpRequest::new(Method::Post, "/submit")
            .with_param("q", "rust")
            .with_header("Host", "x")
            .with_header("Content-Type", "text/plain")
            .with_body("name");
        let out = client
            .encode(&mut conn, &pool, HttpFrame::Request(req))
            .unwrap();

        let frame = feed(&mut server, &mut conn, &wire(&out)).unwrap().unwrap();
        let req = frame.as_request().unwrap();
        assert_eq!(req.method, Method::Post);
        assert_eq!(req.path, "/submit");
        assert_eq!(req.param("q"), Some("rust"));
        assert_eq!(req.headers.get("Host"), Some("x"));
        assert_eq!(req.headers.get("Content-Type"), Some("text/plain"));
        assert_eq!(req.body.as_slice(), b"name");
    }

    #[test]
    fn malformed_start_line_is_a_decode_error() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let err = feed(&mut codec, &mut conn, b"NONSENSE\r\n\r\n").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn duplicate_content_length_is_rejected() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let err = feed(
            &mut codec,
            &mut conn,
            b"POST / HTTP/1.1\r\nContent-Length: 4\r\nContent-Length: 4\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn conflicting_length_and_chunked_is_rejected() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let err = feed(
            &mut codec,
            &mut conn,
            b"POST / HTTP/1.1\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn chunked_decode_is_an_explicit_unsupported_error() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let err = feed(
            &mut codec,
            &mut conn,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)));
    }

    #[test]
    fn oversized_body_fails_before_any_body_byte_arrives() {
        let config = HttpConfig::default().with_body_limit(16);
        let mut codec = HttpCodec::server(config);
        let mut conn = conn();
        // Headers only; the declared body is never sent.
        let err = feed(
            &mut codec,
            &mut conn,
            b"POST / HTTP/1.1\r\nContent-Length: 10000\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::PayloadTooLarge {
                size: 10000,
                limit: 16
            }
        ));
    }

    #[test]
    fn unterminated_header_section_hits_the_limit() {
        let config = HttpConfig::default().with_header_limit(64);
        let mut codec = HttpCodec::server(config);
        let mut conn = conn();
        let err = feed(&mut codec, &mut conn, &[b'a'; 65]).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn header_count_limit_is_enforced() {
        let config = HttpConfig::default().with_max_header_count(2);
        let mut codec = HttpCodec::server(config);
        let mut conn = conn();
        let err = feed(
            &mut codec,
            &mut conn,
            b"GET / HTTP/1.1\r\nA: 1\r\nB: 2\r\nC: 3\r\n\r\n",
        )
        .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn response_encode_synthesizes_exactly_one_content_length() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let pool = pool();

        // The caller-supplied length is wrong on purpose; it must be
        // stripped and replaced with the computed one.
        let resp = HttpResponse::new(Status::OK)
            .with_header("Content-Length", "999")
            .with_header("Content-Type", "text/plain")
            .with_body("Hello, World!");
        let out = codec
            .encode(&mut conn, &pool, HttpFrame::Response(resp))
            .unwrap();

        let bytes = wire(&out);
        assert_eq!(count_occurrences(&bytes, b"Content-Length"), 1);
        assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\n"));
        assert!(bytes.ends_with(b"\r\n\r\nHello, World!"));
    }

    #[test]
    fn request_encode_reappends_query_parameters() {
        let mut codec = HttpCodec::client(HttpConfig::default());
        let mut conn = conn();
        let pool = pool();

        let req = HttpRequest::new(Method::Post, "/submit")
            .with_param("q", "1")
            .with_header("Host", "x")
            .with_body("name");
        let out = codec
            .encode(&mut conn, &pool, HttpFrame::Request(req))
            .unwrap();

        let bytes = wire(&out);
        assert!(bytes.starts_with(b"POST /submit?q=1& HTTP/1.1\r\nContent-Length: 4\r\n"));
        assert!(bytes.ends_with(b"\r\n\r\nname"));
    }

    #[test]
    fn encoded_size_is_computed_exactly() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let pool = pool();

        let resp = HttpResponse::new(Status::NOT_FOUND)
            .with_header("Content-Type", "text/plain")
            .with_body("missing");
        let out = codec
            .encode(&mut conn, &pool, HttpFrame::Response(resp))
            .unwrap();

        let EncodeOutput::Single(buf) = &out else {
            panic!("literal bodies encode into a single segment");
        };
        assert_eq!(buf.len(), out.total_len());
        assert_eq!(buf.len(), wire(&out).len());
    }

    #[test]
    fn pooled_body_rides_as_its_own_segment() {
        let mut codec = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let pool = pool();

        let mut body_buf = pool.allocate(64);
        body_buf.put_slice(b"pooled payload").unwrap();
        let body = body_buf.freeze();

        let resp = HttpResponse::new(Status::OK).with_body(body);
        let out = codec
            .encode(&mut conn, &pool, HttpFrame::Response(resp))
            .unwrap();

        let EncodeOutput::HeaderAndBody(header, body) = &out else {
            panic!("pooled bodies encode as a separate segment");
        };
        assert!(header.as_slice().ends_with(b"\r\n\r\n"));
        assert_eq!(body.as_slice(), b"pooled payload");
        let bytes = wire(&out);
        assert!(bytes.starts_with(b"HTTP/1.1 200 OK\r\nContent-Length: 14\r\n"));
    }

    #[test]
    fn client_decodes_a_response() {
        let mut codec = HttpCodec::client(HttpConfig::default());
        let mut conn = conn();
        let frame = feed(
            &mut codec,
            &mut conn,
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 7\r\n\r\nmissing",
        )
        .unwrap()
        .unwrap();

        let resp = frame.as_response().unwrap();
        assert_eq!(resp.status, Status::NOT_FOUND);
        assert_eq!(resp.body.as_slice(), b"missing");
    }

    #[test]
    fn sides_refuse_the_wrong_frame_kind() {
        let mut server = HttpCodec::server(HttpConfig::default());
        let mut conn = conn();
        let pool = pool();
        let req = HttpRequest::new(Method::Get, "/");
        let err = server
            .encode(&mut conn, &pool, HttpFrame::Request(req))
            .unwrap_err();
        assert!(matches!(err, EncodeError::Unencodable(_)));
    }
}

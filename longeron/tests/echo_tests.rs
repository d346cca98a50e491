//! End-to-end engine tests over a length-prefixed echo protocol.
//!
//! The codec here is deliberately minimal: a four-byte big-endian length
//! prefix followed by the payload. It exercises the non-staging decode
//! path, where the unconsumed tail stays in the read buffer between
//! calls.

use std::time::Duration;

use bytes::Bytes;
use longeron::{
    Acceptor, ByteBuf, Codec, Connection, Connector, DecodeError, EncodeError, EncodeOutput,
    EngineOptions, EventLoopGroup, IoEventHandle, PagePool,
};

const RECV_WAIT: Duration = Duration::from_secs(5);

struct LenCodec;

impl Codec for LenCodec {
    type Frame = Bytes;

    fn protocol(&self) -> &'static str {
        "len"
    }

    fn header_length(&self) -> usize {
        4
    }

    fn decode(
        &mut self,
        _conn: &mut Connection,
        input: &mut ByteBuf,
    ) -> Result<Option<Bytes>, DecodeError> {
        let bytes = input.as_slice();
        if bytes.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if bytes.len() < 4 + len {
            return Ok(None);
        }
        let payload = Bytes::copy_from_slice(&bytes[4..4 + len]);
        input.advance(4 + len);
        Ok(Some(payload))
    }

    fn encode(
        &mut self,
        _conn: &mut Connection,
        pool: &PagePool,
        frame: Bytes,
    ) -> Result<EncodeOutput, EncodeError> {
        let mut buf = pool.allocate(4 + frame.len());
        let put = |buf: &mut ByteBuf, src: &[u8]| {
            buf.put_slice(src)
                .map_err(|_| EncodeError::unencodable("frame exceeds its sized buffer"))
        };
        put(&mut buf, &(frame.len() as u32).to_be_bytes())?;
        put(&mut buf, &frame)?;
        Ok(EncodeOutput::Single(buf.freeze().into()))
    }
}

struct EchoHandler;

impl IoEventHandle<Bytes> for EchoHandler {
    fn accept(
        &mut self,
        _conn: &mut Connection,
        frame: Bytes,
    ) -> longeron::Result<Option<Bytes>> {
        Ok(Some(frame))
    }
}

struct CollectHandler {
    tx: flume::Sender<Bytes>,
}

impl IoEventHandle<Bytes> for CollectHandler {
    fn accept(
        &mut self,
        _conn: &mut Connection,
        frame: Bytes,
    ) -> longeron::Result<Option<Bytes>> {
        let _ = self.tx.send(frame);
        Ok(None)
    }
}

struct CloseProbe {
    closed_tx: flume::Sender<()>,
}

impl IoEventHandle<Bytes> for CloseProbe {
    fn accept(
        &mut self,
        _conn: &mut Connection,
        _frame: Bytes,
    ) -> longeron::Result<Option<Bytes>> {
        Ok(None)
    }

    fn on_close(&mut self, _conn: &mut Connection) {
        let _ = self.closed_tx.send(());
    }
}

fn framed(payload: &[u8]) -> Bytes {
    let mut wire = Vec::with_capacity(4 + payload.len());
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(payload);
    Bytes::from(wire)
}

fn group() -> EventLoopGroup {
    longeron::dev_tracing::init_tracing();
    EventLoopGroup::new(EngineOptions::default().with_workers(2)).unwrap()
}

#[test]
fn echo_round_trip() {
    let group = group();
    let server = Acceptor::bind(
        &group,
        "127.0.0.1:0".parse().unwrap(),
        || LenCodec,
        || EchoHandler,
    )
    .unwrap();

    let (tx, rx) = flume::unbounded();
    let client = Connector::connect(&group, server.local_addr(), || LenCodec, move || {
        CollectHandler { tx }
    })
    .unwrap();

    client.send(framed(b"hello")).unwrap();
    let echoed = rx.recv_timeout(RECV_WAIT).unwrap();
    assert_eq!(&echoed[..], b"hello");

    group.shutdown();
}

#[test]
fn pipelined_frames_echo_in_order() {
    let group = group();
    let server = Acceptor::bind(
        &group,
        "127.0.0.1:0".parse().unwrap(),
        || LenCodec,
        || EchoHandler,
    )
    .unwrap();

    let (tx, rx) = flume::unbounded();
    let client = Connector::connect(&group, server.local_addr(), || LenCodec, move || {
        CollectHandler { tx }
    })
    .unwrap();

    // Both frames ride in a single write so the server sees them in one
    // read and must dispatch them back to back.
    let mut wire = Vec::new();
    wire.extend_from_slice(&framed(b"first"));
    wire.extend_from_slice(&framed(b"second"));
    client.send(Bytes::from(wire)).unwrap();

    assert_eq!(&rx.recv_timeout(RECV_WAIT).unwrap()[..], b"first");
    assert_eq!(&rx.recv_timeout(RECV_WAIT).unwrap()[..], b"second");

    group.shutdown();
}

#[test]
fn large_payload_survives_partial_reads() {
    let group = group();
    let server = Acceptor::bind(
        &group,
        "127.0.0.1:0".parse().unwrap(),
        || LenCodec,
        || EchoHandler,
    )
    .unwrap();

    let (tx, rx) = flume::unbounded();
    let client = Connector::connect(&group, server.local_addr(), || LenCodec, move || {
        CollectHandler { tx }
    })
    .unwrap();

    let payload: Vec<u8> = (0..64 * 1024).map(|i| (i % 251) as u8).collect();
    client.send(framed(&payload)).unwrap();

    let echoed = rx.recv_timeout(RECV_WAIT).unwrap();
    assert_eq!(echoed.len(), payload.len());
    assert_eq!(&echoed[..], &payload[..]);

    group.shutdown();
}

#[test]
fn close_drains_writes_and_fires_on_close() {
    let group = group();
    let server = Acceptor::bind(
        &group,
        "127.0.0.1:0".parse().unwrap(),
        || LenCodec,
        || EchoHandler,
    )
    .unwrap();

    let (closed_tx, closed_rx) = flume::unbounded();
    let client = Connector::connect(&group, server.local_addr(), || LenCodec, move || {
        CloseProbe { closed_tx }
    })
    .unwrap();
    assert!(client.is_live());

    client.close();
    closed_rx.recv_timeout(RECV_WAIT).unwrap();

    group.shutdown();
}

#[test]
fn many_clients_spread_across_loops() {
    let group = group();
    let server = Acceptor::bind(
        &group,
        "127.0.0.1:0".parse().unwrap(),
        || LenCodec,
        || EchoHandler,
    )
    .unwrap();

    let (tx, rx) = flume::unbounded();
    let clients: Vec<_> = (0..8)
        .map(|_| {
            let tx = tx.clone();
            Connector::connect(&group, server.local_addr(), || LenCodec, move || {
                CollectHandler { tx }
            })
            .unwrap()
        })
        .collect();

    for (i, client) in clients.iter().enumerate() {
        client.send(framed(format!("client-{i}").as_bytes())).unwrap();
    }

    let mut seen: Vec<String> = (0..clients.len())
        .map(|_| {
            let bytes = rx.recv_timeout(RECV_WAIT).unwrap();
            String::from_utf8(bytes.to_vec()).unwrap()
        })
        .collect();
    seen.sort();
    let expected: Vec<String> = (0..clients.len()).map(|i| format!("client-{i}")).collect();
    assert_eq!(seen, expected);

    group.shutdown();
}

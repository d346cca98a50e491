//! Connection pumps
//!
//! One connection == two loop-local tasks sharing one [`Connection`]:
//!
//! - Read pump: socket -> decode -> handler -> encode -> write queue
//! - Write pump: command channel -> write queue -> socket
//!
//! The pumps communicate only through the connection record and two
//! channels (commands in, backpressure resume out), so neither side ever
//! blocks the other's await point. Both run on the connection's owning
//! loop; nothing here is `Send`.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use bytes::Bytes;
use compio::buf::BufResult;
use compio::io::AsyncWrite;
use compio::net::TcpStream;
use compio::runtime::TryClone;
use flume::{Receiver, Sender};

use crate::alloc::ByteBuf;
use crate::codec::Codec;
use crate::connection::Connection;
use crate::error::{CoreError, DecodeError, Result};
use crate::eventloop::LoopContext;
use crate::handler::IoEventHandle;
use crate::tcp;
use crate::timeout::read_with_timeout;

/// Commands accepted by a connection's write pump.
#[derive(Debug)]
pub(crate) enum ConnCmd {
    /// Queue raw bytes for write.
    SendBytes(Bytes),
    /// Wake the write pump; the read pump queued encoded output.
    Flush,
    /// Drain the queue, then close the socket.
    Close,
}

/// Cheap cloneable handle to a live connection.
///
/// The handle crosses threads freely; everything it does is forwarded to
/// the connection's loop through its command channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: i32,
    cmd_tx: Sender<ConnCmd>,
}

impl ConnectionHandle {
    /// Engine-assigned connection id.
    #[must_use]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Queue raw bytes for write on the connection's loop.
    ///
    /// # Errors
    ///
    /// Fails with [`CoreError::ChannelSend`] once the connection is gone.
    pub fn send(&self, bytes: Bytes) -> Result<()> {
        self.cmd_tx
            .send(ConnCmd::SendBytes(bytes))
            .map_err(|_| CoreError::ChannelSend)
    }

    /// Request an orderly close: queued writes drain first.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(ConnCmd::Close);
    }

    /// Whether the connection's pumps are still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !self.cmd_tx.is_disconnected()
    }
}

/// Start the pumps for an established stream on the current loop.
///
/// Must be called from inside the owning loop's runtime.
pub(crate) fn spawn_connection<C, H>(
    stream: TcpStream,
    codec: C,
    handler: H,
    ctx: &LoopContext,
) -> ConnectionHandle
where
    C: Codec + 'static,
    H: IoEventHandle<C::Frame> + 'static,
{
    let conn = Rc::new(RefCell::new(Connection::new(
        stream.peer_addr().ok(),
        stream.local_addr().ok(),
        ctx.options().write_backlog_limit,
    )));
    let id = conn.borrow().id();

    let (cmd_tx, cmd_rx) = flume::unbounded::<ConnCmd>();
    let (resume_tx, resume_rx) = flume::bounded::<()>(1);

    tracing::debug!(
        "[LOOP] connection {} open on loop {} (peer {:?})",
        id,
        ctx.index(),
        conn.borrow().peer_addr()
    );

    let write_stream = stream.try_clone().unwrap();
    compio::runtime::spawn(write_pump(
        write_stream,
        Rc::clone(&conn),
        cmd_rx,
        resume_tx,
        ctx.options().write_fanout,
    ))
    .detach();

    compio::runtime::spawn(read_pump(
        stream,
        Rc::clone(&conn),
        codec,
        handler,
        ctx.clone(),
        cmd_tx.clone(),
        resume_rx,
    ))
    .detach();

    ConnectionHandle { id, cmd_tx }
}

/// Socket-to-application pump.
///
/// Owns the codec and handler. Reads with the idle timeout, drives the
/// decode/dispatch cycle, and wakes the write pump whenever it queues
/// encoded output. Runs `on_close` exactly once on the way out.
async fn read_pump<C, H>(
    mut stream: TcpStream,
    conn: Rc<RefCell<Connection>>,
    mut codec: C,
    mut handler: H,
    ctx: LoopContext,
    wake_tx: Sender<ConnCmd>,
    resume_rx: Receiver<()>,
) where
    C: Codec + 'static,
    H: IoEventHandle<C::Frame> + 'static,
{
    {
        let mut c = conn.borrow_mut();
        codec.attach(&mut c);
        handler.on_open(&mut c);
    }

    let idle = ctx.options().idle_time;
    let read_cap = ctx.options().read_buffer_ceiling;
    let mut input: Option<ByteBuf> = None;

    loop {
        if conn.borrow().is_closing() || ctx.is_stopping() {
            break;
        }

        // Backpressure gate: wait for the write pump to drain the queue
        // instead of reading more.
        if conn.borrow().write_paused() {
            if resume_rx.recv_async().await.is_err() {
                break;
            }
            continue;
        }

        let buf = match input.take() {
            Some(buf) => buf,
            None => ctx.pool().allocate(read_cap),
        };
        if buf.writable() == 0 {
            let err = CoreError::from(DecodeError::malformed(format!(
                "unconsumed input exceeds the {} byte read buffer",
                buf.capacity()
            )));
            handler.on_error(&mut conn.borrow_mut(), &err);
            break;
        }

        match read_with_timeout(&mut stream, buf, Some(idle)).await {
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                // Idle tick. The buffer went down with the cancelled read;
                // codecs stage partial input themselves, so nothing is lost.
                let pinged = {
                    let mut c = conn.borrow_mut();
                    codec.ping(&mut c, ctx.pool())
                };
                match pinged {
                    Ok(Some(out)) => {
                        conn.borrow_mut().queue_output(out);
                        let _ = wake_tx.send(ConnCmd::Flush);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        let err = CoreError::from(err);
                        handler.on_error(&mut conn.borrow_mut(), &err);
                        break;
                    }
                }
            }
            Err(err) => {
                let err = CoreError::Io(err);
                handler.on_error(&mut conn.borrow_mut(), &err);
                break;
            }
            Ok(BufResult(Ok(0), _)) => {
                tracing::debug!("[LOOP] connection {} peer closed", conn.borrow().id());
                break;
            }
            Ok(BufResult(Ok(_), mut buf)) => {
                let DispatchOutcome { queued, fatal } =
                    dispatch(&conn, &mut codec, &mut handler, &ctx, &mut buf);
                if queued {
                    let _ = wake_tx.send(ConnCmd::Flush);
                }
                if fatal {
                    break;
                }
                if buf.readable() == 0 {
                    buf.reset();
                }
                input = Some(buf);
            }
            Ok(BufResult(Err(err), buf)) => {
                if err.kind() == io::ErrorKind::Interrupted {
                    input = Some(buf);
                    continue;
                }
                let err = CoreError::Io(err);
                handler.on_error(&mut conn.borrow_mut(), &err);
                break;
            }
        }
    }

    {
        let mut c = conn.borrow_mut();
        c.mark_closed();
        handler.on_close(&mut c);
        tracing::debug!("[LOOP] connection {} closed", c.id());
    }
    // Stop the write pump once the queue drains.
    let _ = wake_tx.send(ConnCmd::Close);
}

struct DispatchOutcome {
    queued: bool,
    fatal: bool,
}

/// Run decode -> handler -> encode until the codec wants more bytes.
fn dispatch<C, H>(
    conn: &Rc<RefCell<Connection>>,
    codec: &mut C,
    handler: &mut H,
    ctx: &LoopContext,
    buf: &mut ByteBuf,
) -> DispatchOutcome
where
    C: Codec,
    H: IoEventHandle<C::Frame>,
{
    let mut c = conn.borrow_mut();
    let mut queued = false;

    // Codecs that stage input internally keep yielding frames after the
    // buffer drains, so loop until the codec asks for more bytes.
    while buf.readable() >= codec.header_length() {
        match codec.decode(&mut c, buf) {
            Ok(Some(frame)) => match handler.accept(&mut c, frame) {
                Ok(Some(reply)) => match codec.encode(&mut c, ctx.pool(), reply) {
                    Ok(out) => {
                        c.queue_output(out);
                        queued = true;
                    }
                    Err(err) => {
                        let err = CoreError::from(err);
                        handler.on_error(&mut c, &err);
                        return DispatchOutcome { queued, fatal: true };
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    handler.on_error(&mut c, &err);
                    if err.is_connection_error() {
                        return DispatchOutcome { queued, fatal: true };
                    }
                }
            },
            Ok(None) => break,
            Err(err) => {
                let err = CoreError::from(err);
                handler.on_error(&mut c, &err);
                return DispatchOutcome { queued, fatal: true };
            }
        }
        if c.is_closing() {
            break;
        }
    }

    let _ = c.evaluate_backlog();
    DispatchOutcome {
        queued,
        fatal: false,
    }
}

/// Application-to-socket pump.
///
/// Single await point: the command channel. Each wakeup drains pending
/// commands, flushes the write queue, and signals the read pump when
/// backpressure lifts.
async fn write_pump(
    mut stream: TcpStream,
    conn: Rc<RefCell<Connection>>,
    cmd_rx: Receiver<ConnCmd>,
    resume_tx: Sender<()>,
    fanout: usize,
) {
    loop {
        let first = match cmd_rx.recv_async().await {
            Ok(cmd) => cmd,
            // Read pump gone and every handle dropped.
            Err(_) => break,
        };

        let mut close_requested = apply_cmd(&conn, first);
        while let Ok(cmd) = cmd_rx.try_recv() {
            close_requested |= apply_cmd(&conn, cmd);
        }

        let was_paused = conn.borrow().write_paused();
        if let Err(err) = flush(&mut stream, &conn, fanout).await {
            tracing::debug!(
                "[LOOP] connection {} write failed: {err}",
                conn.borrow().id()
            );
            conn.borrow_mut().close();
            let _ = tcp::shutdown_both(&stream);
            break;
        }

        let paused = conn.borrow().evaluate_backlog();
        if was_paused && !paused {
            let _ = resume_tx.try_send(());
        }

        if close_requested || conn.borrow().is_closing() {
            // Queue is drained; unblock a read pump still parked on the
            // socket.
            let _ = tcp::shutdown_both(&stream);
            break;
        }
    }
}

fn apply_cmd(conn: &Rc<RefCell<Connection>>, cmd: ConnCmd) -> bool {
    match cmd {
        ConnCmd::SendBytes(bytes) => {
            conn.borrow_mut().queue(bytes);
            false
        }
        ConnCmd::Flush => false,
        ConnCmd::Close => {
            conn.borrow_mut().close();
            true
        }
    }
}

/// Write queued segments until the queue is empty, yielding to the loop
/// after every `fanout` segments so one busy connection cannot starve
/// its neighbors.
async fn flush(
    stream: &mut TcpStream,
    conn: &Rc<RefCell<Connection>>,
    fanout: usize,
) -> io::Result<()> {
    loop {
        let mut written = 0;
        while written < fanout {
            // Borrow ends before the await below.
            let Some(seg) = conn.borrow_mut().next_segment() else {
                return Ok(());
            };
            let BufResult(res, mut seg) = stream.write(seg).await;
            match res {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "socket accepted no bytes",
                    ));
                }
                Ok(n) => {
                    if n < seg.len() {
                        seg.advance(n);
                        conn.borrow_mut().requeue_segment(seg);
                    }
                    written += 1;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    conn.borrow_mut().requeue_segment(seg);
                }
                Err(err) => return Err(err),
            }
        }
        compio::time::sleep(std::time::Duration::from_micros(1)).await;
    }
}

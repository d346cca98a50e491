//! Server and client bootstrap
//!
//! Small drivers that wire a listener or a dialed stream into the
//! event-loop group. The acceptor runs one accept task on the first loop
//! and deals accepted streams round-robin across the group; sockets are
//! moved to their target loop before their first I/O operation, so they
//! bind to that loop's driver.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::actor::{spawn_connection, ConnectionHandle};
use crate::codec::Codec;
use crate::error::{CoreError, Result};
use crate::eventloop::{EventLoop, EventLoopGroup, LoopContext};
use crate::handler::IoEventHandle;
use crate::tcp;

/// How long bootstrap calls wait for their loop-side half to report back.
const BOOTSTRAP_WAIT: Duration = Duration::from_secs(10);

/// A bound listening socket.
#[derive(Debug, Clone, Copy)]
pub struct ServerHandle {
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// The address the listener actually bound, with the OS-assigned port
    /// resolved.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Server-side bootstrap: bind, accept, deal to loops.
pub struct Acceptor;

impl Acceptor {
    /// Bind `addr` and serve connections with per-connection codec and
    /// handler instances built by the given factories.
    ///
    /// Blocks until the listener is bound; must not be called from a loop
    /// thread.
    ///
    /// # Errors
    ///
    /// Fails if the accept loop cannot be scheduled or the bind fails.
    pub fn bind<C, H, MC, MH>(
        group: &EventLoopGroup,
        addr: SocketAddr,
        make_codec: MC,
        make_handler: MH,
    ) -> Result<ServerHandle>
    where
        C: Codec + 'static,
        H: IoEventHandle<C::Frame> + 'static,
        MC: Fn() -> C + Send + Sync + 'static,
        MH: Fn() -> H + Send + Sync + 'static,
    {
        let make_codec = Arc::new(make_codec);
        let make_handler = Arc::new(make_handler);
        let loops: Arc<[EventLoop]> = group.loops().to_vec().into();
        let keepalive = group.options().keepalive;
        let (ready_tx, ready_rx) = flume::bounded::<std::io::Result<SocketAddr>>(1);

        let accept_loop = group.event_loop(0).ok_or(CoreError::LoopClosed)?;
        accept_loop.submit(move |_ctx| {
            compio::runtime::spawn(accept_task(
                addr,
                loops,
                make_codec,
                make_handler,
                keepalive,
                ready_tx,
            ))
            .detach();
        })?;

        let local_addr = recv_or_timeout(&ready_rx)?.map_err(CoreError::Io)?;
        tracing::debug!("[BOOT] listening on {local_addr}");
        Ok(ServerHandle { local_addr })
    }
}

async fn accept_task<C, H>(
    addr: SocketAddr,
    loops: Arc<[EventLoop]>,
    make_codec: Arc<dyn Fn() -> C + Send + Sync>,
    make_handler: Arc<dyn Fn() -> H + Send + Sync>,
    keepalive: Option<Duration>,
    ready_tx: flume::Sender<std::io::Result<SocketAddr>>,
) where
    C: Codec + 'static,
    H: IoEventHandle<C::Frame> + 'static,
{
    let listener = match compio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    };
    match listener.local_addr() {
        Ok(local) => {
            let _ = ready_tx.send(Ok(local));
        }
        Err(err) => {
            let _ = ready_tx.send(Err(err));
            return;
        }
    }

    let mut next = 0usize;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tune_stream(&stream, keepalive);
                let target = &loops[next % loops.len()];
                next = next.wrapping_add(1);
                let make_codec = Arc::clone(&make_codec);
                let make_handler = Arc::clone(&make_handler);
                let submitted = target.submit(move |ctx| {
                    spawn_connection(stream, make_codec(), make_handler(), ctx);
                });
                if submitted.is_err() {
                    tracing::warn!("[BOOT] dropping connection from {peer}: loop closed");
                }
            }
            Err(err) => {
                tracing::warn!("[BOOT] accept failed: {err}");
                compio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

/// Client-side bootstrap: dial and attach a codec and handler.
pub struct Connector;

impl Connector {
    /// Connect to `addr` on the group's next loop.
    ///
    /// Blocks until the connection is established; must not be called
    /// from a loop thread.
    ///
    /// # Errors
    ///
    /// Fails if the dial fails or the target loop is closed.
    pub fn connect<C, H, MC, MH>(
        group: &EventLoopGroup,
        addr: SocketAddr,
        make_codec: MC,
        make_handler: MH,
    ) -> Result<ConnectionHandle>
    where
        C: Codec + 'static,
        H: IoEventHandle<C::Frame> + 'static,
        MC: FnOnce() -> C + Send + 'static,
        MH: FnOnce() -> H + Send + 'static,
    {
        let keepalive = group.options().keepalive;
        let (done_tx, done_rx) = flume::bounded::<Result<ConnectionHandle>>(1);

        group.next_loop().submit(move |ctx| {
            let ctx = ctx.clone();
            compio::runtime::spawn(async move {
                match compio::net::TcpStream::connect(addr).await {
                    Ok(stream) => {
                        tune_stream(&stream, keepalive);
                        let handle = spawn_connection(stream, make_codec(), make_handler(), &ctx);
                        let _ = done_tx.send(Ok(handle));
                    }
                    Err(err) => {
                        let _ = done_tx.send(Err(CoreError::Io(err)));
                    }
                }
            })
            .detach();
        })?;

        recv_or_timeout(&done_rx)?
    }
}

fn tune_stream(stream: &compio::net::TcpStream, keepalive: Option<Duration>) {
    if let Err(err) = tcp::enable_tcp_nodelay(stream) {
        tracing::warn!("[BOOT] TCP_NODELAY failed: {err}");
    }
    if let Some(idle) = keepalive {
        if let Err(err) = tcp::enable_tcp_keepalive(stream, idle) {
            tracing::warn!("[BOOT] keepalive failed: {err}");
        }
    }
}

fn recv_or_timeout<T>(rx: &flume::Receiver<T>) -> Result<T> {
    match rx.recv_timeout(BOOTSTRAP_WAIT) {
        Ok(value) => Ok(value),
        Err(flume::RecvTimeoutError::Timeout) => Err(CoreError::Timeout(BOOTSTRAP_WAIT)),
        Err(flume::RecvTimeoutError::Disconnected) => Err(CoreError::ChannelRecv),
    }
}

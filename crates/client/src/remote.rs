//! Remote TCP transport
//!
//! A [`RemoteClient`] owns one TCP connection and runs three tasks per
//! connection attempt: a writer draining the send queue, a reader
//! assembling length-prefixed frames, and a supervisor that waits for
//! cancellation, reaps both loops within a bounded window, and decides
//! whether to reconnect.
//!
//! Frames are a 4-byte little-endian payload length followed by the
//! payload, compressed per [`NetConfig::compression`]. A frame decode
//! failure poisons only that frame; an I/O failure closes the
//! connection.

use crate::handlers::{Handlers, SharedHandlers};
use crate::{Client, ClientError, ClientKey};
use lanlink_protocol::{CancelToken, ContextRunner, GameMsg, MsgTag, NetConfig};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// A client backed by a TCP connection.
///
/// Always used through `Arc`: the connection tasks hold clones and the
/// handler callbacks receive one. Outbound messages go through a queue
/// so [`Client::send`] never touches the socket; the queue survives
/// nothing — it is cleared whenever a connection ends.
pub struct RemoteClient {
    key: ClientKey,
    id: AtomicU32,
    peer: SocketAddr,
    handlers: SharedHandlers,
    ctx: Arc<dyn ContextRunner>,
    config: NetConfig,
    /// Runtime the connection tasks run on. Captured at construction
    /// so [`Client::disconnect`] works from any thread, the consumer
    /// context's included.
    runtime: tokio::runtime::Handle,
    queue: Arc<Mutex<VecDeque<GameMsg>>>,
    /// Token of the current connection attempt; replaced on reconnect.
    cancel: Mutex<CancelToken>,
    /// Cleared by a graceful disconnect (ours or the peer's) so the
    /// supervisor knows an ended connection is final.
    reconnect_on_close: AtomicBool,
}

impl RemoteClient {
    /// Dials `addr` and starts the connection tasks. The identity
    /// handshake is appended to `handlers`: a Connect envelope from the
    /// server stores the identity it carries.
    ///
    /// An unexpected connection loss triggers a single reconnect
    /// attempt that re-claims the current identity.
    pub async fn connect(
        addr: SocketAddr,
        mut handlers: Handlers,
        ctx: Arc<dyn ContextRunner>,
        config: NetConfig,
    ) -> Result<Arc<Self>, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        handlers.on(MsgTag::Connect.tag(), |client, reader| {
            client.set_id(reader.read_i32()? as u32);
            Ok(())
        });
        let client = Arc::new(Self {
            key: ClientKey::next(),
            id: AtomicU32::new(0),
            peer: addr,
            handlers: handlers.freeze(),
            ctx,
            config,
            runtime: tokio::runtime::Handle::current(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            cancel: Mutex::new(CancelToken::new()),
            reconnect_on_close: AtomicBool::new(true),
        });
        client.spawn_connection(stream);
        Ok(client)
    }

    /// Wraps an accepted server-side connection under an already
    /// assigned identity, so the identity is visible before any frame
    /// can be dispatched. Server-side ends never reconnect; the remote
    /// peer re-dials instead.
    ///
    /// Must be called inside a tokio runtime.
    pub fn accepted(
        stream: TcpStream,
        id: u32,
        handlers: SharedHandlers,
        ctx: Arc<dyn ContextRunner>,
        config: NetConfig,
    ) -> Result<Arc<Self>, ClientError> {
        let peer = stream.peer_addr()?;
        let client = Arc::new(Self {
            key: ClientKey::next(),
            id: AtomicU32::new(id),
            peer,
            handlers,
            ctx,
            config,
            runtime: tokio::runtime::Handle::current(),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            cancel: Mutex::new(CancelToken::new()),
            reconnect_on_close: AtomicBool::new(false),
        });
        client.spawn_connection(stream);
        Ok(client)
    }

    /// Address of the remote end.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Whether the current connection has been cancelled. A client in
    /// this state may still come back through a reconnect.
    pub fn is_closed(&self) -> bool {
        self.cancel.lock().unwrap().is_cancelled()
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream) {
        let token = CancelToken::new();
        *self.cancel.lock().unwrap() = token.clone();
        let (rd, wr) = stream.into_split();
        let me = self.clone();
        self.runtime.spawn(async move {
            me.run_connection(rd, wr, token).await;
        });
    }

    /// Supervisor: owns one connection attempt from task startup to
    /// teardown and the reconnect decision.
    async fn run_connection(
        self: Arc<Self>,
        rd: OwnedReadHalf,
        wr: OwnedWriteHalf,
        token: CancelToken,
    ) {
        let mut reader = tokio::spawn(self.clone().read_loop(rd, token.clone()));
        let mut writer = tokio::spawn(Self::write_loop(
            wr,
            self.queue.clone(),
            self.config.clone(),
            token.clone(),
        ));

        token.cancelled().await;

        let reaped = async {
            let _ = (&mut reader).await;
            let _ = (&mut writer).await;
        };
        if timeout(self.config.close_wait, reaped).await.is_err() {
            warn!(peer = %self.peer, "connection tasks did not exit in time, aborting");
            reader.abort();
            writer.abort();
        }
        self.queue.lock().unwrap().clear();

        if self.reconnect_on_close.load(Ordering::SeqCst) {
            if let Err(err) = self.reconnect().await {
                warn!(peer = %self.peer, %err, "reconnect failed");
            }
        } else {
            debug!(peer = %self.peer, "connection closed");
        }
    }

    /// One reconnect attempt: re-dial the same peer and re-claim the
    /// current identity.
    async fn reconnect(self: &Arc<Self>) -> Result<(), ClientError> {
        info!(peer = %self.peer, id = self.id(), "reconnecting");
        let stream = TcpStream::connect(self.peer).await?;
        self.spawn_connection(stream);
        self.send(GameMsg::reconnect(self.id()));
        Ok(())
    }

    async fn write_loop(
        mut wr: OwnedWriteHalf,
        queue: Arc<Mutex<VecDeque<GameMsg>>>,
        config: NetConfig,
        token: CancelToken,
    ) {
        while !token.is_cancelled() {
            let next = queue.lock().unwrap().pop_front();
            match next {
                Some(msg) => {
                    if let Err(err) = Self::write_frame(&mut wr, &msg, &config).await {
                        warn!(%err, "write failed, closing connection");
                        token.cancel();
                    }
                }
                None => {
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(config.write_poll) => {}
                    }
                }
            }
        }
    }

    async fn write_frame(
        wr: &mut OwnedWriteHalf,
        msg: &GameMsg,
        config: &NetConfig,
    ) -> Result<(), ClientError> {
        let payload = config.compression.compress(msg.as_bytes())?;
        wr.write_all(&(payload.len() as u32).to_le_bytes()).await?;
        wr.write_all(&payload).await?;
        wr.flush().await?;
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut rd: OwnedReadHalf, token: CancelToken) {
        loop {
            let mut len_buf = [0u8; 4];
            tokio::select! {
                _ = token.cancelled() => return,
                res = rd.read_exact(&mut len_buf) => {
                    if let Err(err) = res {
                        debug!(peer = %self.peer, %err, "read failed, closing connection");
                        token.cancel();
                        return;
                    }
                }
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            match self.read_payload(&mut rd, len).await {
                Ok(payload) => match self.decode(payload) {
                    Ok(msg) => {
                        trace!(peer = %self.peer, tag = msg.tag(), "frame received");
                        self.deliver(msg);
                    }
                    // A bad frame poisons only itself.
                    Err(err) => warn!(peer = %self.peer, %err, "dropping undecodable frame"),
                },
                Err(err) => {
                    debug!(peer = %self.peer, %err, "read failed, closing connection");
                    token.cancel();
                    return;
                }
            }
        }
    }

    /// Assembles one frame payload, reading in bounded chunks so large
    /// frames yield intermediate MsgProgress notifications.
    async fn read_payload(
        self: &Arc<Self>,
        rd: &mut OwnedReadHalf,
        len: usize,
    ) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut read = 0;
        while read < len {
            let end = (read + self.config.progress_threshold).min(len);
            let n = rd.read(&mut buf[read..end]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed mid-frame",
                ));
            }
            read += n;
            if len > self.config.progress_threshold && read < len {
                self.deliver(GameMsg::progress(read as i32, len as i32));
            }
        }
        Ok(buf)
    }

    fn decode(&self, payload: Vec<u8>) -> Result<GameMsg, ClientError> {
        let bytes = self.config.compression.decompress(&payload)?;
        Ok(GameMsg::from_bytes(bytes)?)
    }

    /// Schedules dispatch of an inbound envelope on the consumer
    /// context. A Disconnect envelope also marks the connection final
    /// and closes it once dispatched.
    fn deliver(self: &Arc<Self>, msg: GameMsg) {
        if msg.tag() == MsgTag::Disconnect.tag() {
            self.reconnect_on_close.store(false, Ordering::SeqCst);
        }
        let me = self.clone();
        self.ctx.run(Box::new(move || {
            let as_client: Arc<dyn Client> = me.clone();
            me.handlers.dispatch(&as_client, &msg);
            if msg.tag() == MsgTag::Disconnect.tag() {
                me.close();
            }
        }));
    }
}

impl Client for RemoteClient {
    fn key(&self) -> ClientKey {
        self.key
    }

    fn id(&self) -> u32 {
        self.id.load(Ordering::SeqCst)
    }

    fn set_id(&self, id: u32) {
        self.id.store(id, Ordering::SeqCst);
    }

    fn send(&self, msg: GameMsg) {
        trace!(peer = %self.peer, tag = msg.tag(), "enqueue");
        self.queue.lock().unwrap().push_back(msg);
    }

    fn close(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Graceful close: pending messages are discarded, a Disconnect
    /// envelope is given a bounded window to flush, then the
    /// connection is closed without reconnecting.
    fn disconnect(&self) {
        self.reconnect_on_close.store(false, Ordering::SeqCst);
        {
            let mut queue = self.queue.lock().unwrap();
            queue.clear();
            queue.push_back(GameMsg::disconnect());
        }
        let token = self.cancel.lock().unwrap().clone();
        let queue = self.queue.clone();
        let drain_poll = self.config.drain_poll;
        let drain_wait = self.config.drain_wait;
        let peer = self.peer;
        self.runtime.spawn(async move {
            let drained = async {
                while !queue.lock().unwrap().is_empty() {
                    tokio::time::sleep(drain_poll).await;
                }
            };
            if timeout(drain_wait, drained).await.is_err() {
                warn!(%peer, "disconnect envelope not flushed in time");
            }
            token.cancel();
        });
    }
}

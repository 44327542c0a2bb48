//! Networking primitives.
//!
//! Two channels with different guarantees:
//! - Reliable (TCP, length-prefixed frames): handshake, moves, control.
//!   Moves must arrive complete and in order because physics integration
//!   depends on every previous step.
//! - Unreliable (UDP, one message per datagram): snapshots. Each snapshot is
//!   a complete state, so a lost or reordered one is simply superseded.
//!
//! Serialization is serde_json to keep the wire format explicit and easy to
//! inspect.

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    net::SocketAddr,
    sync::atomic::{AtomicU32, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream, UdpSocket,
    },
    sync::mpsc,
};
use tracing::debug;

use crate::{
    movement::{Move, VehicleState},
    replication::ServerState,
};

/// Protocol version for compatibility checks.
pub const PROTOCOL_VERSION: u32 = 1;

/// Frames larger than this are treated as a corrupt stream.
const MAX_FRAME_LEN: usize = 1 << 20;

static NEXT_CLIENT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub u32);

impl ClientId {
    pub fn new_unique() -> Self {
        ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identifies a kart across all peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KartId(pub u32);

/// High-level message envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NetMsg {
    // ─── Connection handshake ───
    Hello {
        protocol: u32,
        player_name: String,
    },
    /// Client announces its UDP port to the server.
    UdpHello {
        client_udp_port: u16,
    },
    /// Server assigns the client its kart.
    Welcome {
        client_id: ClientId,
        kart: KartId,
        spawn: VehicleState,
        server_time: f64,
    },

    // ─── Clock sync ───
    TimeRequest {
        client_time: f64,
    },
    TimeResponse {
        client_time: f64,
        server_time: f64,
    },

    // ─── Movement ───
    /// Controller -> authority, reliable and ordered.
    Move(Move),
    /// Authority -> everyone, best effort.
    Snapshot(StateSnapshot),
    /// A kart left the session.
    KartRemoved {
        kart: KartId,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

/// Authoritative state of one kart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub kart: KartId,
    pub state: ServerState,
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, msg: &NetMsg) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize msg")?;
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<NetMsg> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_FRAME_LEN, "frame of {len} bytes exceeds limit");
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    let msg = serde_json::from_slice(&payload).context("deserialize msg")?;
    Ok(msg)
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.stream, msg).await
    }

    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.stream).await
    }

    /// Splits into independently owned halves once the handshake is done.
    pub fn into_split(self) -> (ReliableReader, ReliableWriter) {
        let (read, write) = self.stream.into_split();
        (ReliableReader { read }, ReliableWriter { write })
    }
}

/// Receiving half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableReader {
    read: OwnedReadHalf,
}

impl ReliableReader {
    pub async fn recv(&mut self) -> anyhow::Result<NetMsg> {
        read_frame(&mut self.read).await
    }

    /// Moves reading onto its own task. Messages queue in the returned
    /// channel until the tick loop drains them; the channel closes when the
    /// connection does.
    pub fn spawn_forwarder(mut self, capacity: usize) -> mpsc::Receiver<NetMsg> {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Reliable reader closed");
                        break;
                    }
                }
            }
        });
        rx
    }
}

/// Sending half of a [`ReliableConn`].
#[derive(Debug)]
pub struct ReliableWriter {
    write: OwnedWriteHalf,
}

impl ReliableWriter {
    pub async fn send(&mut self, msg: &NetMsg) -> anyhow::Result<()> {
        write_frame(&mut self.write, msg).await
    }
}

/// Receiving end of the unreliable channel. Snapshots are the only
/// datagrams, so the socket is only ever drained.
#[derive(Debug)]
pub struct UnreliableConn {
    socket: UdpSocket,
}

impl UnreliableConn {
    /// Binds locally and only accepts datagrams from `peer`.
    pub async fn connect(bind_addr: SocketAddr, peer: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.context("udp bind")?;
        socket.connect(peer).await.context("udp connect")?;
        Ok(Self { socket })
    }

    /// Drains every datagram already queued on the socket without waiting.
    /// Undecodable datagrams are skipped.
    pub fn drain(&self) -> anyhow::Result<Vec<NetMsg>> {
        let mut buf = vec![0u8; 64 * 1024];
        let mut out = Vec::new();
        loop {
            match self.socket.try_recv(&mut buf) {
                Ok(n) => match decode_from_bytes(&buf[..n]) {
                    Ok(msg) => out.push(msg),
                    Err(e) => debug!(error = %e, "Dropping malformed datagram"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e).context("udp recv"),
            }
        }
        Ok(out)
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &NetMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<NetMsg> {
    serde_json::from_slice(b).context("deserialize")
}

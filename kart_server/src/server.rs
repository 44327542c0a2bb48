//! Server implementation.
//!
//! An authoritative kart server with a fixed-timestep loop. It supports:
//! - Client handshake and kart assignment
//! - Moves over the reliable channel, applied in arrival order
//! - An optional host-controlled kart (listen-server style)
//! - Snapshot replication over UDP at its own rate
//! - Session clock answers for client time sync
//!
//! Determinism notes:
//! - Keep simulation in a fixed timestep.
//! - Moves are applied between ticks, never mid-step.
//! - Use stable ordering when iterating karts.

use anyhow::Context;
use kart_shared::{
    clock::{SessionClock, SyncedClock},
    config::KartConfig,
    input::{ControlInput, ScriptedInput},
    math::Vec3,
    movement::{MovementSimulator, VehicleState},
    net::{
        encode_to_bytes, ClientId, KartId, NetMsg, ReliableConn, ReliableListener,
        ReliableWriter, StateSnapshot, PROTOCOL_VERSION,
    },
    physics::Arena,
    replication::{Authority, Replicator, ServerState},
};
use std::{
    collections::{BTreeMap, HashMap},
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use tokio::{
    net::UdpSocket,
    sync::mpsc::{self, error::TryRecvError},
    time::Instant,
};
use tracing::{debug, info, warn};

/// Distance between neighbouring spawn points (m).
const SPAWN_SPACING: f32 = 5.0;

/// Connected client state.
struct ConnectedClient {
    name: String,
    kart: KartId,
    writer: ReliableWriter,
    inbox: mpsc::Receiver<NetMsg>,
    udp_peer: SocketAddr,
}

/// Kart owned by the server process itself.
struct HostKart {
    kart: KartId,
    input: Box<dyn ControlInput + Send>,
}

/// Game server.
pub struct KartServer {
    pub cfg: KartConfig,
    sim: MovementSimulator,
    clock: SyncedClock,
    karts: BTreeMap<KartId, Replicator>,
    clients: HashMap<ClientId, ConnectedClient>,
    host: Option<HostKart>,

    tcp: ReliableListener,
    udp: UdpSocket,

    tick: u32,
    next_kart: u32,
    since_snapshot: f32,
    snapshots_sent: u64,
}

impl KartServer {
    /// Binds server sockets for the given config.
    pub async fn bind(cfg: KartConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        let udp = UdpSocket::bind(tcp.local_addr()?).await.context("udp bind")?;
        Ok(Self::from_sockets(cfg, tcp, udp))
    }

    fn from_sockets(cfg: KartConfig, tcp: ReliableListener, udp: UdpSocket) -> Self {
        let sim = cfg.simulator();
        Self {
            cfg,
            sim,
            clock: SyncedClock::new(),
            karts: BTreeMap::new(),
            clients: HashMap::new(),
            host: None,
            tcp,
            udp,
            tick: 0,
            next_kart: 1,
            since_snapshot: 0.0,
            snapshots_sent: 0,
        }
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn kart_count(&self) -> usize {
        self.karts.len()
    }

    pub fn snapshots_sent(&self) -> u64 {
        self.snapshots_sent
    }

    pub fn kart_for(&self, client_id: ClientId) -> Option<KartId> {
        self.clients.get(&client_id).map(|c| c.kart)
    }

    pub fn client_name(&self, client_id: ClientId) -> Option<&str> {
        self.clients.get(&client_id).map(|c| c.name.as_str())
    }

    pub fn host_kart(&self) -> Option<KartId> {
        self.host.as_ref().map(|h| h.kart)
    }

    fn authority(&self, kart: KartId) -> Option<&Authority> {
        match self.karts.get(&kart)? {
            Replicator::Authority(auth) => Some(auth),
            _ => None,
        }
    }

    /// Canonical state of a kart.
    pub fn kart_state(&self, kart: KartId) -> Option<&ServerState> {
        self.authority(kart).map(Authority::server_state)
    }

    pub fn moves_applied(&self, kart: KartId) -> u64 {
        self.authority(kart).map_or(0, Authority::moves_applied)
    }

    fn spawn_kart(&mut self) -> (KartId, VehicleState) {
        let kart = KartId(self.next_kart);
        self.next_kart += 1;

        let spawn = VehicleState::at(self.spawn_point(self.karts.len()));
        let auth = Authority::new(self.sim.clone(), spawn, self.cfg.validation);
        self.karts.insert(kart, Replicator::Authority(auth));
        (kart, spawn)
    }

    /// Karts line up side by side along Y. Inside an arena the line wraps
    /// from wall to wall so every slot stays within bounds.
    fn spawn_point(&self, slot: usize) -> Vec3 {
        let offset = slot as f32 * SPAWN_SPACING;
        let Some(arena) = self.cfg.arena.map(Arena::normalized) else {
            return Vec3::new(0.0, offset, 0.0);
        };

        let span = arena.max.y - arena.min.y;
        let y = if span > 0.0 {
            arena.min.y + (offset - arena.min.y).rem_euclid(span)
        } else {
            arena.min.y
        };
        arena.clamp_point(Vec3::new(0.0, y, 0.0))
    }

    /// Spawns a kart driven by this process.
    pub fn spawn_host_kart(&mut self, input: ScriptedInput) -> KartId {
        let (kart, spawn) = self.spawn_kart();
        if let Some(Replicator::Authority(auth)) = self.karts.remove(&kart) {
            self.karts
                .insert(kart, Replicator::Authority(auth.with_local_control()));
        }
        self.host = Some(HostKart {
            kart,
            input: Box::new(input),
        });
        info!(kart = ?kart, position = ?spawn.position, "Host kart spawned");
        kart
    }

    /// Accepts exactly one client.
    pub async fn accept_one(&mut self) -> anyhow::Result<ClientId> {
        let (conn, peer) = self.tcp.accept().await?;
        self.handle_new_connection(conn, peer).await
    }

    /// Accepts a client with timeout (non-blocking).
    pub async fn try_accept(&mut self, timeout: Duration) -> anyhow::Result<Option<ClientId>> {
        match tokio::time::timeout(timeout, self.tcp.accept()).await {
            Ok(Ok((conn, peer))) => self.handle_new_connection(conn, peer).await.map(Some),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(None), // Timeout
        }
    }

    async fn handle_new_connection(
        &mut self,
        mut conn: ReliableConn,
        peer: SocketAddr,
    ) -> anyhow::Result<ClientId> {
        let msg = conn.recv().await?;
        match msg {
            NetMsg::Hello {
                protocol,
                player_name,
            } if protocol == PROTOCOL_VERSION => {
                let udp_hello = conn.recv().await?;
                let client_udp_port = match udp_hello {
                    NetMsg::UdpHello { client_udp_port } => client_udp_port,
                    other => anyhow::bail!("expected UdpHello, got {other:?}"),
                };

                let id = ClientId::new_unique();
                let (kart, spawn) = self.spawn_kart();
                conn.send(&NetMsg::Welcome {
                    client_id: id,
                    kart,
                    spawn,
                    server_time: self.clock.now(),
                })
                .await?;

                let udp_peer = SocketAddr::new(peer.ip(), client_udp_port);
                let (reader, writer) = conn.into_split();
                self.clients.insert(
                    id,
                    ConnectedClient {
                        name: player_name.clone(),
                        kart,
                        writer,
                        inbox: reader.spawn_forwarder(256),
                        udp_peer,
                    },
                );

                info!(client_id = ?id, name = %player_name, kart = ?kart, %udp_peer, "Client connected");
                Ok(id)
            }
            NetMsg::Hello { protocol, .. } => {
                let reason = format!("protocol {protocol} not supported, expected {PROTOCOL_VERSION}");
                let _ = conn.send(&NetMsg::Disconnect { reason: reason.clone() }).await;
                anyhow::bail!(reason)
            }
            other => anyhow::bail!("unexpected handshake msg: {other:?}"),
        }
    }

    /// Runs the server for a number of ticks.
    pub async fn run_for_ticks(&mut self, ticks: u32) -> anyhow::Result<()> {
        let dt = Duration::from_secs_f32(self.cfg.tick_dt());
        let mut next = Instant::now();

        for _ in 0..ticks {
            next += dt;
            self.step(dt.as_secs_f32()).await?;
            tokio::time::sleep_until(next).await;
        }
        Ok(())
    }

    /// Executes one fixed simulation step.
    pub async fn step(&mut self, dt_sec: f32) -> anyhow::Result<()> {
        let gone = self.process_client_messages().await;
        for client_id in gone {
            self.drop_client(client_id).await;
        }
        self.tick_host(dt_sec);

        self.since_snapshot += dt_sec;
        let interval = self.cfg.snapshot_interval();
        if self.since_snapshot >= interval {
            // Skip missed sends instead of bursting to catch up.
            self.since_snapshot = (self.since_snapshot - interval).min(interval);
            self.send_snapshots().await?;
        }

        self.tick += 1;
        Ok(())
    }

    /// Applies everything buffered on the reliable channels since the last
    /// tick. Returns clients whose connection closed.
    async fn process_client_messages(&mut self) -> Vec<ClientId> {
        let mut gone = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            loop {
                let msg = match client.inbox.try_recv() {
                    Ok(msg) => msg,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        gone.push(*id);
                        break;
                    }
                };

                match msg {
                    NetMsg::Move(mv) => {
                        let Some(kart) = self.karts.get_mut(&client.kart) else {
                            continue;
                        };
                        if let Err(err) = kart.on_move_received(mv) {
                            warn!(client_id = ?id, kart = ?client.kart, error = %err, "Move rejected");
                        }
                    }
                    NetMsg::TimeRequest { client_time } => {
                        let reply = NetMsg::TimeResponse {
                            client_time,
                            server_time: self.clock.now(),
                        };
                        if let Err(e) = client.writer.send(&reply).await {
                            warn!(client_id = ?id, error = %e, "Failed to answer time request");
                            gone.push(*id);
                            break;
                        }
                    }
                    NetMsg::Disconnect { reason } => {
                        info!(client_id = ?id, reason = %reason, "Client disconnected");
                        gone.push(*id);
                        break;
                    }
                    other => {
                        debug!(client_id = ?id, ?other, "Unexpected reliable message");
                    }
                }
            }
        }
        gone
    }

    fn tick_host(&mut self, dt_sec: f32) {
        let Some(host) = self.host.as_mut() else {
            return;
        };
        let input = host.input.sample(dt_sec);
        if let Some(kart) = self.karts.get_mut(&host.kart) {
            kart.on_tick(dt_sec, input, &self.clock);
        }
    }

    /// Sends a snapshot of every kart that changed since the last send.
    pub async fn send_snapshots(&mut self) -> anyhow::Result<()> {
        let mut payloads = Vec::new();
        for (kart, replicator) in self.karts.iter_mut() {
            let Some(auth) = replicator.as_authority_mut() else {
                continue;
            };
            if let Some(state) = auth.take_snapshot() {
                let msg = NetMsg::Snapshot(StateSnapshot { kart: *kart, state });
                payloads.push(encode_to_bytes(&msg).context("serialize snapshot")?);
            }
        }

        for payload in &payloads {
            for c in self.clients.values() {
                if let Err(e) = self.udp.send_to(payload, c.udp_peer).await {
                    debug!(udp_peer = %c.udp_peer, error = %e, "Snapshot send failed");
                }
            }
        }
        self.snapshots_sent += payloads.len() as u64;
        Ok(())
    }

    async fn drop_client(&mut self, client_id: ClientId) {
        let Some(client) = self.clients.remove(&client_id) else {
            return;
        };
        self.karts.remove(&client.kart);
        info!(client_id = ?client_id, name = %client.name, kart = ?client.kart, "Kart removed");

        let msg = NetMsg::KartRemoved { kart: client.kart };
        for (id, other) in self.clients.iter_mut() {
            if let Err(e) = other.writer.send(&msg).await {
                debug!(client_id = ?id, error = %e, "Failed to announce kart removal");
            }
        }
    }
}

/// Helper for tests: bind to an ephemeral port.
pub async fn bind_ephemeral(cfg: KartConfig) -> anyhow::Result<(KartServer, KartConfig)> {
    let mut cfg = KartConfig {
        server_addr: format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0),
        ..cfg
    };

    // Bind TCP first to get an ephemeral port, then bind UDP to that same port.
    let tcp = ReliableListener::bind(cfg.server_addr.parse()?).await?;
    let addr = tcp.local_addr()?;
    cfg.server_addr = addr.to_string();

    let udp_bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port());
    let udp = UdpSocket::bind(udp_bind).await?;

    Ok((KartServer::from_sockets(cfg.clone(), tcp, udp), cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn host_kart_moves_and_replicates() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(KartConfig::default()).await?;
        let kart = server.spawn_host_kart(ScriptedInput::new(1.0, 0.0));

        for _ in 0..3 {
            server.step(1.0 / 60.0).await?;
        }
        assert_eq!(server.snapshots_sent(), 0);

        for _ in 0..7 {
            server.step(1.0 / 60.0).await?;
        }
        assert_eq!(server.moves_applied(kart), 10);
        let state = server.kart_state(kart).unwrap();
        assert!(state.velocity.x > 0.0);
        assert!(state.transform.position.x > 0.0);
        // 10 ticks at 60 Hz cross the 10 Hz snapshot boundary once.
        assert_eq!(server.snapshots_sent(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn spawns_stay_inside_a_small_arena() -> anyhow::Result<()> {
        let arena = Arena::new(10.0, 10.0);
        let cfg = KartConfig {
            arena: Some(arena),
            ..Default::default()
        };
        let (mut server, _cfg) = bind_ephemeral(cfg).await?;

        let mut spawns = Vec::new();
        for _ in 0..6 {
            let (_, spawn) = server.spawn_kart();
            assert!(arena.contains(spawn.position), "{:?} outside arena", spawn.position);
            spawns.push(spawn.position);
        }
        // Wrapping keeps the first few slots distinct.
        for (i, a) in spawns.iter().take(4).enumerate() {
            for b in spawns.iter().take(4).skip(i + 1) {
                assert!(a.distance(*b) >= SPAWN_SPACING);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn karts_spawn_apart() -> anyhow::Result<()> {
        let (mut server, _cfg) = bind_ephemeral(KartConfig::default()).await?;
        let a = server.spawn_kart().1;
        let b = server.spawn_kart().1;
        assert!(a.position.distance(b.position) >= SPAWN_SPACING);
        assert_eq!(server.kart_count(), 2);
        Ok(())
    }
}

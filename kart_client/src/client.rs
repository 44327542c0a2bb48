//! Client implementation.
//!
//! The client maintains:
//! - A reliable stream (handshake, moves, clock sync, kart removal)
//! - An unreliable datagram socket (snapshots)
//! - A predictor for the kart it controls
//! - An interpolator per remote kart, created when that kart's first
//!   snapshot arrives
//! - A session clock synced against the server

use std::{
    collections::{BTreeMap, BTreeSet},
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use anyhow::Context;
use kart_shared::{
    clock::{SessionClock, SyncedClock},
    config::KartConfig,
    input::InputState,
    movement::{Move, VehicleState},
    net::{
        ClientId, KartId, NetMsg, ReliableConn, ReliableWriter, StateSnapshot, UnreliableConn,
        PROTOCOL_VERSION,
    },
    replication::{Predictor, RemoteInterpolator, Replicator},
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

/// Seconds between clock sync requests.
const TIME_SYNC_PERIOD: f32 = 1.0;

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Handshake done, driving a kart.
    Connected,
    /// Server closed the session or the stream broke.
    Disconnected,
}

/// High-level kart client.
pub struct KartClient {
    pub client_id: ClientId,
    pub kart: KartId,
    pub state: ClientState,

    cfg: KartConfig,
    clock: SyncedClock,
    own: Replicator,
    remotes: BTreeMap<KartId, Replicator>,
    /// Kart ids are never reused, so late snapshots for these are dropped.
    departed: BTreeSet<KartId>,

    writer: ReliableWriter,
    inbox: mpsc::Receiver<NetMsg>,
    unreliable: UnreliableConn,

    tick: u32,
    since_time_sync: f32,
    snapshots_received: u64,
}

impl KartClient {
    /// Connects to a server and performs handshake.
    pub async fn connect(cfg: &KartConfig) -> anyhow::Result<Self> {
        let server_addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;

        info!(server = %server_addr, name = %cfg.player_name, "Connecting to server");

        // Bind UDP first so we can tell the server where to send snapshots.
        let bind_ip = if server_addr.ip().is_loopback() {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        };
        let unreliable = UnreliableConn::connect(SocketAddr::new(bind_ip, 0), server_addr).await?;
        let client_udp_port = unreliable.local_addr().context("udp local_addr")?.port();

        let mut clock = SyncedClock::new();
        let sent = clock.local_now();

        let mut reliable = ReliableConn::connect(server_addr).await?;
        reliable
            .send(&NetMsg::Hello {
                protocol: PROTOCOL_VERSION,
                player_name: cfg.player_name.clone(),
            })
            .await?;
        reliable.send(&NetMsg::UdpHello { client_udp_port }).await?;

        let (client_id, kart, spawn, server_time) = match reliable.recv().await? {
            NetMsg::Welcome {
                client_id,
                kart,
                spawn,
                server_time,
            } => (client_id, kart, spawn, server_time),
            NetMsg::Disconnect { reason } => anyhow::bail!("server refused connection: {reason}"),
            other => anyhow::bail!("expected Welcome, got {other:?}"),
        };
        // The handshake round trip doubles as the first clock sample.
        let received = clock.local_now();
        clock.apply_sample(sent, server_time, received);

        info!(client_id = ?client_id, kart = ?kart, position = ?spawn.position, "Connected to server");

        let sim = cfg.simulator();
        let own = Replicator::Predicting(Predictor::new(sim, spawn, cfg.max_pending_moves));

        let (reader, writer) = reliable.into_split();
        Ok(Self {
            client_id,
            kart,
            state: ClientState::Connected,
            cfg: cfg.clone(),
            clock,
            own,
            remotes: BTreeMap::new(),
            departed: BTreeSet::new(),
            writer,
            inbox: reader.spawn_forwarder(256),
            unreliable,
            tick: 0,
            since_time_sync: 0.0,
            snapshots_received: 0,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    pub fn tick_count(&self) -> u32 {
        self.tick
    }

    pub fn snapshots_received(&self) -> u64 {
        self.snapshots_received
    }

    pub fn clock(&self) -> &SyncedClock {
        &self.clock
    }

    /// Predicted state of the controlled kart.
    pub fn vehicle_state(&self) -> &VehicleState {
        self.own.vehicle_state()
    }

    pub fn predictor(&self) -> Option<&Predictor> {
        match &self.own {
            Replicator::Predicting(pred) => Some(pred),
            _ => None,
        }
    }

    /// Moves sent but not yet acknowledged.
    pub fn pending_moves(&self) -> usize {
        self.predictor().map_or(0, |p| p.pending().len())
    }

    /// Rendered state of a remote kart.
    pub fn remote_state(&self, kart: KartId) -> Option<&VehicleState> {
        self.remotes.get(&kart).map(Replicator::vehicle_state)
    }

    pub fn remote_karts(&self) -> impl Iterator<Item = KartId> + '_ {
        self.remotes.keys().copied()
    }

    /// Handles everything that arrived since the last call without
    /// advancing the simulation.
    pub async fn poll_network(&mut self) -> anyhow::Result<()> {
        self.poll_reliable();
        self.recv_snapshots()?;
        Ok(())
    }

    fn poll_reliable(&mut self) {
        loop {
            let msg = match self.inbox.try_recv() {
                Ok(msg) => msg,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.is_connected() {
                        warn!("Reliable connection closed");
                    }
                    self.state = ClientState::Disconnected;
                    break;
                }
            };
            self.handle_reliable_message(msg);
        }
    }

    fn handle_reliable_message(&mut self, msg: NetMsg) {
        match msg {
            NetMsg::TimeResponse {
                client_time,
                server_time,
            } => {
                let received = self.clock.local_now();
                if self.clock.apply_sample(client_time, server_time, received) {
                    debug!(
                        offset = self.clock.offset(),
                        rtt = ?self.clock.best_rtt(),
                        "Clock offset updated"
                    );
                }
            }
            NetMsg::KartRemoved { kart } => {
                self.departed.insert(kart);
                if self.remotes.remove(&kart).is_some() {
                    info!(kart = ?kart, "Remote kart removed");
                }
            }
            NetMsg::Disconnect { reason } => {
                info!(reason = %reason, "Disconnected from server");
                self.state = ClientState::Disconnected;
            }
            other => {
                debug!(?other, "Unhandled reliable message");
            }
        }
    }

    fn recv_snapshots(&mut self) -> anyhow::Result<()> {
        for msg in self.unreliable.drain()? {
            match msg {
                NetMsg::Snapshot(snapshot) => self.apply_snapshot(&snapshot),
                other => debug!(?other, "Unhandled datagram"),
            }
        }
        Ok(())
    }

    fn apply_snapshot(&mut self, snapshot: &StateSnapshot) {
        self.snapshots_received += 1;

        if snapshot.kart == self.kart {
            self.own.on_snapshot_received(&snapshot.state);
            return;
        }
        if self.departed.contains(&snapshot.kart) {
            return;
        }

        let replicator = self.remotes.entry(snapshot.kart).or_insert_with(|| {
            debug!(kart = ?snapshot.kart, "Remote kart appeared");
            Replicator::Observing(RemoteInterpolator::new(snapshot.state.vehicle_state()))
        });
        replicator.on_snapshot_received(&snapshot.state);
    }

    /// Runs one client tick: network in, prediction, move out, remote
    /// interpolation. Returns the move sent this tick, if any.
    pub async fn tick(&mut self, input: InputState) -> anyhow::Result<Option<Move>> {
        self.poll_network().await?;
        if !self.is_connected() {
            return Ok(None);
        }

        let dt = self.cfg.tick_dt();
        let sent = self.own.on_tick(dt, input, &self.clock);
        if let Some(mv) = sent {
            self.writer.send(&NetMsg::Move(mv)).await?;
        }

        for remote in self.remotes.values_mut() {
            remote.on_tick(dt, InputState::default(), &self.clock);
        }

        self.since_time_sync += dt;
        if self.since_time_sync >= TIME_SYNC_PERIOD {
            self.since_time_sync = 0.0;
            self.request_time_sync().await?;
        }

        self.tick += 1;
        Ok(sent)
    }

    /// Asks the server for its session time.
    pub async fn request_time_sync(&mut self) -> anyhow::Result<()> {
        let client_time = self.clock.local_now();
        self.writer
            .send(&NetMsg::TimeRequest { client_time })
            .await
    }

    /// Tells the server we are leaving.
    pub async fn disconnect(&mut self, reason: &str) -> anyhow::Result<()> {
        if self.is_connected() {
            self.writer
                .send(&NetMsg::Disconnect {
                    reason: reason.to_string(),
                })
                .await?;
            self.state = ClientState::Disconnected;
        }
        Ok(())
    }

    /// Session time as this client currently estimates it.
    pub fn session_time(&self) -> f64 {
        self.clock.now()
    }
}

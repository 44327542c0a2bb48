//! Socket-free test harness.
//!
//! Wires an [`Authority`], a [`Predictor`] and a [`RemoteInterpolator`]
//! together through conditioned in-memory links so replication can be
//! exercised under latency, jitter and loss with a fixed seed.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use kart_shared::{
    clock::{ManualClock, SessionClock},
    input::InputState,
    movement::{Move, MovementSimulator, VehicleState},
    replication::{Authority, MoveRejected, Predictor, RemoteInterpolator, ServerState, ValidationPolicy},
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::trace;

/// Conditions applied to one direction of a link, in ticks.
#[derive(Debug, Clone, Copy)]
pub struct LinkConditionerConfig {
    pub latency: u64,
    /// Extra random delay in `0..=jitter` ticks.
    pub jitter: u64,
    /// Chance in `[0, 1]` that a message is dropped.
    pub loss: f64,
    /// Keep send order even when jitter would reorder.
    pub ordered: bool,
}

impl LinkConditionerConfig {
    pub const PERFECT: Self = Self {
        latency: 0,
        jitter: 0,
        loss: 0.0,
        ordered: true,
    };

    /// A reliable stream: delayed but never lost or reordered.
    pub fn reliable(latency: u64, jitter: u64) -> Self {
        Self {
            latency,
            jitter,
            loss: 0.0,
            ordered: true,
        }
    }

    /// A datagram link: may drop and reorder.
    pub fn datagram(latency: u64, jitter: u64, loss: f64) -> Self {
        Self {
            latency,
            jitter,
            loss: loss.clamp(0.0, 1.0),
            ordered: false,
        }
    }
}

/// One direction of a simulated link.
pub struct LinkConditioner<T> {
    config: LinkConditionerConfig,
    rng: StdRng,
    // (deliver_at, seq) keeps delivery stable among messages due together.
    queue: BinaryHeap<Reverse<(u64, u64)>>,
    payloads: Vec<Option<T>>,
    last_deliver_at: u64,
    dropped: u64,
}

impl<T> LinkConditioner<T> {
    pub fn new(config: LinkConditionerConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            queue: BinaryHeap::new(),
            payloads: Vec::new(),
            last_deliver_at: 0,
            dropped: 0,
        }
    }

    pub fn send(&mut self, now: u64, msg: T) {
        if self.config.loss > 0.0 && self.rng.gen_bool(self.config.loss) {
            self.dropped += 1;
            return;
        }
        let jitter = if self.config.jitter > 0 {
            self.rng.gen_range(0..=self.config.jitter)
        } else {
            0
        };
        let mut deliver_at = now + self.config.latency + jitter;
        if self.config.ordered {
            deliver_at = deliver_at.max(self.last_deliver_at);
            self.last_deliver_at = deliver_at;
        }
        let seq = self.payloads.len() as u64;
        self.payloads.push(Some(msg));
        self.queue.push(Reverse((deliver_at, seq)));
    }

    /// Everything due at or before `now`.
    pub fn deliver(&mut self, now: u64) -> Vec<T> {
        let mut out = Vec::new();
        while let Some(Reverse((at, seq))) = self.queue.peek().copied() {
            if at > now {
                break;
            }
            self.queue.pop();
            if let Some(msg) = self.payloads[seq as usize].take() {
                out.push(msg);
            }
        }
        out
    }

    /// Everything still in flight regardless of delay.
    pub fn flush(&mut self) -> Vec<T> {
        self.deliver(u64::MAX)
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Session shape for [`LoopbackSession`].
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub dt: f32,
    /// Ticks between authority snapshots.
    pub snapshot_every: u64,
    pub moves: LinkConditionerConfig,
    pub to_controller: LinkConditionerConfig,
    pub to_observer: LinkConditionerConfig,
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            snapshot_every: 6,
            moves: LinkConditionerConfig::PERFECT,
            to_controller: LinkConditionerConfig::PERFECT,
            to_observer: LinkConditionerConfig::PERFECT,
            seed: 7,
        }
    }
}

/// One kart seen from all three roles at once.
pub struct LoopbackSession {
    pub clock: ManualClock,
    pub authority: Authority,
    pub predictor: Predictor,
    pub observer: RemoteInterpolator,
    cfg: SessionConfig,
    moves: LinkConditioner<Move>,
    to_controller: LinkConditioner<ServerState>,
    to_observer: LinkConditioner<ServerState>,
    tick: u64,
    max_correction: f32,
}

impl LoopbackSession {
    pub fn new(cfg: SessionConfig, spawn: VehicleState) -> Self {
        let sim = MovementSimulator::default();
        Self::with_simulators(cfg, spawn, sim.clone(), sim)
    }

    /// The authority and predictor may run different models to force
    /// corrections.
    pub fn with_simulators(
        cfg: SessionConfig,
        spawn: VehicleState,
        authority_sim: MovementSimulator,
        client_sim: MovementSimulator,
    ) -> Self {
        Self {
            clock: ManualClock::new(0.0),
            authority: Authority::new(authority_sim, spawn, ValidationPolicy::Strict),
            predictor: Predictor::new(client_sim, spawn, 1024),
            observer: RemoteInterpolator::new(spawn),
            moves: LinkConditioner::new(cfg.moves, cfg.seed),
            to_controller: LinkConditioner::new(cfg.to_controller, cfg.seed.wrapping_add(1)),
            to_observer: LinkConditioner::new(cfg.to_observer, cfg.seed.wrapping_add(2)),
            cfg,
            tick: 0,
            max_correction: 0.0,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Largest reconciliation jump seen so far (m).
    pub fn max_correction(&self) -> f32 {
        self.max_correction
    }

    pub fn snapshots_dropped(&self) -> u64 {
        self.to_controller.dropped() + self.to_observer.dropped()
    }

    /// One fixed step on every peer.
    pub fn step(&mut self, input: InputState) -> Result<(), MoveRejected> {
        let dt = self.cfg.dt;
        self.clock.advance(f64::from(dt));

        if let Some(mv) = self.predictor.on_tick(dt, input, &self.clock) {
            self.moves.send(self.tick, mv);
        }
        for mv in self.moves.deliver(self.tick) {
            self.authority.submit_move(mv)?;
        }

        if self.tick % self.cfg.snapshot_every.max(1) == 0 {
            if let Some(snapshot) = self.authority.take_snapshot() {
                self.to_controller.send(self.tick, snapshot);
                self.to_observer.send(self.tick, snapshot);
            }
        }
        for snapshot in self.to_controller.deliver(self.tick) {
            self.apply_to_predictor(&snapshot);
        }
        for snapshot in self.to_observer.deliver(self.tick) {
            self.observer.on_snapshot_received(&snapshot);
        }
        self.observer.on_tick(dt);

        trace!(tick = self.tick, now = self.clock.now(), "Session step");
        self.tick += 1;
        Ok(())
    }

    fn apply_to_predictor(&mut self, snapshot: &ServerState) {
        if self.predictor.on_snapshot_received(snapshot) {
            self.max_correction = self.max_correction.max(self.predictor.last_correction());
        }
    }

    /// Stops input, lets every move reach the authority and hands the final
    /// snapshot to the controller over a clean link.
    pub fn settle(&mut self) -> Result<ServerState, MoveRejected> {
        for mv in self.moves.flush() {
            self.authority.submit_move(mv)?;
        }
        let last = *self.authority.server_state();
        self.apply_to_predictor(&last);
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_link_never_reorders() {
        let mut link = LinkConditioner::new(LinkConditionerConfig::reliable(2, 5), 1);
        for i in 0..50u32 {
            link.send(u64::from(i), i);
        }
        let got = link.flush();
        assert_eq!(got, (0..50u32).collect::<Vec<_>>());
    }

    #[test]
    fn latency_holds_messages_back() {
        let mut link = LinkConditioner::new(LinkConditionerConfig::reliable(3, 0), 1);
        link.send(0, "a");
        assert!(link.deliver(2).is_empty());
        assert_eq!(link.deliver(3), vec!["a"]);
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn total_loss_drops_everything() {
        let mut link = LinkConditioner::new(LinkConditionerConfig::datagram(0, 0, 1.0), 1);
        for i in 0..10 {
            link.send(i, i);
        }
        assert!(link.flush().is_empty());
        assert_eq!(link.dropped(), 10);
    }
}

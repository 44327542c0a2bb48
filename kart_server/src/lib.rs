//! `kart_server`
//!
//! Authoritative side of kart replication:
//! - Fixed timestep loop
//! - One [`Authority`](kart_shared::replication::Authority) per kart
//! - Applies client `Move`s in arrival order
//! - Sends `Snapshot`s at the configured replication rate
//!
//! Networking model:
//! - TCP: handshake, moves, clock sync, kart removal
//! - UDP: snapshots

pub mod server;

pub use server::KartServer;

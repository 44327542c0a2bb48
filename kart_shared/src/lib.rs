//! `kart_shared`
//!
//! Shared libraries used by both client and server.
//!
//! Design goals:
//! - Deterministic movement: the same `(state, move)` steps identically on
//!   every peer.
//! - Roles as data: authority, prediction and interpolation are plain
//!   structs driven by explicit `on_tick` / `on_move_received` /
//!   `on_snapshot_received` calls.
//! - Collaborators (collision, input, clock) injected through traits.
//! - No `unsafe`.

pub mod clock;
pub mod config;
pub mod input;
pub mod math;
pub mod movement;
pub mod net;
pub mod physics;
pub mod replication;
pub mod spline;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::input::*;
    pub use crate::math::*;
    pub use crate::movement::*;
    pub use crate::net::*;
    pub use crate::physics::*;
    pub use crate::replication::*;
}
